//! Fee and minimum-ADA arithmetic.
//!
//! ```text
//! min_fee = min_fee_a * size(tx with fake vkey witnesses) + min_fee_b
//!         + ceil(mem_price * mem + step_price * steps)
//!         + ceil(ref_script_cost_per_byte * reference_script_bytes)
//!
//! min_ada(output) = (160 + size(output)) * coins_per_utxo_byte
//! ```
//!
//! Output size depends on the coin it carries, so minimum ADA is computed as a small fixpoint.

use std::collections::BTreeSet;

use crate::encoding::TxCodec;
use crate::error::BalanceTxError;
use crate::schema::hash::PubKeyHash;
use crate::schema::params::{ExUnitPrices, ProtocolParameters};
use crate::schema::types::{
    Certificate, ExUnits, Transaction, TransactionOutput, UtxoMap, VkeyWitness,
};
use crate::schema::value::{AssetClass, Coin, ValueError};

/// Bytes the ledger charges for a UTxO entry on top of the serialized output.
pub const UTXO_ENTRY_OVERHEAD: u64 = 160;

const FAKE_VKEY_LEN: usize = 32;
const FAKE_SIGNATURE_LEN: usize = 64;
const MIN_ADA_ROUNDS: usize = 8;

fn lovelace_overflow() -> BalanceTxError {
    BalanceTxError::Value(ValueError::Overflow {
        asset: AssetClass::Lovelace,
    })
}

fn len_u64(len: usize) -> Result<u64, BalanceTxError> {
    u64::try_from(len).map_err(|_| lovelace_overflow())
}

/// Minimum lovelace `output` must carry.
pub fn min_ada_required<C: TxCodec>(
    codec: &C,
    params: &ProtocolParameters,
    output: &TransactionOutput,
) -> Result<Coin, BalanceTxError> {
    let failed = |reason: String| BalanceTxError::UtxoMinAdaValueCalculationFailed(reason);
    let mut sized = output.clone();

    for _ in 0..MIN_ADA_ROUNDS {
        let size = codec
            .encode_output(&sized)
            .map_err(|error| failed(error.to_string()))?
            .len();
        let required = u64::try_from(size)
            .ok()
            .and_then(|size| size.checked_add(UTXO_ENTRY_OVERHEAD))
            .and_then(|bytes| bytes.checked_mul(params.coins_per_utxo_byte))
            .ok_or_else(|| failed(format!("overflow for output of {size} bytes")))?;

        if sized.amount.coin.lovelace() >= required {
            return Ok(Coin(required));
        }
        sized.amount.coin = Coin(required);
    }

    Err(failed(format!(
        "no stable minimum after {MIN_ADA_ROUNDS} rounds for output to {}",
        output.address
    )))
}

/// Raise the coin of `output` to its minimum ADA. Returns whether it changed.
pub fn raise_to_min_ada<C: TxCodec>(
    codec: &C,
    params: &ProtocolParameters,
    output: &mut TransactionOutput,
) -> Result<bool, BalanceTxError> {
    let required = min_ada_required(codec, params, output)?;
    if output.amount.coin >= required {
        return Ok(false);
    }

    output.amount.coin = required;
    Ok(true)
}

/// Key hashes whose signatures the transaction needs: explicit required signers, owners of
/// spent and collateral pub-key outputs, pub-key credentials of certificates and withdrawals,
/// and keys named by attached native scripts.
#[must_use]
pub fn implied_signers(transaction: &Transaction, utxos: &UtxoMap) -> BTreeSet<PubKeyHash> {
    let body = &transaction.body;
    let mut signers = body.required_signers.clone();

    signers.extend(
        body.inputs
            .iter()
            .chain(&body.collateral)
            .filter_map(|input| utxos.get(input))
            .filter_map(|output| output.address.payment.pubkey_hash()),
    );
    signers.extend(
        body.certificates
            .iter()
            .filter(|certificate| !matches!(certificate, Certificate::StakeRegistration(_)))
            .filter_map(|certificate| certificate.credential().pubkey_hash()),
    );
    signers.extend(
        body.withdrawals
            .keys()
            .filter_map(|address| address.credential.pubkey_hash()),
    );
    for script in &transaction.witness_set.native_scripts {
        signers.extend(script.pubkey_hashes());
    }

    signers
}

/// Copy of `transaction` carrying one placeholder vkey witness per implied signer, so its
/// size matches the signed transaction.
#[must_use]
pub fn with_fake_witnesses(transaction: &Transaction, utxos: &UtxoMap) -> Transaction {
    let mut sized = transaction.clone();
    let signers = implied_signers(transaction, utxos).len();
    let fake = VkeyWitness {
        vkey: vec![0; FAKE_VKEY_LEN],
        signature: vec![0; FAKE_SIGNATURE_LEN],
    };
    sized.witness_set.vkeys = vec![fake; signers.max(transaction.witness_set.vkeys.len())];
    sized
}

/// `⌈mem_price · mem + step_price · steps⌉`, computed exactly.
#[must_use]
pub fn script_execution_fee(prices: &ExUnitPrices, ex_units: ExUnits) -> Option<u64> {
    let mem = &prices.mem_price;
    let steps = &prices.step_price;
    if mem.denominator == 0 || steps.denominator == 0 {
        return None;
    }

    let numerator = u128::from(ex_units.mem)
        .checked_mul(u128::from(mem.numerator))?
        .checked_mul(u128::from(steps.denominator))?
        .checked_add(
            u128::from(ex_units.steps)
                .checked_mul(u128::from(steps.numerator))?
                .checked_mul(u128::from(mem.denominator))?,
        )?;
    let denominator = u128::from(mem.denominator) * u128::from(steps.denominator);
    u64::try_from(numerator.div_ceil(denominator)).ok()
}

/// Total serialized size of reference scripts carried by spent and referenced outputs.
pub fn reference_script_bytes<C: TxCodec>(
    codec: &C,
    transaction: &Transaction,
    utxos: &UtxoMap,
) -> Result<u64, BalanceTxError> {
    let body = &transaction.body;
    body.inputs
        .iter()
        .chain(&body.reference_inputs)
        .filter_map(|input| utxos.get(input))
        .filter_map(|output| output.script_ref.as_ref())
        .try_fold(0u64, |total, script| {
            let size = len_u64(codec.script_size(script)?)?;
            total.checked_add(size).ok_or_else(lovelace_overflow)
        })
}

/// Sum of execution budgets over the witness-set redeemers.
pub fn total_ex_units(transaction: &Transaction) -> Result<ExUnits, BalanceTxError> {
    transaction
        .witness_set
        .redeemers
        .iter()
        .try_fold(ExUnits::default(), |total, redeemer| {
            total.checked_add(redeemer.ex_units)
        })
        .ok_or_else(lovelace_overflow)
}

/// Minimum fee `transaction` must declare once signed. `utxos` resolves spent and referenced
/// outputs for signer and reference-script accounting.
pub fn min_fee<C: TxCodec>(
    codec: &C,
    params: &ProtocolParameters,
    transaction: &Transaction,
    utxos: &UtxoMap,
) -> Result<Coin, BalanceTxError> {
    let sized = with_fake_witnesses(transaction, utxos);
    let size = len_u64(codec.encode_transaction(&sized)?.len())?;

    let size_fee = params
        .min_fee_a
        .checked_mul(size)
        .and_then(|fee| fee.checked_add(params.min_fee_b))
        .ok_or_else(lovelace_overflow)?;
    let script_fee = script_execution_fee(&params.prices, total_ex_units(transaction)?)
        .ok_or_else(lovelace_overflow)?;
    let ref_script_fee = params
        .min_fee_ref_script_cost_per_byte
        .mul_ceil(reference_script_bytes(codec, transaction, utxos)?)
        .ok_or_else(lovelace_overflow)?;

    let total = size_fee
        .checked_add(script_fee)
        .and_then(|fee| fee.checked_add(ref_script_fee))
        .ok_or_else(lovelace_overflow)?;
    Ok(Coin(total))
}
