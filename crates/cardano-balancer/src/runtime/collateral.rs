//! Collateral selection for transactions that run Plutus scripts.
//!
//! Required collateral is `ceil(fee * collateral_percentage / 100)`. Candidates must be locked
//! by a key and carry no reference script. Pure-ADA outputs are preferred, then larger coin,
//! then input order. Any excess goes back through a collateral return output, which therefore
//! has to satisfy minimum ADA on its own.

use std::collections::BTreeSet;

use crate::encoding::TxCodec;
use crate::error::BalanceTxError;
use crate::runtime::fees::min_ada_required;
use crate::schema::params::ProtocolParameters;
use crate::schema::types::{Address, TransactionInput, TransactionOutput, UtxoMap};
use crate::schema::value::{Coin, Value};

/// Collateral fields to set on the transaction body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct CollateralSelection {
    pub(super) inputs: BTreeSet<TransactionInput>,
    pub(super) total: Coin,
    pub(super) return_output: Option<TransactionOutput>,
}

pub(super) fn required_collateral(fee: Coin, percentage: u16) -> Option<Coin> {
    let scaled = u128::from(fee.0) * u128::from(percentage);
    u64::try_from(scaled.div_ceil(100)).ok().map(Coin)
}

fn eligible(output: &TransactionOutput) -> bool {
    !output.address.is_script_locked() && output.script_ref.is_none()
}

fn ordered_candidates(candidates: &UtxoMap) -> Vec<(&TransactionInput, &TransactionOutput)> {
    let mut ordered = candidates
        .iter()
        .filter(|(_, output)| eligible(output))
        .collect::<Vec<_>>();
    ordered.sort_by(|(left_input, left), (right_input, right)| {
        right
            .amount
            .is_pure_ada()
            .cmp(&left.amount.is_pure_ada())
            .then_with(|| right.amount.coin.cmp(&left.amount.coin))
            .then_with(|| left_input.cmp(right_input))
    });
    ordered
}

fn no_collateral_diagnostics(
    required: Coin,
    candidates: &[(&TransactionInput, &TransactionOutput)],
    max_inputs: usize,
) -> String {
    serde_json::json!({
        "required_lovelace": required.0,
        "max_collateral_inputs": max_inputs,
        "candidates": candidates
            .iter()
            .map(|(input, output)| serde_json::json!({
                "input": input.to_string(),
                "lovelace": output.amount.coin.0,
                "pure_ada": output.amount.is_pure_ada(),
            }))
            .collect::<Vec<_>>(),
    })
    .to_string()
}

fn collateral_return<C: TxCodec>(
    codec: &C,
    params: &ProtocolParameters,
    excess: Value,
    address: Address,
) -> Result<Option<TransactionOutput>, BalanceTxError> {
    if excess.is_zero() {
        return Ok(None);
    }

    let output = TransactionOutput::new(address, excess);
    let required = min_ada_required(codec, params, &output).map_err(|error| {
        BalanceTxError::CollateralReturnMinAdaValueCalcError(error.to_string())
    })?;

    if output.amount.coin < required {
        return Err(BalanceTxError::CollateralReturnError(format!(
            "return of {} lovelace is below its minimum of {required}",
            output.amount.coin
        )));
    }

    Ok(Some(output))
}

/// Pick collateral covering `fee` from `candidates`, returning the excess to `return_address`.
pub(super) fn select_collateral<C: TxCodec>(
    codec: &C,
    params: &ProtocolParameters,
    fee: Coin,
    candidates: &UtxoMap,
    return_address: Address,
) -> Result<CollateralSelection, BalanceTxError> {
    let required = required_collateral(fee, params.collateral_percentage).ok_or_else(|| {
        BalanceTxError::CouldNotGetCollateral(format!("collateral for fee {fee} overflows"))
    })?;
    let max_inputs = usize::from(params.max_collateral_inputs);
    let ordered = ordered_candidates(candidates);

    let mut inputs = BTreeSet::new();
    let mut gathered = Value::zero();
    let mut last_return_error = None;

    for (input, output) in ordered.iter().take(max_inputs) {
        inputs.insert(**input);
        gathered = gathered.checked_add(&output.amount)?;
        if gathered.coin < required {
            continue;
        }

        let mut excess = gathered.clone();
        excess.coin = gathered.coin.checked_sub(required)?;
        match collateral_return(codec, params, excess, return_address) {
            Ok(return_output) => {
                tracing::debug!(
                    inputs = inputs.len(),
                    required = required.0,
                    with_return = return_output.is_some(),
                    "selected collateral"
                );
                return Ok(CollateralSelection {
                    inputs,
                    total: required,
                    return_output,
                });
            }
            Err(error @ BalanceTxError::CollateralReturnError(_)) => {
                last_return_error = Some(error);
            }
            Err(error) => return Err(error),
        }
    }

    if let Some(error) = last_return_error {
        return Err(error);
    }

    Err(BalanceTxError::CouldNotGetCollateral(
        no_collateral_diagnostics(required, &ordered, max_inputs),
    ))
}
