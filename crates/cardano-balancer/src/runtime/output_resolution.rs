//! Balance equation and change materialization.
//!
//! One balancing pass is an equation over [`Value`]s:
//!
//! ```text
//! supply = inputs + minted + withdrawals + key_deposit * deregistrations
//! demand = outputs + fee + key_deposit * registrations + burned
//! ```
//!
//! Per asset the pass either has a deficit (`demand > supply`), which input selection must
//! close, or a residual (`supply > demand`), which becomes change. Change is split into bundles
//! of at most `max_change_token_quantity` per token and every bundle carries its own minimum
//! ADA. When the residual lovelace cannot fund those minimums, the gap is reported back as a
//! lovelace deficit so the next pass selects more.
//!
//! [`assert_exact_value_conservation`] is the final gate before a transaction is returned.

use std::collections::{BTreeMap, BTreeSet};

use crate::encoding::TxCodec;
use crate::error::BalanceTxError;
use crate::runtime::fees::min_ada_required;
use crate::schema::params::ProtocolParameters;
use crate::schema::types::{
    Address, Certificate, OutputDatum, TransactionBody, TransactionOutput, UtxoMap,
};
use crate::schema::value::{AssetClass, Coin, MultiAsset, Value, ValueError};

/// Result of one supply-vs-demand comparison pass.
#[derive(Debug, Default)]
pub(super) struct BalanceDelta {
    /// Positive entries where `demand > supply`.
    pub(super) deficit_by_asset: BTreeMap<AssetClass, u64>,
    /// Component-wise `max(supply - demand, 0)`.
    pub(super) residual: Value,
}

/// Change outputs for one residual, plus the lovelace they still lack.
#[derive(Debug, Default)]
pub(super) struct ChangePlan {
    pub(super) outputs: Vec<TransactionOutput>,
    pub(super) lovelace_shortfall: u64,
}

fn deposit_total(
    certificates: &[Certificate],
    key_deposit: Coin,
    matches: fn(&Certificate) -> bool,
) -> Result<Coin, ValueError> {
    certificates
        .iter()
        .filter(|certificate| matches(certificate))
        .try_fold(Coin::ZERO, |total, _| total.checked_add(key_deposit))
}

/// Aggregate total supply: spent outputs, minted tokens, withdrawals and deposit refunds.
pub(super) fn aggregate_supply(
    body: &TransactionBody,
    utxos: &UtxoMap,
    params: &ProtocolParameters,
) -> Result<Value, BalanceTxError> {
    let mut supply = Value::zero();

    for input in &body.inputs {
        let output = utxos
            .get(input)
            .ok_or(BalanceTxError::UtxoLookupFailedFor(*input))?;
        supply = supply.checked_add(&output.amount)?;
    }

    let (minted, _) = body.mint.split()?;
    supply = supply.checked_add(&minted)?;

    for amount in body.withdrawals.values() {
        supply.coin = supply.coin.checked_add(*amount)?;
    }

    let refunds = deposit_total(&body.certificates, params.key_deposit, |certificate| {
        matches!(certificate, Certificate::StakeDeregistration(_))
    })?;
    supply.coin = supply.coin.checked_add(refunds)?;

    Ok(supply)
}

/// Aggregate total demand: outputs, fee, new deposits and burned tokens.
pub(super) fn aggregate_demand(
    body: &TransactionBody,
    params: &ProtocolParameters,
) -> Result<Value, BalanceTxError> {
    let mut demand = Value::from(body.fee);

    for output in &body.outputs {
        demand = demand.checked_add(&output.amount)?;
    }

    let (_, burned) = body.mint.split()?;
    demand = demand.checked_add(&burned)?;

    let deposits = deposit_total(&body.certificates, params.key_deposit, |certificate| {
        matches!(certificate, Certificate::StakeRegistration(_))
    })?;
    demand.coin = demand.coin.checked_add(deposits)?;

    Ok(demand)
}

/// Compute per-asset deficits and the residual from supply and demand.
pub(super) fn compute_balance_delta(supply: &Value, demand: &Value) -> BalanceDelta {
    BalanceDelta {
        deficit_by_asset: supply.shortfall_against(demand),
        residual: supply.saturating_sub(demand),
    }
}

/// Split native tokens into bundles holding at most `max_quantity` of any one token.
///
/// Bundle `i` carries chunk `i` of every token, so the number of bundles is set by the token
/// with the largest quantity.
pub(super) fn split_change_assets(
    assets: &MultiAsset,
    max_quantity: Option<u64>,
) -> Result<Vec<MultiAsset>, ValueError> {
    if assets.is_empty() {
        return Ok(Vec::new());
    }

    let Some(max_quantity) = max_quantity.filter(|max| *max > 0) else {
        return Ok(vec![assets.clone()]);
    };

    let mut bundles: Vec<MultiAsset> = Vec::new();
    for (policy, name, quantity) in assets.iter() {
        let mut remaining = quantity;
        let mut chunk_index = 0;
        while remaining > 0 {
            let chunk = remaining.min(max_quantity);
            if bundles.len() == chunk_index {
                bundles.push(MultiAsset::new());
            }
            bundles[chunk_index].add(*policy, name.clone(), chunk)?;
            remaining -= chunk;
            chunk_index += 1;
        }
    }

    Ok(bundles)
}

/// Turn a residual into change outputs at `address`.
///
/// Every output gets its minimum ADA; the leftover lovelace goes to the first output. A zero
/// residual yields no change at all.
pub(super) fn plan_change<C: TxCodec>(
    codec: &C,
    params: &ProtocolParameters,
    residual: &Value,
    address: Address,
    datum: &OutputDatum,
    max_token_quantity: Option<u64>,
) -> Result<ChangePlan, BalanceTxError> {
    if residual.is_zero() {
        return Ok(ChangePlan::default());
    }

    let mut bundles = split_change_assets(&residual.assets, max_token_quantity)?;
    if bundles.is_empty() {
        bundles.push(MultiAsset::new());
    }

    let mut outputs = bundles
        .into_iter()
        .map(|assets| {
            TransactionOutput::new(address, Value::new(Coin::ZERO, assets))
                .with_datum(datum.clone())
        })
        .collect::<Vec<_>>();

    let mut required = Coin::ZERO;
    for output in &mut outputs {
        output.amount.coin = min_ada_required(codec, params, output)?;
        required = required.checked_add(output.amount.coin)?;
    }

    if residual.coin < required {
        return Ok(ChangePlan {
            outputs,
            lovelace_shortfall: required.0 - residual.coin.0,
        });
    }

    let leftover = residual.coin.checked_sub(required)?;
    let mut lovelace_shortfall = 0;
    if let Some(first) = outputs.first_mut() {
        first.amount.coin = first.amount.coin.checked_add(leftover)?;
        // a larger coin can widen the encoded output
        let first_required = min_ada_required(codec, params, first)?;
        lovelace_shortfall = first_required.0.saturating_sub(first.amount.coin.0);
    }

    Ok(ChangePlan {
        outputs,
        lovelace_shortfall,
    })
}

/// Final safety check asserting `supply[a] == demand[a]` for every asset `a`.
pub(super) fn assert_exact_value_conservation(
    body: &TransactionBody,
    utxos: &UtxoMap,
    params: &ProtocolParameters,
) -> Result<(), BalanceTxError> {
    let supply = aggregate_supply(body, utxos, params)?;
    let demand = aggregate_demand(body, params)?;

    let mut all_assets = BTreeSet::new();
    all_assets.extend(supply.components().into_iter().map(|(asset, _)| asset));
    all_assets.extend(demand.components().into_iter().map(|(asset, _)| asset));

    let mismatches = all_assets
        .into_iter()
        .filter_map(|asset| {
            let supplied = supply.quantity_of(&asset);
            let demanded = demand.quantity_of(&asset);
            (supplied != demanded).then_some((asset, supplied, demanded))
        })
        .collect::<Vec<_>>();

    let Some((asset, supplied, demanded)) = mismatches.first().cloned() else {
        return Ok(());
    };

    tracing::error!(
        mismatches = ?mismatches,
        "value conservation violated after balancing"
    );

    Err(BalanceTxError::InsufficientUtxoBalanceToCoverAsset {
        asset,
        missing: supplied.abs_diff(demanded),
    })
}

/// Reject any output carrying less than its minimum ADA.
pub(super) fn assert_outputs_meet_min_ada<C: TxCodec>(
    codec: &C,
    params: &ProtocolParameters,
    outputs: &[TransactionOutput],
) -> Result<(), BalanceTxError> {
    for (index, output) in outputs.iter().enumerate() {
        let required = min_ada_required(codec, params, output)?;
        if output.amount.coin < required {
            return Err(BalanceTxError::UtxoMinAdaValueCalculationFailed(format!(
                "output {index} carries {} lovelace, below its minimum of {required}",
                output.amount.coin
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::BincodeCodec;
    use crate::schema::hash::{Hash28, Hash32};
    use crate::schema::types::{Credential, NetworkId, RewardAddress, TransactionInput};
    use crate::schema::value::AssetName;

    fn input(byte: u8) -> TransactionInput {
        TransactionInput::new(Hash32::new([byte; 32]), 0)
    }

    fn wallet_address() -> Address {
        Address::enterprise(NetworkId::Testnet, Credential::PubKey(Hash28::new([1; 28])))
    }

    fn token(tag: u8) -> AssetClass {
        AssetClass::token(Hash28::new([tag; 28]), AssetName::new(vec![tag]).expect("name"))
    }

    fn tokens(entries: &[(u8, u64)]) -> MultiAsset {
        let mut assets = MultiAsset::new();
        for (tag, quantity) in entries {
            assets
                .add(Hash28::new([*tag; 28]), AssetName::new(vec![*tag]).expect("name"), *quantity)
                .expect("add");
        }
        assets
    }

    fn params() -> ProtocolParameters {
        ProtocolParameters::mainnet_defaults()
    }

    #[test]
    fn exact_balance_has_no_deficit_or_residual() {
        let supply = Value::new(Coin(100), tokens(&[(2, 5)]));
        let delta = compute_balance_delta(&supply, &supply.clone());

        assert!(delta.deficit_by_asset.is_empty());
        assert!(delta.residual.is_zero());
    }

    #[test]
    fn deficits_and_residuals_are_split_per_asset() {
        let supply = Value::new(Coin(50), tokens(&[(2, 9)]));
        let demand = Value::new(Coin(65), tokens(&[(2, 4), (3, 1)]));

        let delta = compute_balance_delta(&supply, &demand);

        assert_eq!(
            delta.deficit_by_asset,
            BTreeMap::from([(AssetClass::Lovelace, 15), (token(3), 1)])
        );
        assert_eq!(delta.residual, Value::new(Coin::ZERO, tokens(&[(2, 5)])));
    }

    #[test]
    fn supply_and_demand_include_deposits_mint_and_withdrawals() {
        let mut params = params();
        params.key_deposit = Coin(2_000_000);

        let mut body = TransactionBody::default();
        body.inputs.insert(input(1));
        body.fee = Coin(200_000);
        body.mint
            .add(Hash28::new([5; 28]), AssetName::new(b"m".to_vec()).expect("name"), 7)
            .expect("mint");
        body.mint
            .add(Hash28::new([6; 28]), AssetName::new(b"b".to_vec()).expect("name"), -3)
            .expect("burn");
        body.withdrawals.insert(
            RewardAddress {
                network: NetworkId::Testnet,
                credential: Credential::PubKey(Hash28::new([1; 28])),
            },
            Coin(1_000),
        );
        body.certificates.extend([
            Certificate::StakeRegistration(Credential::PubKey(Hash28::new([1; 28]))),
            Certificate::StakeDeregistration(Credential::PubKey(Hash28::new([2; 28]))),
            Certificate::StakeDeregistration(Credential::PubKey(Hash28::new([3; 28]))),
        ]);

        let utxos = UtxoMap::from([(
            input(1),
            TransactionOutput::new(wallet_address(), Value::lovelace(10_000_000)),
        )]);

        let supply = aggregate_supply(&body, &utxos, &params).expect("supply");
        let demand = aggregate_demand(&body, &params).expect("demand");

        assert_eq!(supply.coin, Coin(10_000_000 + 1_000 + 4_000_000));
        assert_eq!(supply.assets.token_count(), 1);
        assert_eq!(
            supply
                .assets
                .get(&Hash28::new([5; 28]), &AssetName::new(b"m".to_vec()).expect("name")),
            7
        );
        assert_eq!(demand.coin, Coin(200_000 + 2_000_000));
        assert_eq!(demand.assets.token_count(), 1);
    }

    #[test]
    fn unresolvable_input_fails_supply_aggregation() {
        let mut body = TransactionBody::default();
        body.inputs.insert(input(9));

        let err = aggregate_supply(&body, &UtxoMap::new(), &params()).expect_err("missing utxo");
        match err {
            BalanceTxError::UtxoLookupFailedFor(missing) => assert_eq!(missing, input(9)),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn change_tokens_are_split_into_bounded_bundles() {
        let bundles =
            split_change_assets(&tokens(&[(1, 250), (2, 40)]), Some(100)).expect("split");

        assert_eq!(bundles.len(), 3);
        assert_eq!(bundles[0], tokens(&[(1, 100), (2, 40)]));
        assert_eq!(bundles[1], tokens(&[(1, 100)]));
        assert_eq!(bundles[2], tokens(&[(1, 50)]));

        let unbounded = split_change_assets(&tokens(&[(1, 250)]), None).expect("split");
        assert_eq!(unbounded, vec![tokens(&[(1, 250)])]);
    }

    #[test]
    fn pure_ada_residual_becomes_one_change_output() {
        let codec = BincodeCodec;
        let residual = Value::lovelace(5_000_000);

        let plan = plan_change(
            &codec,
            &params(),
            &residual,
            wallet_address(),
            &OutputDatum::None,
            None,
        )
        .expect("plan");

        assert_eq!(plan.lovelace_shortfall, 0);
        assert_eq!(plan.outputs.len(), 1);
        assert_eq!(plan.outputs[0].amount, residual);
        assert_eq!(plan.outputs[0].address, wallet_address());
    }

    #[test]
    fn dust_residual_reports_lovelace_shortfall() {
        let codec = BincodeCodec;
        let plan = plan_change(
            &codec,
            &params(),
            &Value::lovelace(10),
            wallet_address(),
            &OutputDatum::None,
            None,
        )
        .expect("plan");

        let required = min_ada_required(&codec, &params(), &plan.outputs[0]).expect("min ada");
        assert_eq!(plan.lovelace_shortfall, required.0 - 10);
    }

    #[test]
    fn token_change_conserves_residual_across_bundles() {
        let codec = BincodeCodec;
        let residual = Value::new(Coin(20_000_000), tokens(&[(1, 3), (2, 1)]));

        let plan = plan_change(
            &codec,
            &params(),
            &residual,
            wallet_address(),
            &OutputDatum::None,
            Some(1),
        )
        .expect("plan");

        assert_eq!(plan.lovelace_shortfall, 0);
        assert_eq!(plan.outputs.len(), 3);
        let total = plan
            .outputs
            .iter()
            .try_fold(Value::zero(), |total, output| total.checked_add(&output.amount))
            .expect("sum");
        assert_eq!(total, residual);
        assert_outputs_meet_min_ada(&codec, &params(), &plan.outputs).expect("min ada");
    }

    #[test]
    fn final_conservation_check_reports_mismatch() {
        let mut body = TransactionBody::default();
        body.inputs.insert(input(1));
        body.fee = Coin(100);
        body.outputs
            .push(TransactionOutput::new(wallet_address(), Value::lovelace(900)));
        let utxos = UtxoMap::from([(
            input(1),
            TransactionOutput::new(wallet_address(), Value::lovelace(1_000)),
        )]);

        assert_exact_value_conservation(&body, &utxos, &params()).expect("balanced");

        body.fee = Coin(90);
        let err = assert_exact_value_conservation(&body, &utxos, &params())
            .expect_err("ten lovelace unaccounted");
        match err {
            BalanceTxError::InsufficientUtxoBalanceToCoverAsset { asset, missing } => {
                assert_eq!(asset, AssetClass::Lovelace);
                assert_eq!(missing, 10);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
