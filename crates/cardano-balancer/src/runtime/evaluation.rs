//! Execution budgets and script integrity hash for the transaction under construction.

use std::collections::{BTreeMap, BTreeSet};

use crate::encoding::TxCodec;
use crate::error::BalanceTxError;
use crate::evaluation::{ExUnitsByPointer, ExUnitsEvaluator};
use crate::runtime::redeemers::index_redeemers;
use crate::schema::params::ProtocolParameters;
use crate::schema::types::{
    Language, Redeemer, Script, Transaction, UnindexedRedeemer, UtxoMap,
};

/// Outputs the evaluator may not know: the draft's used UTxOs plus caller-supplied ones.
///
/// Used UTxOs win on conflict. Every output has to encode, otherwise the evaluator could not
/// be handed it.
pub(super) fn evaluator_utxos<C: TxCodec>(
    codec: &C,
    used_utxos: &UtxoMap,
    additional_utxos: &UtxoMap,
) -> Result<UtxoMap, BalanceTxError> {
    let mut merged = used_utxos.clone();
    for (input, output) in additional_utxos {
        merged.entry(*input).or_insert_with(|| output.clone());
    }

    for (input, output) in &merged {
        codec.encode_output(output).map_err(|error| {
            tracing::debug!(%input, %error, "output cannot be handed to the evaluator");
            BalanceTxError::CouldNotConvertScriptOutputToTxInput(*input)
        })?;
    }

    Ok(merged)
}

/// Copy evaluated budgets onto the purpose-keyed redeemers.
///
/// `indexed` must be the result of indexing `redeemers` against the evaluated body.
pub(super) fn apply_budgets(
    redeemers: &mut [UnindexedRedeemer],
    indexed: &[Redeemer],
    budgets: &ExUnitsByPointer,
) {
    for (redeemer, pointed) in redeemers.iter_mut().zip(indexed) {
        if let Some(ex_units) = budgets.get(&pointed.pointer()) {
            redeemer.ex_units = *ex_units;
        }
    }
}

/// Evaluate `transaction` and write the resulting budgets back into `redeemers` and into the
/// witness set.
pub(super) async fn evaluate_ex_units<E: ExUnitsEvaluator>(
    evaluator: &E,
    transaction: &mut Transaction,
    redeemers: &mut [UnindexedRedeemer],
    additional_utxos: &UtxoMap,
) -> Result<(), BalanceTxError> {
    let indexed = index_redeemers(&transaction.body, redeemers)?;
    transaction.witness_set.redeemers.clone_from(&indexed);

    let budgets = match evaluator.evaluate(transaction, additional_utxos).await {
        Ok(budgets) => budgets,
        Err(failure) => {
            return Err(BalanceTxError::ExUnitsEvaluationFailed {
                transaction: Box::new(transaction.clone()),
                utxos: additional_utxos.clone(),
                failure,
            });
        }
    };

    tracing::debug!(redeemers = indexed.len(), budgets = budgets.len(), "evaluated redeemers");

    apply_budgets(redeemers, &indexed, &budgets);
    transaction.witness_set.redeemers = index_redeemers(&transaction.body, redeemers)?;
    Ok(())
}

/// Plutus languages the transaction executes, from witnesses and reference scripts alike.
pub(super) fn languages_in_use(transaction: &Transaction, utxos: &UtxoMap) -> BTreeSet<Language> {
    let witnessed = transaction
        .witness_set
        .plutus_scripts
        .iter()
        .map(|script| script.language);

    let referenced = transaction
        .body
        .inputs
        .iter()
        .chain(&transaction.body.reference_inputs)
        .filter_map(|input| utxos.get(input)?.script_ref.as_ref())
        .filter_map(|script| match script {
            Script::Plutus(plutus) => Some(plutus.language),
            Script::Native(_) => None,
        });

    witnessed.chain(referenced).collect()
}

/// Set or clear `script_data_hash` so it commits to the current redeemers and datums.
pub(super) fn set_script_data_hash<C: TxCodec>(
    codec: &C,
    params: &ProtocolParameters,
    transaction: &mut Transaction,
    utxos: &UtxoMap,
) -> Result<(), BalanceTxError> {
    let witness_set = &transaction.witness_set;
    if witness_set.redeemers.is_empty() && witness_set.plutus_data.is_empty() {
        transaction.body.script_data_hash = None;
        return Ok(());
    }

    let cost_models = languages_in_use(transaction, utxos)
        .into_iter()
        .filter_map(|language| {
            params
                .cost_models
                .get(&language)
                .map(|model| (language, model.clone()))
        })
        .collect::<BTreeMap<_, _>>();

    let hash = codec.script_data_hash(
        &witness_set.redeemers,
        &witness_set.plutus_data,
        &cost_models,
    )?;
    transaction.body.script_data_hash = Some(hash);
    Ok(())
}
