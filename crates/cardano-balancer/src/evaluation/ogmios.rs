//! Decoder for Ogmios v6 `evaluateTransaction` JSON-RPC responses.
//!
//! Successful responses map to per-pointer budgets. Error code 3010 (script execution
//! failure) carries one entry per failing validator, whose nested codes map to
//! [`ScriptFailure`] variants:
//!
//! | code | failure |
//! |------|---------|
//! | 3011 | `MissingRequiredScripts` |
//! | 3012 | `ValidatorFailed` |
//! | 3013 | `NonScriptInputReferencedByRedeemer` |
//! | 3110 | `ExtraRedeemers` |
//! | 3111 | `MissingRequiredDatums` |
//! | 3115 | `NoCostModelForLanguage` |
//! | 3117 | `UnknownInputReferencedByRedeemer` |
//! | 3161 | `IllFormedExecutionBudget` |
//!
//! Code 3002 maps to `AdditionalUtxoOverlap`. Anything else, including malformed payloads,
//! becomes `UnparsedError` carrying the raw text.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::evaluation::{ExUnitsByPointer, ScriptFailure, TxEvaluationFailure};
use crate::schema::hash::{DatumHash, Hash32};
use crate::schema::types::{ExUnits, RedeemerPointer, RedeemerTag, TransactionInput};

const SCRIPT_EXECUTION_FAILURE: i64 = 3010;
const OVERLAPPING_ADDITIONAL_UTXO: i64 = 3002;

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Vec<EvaluationEntry>>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct EvaluationEntry {
    validator: Validator,
    budget: Budget,
}

#[derive(Debug, Deserialize)]
struct Validator {
    purpose: String,
    index: u32,
}

#[derive(Debug, Deserialize)]
struct Budget {
    memory: u64,
    cpu: u64,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ValidatorError {
    validator: Validator,
    error: RpcError,
}

#[derive(Debug, Deserialize)]
struct OutputReference {
    transaction: TransactionRef,
    index: u32,
}

#[derive(Debug, Deserialize)]
struct TransactionRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidationFailureData {
    validation_error: String,
    #[serde(default)]
    traces: Vec<String>,
}

fn unparsed(raw: &str) -> TxEvaluationFailure {
    TxEvaluationFailure::UnparsedError(raw.to_string())
}

fn redeemer_tag(purpose: &str) -> Option<RedeemerTag> {
    match purpose {
        "spend" => Some(RedeemerTag::Spend),
        "mint" => Some(RedeemerTag::Mint),
        "publish" | "certificate" => Some(RedeemerTag::Cert),
        "withdraw" | "withdrawal" => Some(RedeemerTag::Reward),
        _ => None,
    }
}

fn validator_pointer(validator: &Validator) -> Option<RedeemerPointer> {
    redeemer_tag(&validator.purpose).map(|tag| RedeemerPointer::new(tag, validator.index))
}

fn transaction_input(reference: &OutputReference) -> Option<TransactionInput> {
    reference
        .transaction
        .id
        .parse::<Hash32>()
        .ok()
        .map(|id| TransactionInput::new(id, reference.index))
}

fn field<T: for<'de> Deserialize<'de>>(data: &serde_json::Value, name: &str) -> Option<T> {
    data.get(name)
        .and_then(|value| serde_json::from_value(value.clone()).ok())
}

fn pointers(data: &serde_json::Value, name: &str) -> Option<Vec<RedeemerPointer>> {
    field::<Vec<Validator>>(data, name)?
        .iter()
        .map(validator_pointer)
        .collect()
}

fn datum_hashes(data: &serde_json::Value, name: &str) -> Option<Vec<DatumHash>> {
    field::<Vec<String>>(data, name)?
        .iter()
        .map(|hash| hash.parse().ok())
        .collect()
}

fn output_references(data: &serde_json::Value, name: &str) -> Option<Vec<TransactionInput>> {
    field::<Vec<OutputReference>>(data, name)?
        .iter()
        .map(transaction_input)
        .collect()
}

/// Map one nested validator error. `None` when the payload does not have the expected shape.
fn script_failure(error: &RpcError) -> Option<Vec<ScriptFailure>> {
    let data = &error.data;
    let failures = match error.code {
        3011 => vec![ScriptFailure::MissingRequiredScripts {
            missing: pointers(data, "missingScripts")?,
            resolved: BTreeMap::new(),
        }],
        3012 => {
            let details: ValidationFailureData = serde_json::from_value(data.clone()).ok()?;
            vec![ScriptFailure::ValidatorFailed {
                error: details.validation_error,
                traces: details.traces,
            }]
        }
        3013 => {
            let reference: OutputReference = field(data, "unsuitableOutputReference")?;
            vec![ScriptFailure::NonScriptInputReferencedByRedeemer(
                transaction_input(&reference)?,
            )]
        }
        3110 => vec![ScriptFailure::ExtraRedeemers(pointers(
            data,
            "extraneousRedeemers",
        )?)],
        3111 => vec![ScriptFailure::MissingRequiredDatums {
            provided: Vec::new(),
            missing: datum_hashes(data, "missingDatums")?,
        }],
        3115 => field::<Vec<String>>(data, "missingCostModels")?
            .into_iter()
            .map(ScriptFailure::NoCostModelForLanguage)
            .collect(),
        3117 => output_references(data, "unknownOutputReferences")?
            .into_iter()
            .map(ScriptFailure::UnknownInputReferencedByRedeemer)
            .collect(),
        3161 => vec![ScriptFailure::IllFormedExecutionBudget(
            field::<Budget>(data, "budgetUsed")
                .map(|budget| ExUnits::new(budget.memory, budget.cpu)),
        )],
        _ => vec![ScriptFailure::InternalLedgerTypeConversionError(format!(
            "{} ({})",
            error.message, error.code
        ))],
    };
    Some(failures)
}

fn decode_error(error: &RpcError, raw: &str) -> TxEvaluationFailure {
    match error.code {
        SCRIPT_EXECUTION_FAILURE => {
            let Ok(entries) = serde_json::from_value::<Vec<ValidatorError>>(error.data.clone())
            else {
                return unparsed(raw);
            };

            let mut by_pointer: BTreeMap<RedeemerPointer, Vec<ScriptFailure>> = BTreeMap::new();
            for entry in &entries {
                let (Some(pointer), Some(failures)) =
                    (validator_pointer(&entry.validator), script_failure(&entry.error))
                else {
                    return unparsed(raw);
                };
                by_pointer.entry(pointer).or_default().extend(failures);
            }
            TxEvaluationFailure::ScriptFailures(by_pointer)
        }
        OVERLAPPING_ADDITIONAL_UTXO => {
            output_references(&error.data, "overlappingOutputReferences").map_or_else(
                || unparsed(raw),
                |inputs| {
                    TxEvaluationFailure::AdditionalUtxoOverlap(inputs.into_iter().collect())
                },
            )
        }
        _ => unparsed(raw),
    }
}

/// Decode a raw JSON-RPC response body.
pub fn decode_evaluate_response(raw: &str) -> Result<ExUnitsByPointer, TxEvaluationFailure> {
    let response: RpcResponse = serde_json::from_str(raw).map_err(|_| unparsed(raw))?;

    if let Some(error) = response.error {
        return Err(decode_error(&error, raw));
    }

    let Some(entries) = response.result else {
        return Err(unparsed(raw));
    };

    let mut budgets = ExUnitsByPointer::new();
    for entry in entries {
        let pointer = validator_pointer(&entry.validator).ok_or_else(|| unparsed(raw))?;
        budgets.insert(pointer, ExUnits::new(entry.budget.memory, entry.budget.cpu));
    }
    Ok(budgets)
}
