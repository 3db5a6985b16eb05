//! Deterministic rendering of evaluation failures.
//!
//! Output is a pure function of its arguments. Redeemer pointers are cross-referenced against
//! the transaction they were evaluated with: spend pointers resolve to inputs, mint pointers
//! to policy ids, reward pointers to reward addresses and cert pointers to certificates.
//! Hashed datums are resolved through the witness set when it carries them.

use std::collections::BTreeMap;

use crate::evaluation::{ScriptFailure, TxEvaluationFailure};
use crate::schema::types::{
    Certificate, OutputDatum, RedeemerPointer, RedeemerTag, Transaction, UtxoMap,
};

const INDENT: &str = "  ";

/// Render `failure` against the transaction it was produced for.
#[must_use]
pub fn print_tx_evaluation_failure(transaction: &Transaction, failure: &TxEvaluationFailure) -> String {
    print_tx_evaluation_failure_with_utxos(transaction, &UtxoMap::new(), failure)
}

/// As [`print_tx_evaluation_failure`], additionally resolving spent outputs (and so their
/// datums) through `utxos`.
#[must_use]
pub fn print_tx_evaluation_failure_with_utxos(
    transaction: &Transaction,
    utxos: &UtxoMap,
    failure: &TxEvaluationFailure,
) -> String {
    let mut lines = Vec::new();
    match failure {
        TxEvaluationFailure::UnparsedError(message) => {
            lines.push(format!("Unparsed evaluator error: {message}"));
        }
        TxEvaluationFailure::AdditionalUtxoOverlap(inputs) => {
            lines.push("Additional UTxOs overlap with the ledger:".to_string());
            lines.extend(inputs.iter().map(|input| format!("- {input}")));
        }
        TxEvaluationFailure::ScriptFailures(failures) => {
            lines.push("Script failures:".to_string());
            render_script_failures(&mut lines, transaction, utxos, failures);
        }
    }
    lines.join("\n")
}

fn render_script_failures(
    lines: &mut Vec<String>,
    transaction: &Transaction,
    utxos: &UtxoMap,
    failures: &BTreeMap<RedeemerPointer, Vec<ScriptFailure>>,
) {
    for (pointer, pointer_failures) in failures {
        lines.push(format!("- {pointer}"));
        render_pointer_context(lines, transaction, utxos, *pointer);
        for failure in pointer_failures {
            render_script_failure(lines, failure);
        }
    }
}

fn render_pointer_context(
    lines: &mut Vec<String>,
    transaction: &Transaction,
    utxos: &UtxoMap,
    pointer: RedeemerPointer,
) {
    let body = &transaction.body;
    let index = pointer.index as usize;

    match pointer.tag {
        RedeemerTag::Spend => {
            if let Some(input) = body.inputs.iter().nth(index) {
                lines.push(format!("{INDENT}Input: {input}"));
                match utxos.get(input).map(|output| &output.datum) {
                    Some(OutputDatum::Inline(datum)) => {
                        lines.push(format!("{INDENT}Datum: {}", datum.to_hex()));
                    }
                    Some(OutputDatum::Hash(hash)) => {
                        lines.push(format!("{INDENT}Datum hash: {hash}"));
                        if let Some(datum) = transaction
                            .witness_set
                            .plutus_data
                            .iter()
                            .find(|datum| datum.hash() == *hash)
                        {
                            lines.push(format!("{INDENT}Datum: {}", datum.to_hex()));
                        }
                    }
                    Some(OutputDatum::None) | None => {}
                }
            }
        }
        RedeemerTag::Mint => {
            if let Some(policy) = body.mint.policies().nth(index) {
                lines.push(format!("{INDENT}Policy: {policy}"));
            }
        }
        RedeemerTag::Reward => {
            if let Some(address) = body.withdrawals.keys().nth(index) {
                lines.push(format!("{INDENT}Reward address: {address}"));
            }
        }
        RedeemerTag::Cert => {
            if let Some(certificate) = body.certificates.get(index) {
                lines.push(format!("{INDENT}Certificate: {}", describe_certificate(certificate)));
            }
        }
    }

    if let Some(redeemer) = transaction
        .witness_set
        .redeemers
        .iter()
        .find(|redeemer| redeemer.pointer() == pointer)
    {
        lines.push(format!("{INDENT}Redeemer: {}", redeemer.data.to_hex()));
    }
}

fn describe_certificate(certificate: &Certificate) -> String {
    match certificate {
        Certificate::StakeRegistration(credential) => format!("stake registration of {credential}"),
        Certificate::StakeDeregistration(credential) => {
            format!("stake deregistration of {credential}")
        }
        Certificate::StakeDelegation { credential, pool } => {
            format!("stake delegation of {credential} to {pool}")
        }
    }
}

fn join<T: ToString>(items: impl IntoIterator<Item = T>) -> String {
    items
        .into_iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_script_failure(lines: &mut Vec<String>, failure: &ScriptFailure) {
    match failure {
        ScriptFailure::ExtraRedeemers(pointers) => {
            lines.push(format!("{INDENT}Extra redeemers: {}", join(pointers)));
        }
        ScriptFailure::MissingRequiredDatums { provided, missing } => {
            lines.push(format!("{INDENT}Missing required datums: {}", join(missing)));
            if !provided.is_empty() {
                lines.push(format!("{INDENT}Provided datums: {}", join(provided)));
            }
        }
        ScriptFailure::MissingRequiredScripts { resolved, missing } => {
            lines.push(format!("{INDENT}Missing required scripts: {}", join(missing)));
            if !resolved.is_empty() {
                let resolved = resolved
                    .iter()
                    .map(|(pointer, hash)| format!("{pointer} -> {hash}"));
                lines.push(format!("{INDENT}Resolved scripts: {}", join(resolved)));
            }
        }
        ScriptFailure::ValidatorFailed { error, traces } => {
            lines.push(format!("{INDENT}Error: {error}"));
            if !traces.is_empty() {
                lines.push(format!("{INDENT}Trace:"));
                lines.extend(
                    traces
                        .iter()
                        .enumerate()
                        .map(|(number, trace)| format!("{INDENT}{INDENT}{}. {trace}", number + 1)),
                );
            }
        }
        ScriptFailure::UnknownInputReferencedByRedeemer(input) => {
            lines.push(format!("{INDENT}Unknown input referenced by redeemer: {input}"));
        }
        ScriptFailure::NonScriptInputReferencedByRedeemer(input) => {
            lines.push(format!("{INDENT}Non-script input referenced by redeemer: {input}"));
        }
        ScriptFailure::NoCostModelForLanguage(language) => {
            lines.push(format!("{INDENT}No cost model for language: {language}"));
        }
        ScriptFailure::InternalLedgerTypeConversionError(message) => {
            lines.push(format!("{INDENT}Internal ledger type conversion error: {message}"));
        }
        ScriptFailure::IllFormedExecutionBudget(Some(budget)) => {
            lines.push(format!(
                "{INDENT}Ill-formed execution budget: mem {}, steps {}",
                budget.mem, budget.steps
            ));
        }
        ScriptFailure::IllFormedExecutionBudget(None) => {
            lines.push(format!("{INDENT}Ill-formed execution budget"));
        }
    }
}
