//! Script execution-unit evaluation: failure model, evaluator seam, response decoding and
//! rendering.

pub mod ogmios;
pub mod pretty;

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;

use crate::schema::hash::{DatumHash, ScriptHash};
use crate::schema::types::{ExUnits, RedeemerPointer, Transaction, TransactionInput, UtxoMap};

pub use pretty::print_tx_evaluation_failure;

/// Per-redeemer budgets reported by a successful evaluation.
pub type ExUnitsByPointer = BTreeMap<RedeemerPointer, ExUnits>;

/// Why one redeemer could not be evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptFailure {
    /// Redeemers that point at nothing.
    ExtraRedeemers(Vec<RedeemerPointer>),
    MissingRequiredDatums {
        provided: Vec<DatumHash>,
        missing: Vec<DatumHash>,
    },
    MissingRequiredScripts {
        missing: Vec<RedeemerPointer>,
        resolved: BTreeMap<RedeemerPointer, ScriptHash>,
    },
    ValidatorFailed {
        error: String,
        traces: Vec<String>,
    },
    UnknownInputReferencedByRedeemer(TransactionInput),
    NonScriptInputReferencedByRedeemer(TransactionInput),
    NoCostModelForLanguage(String),
    InternalLedgerTypeConversionError(String),
    IllFormedExecutionBudget(Option<ExUnits>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxEvaluationFailure {
    /// The evaluator answered with something that could not be interpreted.
    UnparsedError(String),
    /// Additional UTxOs that the node already knows about.
    AdditionalUtxoOverlap(BTreeSet<TransactionInput>),
    ScriptFailures(BTreeMap<RedeemerPointer, Vec<ScriptFailure>>),
}

/// External script-cost evaluation service.
///
/// `additional_utxos` carries outputs the service may not know yet: everything the draft
/// spends or references that came from the compiler's lookups or from caller-supplied UTxOs.
pub trait ExUnitsEvaluator: Send + Sync {
    fn evaluate(
        &self,
        transaction: &Transaction,
        additional_utxos: &UtxoMap,
    ) -> impl Future<Output = Result<ExUnitsByPointer, TxEvaluationFailure>> + Send;
}
