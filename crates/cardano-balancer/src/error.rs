use thiserror::Error;

use crate::evaluation::{TxEvaluationFailure, pretty};
use crate::schema::hash::{DatumHash, PolicyId, ScriptHash};
use crate::schema::types::{
    Certificate, RedeemerPointer, RedeemerPurpose, RewardAddress, Transaction, TransactionInput,
    UtxoMap,
};
use crate::schema::value::{AssetClass, AssetName, Coin, Value, ValueError};

/// Stable, machine-readable identifier for an error variant.
pub trait ErrorCode {
    fn code(&self) -> &'static str;
}

/// Errors that occur during binary or hex encoding/decoding operations.
#[derive(Debug, Error)]
pub enum EncodingError {
    #[error("Failed to encode to binary: {0}")]
    BinaryEncode(#[from] bincode::error::EncodeError),

    #[error("Failed to decode from binary: {0}")]
    BinaryDecode(#[from] bincode::error::DecodeError),

    #[error("Failed to decode hex string: {0}")]
    HexDecode(#[from] hex::FromHexError),

    #[error("Trailing bytes after decoding: consumed {consumed} of {total}")]
    TrailingBytes { consumed: usize, total: usize },

    /// Failure reported by a host-provided codec.
    #[error("Codec error: {0}")]
    Codec(String),
}

/// Failures reported by ledger and wallet collaborators.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Failed to deserialize response: {0}")]
    Deserialize(String),

    #[error("Not available: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReindexRedeemersError {
    #[error("Redeemer input {0} is not spent by the transaction")]
    CannotGetTxInIndex(TransactionInput),

    #[error("Redeemer policy {0} is not minted by the transaction")]
    CannotGetMintingPolicyIndex(PolicyId),

    #[error("Redeemer reward address {0} is not withdrawn by the transaction")]
    CannotGetRewardAddressIndex(RewardAddress),

    #[error("Redeemer certificate {0:?} is not part of the transaction")]
    CannotGetCertificateIndex(Certificate),

    #[error("Redeemer pointer {0} does not resolve against the transaction")]
    CannotResolvePointer(RedeemerPointer),
}

fn join_errors(errors: &[CompileError]) -> String {
    errors
        .iter()
        .enumerate()
        .map(|(index, error)| format!("#{index}: {error}"))
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Datum hashes to {actual}, expected {expected}")]
    DatumWrongHash {
        expected: DatumHash,
        actual: DatumHash,
    },

    #[error("Validity intervals do not intersect")]
    CannotSolveTimeConstraints,

    #[error("Lookups carry no own address to pay required value to")]
    OwnAddressMissing,

    #[error("Cannot mint zero of {policy}.{asset}")]
    CannotMintZero { policy: PolicyId, asset: AssetName },

    #[error("Plutus minting policy {0} needs a redeemer")]
    MintRedeemerMissing(PolicyId),

    #[error("Minting policy {0} not found in lookups")]
    MintingPolicyNotFound(PolicyId),

    #[error("Output {0} not found in lookups")]
    TxOutRefNotFound(TransactionInput),

    #[error("Output {0} is not locked by the expected credential kind")]
    TxOutRefWrongType(TransactionInput),

    #[error("Validator {0} not found in lookups")]
    ValidatorNotFound(ScriptHash),

    #[error("Native script {0} not found in lookups")]
    NativeScriptNotFound(ScriptHash),

    #[error("Reference script at {input} does not hash to {expected}")]
    WrongRefScriptHash {
        input: TransactionInput,
        expected: ScriptHash,
    },

    #[error("Script registered as {expected} hashes to {actual}")]
    WrongScriptHash {
        expected: ScriptHash,
        actual: ScriptHash,
    },

    #[error("Datum {0} not found in lookups")]
    DatumNotFound(DatumHash),

    #[error("Conflicting redeemers registered for {0:?}")]
    ConflictingRedeemer(RedeemerPurpose),

    #[error("Withdrawal from {address} already set to {existing}, requested {requested}")]
    ConflictingWithdrawal {
        address: RewardAddress,
        existing: Coin,
        requested: Coin,
    },

    #[error("No alternative could be satisfied: {}", join_errors(.0))]
    CannotSatisfyAny(Vec<CompileError>),

    #[error(transparent)]
    Value(#[from] ValueError),

    #[error(transparent)]
    Encoding(#[from] EncodingError),
}

impl ErrorCode for CompileError {
    fn code(&self) -> &'static str {
        match self {
            Self::DatumWrongHash { .. } => "COMPILE_DATUM_WRONG_HASH",
            Self::CannotSolveTimeConstraints => "COMPILE_CANNOT_SOLVE_TIME_CONSTRAINTS",
            Self::OwnAddressMissing => "COMPILE_OWN_ADDRESS_MISSING",
            Self::CannotMintZero { .. } => "COMPILE_CANNOT_MINT_ZERO",
            Self::MintRedeemerMissing(_) => "COMPILE_MINT_REDEEMER_MISSING",
            Self::MintingPolicyNotFound(_) => "COMPILE_MINTING_POLICY_NOT_FOUND",
            Self::TxOutRefNotFound(_) => "COMPILE_TX_OUT_REF_NOT_FOUND",
            Self::TxOutRefWrongType(_) => "COMPILE_TX_OUT_REF_WRONG_TYPE",
            Self::ValidatorNotFound(_) => "COMPILE_VALIDATOR_NOT_FOUND",
            Self::NativeScriptNotFound(_) => "COMPILE_NATIVE_SCRIPT_NOT_FOUND",
            Self::WrongRefScriptHash { .. } => "COMPILE_WRONG_REF_SCRIPT_HASH",
            Self::WrongScriptHash { .. } => "COMPILE_WRONG_SCRIPT_HASH",
            Self::DatumNotFound(_) => "COMPILE_DATUM_NOT_FOUND",
            Self::ConflictingRedeemer(_) => "COMPILE_CONFLICTING_REDEEMER",
            Self::ConflictingWithdrawal { .. } => "COMPILE_CONFLICTING_WITHDRAWAL",
            Self::CannotSatisfyAny(_) => "COMPILE_CANNOT_SATISFY_ANY",
            Self::Value(_) => "COMPILE_VALUE_ERROR",
            Self::Encoding(_) => "COMPILE_ENCODING_ERROR",
        }
    }
}

/// Every way `balance_tx` can fail. All variants are recoverable from the caller's side.
#[derive(Debug, Error)]
pub enum BalanceTxError {
    #[error(
        "Insufficient balance: expected {expected}, available {actual} (not usable in this context: {invalid_in_context})"
    )]
    BalanceInsufficientError {
        expected: Value,
        actual: Value,
        invalid_in_context: Value,
    },

    #[error("Insufficient UTxO balance to cover {missing} of {asset}")]
    InsufficientUtxoBalanceToCoverAsset { asset: AssetClass, missing: u64 },

    #[error("UTxO lookup failed for {0}")]
    UtxoLookupFailedFor(TransactionInput),

    #[error("Minimum ADA calculation failed: {0}")]
    UtxoMinAdaValueCalculationFailed(String),

    #[error("Could not select collateral: {0}")]
    CouldNotGetCollateral(String),

    #[error("Collateral return output is invalid: {0}")]
    CollateralReturnError(String),

    #[error("Collateral return minimum ADA calculation failed: {0}")]
    CollateralReturnMinAdaValueCalcError(String),

    #[error("Could not get change address: {0}")]
    CouldNotGetChangeAddress(String),

    #[error("Could not get UTxOs: {0}")]
    CouldNotGetUtxos(String),

    #[error("Could not convert script output {0} for the evaluator")]
    CouldNotConvertScriptOutputToTxInput(TransactionInput),

    #[error("Redeemer re-indexing failed: {0}")]
    ReindexRedeemersError(#[from] ReindexRedeemersError),

    #[error("Execution units evaluation failed")]
    ExUnitsEvaluationFailed {
        transaction: Box<Transaction>,
        /// Outputs handed to the evaluator, kept for cross-referencing in [`Self::pretty`].
        utxos: UtxoMap,
        failure: TxEvaluationFailure,
    },

    #[error("Could not get protocol parameters: {0}")]
    CouldNotGetProtocolParameters(String),

    #[error("Balancer did not converge after {iterations} iterations")]
    BalancerDidNotConverge { iterations: usize },

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("Value error: {0}")]
    Value(#[from] ValueError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BalanceTxError {
    /// Human-readable rendering; evaluation failures are expanded with the failure printer.
    #[must_use]
    pub fn pretty(&self) -> String {
        match self {
            Self::ExUnitsEvaluationFailed {
                transaction,
                utxos,
                failure,
            } => format!(
                "{self}:\n{}",
                pretty::print_tx_evaluation_failure_with_utxos(transaction, utxos, failure)
            ),
            other => other.to_string(),
        }
    }
}

impl ErrorCode for BalanceTxError {
    fn code(&self) -> &'static str {
        match self {
            Self::BalanceInsufficientError { .. } => "BALANCE_INSUFFICIENT",
            Self::InsufficientUtxoBalanceToCoverAsset { .. } => "BALANCE_INSUFFICIENT_ASSET",
            Self::UtxoLookupFailedFor(_) => "BALANCE_UTXO_LOOKUP_FAILED",
            Self::UtxoMinAdaValueCalculationFailed(_) => "BALANCE_MIN_ADA_CALCULATION_FAILED",
            Self::CouldNotGetCollateral(_) => "BALANCE_NO_COLLATERAL",
            Self::CollateralReturnError(_) => "BALANCE_COLLATERAL_RETURN_INVALID",
            Self::CollateralReturnMinAdaValueCalcError(_) => {
                "BALANCE_COLLATERAL_RETURN_MIN_ADA_FAILED"
            }
            Self::CouldNotGetChangeAddress(_) => "BALANCE_NO_CHANGE_ADDRESS",
            Self::CouldNotGetUtxos(_) => "BALANCE_NO_UTXOS",
            Self::CouldNotConvertScriptOutputToTxInput(_) => "BALANCE_SCRIPT_OUTPUT_CONVERSION",
            Self::ReindexRedeemersError(_) => "BALANCE_REINDEX_REDEEMERS",
            Self::ExUnitsEvaluationFailed { .. } => "BALANCE_EVALUATION_FAILED",
            Self::CouldNotGetProtocolParameters(_) => "BALANCE_NO_PROTOCOL_PARAMETERS",
            Self::BalancerDidNotConverge { .. } => "BALANCE_DID_NOT_CONVERGE",
            Self::Encoding(_) => "BALANCE_ENCODING_ERROR",
            Self::Value(_) => "BALANCE_VALUE_ERROR",
            Self::InvalidConfig(_) => "BALANCE_INVALID_CONFIG",
        }
    }
}
