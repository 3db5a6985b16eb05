//! Declarative transaction constraints.
//!
//! A [`TxConstraints`] value is an ordered list of [`TxConstraint`]s. The compiler folds them
//! in declaration order into a draft transaction; nothing here performs I/O.

use serde::{Deserialize, Serialize};

use crate::schema::hash::{DatumHash, PolicyId, PoolId, PubKeyHash, ScriptHash};
use crate::schema::types::{Credential, PlutusData, Script, TransactionInput};
use crate::schema::value::{AssetName, Coin, Value};

/// Where a datum attached to a new output lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatumPlacement {
    /// Output carries the hash; the datum goes to the witness set.
    #[default]
    Hashed,
    Inline,
}

/// Slot interval `[start, end)`. `None` bounds are open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidityInterval {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

impl ValidityInterval {
    #[must_use]
    pub const fn always() -> Self {
        Self {
            start: None,
            end: None,
        }
    }

    #[must_use]
    pub const fn starting_at(start: u64) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    #[must_use]
    pub const fn ending_at(end: u64) -> Self {
        Self {
            start: None,
            end: Some(end),
        }
    }

    #[must_use]
    pub const fn between(start: u64, end: u64) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
        }
    }

    #[must_use]
    pub fn intersect(&self, other: &Self) -> Self {
        let start = match (self.start, other.start) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        let end = match (self.end, other.end) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self { start, end }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!((self.start, self.end), (Some(start), Some(end)) if start >= end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxConstraint {
    MustIncludeDatum(PlutusData),
    MustHashDatum {
        hash: DatumHash,
        datum: PlutusData,
    },
    MustValidateIn(ValidityInterval),
    MustBeSignedBy(PubKeyHash),
    /// Counted against the inputs spent by other constraints.
    MustSpendAtLeast(Value),
    MustProduceAtLeast(Value),
    MustPayToPubKeyAddress {
        pkh: PubKeyHash,
        stake: Option<Credential>,
        datum: Option<(PlutusData, DatumPlacement)>,
        script_ref: Option<Script>,
        value: Value,
    },
    MustPayToScript {
        script_hash: ScriptHash,
        stake: Option<Credential>,
        datum: PlutusData,
        placement: DatumPlacement,
        script_ref: Option<Script>,
        value: Value,
    },
    MustPayToNativeScript {
        script_hash: ScriptHash,
        stake: Option<Credential>,
        value: Value,
    },
    MustMintValue {
        policy: PolicyId,
        asset: AssetName,
        amount: i64,
        redeemer: Option<PlutusData>,
    },
    MustSpendPubKeyOutput(TransactionInput),
    /// Spending one input twice must use the same redeemer.
    MustSpendScriptOutput {
        input: TransactionInput,
        redeemer: PlutusData,
        /// Input whose output carries the validator as a reference script.
        ref_script: Option<TransactionInput>,
    },
    MustSpendNativeScriptOutput(TransactionInput),
    MustReferenceOutput(TransactionInput),
    MustRegisterStakePubKey(PubKeyHash),
    MustRegisterStakeScript(ScriptHash),
    MustDeregisterStakePubKey(PubKeyHash),
    MustDelegateStakePubKey {
        pkh: PubKeyHash,
        pool: PoolId,
    },
    MustDeregisterStakePlutusScript {
        script: ScriptHash,
        redeemer: PlutusData,
    },
    MustDelegateStakePlutusScript {
        script: ScriptHash,
        pool: PoolId,
        redeemer: PlutusData,
    },
    /// Repeating a withdrawal is allowed only with the same amount.
    MustWithdrawStakePubKey {
        pkh: PubKeyHash,
        amount: Coin,
    },
    MustWithdrawStakePlutusScript {
        script: ScriptHash,
        redeemer: PlutusData,
        amount: Coin,
    },
    MustNotBeValid,
    /// The first alternative that compiles is committed.
    MustSatisfyAnyOf(Vec<Vec<TxConstraint>>),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxConstraints {
    pub constraints: Vec<TxConstraint>,
}

impl TxConstraints {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            constraints: Vec::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, constraint: TxConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    #[must_use]
    pub fn must_pay_to_pubkey(self, pkh: PubKeyHash, value: Value) -> Self {
        self.with(TxConstraint::MustPayToPubKeyAddress {
            pkh,
            stake: None,
            datum: None,
            script_ref: None,
            value,
        })
    }

    #[must_use]
    pub fn must_be_signed_by(self, pkh: PubKeyHash) -> Self {
        self.with(TxConstraint::MustBeSignedBy(pkh))
    }

    #[must_use]
    pub fn must_spend_script_output(self, input: TransactionInput, redeemer: PlutusData) -> Self {
        self.with(TxConstraint::MustSpendScriptOutput {
            input,
            redeemer,
            ref_script: None,
        })
    }

    #[must_use]
    pub fn must_mint_value(
        self,
        policy: PolicyId,
        asset: AssetName,
        amount: i64,
        redeemer: Option<PlutusData>,
    ) -> Self {
        self.with(TxConstraint::MustMintValue {
            policy,
            asset,
            amount,
            redeemer,
        })
    }

    #[must_use]
    pub fn must_validate_in(self, interval: ValidityInterval) -> Self {
        self.with(TxConstraint::MustValidateIn(interval))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }
}

impl From<Vec<TxConstraint>> for TxConstraints {
    fn from(constraints: Vec<TxConstraint>) -> Self {
        Self { constraints }
    }
}

impl FromIterator<TxConstraint> for TxConstraints {
    fn from_iter<T: IntoIterator<Item = TxConstraint>>(iter: T) -> Self {
        Self {
            constraints: iter.into_iter().collect(),
        }
    }
}
