use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::schema::hash::{DatumHash, PolicyId, ScriptHash};
use crate::schema::types::{
    Address, NativeScript, NetworkId, PlutusData, PlutusScript, Script, TransactionInput,
    TransactionOutput, UtxoMap,
};

/// Off-chain knowledge the compiler resolves constraints against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptLookups {
    pub network: NetworkId,
    #[serde(default)]
    pub utxos: UtxoMap,
    /// Plutus validators for spending, certificates and withdrawals.
    #[serde(default)]
    pub validators: BTreeMap<ScriptHash, PlutusScript>,
    #[serde(default)]
    pub minting_policies: BTreeMap<PolicyId, Script>,
    #[serde(default)]
    pub native_scripts: BTreeMap<ScriptHash, NativeScript>,
    #[serde(default)]
    pub datums: BTreeMap<DatumHash, PlutusData>,
    /// Where `MustSpendAtLeast` / `MustProduceAtLeast` shortfalls are paid.
    #[serde(default)]
    pub own_address: Option<Address>,
}

impl ScriptLookups {
    #[must_use]
    pub const fn new(network: NetworkId) -> Self {
        Self {
            network,
            utxos: BTreeMap::new(),
            validators: BTreeMap::new(),
            minting_policies: BTreeMap::new(),
            native_scripts: BTreeMap::new(),
            datums: BTreeMap::new(),
            own_address: None,
        }
    }

    #[must_use]
    pub fn with_utxo(mut self, input: TransactionInput, output: TransactionOutput) -> Self {
        self.utxos.insert(input, output);
        self
    }

    #[must_use]
    pub fn with_utxos(mut self, utxos: UtxoMap) -> Self {
        self.utxos.extend(utxos);
        self
    }

    #[must_use]
    pub fn with_validator(mut self, hash: ScriptHash, script: PlutusScript) -> Self {
        self.validators.insert(hash, script);
        self
    }

    #[must_use]
    pub fn with_minting_policy(mut self, policy: PolicyId, script: Script) -> Self {
        self.minting_policies.insert(policy, script);
        self
    }

    #[must_use]
    pub fn with_native_script(mut self, hash: ScriptHash, script: NativeScript) -> Self {
        self.native_scripts.insert(hash, script);
        self
    }

    #[must_use]
    pub fn with_datum(mut self, hash: DatumHash, datum: PlutusData) -> Self {
        self.datums.insert(hash, datum);
        self
    }

    #[must_use]
    pub const fn with_own_address(mut self, address: Address) -> Self {
        self.own_address = Some(address);
        self
    }
}
