//! Ledger data model consumed and produced by the compiler and the balancer.
//!
//! Input collections are `BTreeSet`s ordered by `(transaction_id, index)`, which is the
//! order the ledger uses for spend redeemer pointers. Withdrawals are keyed by reward
//! address for the same reason.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};

use crate::schema::hash::{DatumHash, PolicyId, PoolId, PubKeyHash, ScriptDataHash, ScriptHash, TxId};
use crate::schema::value::{Coin, Mint, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkId {
    Testnet,
    Mainnet,
}

impl NetworkId {
    #[must_use]
    pub const fn id(self) -> u8 {
        match self {
            Self::Testnet => 0,
            Self::Mainnet => 1,
        }
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Testnet => f.write_str("testnet"),
            Self::Mainnet => f.write_str("mainnet"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Credential {
    PubKey(PubKeyHash),
    Script(ScriptHash),
}

impl Credential {
    #[must_use]
    pub const fn pubkey_hash(&self) -> Option<PubKeyHash> {
        match self {
            Self::PubKey(hash) => Some(*hash),
            Self::Script(_) => None,
        }
    }

    #[must_use]
    pub const fn script_hash(&self) -> Option<ScriptHash> {
        match self {
            Self::PubKey(_) => None,
            Self::Script(hash) => Some(*hash),
        }
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PubKey(hash) => write!(f, "key:{hash}"),
            Self::Script(hash) => write!(f, "script:{hash}"),
        }
    }
}

/// Shelley base address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address {
    pub network: NetworkId,
    pub payment: Credential,
    #[serde(default)]
    pub stake: Option<Credential>,
}

impl Address {
    #[must_use]
    pub const fn new(network: NetworkId, payment: Credential, stake: Option<Credential>) -> Self {
        Self {
            network,
            payment,
            stake,
        }
    }

    #[must_use]
    pub const fn enterprise(network: NetworkId, payment: Credential) -> Self {
        Self::new(network, payment, None)
    }

    #[must_use]
    pub const fn is_script_locked(&self) -> bool {
        matches!(self.payment, Credential::Script(_))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.payment)?;
        if let Some(stake) = &self.stake {
            write!(f, "/stake:{stake}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RewardAddress {
    pub network: NetworkId,
    pub credential: Credential,
}

impl fmt::Display for RewardAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/reward/{}", self.network, self.credential)
    }
}

/// Reference to an output of a previous transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionInput {
    pub transaction_id: TxId,
    pub index: u32,
}

impl TransactionInput {
    #[must_use]
    pub const fn new(transaction_id: TxId, index: u32) -> Self {
        Self {
            transaction_id,
            index,
        }
    }
}

impl fmt::Display for TransactionInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.transaction_id, self.index)
    }
}

/// Already-encoded Plutus data. The balancer never inspects its structure.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlutusData(pub Vec<u8>);

impl PlutusData {
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Blake2b-256 of the encoded bytes.
    #[must_use]
    pub fn hash(&self) -> DatumHash {
        DatumHash::new(Blake2b::<U32>::digest(&self.0).into())
    }
}

impl fmt::Debug for PlutusData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PlutusData({})", self.to_hex())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputDatum {
    #[default]
    None,
    Hash(DatumHash),
    Inline(PlutusData),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Language {
    PlutusV1,
    PlutusV2,
    PlutusV3,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlutusScript {
    pub language: Language,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeScript {
    Pubkey(PubKeyHash),
    All(Vec<NativeScript>),
    Any(Vec<NativeScript>),
    AtLeast { required: u32, scripts: Vec<NativeScript> },
    InvalidBefore(u64),
    InvalidHereafter(u64),
}

impl NativeScript {
    /// Every key hash mentioned anywhere in the script.
    #[must_use]
    pub fn pubkey_hashes(&self) -> BTreeSet<PubKeyHash> {
        let mut hashes = BTreeSet::new();
        self.collect_pubkey_hashes(&mut hashes);
        hashes
    }

    fn collect_pubkey_hashes(&self, hashes: &mut BTreeSet<PubKeyHash>) {
        match self {
            Self::Pubkey(hash) => {
                hashes.insert(*hash);
            }
            Self::All(scripts) | Self::Any(scripts) | Self::AtLeast { scripts, .. } => {
                for script in scripts {
                    script.collect_pubkey_hashes(hashes);
                }
            }
            Self::InvalidBefore(_) | Self::InvalidHereafter(_) => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Script {
    Native(NativeScript),
    Plutus(PlutusScript),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub address: Address,
    pub amount: Value,
    #[serde(default)]
    pub datum: OutputDatum,
    #[serde(default)]
    pub script_ref: Option<Script>,
}

impl TransactionOutput {
    #[must_use]
    pub const fn new(address: Address, amount: Value) -> Self {
        Self {
            address,
            amount,
            datum: OutputDatum::None,
            script_ref: None,
        }
    }

    #[must_use]
    pub fn with_datum(mut self, datum: OutputDatum) -> Self {
        self.datum = datum;
        self
    }

    #[must_use]
    pub fn with_script_ref(mut self, script: Script) -> Self {
        self.script_ref = Some(script);
        self
    }
}

pub type Utxo = (TransactionInput, TransactionOutput);
pub type UtxoMap = BTreeMap<TransactionInput, TransactionOutput>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Certificate {
    StakeRegistration(Credential),
    StakeDeregistration(Credential),
    StakeDelegation { credential: Credential, pool: PoolId },
}

impl Certificate {
    #[must_use]
    pub const fn credential(&self) -> &Credential {
        match self {
            Self::StakeRegistration(credential)
            | Self::StakeDeregistration(credential)
            | Self::StakeDelegation { credential, .. } => credential,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RedeemerTag {
    Spend,
    Mint,
    Cert,
    Reward,
}

impl fmt::Display for RedeemerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Spend => "Spend",
            Self::Mint => "Mint",
            Self::Cert => "Cert",
            Self::Reward => "Reward",
        };
        f.write_str(label)
    }
}

/// Execution budget of one script run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct ExUnits {
    pub mem: u64,
    pub steps: u64,
}

impl ExUnits {
    #[must_use]
    pub const fn new(mem: u64, steps: u64) -> Self {
        Self { mem, steps }
    }

    #[must_use]
    pub const fn checked_add(self, rhs: Self) -> Option<Self> {
        match (self.mem.checked_add(rhs.mem), self.steps.checked_add(rhs.steps)) {
            (Some(mem), Some(steps)) => Some(Self { mem, steps }),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RedeemerPointer {
    pub tag: RedeemerTag,
    pub index: u32,
}

impl RedeemerPointer {
    #[must_use]
    pub const fn new(tag: RedeemerTag, index: u32) -> Self {
        Self { tag, index }
    }
}

impl fmt::Display for RedeemerPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tag, self.index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redeemer {
    pub tag: RedeemerTag,
    pub index: u32,
    pub data: PlutusData,
    pub ex_units: ExUnits,
}

impl Redeemer {
    #[must_use]
    pub const fn pointer(&self) -> RedeemerPointer {
        RedeemerPointer::new(self.tag, self.index)
    }
}

/// What a redeemer is for, independent of where that thing ends up in the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedeemerPurpose {
    ForSpend(TransactionInput),
    ForMint(PolicyId),
    ForReward(RewardAddress),
    ForCert(Certificate),
}

impl RedeemerPurpose {
    #[must_use]
    pub const fn tag(&self) -> RedeemerTag {
        match self {
            Self::ForSpend(_) => RedeemerTag::Spend,
            Self::ForMint(_) => RedeemerTag::Mint,
            Self::ForReward(_) => RedeemerTag::Reward,
            Self::ForCert(_) => RedeemerTag::Cert,
        }
    }
}

/// Redeemer attached to a purpose; indices are assigned only once inputs are final.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnindexedRedeemer {
    pub purpose: RedeemerPurpose,
    pub data: PlutusData,
    #[serde(default)]
    pub ex_units: ExUnits,
}

impl UnindexedRedeemer {
    #[must_use]
    pub const fn new(purpose: RedeemerPurpose, data: PlutusData) -> Self {
        Self {
            purpose,
            data,
            ex_units: ExUnits::new(0, 0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransactionBody {
    pub inputs: BTreeSet<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub fee: Coin,
    /// Upper validity bound (exclusive slot).
    pub ttl: Option<u64>,
    /// Lower validity bound (inclusive slot).
    pub validity_start_interval: Option<u64>,
    pub certificates: Vec<Certificate>,
    pub withdrawals: BTreeMap<RewardAddress, Coin>,
    pub mint: Mint,
    pub script_data_hash: Option<ScriptDataHash>,
    pub collateral: BTreeSet<TransactionInput>,
    pub required_signers: BTreeSet<PubKeyHash>,
    pub network_id: Option<NetworkId>,
    pub collateral_return: Option<TransactionOutput>,
    pub total_collateral: Option<Coin>,
    pub reference_inputs: BTreeSet<TransactionInput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VkeyWitness {
    pub vkey: Vec<u8>,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransactionWitnessSet {
    pub vkeys: Vec<VkeyWitness>,
    pub native_scripts: Vec<NativeScript>,
    pub plutus_scripts: Vec<PlutusScript>,
    pub plutus_data: Vec<PlutusData>,
    pub redeemers: Vec<Redeemer>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub body: TransactionBody,
    pub witness_set: TransactionWitnessSet,
    pub is_valid: bool,
    pub auxiliary_data: Option<Vec<u8>>,
}

impl Default for Transaction {
    fn default() -> Self {
        Self {
            body: TransactionBody::default(),
            witness_set: TransactionWitnessSet::default(),
            is_valid: true,
            auxiliary_data: None,
        }
    }
}

/// Compiler output handed to the balancer.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UnbalancedTx {
    pub transaction: Transaction,
    pub redeemers: Vec<UnindexedRedeemer>,
    /// Outputs the draft spends or references, as known to the compiler.
    pub used_utxos: UtxoMap,
}
