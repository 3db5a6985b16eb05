//! Serialization seam.
//!
//! The balancer needs byte sizes (fees, minimum ADA) and hashes (datums, scripts, script
//! data) but never the wire format itself. Both come from a [`TxCodec`]. [`BincodeCodec`] is
//! the bundled reference implementation; it is self-consistent but does not produce ledger
//! CBOR, so hosts that submit to a node plug in their own codec.

use std::collections::BTreeMap;

use blake2::digest::consts::{U28, U32};
use blake2::{Blake2b, Digest};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::EncodingError;
use crate::schema::hash::{DatumHash, Hash28, Hash32, ScriptDataHash, ScriptHash};
use crate::schema::types::{
    Language, PlutusData, Redeemer, Script, Transaction, TransactionOutput,
};

type Blake2b224 = Blake2b<U28>;
type Blake2b256 = Blake2b<U32>;

/// Trait for binary encoding/decoding with hex string support.
pub trait Encodable: Serialize + DeserializeOwned {
    fn encode(&self) -> Result<Vec<u8>, EncodingError> {
        Ok(bincode::serde::encode_to_vec(
            self,
            bincode::config::standard(),
        )?)
    }

    /// Decode from binary and fail if trailing bytes remain.
    fn decode(buf: &[u8]) -> Result<Self, EncodingError> {
        let (decoded, consumed) =
            bincode::serde::decode_from_slice(buf, bincode::config::standard())?;
        if consumed != buf.len() {
            return Err(EncodingError::TrailingBytes {
                consumed,
                total: buf.len(),
            });
        }

        Ok(decoded)
    }

    fn to_hex(&self) -> Result<String, EncodingError> {
        Ok(hex::encode(Encodable::encode(self)?))
    }

    fn from_hex(hex: &str) -> Result<Self, EncodingError> {
        Encodable::decode(&hex::decode(hex)?)
    }
}

impl Encodable for Transaction {}
impl Encodable for TransactionOutput {}

/// Byte-level operations the compiler and balancer delegate to the host.
pub trait TxCodec: Send + Sync {
    fn encode_transaction(&self, transaction: &Transaction) -> Result<Vec<u8>, EncodingError>;

    fn encode_output(&self, output: &TransactionOutput) -> Result<Vec<u8>, EncodingError>;

    fn hash_datum(&self, datum: &PlutusData) -> DatumHash;

    fn hash_script(&self, script: &Script) -> Result<ScriptHash, EncodingError>;

    /// Serialized size of `script` as counted by reference-script fees.
    fn script_size(&self, script: &Script) -> Result<usize, EncodingError>;

    /// Hash committing to redeemers, witness datums and the cost models in use.
    fn script_data_hash(
        &self,
        redeemers: &[Redeemer],
        datums: &[PlutusData],
        cost_models: &BTreeMap<Language, Vec<i64>>,
    ) -> Result<ScriptDataHash, EncodingError>;
}

/// Bincode encoding with Blake2b hashing.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

const fn script_tag(script: &Script) -> u8 {
    match script {
        Script::Native(_) => 0,
        Script::Plutus(plutus) => match plutus.language {
            Language::PlutusV1 => 1,
            Language::PlutusV2 => 2,
            Language::PlutusV3 => 3,
        },
    }
}

fn script_body(script: &Script) -> Result<Vec<u8>, EncodingError> {
    match script {
        Script::Native(native) => Ok(bincode::serde::encode_to_vec(
            native,
            bincode::config::standard(),
        )?),
        Script::Plutus(plutus) => Ok(plutus.bytes.clone()),
    }
}

impl TxCodec for BincodeCodec {
    fn encode_transaction(&self, transaction: &Transaction) -> Result<Vec<u8>, EncodingError> {
        transaction.encode()
    }

    fn encode_output(&self, output: &TransactionOutput) -> Result<Vec<u8>, EncodingError> {
        output.encode()
    }

    fn hash_datum(&self, datum: &PlutusData) -> DatumHash {
        datum.hash()
    }

    fn hash_script(&self, script: &Script) -> Result<ScriptHash, EncodingError> {
        let body = script_body(script)?;

        let mut hasher = Blake2b224::new();
        hasher.update([script_tag(script)]);
        hasher.update(&body);
        Ok(Hash28::new(hasher.finalize().into()))
    }

    fn script_size(&self, script: &Script) -> Result<usize, EncodingError> {
        Ok(script_body(script)?.len())
    }

    fn script_data_hash(
        &self,
        redeemers: &[Redeemer],
        datums: &[PlutusData],
        cost_models: &BTreeMap<Language, Vec<i64>>,
    ) -> Result<ScriptDataHash, EncodingError> {
        let preimage = bincode::serde::encode_to_vec(
            (redeemers, datums, cost_models),
            bincode::config::standard(),
        )?;
        Ok(Hash32::new(Blake2b256::digest(&preimage).into()))
    }
}
