//! Collaborator seams the balancer suspends on.
//!
//! Implementations are expected to be cheap to share: the balancer only ever borrows them.

use std::future::Future;

use crate::error::QueryError;
use crate::schema::params::ProtocolParameters;
use crate::schema::types::{Address, NetworkId, UtxoMap};

/// Read access to ledger state.
pub trait LedgerQuery: Send + Sync {
    fn protocol_parameters(
        &self,
    ) -> impl Future<Output = Result<ProtocolParameters, QueryError>> + Send;

    fn network_id(&self) -> impl Future<Output = Result<NetworkId, QueryError>> + Send;

    /// Unspent outputs currently locked at `address`.
    fn utxos_at(
        &self,
        address: &Address,
    ) -> impl Future<Output = Result<UtxoMap, QueryError>> + Send;
}

/// The wallet funding the transaction.
pub trait WalletInterface: Send + Sync {
    fn own_addresses(&self) -> impl Future<Output = Result<Vec<Address>, QueryError>> + Send;

    fn change_address(&self) -> impl Future<Output = Result<Address, QueryError>> + Send;

    /// Snapshot of every spendable wallet output.
    fn utxos(&self) -> impl Future<Output = Result<UtxoMap, QueryError>> + Send;
}
