//! Balancing runtime.
//!
//! [`BalancerRuntime::balance_tx`] turns an [`UnbalancedTx`] into a transaction whose inputs
//! cover outputs, fee and deposits exactly. Each pass:
//! 1. Rebuild the transaction from the draft plus the inputs selected so far and the current
//!    fee.
//! 2. Solve the balance equation; select more inputs and start over while any deficit remains
//!    (including lovelace the change outputs need for their minimum ADA).
//! 3. Attach change, collateral, evaluated redeemer budgets and the script integrity hash.
//! 4. Compute the minimum fee. The pass is a fixpoint when it does not exceed the current fee;
//!    otherwise the fee is raised and the loop continues.
//!
//! Passes are bounded by [`BalancerConfig::max_iterations`]. A returned transaction always
//! passes the exact conservation check and carries at least minimum ADA in every output.

pub mod fees;
pub mod redeemers;

mod collateral;
mod evaluation;
mod input_resolution;
mod output_resolution;
mod query;

pub use query::{LedgerQuery, WalletInterface};
pub use redeemers::{index_redeemers, unindex_redeemers};

use std::collections::BTreeSet;

use crate::config::BalancerConfig;
use crate::encoding::TxCodec;
use crate::error::BalanceTxError;
use crate::evaluation::ExUnitsEvaluator;
use crate::schema::balance_constraints::{BalanceTxConstraints, BalanceTxConstraintsBuilder};
use crate::schema::params::ProtocolParameters;
use crate::schema::types::{
    Address, NetworkId, Transaction, TransactionInput, UnbalancedTx, UnindexedRedeemer, UtxoMap,
};
use crate::schema::value::{AssetClass, Coin, Value, ValueError};

use self::collateral::select_collateral;
use self::evaluation::{evaluate_ex_units, evaluator_utxos, set_script_data_hash};
use self::fees::{min_fee, raise_to_min_ada};
use self::input_resolution::{SelectionError, select_inputs};
use self::output_resolution::{
    aggregate_demand, aggregate_supply, assert_exact_value_conservation,
    assert_outputs_meet_min_ada, compute_balance_delta, plan_change,
};

/// Balancer over host-provided ledger, wallet, evaluator and codec.
#[derive(Debug)]
pub struct BalancerRuntime<Q, W, E, C> {
    query: Q,
    wallet: W,
    evaluator: E,
    codec: C,
    config: BalancerConfig,
}

/// Everything one `balance_tx` call resolves before the first pass.
#[derive(Debug)]
struct BalanceContext {
    params: ProtocolParameters,
    network: NetworkId,
    constraints: BalanceTxConstraints,
    change_address: Address,
    /// Every output the balancer can resolve an input against.
    known_utxos: UtxoMap,
    /// Candidates for coin selection.
    spendable: UtxoMap,
    /// Wallet value the constraints put out of reach.
    excluded: Value,
    collateral_candidates: UtxoMap,
    evaluator_utxos: UtxoMap,
}

/// Mutable state of the fee fixpoint.
#[derive(Debug)]
struct BalancerState {
    /// Draft with outputs raised to minimum ADA.
    base: Transaction,
    redeemers: Vec<UnindexedRedeemer>,
    selected: BTreeSet<TransactionInput>,
    fee: Coin,
}

impl BalancerState {
    fn new<C: TxCodec>(
        codec: &C,
        context: &BalanceContext,
        unbalanced: UnbalancedTx,
    ) -> Result<Self, BalanceTxError> {
        let UnbalancedTx {
            transaction: mut base,
            redeemers,
            ..
        } = unbalanced;

        for output in &mut base.body.outputs {
            raise_to_min_ada(codec, &context.params, output)?;
        }
        base.body.network_id.get_or_insert(context.network);

        Ok(Self {
            fee: base.body.fee,
            base,
            redeemers,
            selected: BTreeSet::new(),
        })
    }

    /// The draft plus every selected input, at the current fee.
    fn draft(&self) -> Transaction {
        let mut transaction = self.base.clone();
        transaction.body.inputs.extend(self.selected.iter().copied());
        transaction.body.fee = self.fee;
        transaction
    }
}

impl BalanceContext {
    fn selection_failure(
        &self,
        error: SelectionError,
        supply: &Value,
        needed: &Value,
        available: &UtxoMap,
    ) -> BalanceTxError {
        let (asset, missing, held, diagnostics) = match error {
            SelectionError::Value(error) => return error.into(),
            SelectionError::Exhausted {
                asset,
                missing,
                available,
                diagnostics,
            } => (asset, missing, available, diagnostics),
        };

        tracing::debug!(
            %asset,
            missing,
            held,
            diagnostics = %diagnostics,
            "coin selection exhausted"
        );

        if !asset.is_lovelace() {
            return BalanceTxError::InsufficientUtxoBalanceToCoverAsset { asset, missing };
        }

        let actual = match available
            .values()
            .try_fold(supply.clone(), |total, output| total.checked_add(&output.amount))
        {
            Ok(actual) => actual,
            Err(error) => return error.into(),
        };

        BalanceTxError::BalanceInsufficientError {
            expected: needed.clone(),
            actual,
            invalid_in_context: self.excluded.clone(),
        }
    }
}

impl<Q, W, E, C> BalancerRuntime<Q, W, E, C> {
    #[must_use]
    pub fn new(query: Q, wallet: W, evaluator: E, codec: C) -> Self {
        Self {
            query,
            wallet,
            evaluator,
            codec,
            config: BalancerConfig::default(),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: BalancerConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub const fn config(&self) -> &BalancerConfig {
        &self.config
    }

    #[must_use]
    pub const fn codec(&self) -> &C {
        &self.codec
    }
}

impl<Q, W, E, C> BalancerRuntime<Q, W, E, C>
where
    Q: LedgerQuery,
    W: WalletInterface,
    E: ExUnitsEvaluator,
    C: TxCodec,
{
    async fn wallet_snapshot(
        &self,
        constraints: &BalanceTxConstraints,
    ) -> Result<UtxoMap, BalanceTxError> {
        let Some(addresses) = &constraints.utxos_at_addresses else {
            return self
                .wallet
                .utxos()
                .await
                .map_err(|error| BalanceTxError::CouldNotGetUtxos(error.to_string()));
        };

        let mut utxos = UtxoMap::new();
        for address in addresses {
            let at_address = self.query.utxos_at(address).await.map_err(|error| {
                BalanceTxError::CouldNotGetUtxos(format!("{address}: {error}"))
            })?;
            utxos.extend(at_address);
        }

        Ok(utxos)
    }

    async fn resolve_change_address(
        &self,
        constraints: &BalanceTxConstraints,
    ) -> Result<Address, BalanceTxError> {
        if let Some(address) = constraints.change_address {
            return Ok(address);
        }

        let wallet_error = match self.wallet.change_address().await {
            Ok(address) => return Ok(address),
            Err(error) => error,
        };
        tracing::debug!(%wallet_error, "falling back to the first own address for change");

        let own_addresses = self
            .wallet
            .own_addresses()
            .await
            .map_err(|error| BalanceTxError::CouldNotGetChangeAddress(error.to_string()))?;

        own_addresses.first().copied().ok_or_else(|| {
            BalanceTxError::CouldNotGetChangeAddress(format!(
                "wallet has no own addresses ({wallet_error})"
            ))
        })
    }

    async fn prepare(
        &self,
        unbalanced: &UnbalancedTx,
        builder: &BalanceTxConstraintsBuilder,
    ) -> Result<BalanceContext, BalanceTxError> {
        self.config.validate()?;

        let constraints = builder.resolve();
        if constraints.max_change_token_quantity == Some(0) {
            return Err(BalanceTxError::InvalidConfig(
                "max change token quantity must be > 0".to_string(),
            ));
        }

        let params = self
            .query
            .protocol_parameters()
            .await
            .map_err(|error| BalanceTxError::CouldNotGetProtocolParameters(error.to_string()))?;
        let network = self.query.network_id().await.map_err(|error| {
            BalanceTxError::CouldNotGetProtocolParameters(format!("network id: {error}"))
        })?;

        let change_address = self.resolve_change_address(&constraints).await?;
        let wallet_utxos = self.wallet_snapshot(&constraints).await?;

        let mut pool = wallet_utxos.clone();
        for (input, output) in &constraints.additional_utxos {
            pool.entry(*input).or_insert_with(|| output.clone());
        }

        let reserved_for_collateral = constraints
            .collateral_utxos
            .as_ref()
            .map(|utxos| utxos.keys().copied().collect::<BTreeSet<_>>())
            .unwrap_or_default();

        let mut spendable = UtxoMap::new();
        let mut excluded = Value::zero();
        for (input, output) in &pool {
            let usable = !constraints.non_spendable.contains(input)
                && !output.address.is_script_locked()
                && !reserved_for_collateral.contains(input);
            if usable {
                spendable.insert(*input, output.clone());
            } else {
                excluded = excluded.checked_add(&output.amount)?;
            }
        }

        let collateral_candidates = constraints.collateral_utxos.clone().unwrap_or_else(|| {
            wallet_utxos
                .into_iter()
                .filter(|(input, _)| !constraints.non_spendable.contains(input))
                .collect()
        });

        let mut known_utxos = unbalanced.used_utxos.clone();
        for (input, output) in pool.iter().chain(&collateral_candidates) {
            known_utxos.entry(*input).or_insert_with(|| output.clone());
        }

        if let Some(missing) = unbalanced
            .transaction
            .body
            .inputs
            .iter()
            .find(|input| !known_utxos.contains_key(*input))
        {
            return Err(BalanceTxError::UtxoLookupFailedFor(*missing));
        }

        let evaluator_utxos = evaluator_utxos(
            &self.codec,
            &unbalanced.used_utxos,
            &constraints.additional_utxos,
        )?;

        tracing::debug!(
            %change_address,
            spendable = spendable.len(),
            excluded = %excluded,
            "resolved balancing context"
        );

        Ok(BalanceContext {
            params,
            network,
            constraints,
            change_address,
            known_utxos,
            spendable,
            excluded,
            collateral_candidates,
            evaluator_utxos,
        })
    }

    async fn attach_scripts(
        &self,
        context: &BalanceContext,
        transaction: &mut Transaction,
        redeemers: &mut [UnindexedRedeemer],
    ) -> Result<(), BalanceTxError> {
        if redeemers.is_empty() {
            transaction.body.collateral.clear();
            transaction.body.collateral_return = None;
            transaction.body.total_collateral = None;
            transaction.witness_set.redeemers.clear();
        } else {
            let collateral = select_collateral(
                &self.codec,
                &context.params,
                transaction.body.fee,
                &context.collateral_candidates,
                context.change_address,
            )?;
            transaction.body.collateral = collateral.inputs;
            transaction.body.collateral_return = collateral.return_output;
            transaction.body.total_collateral = Some(collateral.total);

            evaluate_ex_units(
                &self.evaluator,
                transaction,
                redeemers,
                &context.evaluator_utxos,
            )
            .await?;
        }

        set_script_data_hash(
            &self.codec,
            &context.params,
            transaction,
            &context.known_utxos,
        )
    }

    /// Balance `unbalanced` against the wallet, honoring `builder`.
    #[tracing::instrument(level = "debug", skip_all, err)]
    pub async fn balance_tx(
        &self,
        unbalanced: UnbalancedTx,
        builder: &BalanceTxConstraintsBuilder,
    ) -> Result<Transaction, BalanceTxError> {
        let context = self.prepare(&unbalanced, builder).await?;
        let mut state = BalancerState::new(&self.codec, &context, unbalanced)?;
        let declared_fee = state.fee;

        for iteration in 1..=self.config.max_iterations {
            let mut transaction = state.draft();

            let supply = aggregate_supply(&transaction.body, &context.known_utxos, &context.params)?;
            let demand = aggregate_demand(&transaction.body, &context.params)?;
            let delta = compute_balance_delta(&supply, &demand);
            let change = plan_change(
                &self.codec,
                &context.params,
                &delta.residual,
                context.change_address,
                &context.constraints.change_datum,
                context.constraints.max_change_token_quantity,
            )?;

            let mut deficits = delta.deficit_by_asset;
            if change.lovelace_shortfall > 0 {
                let lovelace = deficits.entry(AssetClass::Lovelace).or_insert(0);
                *lovelace = lovelace
                    .checked_add(change.lovelace_shortfall)
                    .ok_or(ValueError::Overflow {
                        asset: AssetClass::Lovelace,
                    })?;
            }

            if !deficits.is_empty() {
                tracing::debug!(iteration, deficits = ?deficits, "selecting inputs");

                let mut needed = demand.clone();
                needed.coin = needed.coin.checked_add(Coin(change.lovelace_shortfall))?;
                let available = context
                    .spendable
                    .iter()
                    .filter(|(input, _)| !transaction.body.inputs.contains(*input))
                    .map(|(input, output)| (*input, output.clone()))
                    .collect::<UtxoMap>();

                let picked = select_inputs(
                    &available,
                    &deficits,
                    context.constraints.selection_strategy,
                    self.config.max_exact_search_nodes,
                )
                .map_err(|error| {
                    context.selection_failure(error, &supply, &needed, &available)
                })?;
                state.selected.extend(picked.into_keys());
                continue;
            }

            transaction.body.outputs.extend(change.outputs);
            self.attach_scripts(&context, &mut transaction, &mut state.redeemers)
                .await?;

            let required_fee = min_fee(
                &self.codec,
                &context.params,
                &transaction,
                &context.known_utxos,
            )?;
            if required_fee <= state.fee {
                assert_exact_value_conservation(
                    &transaction.body,
                    &context.known_utxos,
                    &context.params,
                )?;
                assert_outputs_meet_min_ada(
                    &self.codec,
                    &context.params,
                    &transaction.body.outputs,
                )?;

                tracing::info!(
                    iterations = iteration,
                    inputs = transaction.body.inputs.len(),
                    outputs = transaction.body.outputs.len(),
                    fee = state.fee.0,
                    "balanced transaction"
                );
                return Ok(transaction);
            }

            if declared_fee > Coin::ZERO && required_fee > declared_fee {
                tracing::warn!(
                    declared = declared_fee.0,
                    required = required_fee.0,
                    "declared fee is below the minimum, raising it"
                );
            }
            tracing::debug!(iteration, from = state.fee.0, to = required_fee.0, "raising fee");
            state.fee = required_fee;
        }

        Err(BalanceTxError::BalancerDidNotConverge {
            iterations: self.config.max_iterations,
        })
    }

    /// Balance an already indexed transaction again; redeemers are recovered from its
    /// witness set.
    ///
    /// Rebalancing the output of [`Self::balance_tx`] under the same wallet state returns it
    /// unchanged.
    pub async fn rebalance_tx(
        &self,
        transaction: Transaction,
        used_utxos: UtxoMap,
        builder: &BalanceTxConstraintsBuilder,
    ) -> Result<Transaction, BalanceTxError> {
        let redeemers = unindex_redeemers(&transaction.body, &transaction.witness_set.redeemers)?;
        self.balance_tx(
            UnbalancedTx {
                transaction,
                redeemers,
                used_utxos,
            },
            builder,
        )
        .await
    }
}
