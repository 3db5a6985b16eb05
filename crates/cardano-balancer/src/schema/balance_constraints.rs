//! Balancing policy.
//!
//! Callers describe policy as an ordered list of [`BalanceTxOption`] fragments collected in a
//! [`BalanceTxConstraintsBuilder`]. [`BalanceTxConstraintsBuilder::resolve`] folds them into a
//! [`BalanceTxConstraints`] record:
//! - scalar options (change address, change datum, UTxO sources, collateral set, change split,
//!   selection strategy): the later fragment wins;
//! - set options (`UseAdditionalUtxos`, `NotSpendUtxos`): fragments are unioned.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::schema::types::{Address, OutputDatum, TransactionInput, UtxoMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoinSelectionStrategy {
    /// Accumulate the largest candidates until the deficit closes.
    #[default]
    LargestFirst,
    /// Bounded exact-subset search with deterministic fallbacks.
    Optimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceTxOption {
    SendChangeToAddress(Address),
    SendChangeWithDatum(OutputDatum),
    /// Outputs the ledger may not know yet (chained transactions); usable as inputs.
    UseAdditionalUtxos(UtxoMap),
    NotSpendUtxos(BTreeSet<TransactionInput>),
    /// Fund from these addresses instead of the wallet.
    UseUtxosAtAddresses(Vec<Address>),
    UseCollateralUtxos(UtxoMap),
    /// Split change so no output carries more than this quantity of one token.
    GenChangeOutsWithMaxTokenQuantity(u64),
    UseCoinSelectionStrategy(CoinSelectionStrategy),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BalanceTxConstraintsBuilder {
    options: Vec<BalanceTxOption>,
}

impl BalanceTxConstraintsBuilder {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            options: Vec::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, option: BalanceTxOption) -> Self {
        self.options.push(option);
        self
    }

    /// Append every fragment of `other` after the fragments of `self`.
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        self.options.extend(other.options);
        self
    }

    #[must_use]
    pub fn must_send_change_to_address(self, address: Address) -> Self {
        self.with(BalanceTxOption::SendChangeToAddress(address))
    }

    #[must_use]
    pub fn must_send_change_with_datum(self, datum: OutputDatum) -> Self {
        self.with(BalanceTxOption::SendChangeWithDatum(datum))
    }

    #[must_use]
    pub fn must_use_additional_utxos(self, utxos: UtxoMap) -> Self {
        self.with(BalanceTxOption::UseAdditionalUtxos(utxos))
    }

    #[must_use]
    pub fn must_not_spend_utxos(self, inputs: BTreeSet<TransactionInput>) -> Self {
        self.with(BalanceTxOption::NotSpendUtxos(inputs))
    }

    #[must_use]
    pub fn must_use_utxos_at_addresses(self, addresses: Vec<Address>) -> Self {
        self.with(BalanceTxOption::UseUtxosAtAddresses(addresses))
    }

    #[must_use]
    pub fn must_use_collateral_utxos(self, utxos: UtxoMap) -> Self {
        self.with(BalanceTxOption::UseCollateralUtxos(utxos))
    }

    #[must_use]
    pub fn must_gen_change_outs_with_max_token_quantity(self, quantity: u64) -> Self {
        self.with(BalanceTxOption::GenChangeOutsWithMaxTokenQuantity(quantity))
    }

    #[must_use]
    pub fn must_use_coin_selection_strategy(self, strategy: CoinSelectionStrategy) -> Self {
        self.with(BalanceTxOption::UseCoinSelectionStrategy(strategy))
    }

    #[must_use]
    pub fn options(&self) -> &[BalanceTxOption] {
        &self.options
    }

    /// Fold fragments in order into the effective policy.
    #[must_use]
    pub fn resolve(&self) -> BalanceTxConstraints {
        self.options
            .iter()
            .fold(BalanceTxConstraints::default(), |mut acc, option| {
                match option {
                    BalanceTxOption::SendChangeToAddress(address) => {
                        acc.change_address = Some(*address);
                    }
                    BalanceTxOption::SendChangeWithDatum(datum) => {
                        acc.change_datum = datum.clone();
                    }
                    BalanceTxOption::UseAdditionalUtxos(utxos) => {
                        acc.additional_utxos
                            .extend(utxos.iter().map(|(input, output)| (*input, output.clone())));
                    }
                    BalanceTxOption::NotSpendUtxos(inputs) => {
                        acc.non_spendable.extend(inputs.iter().copied());
                    }
                    BalanceTxOption::UseUtxosAtAddresses(addresses) => {
                        acc.utxos_at_addresses = Some(addresses.clone());
                    }
                    BalanceTxOption::UseCollateralUtxos(utxos) => {
                        acc.collateral_utxos = Some(utxos.clone());
                    }
                    BalanceTxOption::GenChangeOutsWithMaxTokenQuantity(quantity) => {
                        acc.max_change_token_quantity = Some(*quantity);
                    }
                    BalanceTxOption::UseCoinSelectionStrategy(strategy) => {
                        acc.selection_strategy = *strategy;
                    }
                }
                acc
            })
    }
}

/// Resolved balancing policy for one `balance_tx` call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BalanceTxConstraints {
    pub change_address: Option<Address>,
    pub change_datum: OutputDatum,
    pub additional_utxos: UtxoMap,
    pub non_spendable: BTreeSet<TransactionInput>,
    pub utxos_at_addresses: Option<Vec<Address>>,
    pub collateral_utxos: Option<UtxoMap>,
    pub max_change_token_quantity: Option<u64>,
    pub selection_strategy: CoinSelectionStrategy,
}
