use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::schema::types::{ExUnits, Language};
use crate::schema::value::Coin;

/// Non-negative rational used for execution-unit prices and reference-script fees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rational {
    pub numerator: u64,
    pub denominator: u64,
}

impl Rational {
    #[must_use]
    pub const fn new(numerator: u64, denominator: u64) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    #[must_use]
    pub const fn zero() -> Self {
        Self::new(0, 1)
    }

    /// `⌈self · quantity⌉`, or `None` on a zero denominator or a result above `u64::MAX`.
    #[must_use]
    pub fn mul_ceil(self, quantity: u64) -> Option<u64> {
        if self.denominator == 0 {
            return None;
        }
        let product = u128::from(self.numerator) * u128::from(quantity);
        let quotient = product.div_ceil(u128::from(self.denominator));
        u64::try_from(quotient).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExUnitPrices {
    pub mem_price: Rational,
    pub step_price: Rational,
}

/// The subset of protocol parameters that shapes a balanced transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolParameters {
    /// Lovelace per transaction byte.
    pub min_fee_a: u64,
    /// Constant fee term in lovelace.
    pub min_fee_b: u64,
    pub coins_per_utxo_byte: u64,
    pub max_tx_size: u32,
    pub max_value_size: u32,
    pub key_deposit: Coin,
    pub pool_deposit: Coin,
    pub collateral_percentage: u16,
    pub max_collateral_inputs: u16,
    pub prices: ExUnitPrices,
    pub max_tx_ex_units: ExUnits,
    pub min_fee_ref_script_cost_per_byte: Rational,
    #[serde(default)]
    pub cost_models: BTreeMap<Language, Vec<i64>>,
}

impl ProtocolParameters {
    /// Mainnet-shaped values, convenient as a starting point for hosts and tests.
    #[must_use]
    pub fn mainnet_defaults() -> Self {
        Self {
            min_fee_a: 44,
            min_fee_b: 155_381,
            coins_per_utxo_byte: 4_310,
            max_tx_size: 16_384,
            max_value_size: 5_000,
            key_deposit: Coin(2_000_000),
            pool_deposit: Coin(500_000_000),
            collateral_percentage: 150,
            max_collateral_inputs: 3,
            prices: ExUnitPrices {
                mem_price: Rational::new(577, 10_000),
                step_price: Rational::new(721, 10_000_000),
            },
            max_tx_ex_units: ExUnits::new(14_000_000, 10_000_000_000),
            min_fee_ref_script_cost_per_byte: Rational::new(15, 1),
            cost_models: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Rational;

    #[test]
    fn mul_ceil_rounds_up() {
        assert_eq!(Rational::new(577, 10_000).mul_ceil(10_000), Some(577));
        assert_eq!(Rational::new(577, 10_000).mul_ceil(10_001), Some(578));
        assert_eq!(Rational::zero().mul_ceil(u64::MAX), Some(0));
    }

    #[test]
    fn mul_ceil_rejects_zero_denominator_and_overflow() {
        assert_eq!(Rational::new(1, 0).mul_ceil(1), None);
        assert_eq!(Rational::new(u64::MAX, 1).mul_ceil(2), None);
    }
}
