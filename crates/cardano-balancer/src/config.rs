use serde::{Deserialize, Serialize};

use crate::error::BalanceTxError;

const DEFAULT_MAX_ITERATIONS: usize = 10;
/// Upper bound on nodes visited by the exact-subset search before falling back.
const DEFAULT_MAX_EXACT_SEARCH_NODES: usize = 100_000;

/// Tuning knobs of the balancer. Protocol parameters are not configuration; they come from
/// the ledger query on every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BalancerConfig {
    /// Fee fixpoint passes before giving up with `BalancerDidNotConverge`.
    pub max_iterations: usize,
    pub max_exact_search_nodes: usize,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_exact_search_nodes: DEFAULT_MAX_EXACT_SEARCH_NODES,
        }
    }
}

impl BalancerConfig {
    pub fn validate(&self) -> Result<(), BalanceTxError> {
        if self.max_iterations == 0 {
            return Err(BalanceTxError::InvalidConfig(
                "max_iterations must be > 0".to_string(),
            ));
        }

        if self.max_exact_search_nodes == 0 {
            return Err(BalanceTxError::InvalidConfig(
                "max_exact_search_nodes must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    #[must_use]
    pub const fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}
