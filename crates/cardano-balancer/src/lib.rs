#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]
#![cfg_attr(
    test,
    allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss,
        clippy::default_trait_access,
        clippy::iter_on_single_items,
        clippy::needless_pass_by_value,
        clippy::too_many_lines
    )
)]

pub mod compiler;
pub mod config;
pub mod encoding;
pub mod error;
pub mod evaluation;
pub mod runtime;
pub mod schema;

pub use compiler::mk_unbalanced_tx;
pub use config::BalancerConfig;
pub use encoding::{BincodeCodec, Encodable, TxCodec};
pub use error::{BalanceTxError, CompileError, ErrorCode, QueryError};
pub use evaluation::{ExUnitsEvaluator, TxEvaluationFailure, print_tx_evaluation_failure};
pub use runtime::{BalancerRuntime, LedgerQuery, WalletInterface};
pub use schema::balance_constraints::{BalanceTxConstraintsBuilder, CoinSelectionStrategy};
pub use schema::constraints::TxConstraints;
pub use schema::lookups::ScriptLookups;
pub use schema::types::{Transaction, UnbalancedTx};
