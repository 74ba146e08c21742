// src/errors.rs
//
// Error taxonomy for the engine. The split that matters operationally is
// transient vs permanent: transient exchange failures are retried with
// backoff inside the executor, permanent ones are logged and dropped so
// the next tick can replan.

use thiserror::Error;

use crate::types::{AccountId, StrategyId};

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Invalid strategy or account parameters. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Network, timeout, or rate-limit failure talking to an exchange.
    #[error("transient exchange error: {0}")]
    TransientExchange(String),

    /// Authentication, malformed request, insufficient funds, market closed.
    #[error("permanent exchange error: {0}")]
    PermanentExchange(String),

    /// A state invariant was broken (crossed book, duplicate order on both
    /// sides). The offending action is suppressed; the strategy survives.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// FX rate not yet produced; the dependent hedge is rescheduled.
    #[error("fx rate unavailable")]
    FxUnavailable,

    /// Uncaught error in a strategy's periodic scheduling stack.
    #[error("fatal reactor error for {strategy}: {message}")]
    FatalReactor {
        strategy: StrategyId,
        message: String,
    },

    /// Strategy preconditions not met (multiple sources, missing currency).
    #[error("strategy error: {0}")]
    Strategy(String),
}

impl EngineError {
    /// Transient errors are retried locally; everything else is not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::TransientExchange(_) | EngineError::FxUnavailable
        )
    }

    /// Stable label for logs and metric dimensions.
    pub fn kind_label(&self) -> &'static str {
        match self {
            EngineError::Configuration(_) => "configuration",
            EngineError::TransientExchange(_) => "transient_exchange",
            EngineError::PermanentExchange(_) => "permanent_exchange",
            EngineError::InvariantViolation(_) => "invariant_violation",
            EngineError::FxUnavailable => "fx_unavailable",
            EngineError::FatalReactor { .. } => "fatal_reactor",
            EngineError::Strategy(_) => "strategy",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Leveled stderr log line tagged with the owning strategy and account,
/// so operators can grep a single strategy's stream.
pub fn log_strategy_error(strategy: StrategyId, account: AccountId, err: &EngineError) {
    eprintln!(
        "ERROR: [{strategy}/{account}] {}: {err}",
        err.kind_label()
    );
}
