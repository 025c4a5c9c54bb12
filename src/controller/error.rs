use thiserror::Error;

use crate::error::{JobError, StrategyError};

/// # Errors produced by a strategy swap.
///
/// A validation failure leaves the previous engine running. A spawn failure happens
/// after the previous engine was retired.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SwapError {
    /// The request or its parameters were rejected before anything was stopped.
    #[error(transparent)]
    Strategy(#[from] StrategyError),

    /// The new engine could not be started.
    #[error("failed to start strategy '{key}': {source}")]
    Spawn {
        /// Requested strategy.
        key: String,
        /// Underlying job error.
        #[source]
        source: JobError,
    },

    /// The controller is disconnected.
    #[error("controller is disconnected")]
    Disconnected,
}

impl SwapError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SwapError::Strategy(_) => "swap_invalid_strategy",
            SwapError::Spawn { .. } => "swap_spawn_failed",
            SwapError::Disconnected => "swap_disconnected",
        }
    }
}

impl From<SwapError> for JobError {
    fn from(e: SwapError) -> Self {
        match e {
            SwapError::Strategy(e) => JobError::Strategy(e),
            SwapError::Spawn { source, .. } => source,
            SwapError::Disconnected => JobError::Disconnected,
        }
    }
}
