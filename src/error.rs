//! Error types used by the control plane.
//!
//! This module defines one enum per failure domain:
//!
//! - [`BusError`] — transport failures (invalid topic, closed broker, request timeout).
//! - [`StrategyError`] — configuration errors while building or updating a strategy.
//! - [`ActuationError`] — a physical dispense step did not complete.
//! - [`JobError`] — failures surfaced by the job lifecycle (hooks, settings, transitions).
//!
//! Every type provides `as_label` (stable snake_case for logs/metrics). Swap failures
//! live next to the controller in [`SwapError`](crate::controller::SwapError).

use std::time::Duration;

use thiserror::Error;

use crate::actuation::PumpChannel;
use crate::job::JobState;

/// # Errors produced by the message bus client.
///
/// A timeout is an ordinary, handled outcome of the ask-and-wait helpers; callers
/// log it and move on.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Topic is empty, contains an empty level, or carries a wildcard where a concrete topic is required.
    #[error("invalid topic '{topic}'")]
    InvalidTopic {
        /// The rejected topic or filter.
        topic: String,
    },

    /// No message arrived on the topic within the allowed time.
    #[error("no message on '{topic}' within {timeout:?}")]
    Timeout {
        /// Topic that was awaited.
        topic: String,
        /// The timeout that elapsed.
        timeout: Duration,
    },

    /// The broker dropped the subscription before a message arrived.
    #[error("broker closed")]
    Closed,
}

impl BusError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use bioreactor_control::BusError;
    ///
    /// assert_eq!(BusError::Closed.as_label(), "bus_closed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            BusError::InvalidTopic { .. } => "bus_invalid_topic",
            BusError::Timeout { .. } => "bus_timeout",
            BusError::Closed => "bus_closed",
        }
    }

    /// True when the error is a request timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, BusError::Timeout { .. })
    }
}

/// # Configuration errors for automation strategies.
///
/// Raised by strategy construction (unknown key, missing or malformed parameter) and
/// by remote parameter updates. The failing operation is rejected; prior state stays intact.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StrategyError {
    /// No factory is registered under this key.
    #[error("unknown strategy '{key}'")]
    UnknownStrategy {
        /// Requested key.
        key: String,
    },

    /// A required parameter is absent.
    #[error("missing required parameter '{name}'")]
    MissingParameter {
        /// Parameter name.
        name: String,
    },

    /// A parameter is present but unusable.
    #[error("invalid value for '{name}': {reason}")]
    InvalidParameter {
        /// Parameter name.
        name: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The swap request could not be decoded at all.
    #[error("malformed request: {reason}")]
    MalformedRequest {
        /// Decoder message.
        reason: String,
    },

    /// The strategy does not expose a setting with this name.
    #[error("unknown setting '{name}'")]
    UnknownSetting {
        /// Setting name.
        name: String,
    },

    /// No engine exists for this automation kind (only `dosing` drives pumps).
    #[error("unsupported automation kind '{kind}'")]
    UnsupportedKind {
        /// Requested kind.
        kind: String,
    },
}

impl StrategyError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            StrategyError::UnknownStrategy { .. } => "strategy_unknown",
            StrategyError::MissingParameter { .. } => "strategy_missing_parameter",
            StrategyError::InvalidParameter { .. } => "strategy_invalid_parameter",
            StrategyError::MalformedRequest { .. } => "strategy_malformed_request",
            StrategyError::UnknownSetting { .. } => "strategy_unknown_setting",
            StrategyError::UnsupportedKind { .. } => "strategy_unsupported_kind",
        }
    }

    pub(crate) fn invalid(name: &str, reason: impl Into<String>) -> Self {
        StrategyError::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

/// # A dispense step failed.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActuationError {
    /// The pump reported a failure for this channel.
    #[error("{channel} pump failed to dispense {volume_ml} mL: {reason}")]
    Failed {
        /// Channel that was driven.
        channel: PumpChannel,
        /// Requested volume.
        volume_ml: f64,
        /// Driver message.
        reason: String,
    },

    /// The request itself was rejected before touching hardware.
    #[error("refused to dispense {volume_ml} mL")]
    InvalidVolume {
        /// Requested volume.
        volume_ml: f64,
    },

    /// The engine was retired before this step started; the pump was not driven.
    #[error("{channel} step skipped: engine retired")]
    Interrupted {
        /// Channel that was not driven.
        channel: PumpChannel,
    },
}

impl ActuationError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ActuationError::Failed { .. } => "actuation_failed",
            ActuationError::InvalidVolume { .. } => "actuation_invalid_volume",
            ActuationError::Interrupted { .. } => "actuation_interrupted",
        }
    }
}

/// # Errors produced by the job lifecycle.
///
/// Only errors raised during a job's own construction propagate to the owning
/// process; everything else is logged at the dispatch boundary.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum JobError {
    /// Transport failure while publishing or subscribing.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Strategy configuration failure.
    #[error(transparent)]
    Strategy(#[from] StrategyError),

    /// `$state/set` payload that is not a known state.
    #[error("invalid state '{value}'")]
    InvalidState {
        /// The payload received.
        value: String,
    },

    /// Requested transition is not allowed (`lost` can only be observed).
    #[error("transition {from} -> {to} not allowed")]
    InvalidTransition {
        /// Current state.
        from: JobState,
        /// Requested state.
        to: JobState,
    },

    /// Setting is not in the editable list.
    #[error("unknown setting '{name}'")]
    UnknownSetting {
        /// Setting name.
        name: String,
    },

    /// Setting value could not be applied.
    #[error("invalid value '{value}' for setting '{name}'")]
    InvalidSetting {
        /// Setting name.
        name: String,
        /// Raw payload.
        value: String,
    },

    /// The job is disconnected and no longer accepts work.
    #[error("job disconnected")]
    Disconnected,

    /// A lifecycle hook failed.
    #[error("hook failed: {reason}")]
    Hook {
        /// The underlying error message.
        reason: String,
    },
}

impl JobError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use bioreactor_control::JobError;
    ///
    /// let err = JobError::Disconnected;
    /// assert_eq!(err.as_label(), "job_disconnected");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            JobError::Bus(e) => e.as_label(),
            JobError::Strategy(e) => e.as_label(),
            JobError::InvalidState { .. } => "job_invalid_state",
            JobError::InvalidTransition { .. } => "job_invalid_transition",
            JobError::UnknownSetting { .. } => "job_unknown_setting",
            JobError::InvalidSetting { .. } => "job_invalid_setting",
            JobError::Disconnected => "job_disconnected",
            JobError::Hook { .. } => "job_hook_failed",
        }
    }

    /// Wraps any displayable error as a hook failure.
    pub fn hook(reason: impl std::fmt::Display) -> Self {
        JobError::Hook {
            reason: reason.to_string(),
        }
    }
}
