//! # Job behaviour hooks.
//!
//! [`JobHooks`] is what a concrete job (engine, controller, ledger, watchdog) plugs
//! into the shared lifecycle in [`Job`]. Every hook has a no-op default, so a job
//! implements only the ones it needs.
//!
//! ## Transition order
//! ```text
//! set_state(to):
//!   on_transition(from, to)   pairwise; an error aborts (state unchanged)
//!   state = to, publish $state
//!   on_<to>()                 arrival; errors are reported to the caller
//! ```
//! Entering `disconnected` runs both hooks too, but their errors are only logged:
//! resources are always released.

use std::sync::Arc;

use async_trait::async_trait;

use super::Job;
use super::context::JobContext;
use super::state::JobState;
use crate::error::JobError;

/// # Per-job behaviour plugged into the shared lifecycle.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use bioreactor_control::job::{JobContext, JobHooks};
/// use bioreactor_control::JobError;
///
/// struct Stirrer;
///
/// #[async_trait]
/// impl JobHooks for Stirrer {
///     fn editable_settings(&self) -> Vec<String> {
///         vec!["target_rpm".into()]
///     }
///
///     async fn set_setting(
///         &self,
///         _ctx: &JobContext,
///         _name: &str,
///         value: &str,
///     ) -> Result<Option<String>, JobError> {
///         Ok(Some(value.trim().to_string()))
///     }
/// }
/// ```
#[async_trait]
pub trait JobHooks: Send + Sync + Sized + 'static {
    /// Attribute names that may be updated remotely through `<name>/set`.
    fn editable_settings(&self) -> Vec<String> {
        Vec::new()
    }

    /// Opens the job's own subscriptions and timers. Runs once during
    /// construction, after the control topics and before `init`.
    async fn start_passive_listeners(_job: &Arc<Job<Self>>) -> Result<(), JobError> {
        Ok(())
    }

    /// Applies a remote setting update.
    ///
    /// Returns the canonical value, which is republished retained on `.../<name>`,
    /// or `None` when the hook already published it under its own lock.
    async fn set_setting(
        &self,
        _ctx: &JobContext,
        name: &str,
        _value: &str,
    ) -> Result<Option<String>, JobError> {
        Err(JobError::UnknownSetting {
            name: name.to_string(),
        })
    }

    /// Pairwise hook (`on_<from>_to_<to>`); match on the pair you care about.
    async fn on_transition(
        &self,
        _ctx: &JobContext,
        _from: JobState,
        _to: JobState,
    ) -> Result<(), JobError> {
        Ok(())
    }

    async fn on_init(&self, _ctx: &JobContext) -> Result<(), JobError> {
        Ok(())
    }

    async fn on_ready(&self, _ctx: &JobContext) -> Result<(), JobError> {
        Ok(())
    }

    async fn on_sleeping(&self, _ctx: &JobContext) -> Result<(), JobError> {
        Ok(())
    }

    /// Runs before the job's subscriptions and timers are released.
    async fn on_disconnected(&self, _ctx: &JobContext) -> Result<(), JobError> {
        Ok(())
    }
}
