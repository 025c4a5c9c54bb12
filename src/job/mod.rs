//! # Job lifecycle framework.
//!
//! - [`Job`] the lifecycle state machine shared by every long-running component.
//! - [`JobHooks`] the behaviour a concrete job plugs in.
//! - [`JobContext`] per-job resources (subscriptions, token, published state).
//! - [`RepeatedTimer`] per-job cancellable ticker.
//!
//! Topics owned by a job:
//! ```text
//! ‹root›/{unit}/{experiment}/{job}/$state           retained, current state
//! ‹root›/{unit}/{experiment}/{job}/$state/set       transition requests
//! ‹root›/{unit}/{experiment}/{job}/{setting}        retained, current value
//! ‹root›/{unit}/{experiment}/{job}/{setting}/set    update requests
//! ```

mod context;
mod dispatch;
mod hooks;
mod id;
mod lifecycle;
mod state;
mod timer;

pub use context::JobContext;
pub use hooks::JobHooks;
pub use id::JobId;
pub use lifecycle::Job;
pub use state::JobState;
pub use timer::{RepeatedTimer, TimerOptions};
