//! # Automation controller: hot-swaps the running strategy.
//!
//! ```text
//! {kind}_automation/set ──► StrategySpec::from_json
//!                                 │
//!                                 ▼
//!                        validate (build strategy)  ── Err ──► old engine keeps running
//!                                 │ Ok
//!                                 ▼
//!                   [slot lock] retire old engine (disconnect)
//!                                 │
//!                                 ▼
//!                        spawn new engine ── Err ──► no engine (or restore previous)
//!                                 │ Ok
//!                                 ▼
//!                     adopt, republish {kind}_automation
//! ```

mod core;
mod error;
mod slot;
mod spec;

pub use core::{AutomationController, ControllerHooks};
pub use error::SwapError;
pub use spec::StrategySpec;
