//! # Automation: strategies, engines and the throughput ledger.
//!
//! ```text
//! StrategyRegistry ──build(key, params)──► Box<dyn Automation>
//!                                               │
//!                                               ▼
//! readings (bus) ──► AutomationEngine ──tick──► DosingEvent ──► Actuator
//!                          │                                      │
//!                          └──────────── ThroughputLedger ◄───────┘ (credited steps)
//! ```
//!
//! - [`Automation`] the per-tick dosing policy.
//! - [`StrategyRegistry`] key → factory table, built-ins plus plugins.
//! - [`AutomationEngine`] timer, staleness checks, pump steps and accounting.
//! - [`ThroughputLedger`] cumulative media and alternate-media volumes.

mod engine;
mod event;
mod ledger;
pub mod params;
mod registry;
pub mod strategies;
mod strategy;

pub use engine::{AutomationEngine, EngineDeps, EngineHooks};
pub use event::{DosingEvent, IoEvent};
pub use ledger::{LedgerHooks, Throughput, ThroughputLedger};
pub use params::StrategyParams;
pub use registry::{StrategyFactory, StrategyRegistry};
pub use strategy::{Automation, Observation};

/// The one automation kind with an engine: pumps driven by dosing strategies.
pub const DOSING_KIND: &str = "dosing";
