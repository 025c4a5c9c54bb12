//! # bioreactor-control
//!
//! Control plane for a fleet of bioreactor units coordinated over a publish/subscribe
//! bus. Every long-running component is a job with the same lifecycle; automations
//! run dosing strategies on a timer and can be swapped at runtime; a watchdog on the
//! leader tries to bring lost units back.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   sensors ──► ‹root›/{unit}/{exp}/growth_rate, od_filtered/…
//!                                   │
//!        ┌──────────────────────────┼──────────────────────────────────┐
//!        │ unit process             ▼                                  │
//!        │  ┌──────────────────────────┐   swap   ┌──────────────────┐ │
//!        │  │ AutomationController     │ ───────► │ AutomationEngine │ │
//!        │  │ ({kind}_control)         │          │ ({kind}_automat.)│ │
//!        │  └──────────────────────────┘          └───┬──────────┬───┘ │
//!        │        ▲ {kind}_automation/set             │ tick     │     │
//!        │        │                        DosingEvent▼          ▼     │
//!        │        │                             Actuator   ThroughputLedger
//!        └────────┼──────────────────────────────────────────────────────┘
//!                 │
//!   operator ─────┘            leader: Watchdog ◄── ‹root›/+/+/monitor/$state
//! ```
//!
//! ### Job lifecycle
//! ```text
//! spawn ─► init ─► ready ◄──► sleeping
//!            │       │           │
//!            └───────┴─────┬─────┘
//!                          ▼
//!                    disconnected   (terminal; resources released)
//!
//! lost: published by the broker as the job's last will, never entered locally
//! ```
//!
//! ## Features
//! | Area              | Description                                                   | Key types / traits                          |
//! |-------------------|---------------------------------------------------------------|---------------------------------------------|
//! | **Bus**           | Topics, retained values, last wills, ask-and-wait.            | [`Broker`], [`MemoryBroker`], [`Topics`]    |
//! | **Jobs**          | Lifecycle state machine, remote settings, timers.             | [`Job`], [`JobHooks`], [`JobState`]         |
//! | **Automation**    | Strategies, staleness-checked ticks, throughput accounting.   | [`Automation`], [`AutomationEngine`]        |
//! | **Hot swap**      | Replace the running strategy without restarting the process.  | [`AutomationController`], [`StrategySpec`]  |
//! | **Watchdog**      | Soft-restart and poll lost peers.                             | [`Watchdog`]                                |
//! | **Errors**        | Typed errors with stable labels.                              | [`JobError`], [`StrategyError`], [`SwapError`] |
//! | **Configuration** | One TOML tree for every job.                                  | [`ControlConfig`]                           |
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use bioreactor_control::{
//!     AutomationController, ControlConfig, EngineDeps, MemoryBroker, SimulatedPump,
//!     StrategyParams, StrategyRegistry, StrategySpec,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = ControlConfig::default();
//!     cfg.bus.retained_read_timeout = Duration::from_millis(50);
//!
//!     let broker = Arc::new(MemoryBroker::new());
//!     let pump = Arc::new(SimulatedPump::new());
//!     let deps = EngineDeps::new(broker, pump, Arc::new(cfg));
//!     let registry = Arc::new(StrategyRegistry::with_builtins());
//!
//!     let initial = StrategySpec::new(
//!         "turbidostat",
//!         StrategyParams::default()
//!             .with("target_od", 1.0)
//!             .with("volume", 0.5)
//!             .with("skip_first_run", true),
//!     );
//!     let controller =
//!         AutomationController::spawn("unit1", "exp1", "dosing", registry, deps, Some(initial))
//!             .await?;
//!
//!     let engine = controller.engine().await.expect("engine running");
//!     engine.record_od(1.2);
//!     engine.record_growth_rate(0.1);
//!     engine.run().await;
//!     assert_eq!(engine.ledger().totals().media, 0.5);
//!
//!     controller.disconnect().await;
//!     Ok(())
//! }
//! ```
pub mod actuation;
pub mod automation;
pub mod config;
pub mod controller;
mod error;
pub mod job;
pub mod logging;
pub mod pid;
pub mod pubsub;
mod shutdown;
pub mod watchdog;

// ---- Public re-exports ----

pub use actuation::{Actuator, PumpChannel, SimulatedPump};
pub use automation::{
    Automation, AutomationEngine, DOSING_KIND, DosingEvent, EngineDeps, IoEvent, Observation, StrategyParams,
    StrategyRegistry, Throughput, ThroughputLedger,
};
pub use config::{ConfigError, ControlConfig};
pub use controller::{AutomationController, StrategySpec, SwapError};
pub use error::{ActuationError, BusError, JobError, StrategyError};
pub use job::{Job, JobHooks, JobId, JobState};
pub use logging::{BusMakeWriter, init_tracing};
pub use pid::{Pid, PidGains};
pub use pubsub::{Broker, MemoryBroker, Message, Topics};
pub use shutdown::wait_for_shutdown_signal;
pub use watchdog::Watchdog;
