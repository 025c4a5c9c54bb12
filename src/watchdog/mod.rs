//! # Watchdog: recovery of lost peers.
//!
//! ```text
//! ‹root›/+/+/monitor/$state ── "lost" ──► PeerTracker::open_incident
//!                                               │ (one per peer)
//!                                               ▼
//!   sleep(grace) → $state/set "init" → sleep(grace) → $state/set "ready" → sleep(grace)
//!                                               │
//!                                       probe $state (timeout = lost)
//!                                               │
//!                      ┌──── not lost ──────────┴─────────── lost ────┐
//!                      ▼                                              ▼
//!               close incident                  poll with BackoffPolicy until not lost
//! ```

mod backoff;
mod core;
mod peers;

pub use backoff::{BackoffPolicy, JitterPolicy};
pub use core::{WATCHDOG_JOB, Watchdog, WatchdogHooks};
pub use peers::{PeerRecord, PeerTracker};
