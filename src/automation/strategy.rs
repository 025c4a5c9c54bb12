//! # Strategy contract.
//!
//! A strategy is the numeric policy inside an engine: given the latest fresh
//! readings it returns one [`DosingEvent`]. Everything else (timers, staleness,
//! actuation, accounting) belongs to the engine.

use std::fmt;

use super::event::DosingEvent;
use crate::error::StrategyError;

/// Fresh inputs for one decision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    /// Latest filtered optical density.
    pub od: f64,
    /// Latest growth rate (per hour).
    pub growth_rate: f64,
    /// Time since the previous tick, in minutes.
    pub dt_minutes: f64,
}

/// Pluggable dosing policy.
pub trait Automation: Send + fmt::Debug {
    /// Registry key this strategy was built from.
    fn key(&self) -> &'static str;

    /// Names of the parameters that may be changed at runtime.
    fn settings(&self) -> &'static [&'static str] {
        &[]
    }

    /// False for strategies that act on a schedule alone; the engine then skips the
    /// freshness check and passes whatever readings it has (0 when none arrived).
    fn requires_readings(&self) -> bool {
        true
    }

    /// Computes this tick's decision. May update internal history (PID, previous OD).
    fn decide(&mut self, obs: &Observation) -> DosingEvent;

    /// Applies a runtime parameter change, including any derived values.
    fn apply_setting(&mut self, name: &str, _value: f64) -> Result<(), StrategyError> {
        Err(StrategyError::UnknownSetting {
            name: name.to_string(),
        })
    }

    /// Current value of a parameter or derived value.
    fn setting(&self, _name: &str) -> Option<f64> {
        None
    }

    /// Tick period changed; strategies with duration-derived values recompute them.
    fn set_duration(&mut self, _minutes: f64) {}
}
