//! # Actuation seam.
//!
//! Pumps are driven through [`Actuator`]; the control plane never talks to hardware
//! directly. [`SimulatedPump`] records every request and can be told to fail, which
//! is what tests and the demo use.

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::ActuationError;

/// Liquid path driven by one pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PumpChannel {
    Media,
    AltMedia,
    Waste,
}

impl PumpChannel {
    /// Event name used on the io-events topic.
    pub fn event_name(&self) -> &'static str {
        match self {
            PumpChannel::Media => "add_media",
            PumpChannel::AltMedia => "add_alt_media",
            PumpChannel::Waste => "remove_waste",
        }
    }
}

impl fmt::Display for PumpChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PumpChannel::Media => "media",
            PumpChannel::AltMedia => "alt_media",
            PumpChannel::Waste => "waste",
        })
    }
}

/// Drives a pump for a volume.
#[async_trait]
pub trait Actuator: Send + Sync + fmt::Debug {
    async fn dispense(&self, channel: PumpChannel, volume_ml: f64) -> Result<(), ActuationError>;
}

/// In-memory pump driver.
#[derive(Debug, Default)]
pub struct SimulatedPump {
    calls: Mutex<Vec<(PumpChannel, f64)>>,
    failing: Mutex<HashSet<PumpChannel>>,
}

impl SimulatedPump {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later request on `channel` fail (or succeed again).
    pub fn set_failing(&self, channel: PumpChannel, failing: bool) {
        let mut set = self.failing.lock();
        if failing {
            set.insert(channel);
        } else {
            set.remove(&channel);
        }
    }

    /// Successful requests so far, in order.
    pub fn dispensed(&self) -> Vec<(PumpChannel, f64)> {
        self.calls.lock().clone()
    }

    /// Total successfully dispensed on one channel.
    pub fn total(&self, channel: PumpChannel) -> f64 {
        self.calls
            .lock()
            .iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, v)| v)
            .sum()
    }
}

#[async_trait]
impl Actuator for SimulatedPump {
    async fn dispense(&self, channel: PumpChannel, volume_ml: f64) -> Result<(), ActuationError> {
        if !volume_ml.is_finite() || volume_ml < 0.0 {
            return Err(ActuationError::InvalidVolume { volume_ml });
        }
        if self.failing.lock().contains(&channel) {
            return Err(ActuationError::Failed {
                channel,
                volume_ml,
                reason: "simulated fault".to_string(),
            });
        }
        self.calls.lock().push((channel, volume_ml));
        Ok(())
    }
}
