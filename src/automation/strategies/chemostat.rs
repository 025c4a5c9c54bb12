use crate::automation::params::ensure_positive;
use crate::automation::{Automation, DosingEvent, Observation, StrategyParams};
use crate::error::StrategyError;

/// Constant dilution: exchanges `volume` every tick.
#[derive(Debug, Clone)]
pub struct Chemostat {
    volume: f64,
}

impl Chemostat {
    pub const KEY: &'static str = "chemostat";

    pub fn from_params(params: &StrategyParams) -> Result<Self, StrategyError> {
        Ok(Self {
            volume: params.require_positive("volume")?,
        })
    }
}

impl Automation for Chemostat {
    fn key(&self) -> &'static str {
        Self::KEY
    }

    fn settings(&self) -> &'static [&'static str] {
        &["volume"]
    }

    fn decide(&mut self, _obs: &Observation) -> DosingEvent {
        DosingEvent::Dilution {
            volume: self.volume,
        }
    }

    fn apply_setting(&mut self, name: &str, value: f64) -> Result<(), StrategyError> {
        match name {
            "volume" => self.volume = ensure_positive(name, value)?,
            _ => {
                return Err(StrategyError::UnknownSetting {
                    name: name.to_string(),
                });
            }
        }
        Ok(())
    }

    fn setting(&self, name: &str) -> Option<f64> {
        (name == "volume").then_some(self.volume)
    }
}
