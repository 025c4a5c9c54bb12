use crate::automation::params::ensure_positive;
use crate::automation::{Automation, DosingEvent, Observation, StrategyParams};
use crate::error::StrategyError;

/// Classic morbidostat: alternate media when OD is above target and still rising,
/// plain dilution otherwise. The first tick only records the OD.
#[derive(Debug, Clone)]
pub struct Morbidostat {
    target_od: f64,
    volume: f64,
    previous_od: Option<f64>,
}

impl Morbidostat {
    pub const KEY: &'static str = "morbidostat";

    pub fn from_params(params: &StrategyParams) -> Result<Self, StrategyError> {
        Ok(Self {
            target_od: params.require_positive("target_od")?,
            volume: params.require_positive("volume")?,
            previous_od: None,
        })
    }
}

impl Automation for Morbidostat {
    fn key(&self) -> &'static str {
        Self::KEY
    }

    fn settings(&self) -> &'static [&'static str] {
        &["target_od", "volume"]
    }

    fn decide(&mut self, obs: &Observation) -> DosingEvent {
        let Some(previous) = self.previous_od.replace(obs.od) else {
            return DosingEvent::NoEvent;
        };
        if obs.od > self.target_od && obs.od > previous {
            DosingEvent::alt_media(self.volume)
        } else {
            DosingEvent::Dilution {
                volume: self.volume,
            }
        }
    }

    fn apply_setting(&mut self, name: &str, value: f64) -> Result<(), StrategyError> {
        match name {
            "target_od" => self.target_od = ensure_positive(name, value)?,
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
        match name {
            "target_od" => Some(self.target_od),
            "volume" => Some(self.volume),
            _ => None,
        }
    }
}
