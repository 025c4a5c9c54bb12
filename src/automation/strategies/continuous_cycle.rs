use crate::automation::params::ensure_positive;
use crate::automation::{Automation, DosingEvent, Observation, StrategyParams};
use crate::error::StrategyError;

/// Keeps media flowing: exchanges `volume` on every tick, with or without sensors.
#[derive(Debug, Clone)]
pub struct ContinuousCycle {
    volume: f64,
}

impl ContinuousCycle {
    pub const KEY: &'static str = "continuous_cycle";

    pub fn from_params(params: &StrategyParams) -> Result<Self, StrategyError> {
        Ok(Self {
            volume: params.require_positive("volume")?,
        })
    }
}

impl Automation for ContinuousCycle {
    fn key(&self) -> &'static str {
        Self::KEY
    }

    fn settings(&self) -> &'static [&'static str] {
        &["volume"]
    }

    fn requires_readings(&self) -> bool {
        false
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::strategies::obs;

    #[test]
    fn cycles_without_looking_at_readings() {
        let mut s = ContinuousCycle::from_params(&StrategyParams::default().with("volume", 1.0)).unwrap();
        assert!(!s.requires_readings());
        assert_eq!(s.decide(&obs(0.0, 0.0)), DosingEvent::Dilution { volume: 1.0 });
        assert!(s.apply_setting("volume", -1.0).is_err());
        assert_eq!(s.setting("volume"), Some(1.0));
    }
}
