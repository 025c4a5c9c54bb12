use crate::automation::params::ensure_positive;
use crate::automation::{Automation, DosingEvent, Observation, StrategyParams};
use crate::error::StrategyError;

/// Keeps optical density at or below a target by diluting once it is reached.
#[derive(Debug, Clone)]
pub struct Turbidostat {
    target_od: f64,
    volume: f64,
}

impl Turbidostat {
    pub const KEY: &'static str = "turbidostat";

    pub fn from_params(params: &StrategyParams) -> Result<Self, StrategyError> {
        Ok(Self {
            target_od: params.require_positive("target_od")?,
            volume: params.require_positive("volume")?,
        })
    }
}

impl Automation for Turbidostat {
    fn key(&self) -> &'static str {
        Self::KEY
    }

    fn settings(&self) -> &'static [&'static str] {
        &["target_od", "volume"]
    }

    fn decide(&mut self, obs: &Observation) -> DosingEvent {
        // the target itself triggers a dilution
        if obs.od >= self.target_od {
            DosingEvent::Dilution {
                volume: self.volume,
            }
        } else {
            DosingEvent::NoEvent
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::strategies::obs;

    fn turbidostat(target_od: f64) -> Turbidostat {
        Turbidostat::from_params(
            &StrategyParams::default()
                .with("target_od", target_od)
                .with("volume", 0.25),
        )
        .unwrap()
    }

    #[test]
    fn boundary_at_target_dilutes() {
        let mut s = turbidostat(1.0);
        let dilution = DosingEvent::Dilution { volume: 0.25 };
        assert_eq!(s.decide(&obs(0.98, 0.01)), DosingEvent::NoEvent);
        assert_eq!(s.decide(&obs(1.0, 0.01)), dilution);
        assert_eq!(s.decide(&obs(1.01, 0.01)), dilution);
        assert_eq!(s.decide(&obs(0.99, 0.01)), DosingEvent::NoEvent);
    }

    #[test]
    fn target_update_applies_immediately() {
        let mut s = turbidostat(1.0);
        s.apply_setting("target_od", 0.5).unwrap();
        assert_eq!(s.setting("target_od"), Some(0.5));
        assert!(s.decide(&obs(0.6, 0.0)).requires_action());
        assert!(matches!(
            s.apply_setting("duration_x", 1.0),
            Err(StrategyError::UnknownSetting { .. })
        ));
    }
}
