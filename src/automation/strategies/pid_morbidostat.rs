use super::MIN_OD_FRACTION;
use crate::automation::params::ensure_positive;
use crate::automation::{Automation, DosingEvent, Observation, StrategyParams};
use crate::config::ControlConfig;
use crate::error::StrategyError;
use crate::pid::Pid;

/// Morbidostat driven by a PID loop on growth rate.
///
/// Every tick above `min_od` exchanges `volume`; the PID output, centred on 0.5,
/// is the share of that volume given as alternate media. Growth above the target
/// raises the share.
///
/// Unless `volume` is given explicitly it is derived as
/// `target_growth_rate * vial_volume * duration_hours`, and follows changes to either.
#[derive(Debug, Clone)]
pub struct PidMorbidostat {
    target_od: f64,
    min_od: f64,
    target_growth_rate: f64,
    volume: f64,
    explicit_volume: bool,
    duration_minutes: f64,
    vial_volume_ml: f64,
    pid: Pid,
}

impl PidMorbidostat {
    pub const KEY: &'static str = "pid_morbidostat";

    pub fn from_params(params: &StrategyParams, cfg: &ControlConfig) -> Result<Self, StrategyError> {
        let target_od = params.require_positive("target_od")?;
        let target_growth_rate = params.require_positive("target_growth_rate")?;
        let duration_minutes = params.duration_minutes(cfg)?;
        let explicit = params
            .get_f64("volume")?
            .map(|v| ensure_positive("volume", v))
            .transpose()?;

        let mut s = Self {
            target_od,
            min_od: MIN_OD_FRACTION * target_od,
            target_growth_rate,
            volume: explicit.unwrap_or_default(),
            explicit_volume: explicit.is_some(),
            duration_minutes,
            vial_volume_ml: cfg.automation.vial_volume_ml,
            pid: Pid::new(cfg.pid.morbidostat, target_growth_rate, -0.5, 0.5),
        };
        s.derive_volume();
        Ok(s)
    }

    fn derive_volume(&mut self) {
        if !self.explicit_volume {
            self.volume =
                self.target_growth_rate * self.vial_volume_ml * (self.duration_minutes / 60.0);
        }
    }
}

impl Automation for PidMorbidostat {
    fn key(&self) -> &'static str {
        Self::KEY
    }

    fn settings(&self) -> &'static [&'static str] {
        &["target_od", "target_growth_rate", "volume"]
    }

    fn decide(&mut self, obs: &Observation) -> DosingEvent {
        if obs.od <= self.min_od {
            return DosingEvent::NoEvent;
        }
        let alt_fraction = 0.5 + self.pid.update(obs.growth_rate, obs.dt_minutes);
        DosingEvent::AltMedia {
            volume: self.volume,
            alt_fraction,
        }
    }

    fn apply_setting(&mut self, name: &str, value: f64) -> Result<(), StrategyError> {
        match name {
            "target_od" => {
                self.target_od = ensure_positive(name, value)?;
                self.min_od = MIN_OD_FRACTION * self.target_od;
            }
            "target_growth_rate" => {
                self.target_growth_rate = ensure_positive(name, value)?;
                self.pid.set_setpoint(self.target_growth_rate);
                self.derive_volume();
            }
            "volume" => {
                self.volume = ensure_positive(name, value)?;
                self.explicit_volume = true;
            }
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
            "min_od" => Some(self.min_od),
            "target_growth_rate" => Some(self.target_growth_rate),
            "setpoint" => Some(self.pid.setpoint()),
            "volume" => Some(self.volume),
            _ => None,
        }
    }

    fn set_duration(&mut self, minutes: f64) {
        self.duration_minutes = minutes;
        self.derive_volume();
    }
}
