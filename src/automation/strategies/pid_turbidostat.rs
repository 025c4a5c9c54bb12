use super::MIN_OD_FRACTION;
use crate::automation::params::ensure_positive;
use crate::automation::{Automation, DosingEvent, Observation, StrategyParams};
use crate::config::ControlConfig;
use crate::error::StrategyError;
use crate::pid::Pid;

/// Smallest dilution worth running a pump for, in mL.
const MIN_DILUTION_ML: f64 = 0.01;

/// Turbidostat whose dilution volume is scaled by a PID loop on optical density.
///
/// The PID output lives in `[0, 1]` and multiplies `volume`; below
/// `min_od = 0.75 * target_od` the culture is left alone.
#[derive(Debug, Clone)]
pub struct PidTurbidostat {
    target_od: f64,
    min_od: f64,
    volume: f64,
    pid: Pid,
}

impl PidTurbidostat {
    pub const KEY: &'static str = "pid_turbidostat";

    pub fn from_params(params: &StrategyParams, cfg: &ControlConfig) -> Result<Self, StrategyError> {
        let target_od = params.require_positive("target_od")?;
        Ok(Self {
            target_od,
            min_od: MIN_OD_FRACTION * target_od,
            volume: params.require_positive("volume")?,
            pid: Pid::new(cfg.pid.turbidostat, target_od, 0.0, 1.0),
        })
    }

    fn set_target_od(&mut self, target_od: f64) {
        self.target_od = target_od;
        self.min_od = MIN_OD_FRACTION * target_od;
        self.pid.set_setpoint(target_od);
    }
}

impl Automation for PidTurbidostat {
    fn key(&self) -> &'static str {
        Self::KEY
    }

    fn settings(&self) -> &'static [&'static str] {
        &["target_od", "volume"]
    }

    fn decide(&mut self, obs: &Observation) -> DosingEvent {
        if obs.od <= self.min_od {
            return DosingEvent::NoEvent;
        }
        let volume = self.pid.update(obs.od, obs.dt_minutes) * self.volume;
        if volume < MIN_DILUTION_ML {
            DosingEvent::NoEvent
        } else {
            DosingEvent::Dilution { volume }
        }
    }

    fn apply_setting(&mut self, name: &str, value: f64) -> Result<(), StrategyError> {
        match name {
            "target_od" => self.set_target_od(ensure_positive(name, value)?),
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
            "min_od" => Some(self.min_od),
            "setpoint" => Some(self.pid.setpoint()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::strategies::obs;

    fn pid_turbidostat(target_od: f64, volume: f64) -> PidTurbidostat {
        PidTurbidostat::from_params(
            &StrategyParams::default()
                .with("target_od", target_od)
                .with("volume", volume),
            &ControlConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn dilutes_hard_when_far_above_target() {
        let mut s = pid_turbidostat(2.4, 2.0);
        match s.decide(&obs(3.2, 0.01)) {
            DosingEvent::Dilution { volume } => assert!(volume > 1.0),
            other => panic!("expected dilution, got {other:?}"),
        }
    }

    #[test]
    fn idle_below_min_od() {
        let mut s = pid_turbidostat(2.4, 2.0);
        assert_eq!(s.decide(&obs(1.7, 0.01)), DosingEvent::NoEvent);
    }

    #[test]
    fn target_update_moves_min_od_and_setpoint_together() {
        let mut s = pid_turbidostat(2.0, 1.0);
        s.apply_setting("target_od", 1.0).unwrap();
        assert_eq!(s.setting("target_od"), Some(1.0));
        assert_eq!(s.setting("min_od"), Some(0.75));
        assert_eq!(s.setting("setpoint"), Some(1.0));
    }
}
