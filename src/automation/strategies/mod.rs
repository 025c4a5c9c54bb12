//! Built-in dosing strategies.
//!
//! | key               | required params                    | decision                                   |
//! |-------------------|------------------------------------|--------------------------------------------|
//! | `silent`          |                                    | never acts                                 |
//! | `turbidostat`     | `target_od`, `volume`              | dilute when OD reaches the target          |
//! | `morbidostat`     | `target_od`, `volume`              | alt media when OD is high and rising       |
//! | `chemostat`       | `volume`                           | dilute every tick                          |
//! | `pid_turbidostat` | `target_od`, `volume`              | PID on OD scales the dilution volume       |
//! | `pid_morbidostat` | `target_od`, `target_growth_rate`  | PID on growth rate picks the alt fraction  |
//! | `continuous_cycle`| `volume`                           | dilute every tick, readings not required   |

mod chemostat;
mod continuous_cycle;
mod morbidostat;
mod pid_morbidostat;
mod pid_turbidostat;
mod silent;
mod turbidostat;

pub use chemostat::Chemostat;
pub use continuous_cycle::ContinuousCycle;
pub use morbidostat::Morbidostat;
pub use pid_morbidostat::PidMorbidostat;
pub use pid_turbidostat::PidTurbidostat;
pub use silent::Silent;
pub use turbidostat::Turbidostat;

use super::registry::StrategyRegistry;

/// Fraction of the target OD below which PID strategies stay idle.
pub(crate) const MIN_OD_FRACTION: f64 = 0.75;

pub(crate) fn register_builtins(reg: &mut StrategyRegistry) {
    reg.register(Silent::KEY, |_, _| Ok(Box::new(Silent)))
        .register(Turbidostat::KEY, |p, _| Ok(Box::new(Turbidostat::from_params(p)?)))
        .register(Morbidostat::KEY, |p, _| Ok(Box::new(Morbidostat::from_params(p)?)))
        .register(Chemostat::KEY, |p, _| Ok(Box::new(Chemostat::from_params(p)?)))
        .register(PidTurbidostat::KEY, |p, cfg| {
            Ok(Box::new(PidTurbidostat::from_params(p, cfg)?))
        })
        .register(PidMorbidostat::KEY, |p, cfg| {
            Ok(Box::new(PidMorbidostat::from_params(p, cfg)?))
        })
        .register(ContinuousCycle::KEY, |p, _| {
            Ok(Box::new(ContinuousCycle::from_params(p)?))
        });
}

#[cfg(test)]
pub(crate) fn obs(od: f64, growth_rate: f64) -> super::Observation {
    super::Observation {
        od,
        growth_rate,
        dt_minutes: 60.0,
    }
}
