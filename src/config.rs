//! # Control-plane configuration.
//!
//! Provides [`ControlConfig`], the single settings tree shared by every job in a process.
//!
//! Config is loaded once at start-up (from TOML or defaults) and handed out as
//! `Arc<ControlConfig>`; nothing mutates it afterwards.
//!
//! ```toml
//! [bus]
//! root = "pioreactor"
//!
//! [automation]
//! staleness_threshold = 600.0
//!
//! [pid.turbidostat]
//! kp = -2.97
//!
//! [watchdog]
//! grace = 5.0
//! ```
//!
//! ## Units
//! - Durations are seconds (floats allowed).
//! - Volumes are millilitres.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::pid::PidGains;
use crate::watchdog::JitterPolicy;

/// Failure to load a configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// Path that was read.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// File is not valid TOML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Topic layout.
    pub bus: BusConfig,
    /// Engine and controller behaviour.
    pub automation: AutomationConfig,
    /// PID gains per strategy.
    pub pid: PidConfig,
    /// Peer recovery.
    pub watchdog: WatchdogConfig,
    /// Log filtering and bus forwarding.
    pub logging: LoggingConfig,
}

impl ControlConfig {
    /// Parses a TOML document; missing sections and fields take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Reads and parses a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}

/// Topic layout shared by all jobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// First topic level of every path.
    pub root: String,
    /// Reserved experiment id for leader-scoped, cross-experiment topics.
    pub universal_experiment: String,
    /// How long a restarting job waits for retained state before assuming none exists.
    #[serde(with = "serde_duration_secs")]
    pub retained_read_timeout: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            root: "pioreactor".to_owned(),
            universal_experiment: "$experiment".to_owned(),
            retained_read_timeout: Duration::from_secs(2),
        }
    }
}

/// Engine and controller behaviour.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    /// Maximum age of a sensor reading still eligible for a decision.
    #[serde(with = "serde_duration_secs")]
    pub staleness_threshold: Duration,
    /// Sensor suffix under `od_filtered/`; may contain wildcards.
    pub od_sensor: String,
    /// Default tick period in minutes when a swap request omits `duration`.
    pub default_duration_minutes: f64,
    /// Working volume of one vial, used to derive default exchange volumes.
    pub vial_volume_ml: f64,
    /// Delay before retrying a swap that found no engine reference yet.
    #[serde(with = "serde_duration_secs")]
    pub swap_retry_delay: Duration,
    /// Rebuild the previous engine when a replacement fails to start.
    pub restore_previous_on_failure: bool,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            staleness_threshold: Duration::from_secs(600),
            od_sensor: "+/+".to_owned(),
            default_duration_minutes: 60.0,
            vial_volume_ml: 14.0,
            swap_retry_delay: Duration::from_secs(1),
            restore_previous_on_failure: false,
        }
    }
}

/// PID gains per PID-driven strategy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PidConfig {
    /// Gains for `pid_turbidostat` (input: optical density).
    pub turbidostat: PidGains,
    /// Gains for `pid_morbidostat` (input: growth rate).
    pub morbidostat: PidGains,
}

impl Default for PidConfig {
    fn default() -> Self {
        Self {
            turbidostat: PidGains {
                kp: -2.97,
                ki: -0.11,
                kd: -0.09,
            },
            morbidostat: PidGains {
                kp: -5.0,
                ki: -0.05,
                kd: 0.0,
            },
        }
    }
}

/// Peer recovery timing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Job name whose `$state` topic is watched on every unit.
    pub watched_job: String,
    /// Pause before and between soft-restart commands.
    #[serde(with = "serde_duration_secs")]
    pub grace: Duration,
    /// How long the post-restart state query waits.
    #[serde(with = "serde_duration_secs")]
    pub probe_timeout: Duration,
    /// First slow-poll delay while a peer stays lost.
    #[serde(with = "serde_duration_secs")]
    pub poll_first: Duration,
    /// Slow-poll delay cap.
    #[serde(with = "serde_duration_secs")]
    pub poll_max: Duration,
    /// Slow-poll growth factor (`1.0` = constant).
    pub poll_factor: f64,
    /// Randomisation of slow-poll delays.
    pub poll_jitter: JitterPolicy,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            watched_job: "monitor".to_owned(),
            grace: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(15),
            poll_first: Duration::from_secs(60),
            poll_max: Duration::from_secs(600),
            poll_factor: 1.0,
            poll_jitter: JitterPolicy::None,
        }
    }
}

/// Log filtering.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
    /// Forward WARN and above to the bus `logs/app` topic.
    pub publish_to_bus: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_owned(),
            publish_to_bus: true,
        }
    }
}

/// Serde helper for Duration as (fractional) seconds.
mod serde_duration_secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
