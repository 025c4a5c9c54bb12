//! # Poll backoff for peers that stay lost.
//!
//! The delay before poll `n` is `first × factor^n`, clamped to `max`, then jittered.
//! The base is derived from the attempt number alone, so jitter never feeds back
//! into later delays.
//!
//! ```rust
//! use std::time::Duration;
//! use bioreactor_control::watchdog::{BackoffPolicy, JitterPolicy};
//!
//! let poll = BackoffPolicy {
//!     first: Duration::from_secs(60),
//!     max: Duration::from_secs(600),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//! assert_eq!(poll.next(0), Duration::from_secs(60));
//! assert_eq!(poll.next(1), Duration::from_secs(120));
//! assert_eq!(poll.next(10), Duration::from_secs(600));
//! ```

use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

use crate::config::WatchdogConfig;

/// Randomisation applied to each poll delay.
///
/// - `none`: exact delay.
/// - `full`: uniform in `[0, delay]`.
/// - `equal`: `delay/2` plus uniform in `[0, delay/2]`.
/// - `decorrelated`: uniform in `[first, 3 × delay]`, capped at `max`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterPolicy {
    #[default]
    None,
    Full,
    Equal,
    Decorrelated,
}

impl JitterPolicy {
    fn apply(self, base: Duration, floor: Duration, max: Duration) -> Duration {
        let ms = base.as_millis() as u64;
        if ms == 0 {
            return base;
        }
        let mut rng = rand::rng();
        match self {
            JitterPolicy::None => base,
            JitterPolicy::Full => Duration::from_millis(rng.random_range(0..=ms)),
            JitterPolicy::Equal => {
                let half = ms / 2;
                Duration::from_millis(half + rng.random_range(0..=half))
            }
            JitterPolicy::Decorrelated => {
                let lo = floor.as_millis() as u64;
                let hi = ms.saturating_mul(3).min(max.as_millis() as u64).max(lo);
                if lo >= hi {
                    return floor;
                }
                Duration::from_millis(rng.random_range(lo..=hi))
            }
        }
    }
}

/// Growth of the delay between polls of a lost peer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first poll.
    pub first: Duration,
    /// Delay cap.
    pub max: Duration,
    /// Multiplicative growth (`1.0` = constant).
    pub factor: f64,
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&WatchdogConfig::default())
    }
}

impl From<&WatchdogConfig> for BackoffPolicy {
    fn from(cfg: &WatchdogConfig) -> Self {
        Self {
            first: cfg.poll_first,
            max: cfg.poll_max,
            factor: cfg.poll_factor,
            jitter: cfg.poll_jitter,
        }
    }
}

impl BackoffPolicy {
    /// Delay before poll `attempt` (0-indexed).
    pub fn next(&self, attempt: u32) -> Duration {
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);
        let base = if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        };
        self.jitter.apply(base, self.first.min(self.max), self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(factor: f64, jitter: JitterPolicy) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_secs(60),
            max: Duration::from_secs(600),
            factor,
            jitter,
        }
    }

    #[test]
    fn default_polls_every_minute() {
        let p = BackoffPolicy::default();
        for attempt in 0..5 {
            assert_eq!(p.next(attempt), Duration::from_secs(60));
        }
    }

    #[test]
    fn grows_and_clamps() {
        let p = policy(2.0, JitterPolicy::None);
        assert_eq!(p.next(2), Duration::from_secs(240));
        assert_eq!(p.next(4), Duration::from_secs(600));
        assert_eq!(p.next(u32::MAX), Duration::from_secs(600));
    }

    #[test]
    fn first_above_max_is_clamped() {
        let mut p = policy(1.0, JitterPolicy::None);
        p.first = Duration::from_secs(900);
        assert_eq!(p.next(0), Duration::from_secs(600));
    }

    #[test]
    fn jitter_stays_in_bounds() {
        let full = policy(1.0, JitterPolicy::Full);
        let equal = policy(1.0, JitterPolicy::Equal);
        let decorrelated = policy(2.0, JitterPolicy::Decorrelated);
        for attempt in 0..50 {
            assert!(full.next(attempt) <= Duration::from_secs(60));

            let d = equal.next(attempt);
            assert!(d >= Duration::from_secs(30) && d <= Duration::from_secs(60));

            let d = decorrelated.next(attempt % 6);
            assert!(d >= Duration::from_secs(60) && d <= Duration::from_secs(600));
        }
    }
}
