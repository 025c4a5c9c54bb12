//! # Topic layout and wildcard matching.
//!
//! Every job-owned topic has the shape:
//! ```text
//! ‹root›/{unit}/{experiment}/{job_name}/{attribute...}
//! ```
//! Filters follow MQTT rules: `+` matches exactly one level, `#` matches the rest
//! (including nothing) and may only appear as the final level.

use std::sync::Arc;

use crate::error::BusError;

/// Single-level wildcard.
pub const SINGLE_LEVEL: &str = "+";
/// Multi-level wildcard.
pub const MULTI_LEVEL: &str = "#";

/// Returns true if `topic` is matched by `filter`.
///
/// ```
/// use bioreactor_control::pubsub::topic::matches;
///
/// assert!(matches("pioreactor/+/+/monitor/$state", "pioreactor/u1/exp/monitor/$state"));
/// assert!(matches("pioreactor/u1/#", "pioreactor/u1/exp/od_filtered/135/A"));
/// assert!(!matches("pioreactor/+/exp/growth_rate", "pioreactor/u1/other/growth_rate"));
/// ```
pub fn matches(filter: &str, topic: &str) -> bool {
    let mut f = filter.split('/');
    let mut t = topic.split('/');
    loop {
        match (f.next(), t.next()) {
            (Some(MULTI_LEVEL), _) => return true,
            (Some(SINGLE_LEVEL), Some(_)) => {}
            (Some(fl), Some(tl)) if fl == tl => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Checks a concrete publish topic: non-empty levels, no wildcards.
pub fn validate_topic(topic: &str) -> Result<(), BusError> {
    let ok = !topic.is_empty()
        && topic
            .split('/')
            .all(|l| !l.is_empty() && l != SINGLE_LEVEL && l != MULTI_LEVEL);
    if ok {
        Ok(())
    } else {
        Err(BusError::InvalidTopic {
            topic: topic.to_string(),
        })
    }
}

/// Checks a subscription filter: non-empty levels, `#` only last.
pub fn validate_filter(filter: &str) -> Result<(), BusError> {
    let levels: Vec<&str> = filter.split('/').collect();
    let last = levels.len().saturating_sub(1);
    let ok = !filter.is_empty()
        && levels
            .iter()
            .enumerate()
            .all(|(i, l)| !l.is_empty() && (*l != MULTI_LEVEL || i == last));
    if ok {
        Ok(())
    } else {
        Err(BusError::InvalidTopic {
            topic: filter.to_string(),
        })
    }
}

/// Returns the `idx`-th level of a topic.
pub fn level(topic: &str, idx: usize) -> Option<&str> {
    topic.split('/').nth(idx)
}

/// Builds topic paths under one root.
#[derive(Debug, Clone)]
pub struct Topics {
    root: Arc<str>,
}

impl Topics {
    pub fn new(root: impl Into<Arc<str>>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// `‹root›/{unit}/{experiment}/{job}/{attribute}`
    pub fn job(&self, unit: &str, experiment: &str, job: &str, attribute: &str) -> String {
        format!("{}/{unit}/{experiment}/{job}/{attribute}", self.root)
    }

    /// `‹root›/{unit}/{experiment}/{leaf}`, for topics that are not owned by a job.
    pub fn experiment(&self, unit: &str, experiment: &str, leaf: &str) -> String {
        format!("{}/{unit}/{experiment}/{leaf}", self.root)
    }

    /// `‹root›/{leaf}`
    pub fn global(&self, leaf: &str) -> String {
        format!("{}/{leaf}", self.root)
    }

    /// Filter over every unit and experiment for one job attribute.
    pub fn fleet(&self, job: &str, attribute: &str) -> String {
        format!("{}/+/+/{job}/{attribute}", self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_level_matches_parent_and_children() {
        assert!(matches("a/#", "a"));
        assert!(matches("a/#", "a/b/c"));
        assert!(matches("#", "a/b"));
        assert!(!matches("a/#", "b/c"));
    }

    #[test]
    fn single_level_needs_exactly_one() {
        assert!(matches("a/+/c", "a/b/c"));
        assert!(!matches("a/+/c", "a/c"));
        assert!(!matches("a/+", "a/b/c"));
        assert!(!matches("a/b", "a/b/c"));
    }

    #[test]
    fn dollar_levels_are_literal() {
        assert!(matches(
            "pioreactor/+/$experiment/monitor/$state",
            "pioreactor/leader/$experiment/monitor/$state"
        ));
    }

    #[test]
    fn validation() {
        assert!(validate_topic("a/b/c").is_ok());
        assert!(validate_topic("a/+/c").is_err());
        assert!(validate_topic("a//c").is_err());
        assert!(validate_topic("").is_err());
        assert!(validate_filter("a/+/#").is_ok());
        assert!(validate_filter("a/#/c").is_err());
    }

    #[test]
    fn builder_layout() {
        let t = Topics::new("pioreactor");
        assert_eq!(
            t.job("u1", "exp", "dosing_automation", "$state"),
            "pioreactor/u1/exp/dosing_automation/$state"
        );
        assert_eq!(t.experiment("u1", "exp", "logs/app"), "pioreactor/u1/exp/logs/app");
        assert_eq!(t.global("latest_experiment"), "pioreactor/latest_experiment");
        assert_eq!(t.fleet("monitor", "$state"), "pioreactor/+/+/monitor/$state");
        assert_eq!(level("pioreactor/u1/exp/x", 1), Some("u1"));
    }
}
