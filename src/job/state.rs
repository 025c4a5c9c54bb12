use std::fmt;
use std::str::FromStr;

use crate::error::JobError;

/// Lifecycle state of a job.
///
/// ```text
/// init ──► ready ⇄ sleeping
///   │        │        │
///   └────────┴────────┴──► disconnected (terminal)
/// ```
///
/// `Lost` is never occupied by a job; observers see it when the broker publishes
/// the job's last will after an unclean exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Init,
    Ready,
    Sleeping,
    Disconnected,
    Lost,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Init => "init",
            JobState::Ready => "ready",
            JobState::Sleeping => "sleeping",
            JobState::Disconnected => "disconnected",
            JobState::Lost => "lost",
        }
    }

    /// True for states a job may be asked to enter.
    pub fn is_requestable(&self) -> bool {
        !matches!(self, JobState::Lost)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "init" => Ok(JobState::Init),
            "ready" => Ok(JobState::Ready),
            "sleeping" => Ok(JobState::Sleeping),
            "disconnected" => Ok(JobState::Disconnected),
            "lost" => Ok(JobState::Lost),
            other => Err(JobError::InvalidState {
                value: other.to_string(),
            }),
        }
    }
}
