use std::fmt;
use std::sync::Arc;

/// Identity of a job: where it runs and what it is.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId {
    pub unit: Arc<str>,
    pub experiment: Arc<str>,
    pub job_name: Arc<str>,
}

impl JobId {
    pub fn new(
        unit: impl Into<Arc<str>>,
        experiment: impl Into<Arc<str>>,
        job_name: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            unit: unit.into(),
            experiment: experiment.into(),
            job_name: job_name.into(),
        }
    }

    /// Broker client id; one client per job.
    pub fn client_id(&self) -> String {
        format!("{}-{}-{}", self.unit, self.experiment, self.job_name)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.unit, self.experiment, self.job_name)
    }
}
