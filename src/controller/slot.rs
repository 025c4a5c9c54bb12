use std::time::Duration;

use tokio::time::Instant;

use super::spec::StrategySpec;
use crate::automation::AutomationEngine;

/// The controller's single engine slot.
pub(super) struct SlotState {
    /// Current status (idle or running).
    pub status: SlotStatus,

    /// The engine currently reacting to readings, if any.
    pub engine: Option<AutomationEngine>,

    /// Spec the current engine was built from.
    pub spec: Option<StrategySpec>,
}

/// Status of the engine slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum SlotStatus {
    /// No engine running.
    Idle,

    /// Engine running.
    Running {
        /// When the engine was adopted.
        started_at: Instant,
    },
}

impl SlotState {
    /// Creates a new idle slot.
    pub fn new() -> Self {
        Self {
            status: SlotStatus::Idle,
            engine: None,
            spec: None,
        }
    }

    pub fn adopt(&mut self, engine: AutomationEngine, spec: StrategySpec) {
        self.engine = Some(engine);
        self.spec = Some(spec);
        self.status = SlotStatus::Running {
            started_at: Instant::now(),
        };
    }

    /// How long the current engine has been running.
    pub fn uptime(&self) -> Option<Duration> {
        match self.status {
            SlotStatus::Running { started_at } => Some(started_at.elapsed()),
            SlotStatus::Idle => None,
        }
    }

    /// Disconnects the current engine and leaves the slot idle.
    ///
    /// Returns once the engine has finished any pump step it had started, with the
    /// spec it was built from.
    pub async fn retire(&mut self) -> Option<StrategySpec> {
        self.status = SlotStatus::Idle;
        if let Some(engine) = self.engine.take() {
            engine.disconnect().await;
        }
        self.spec.take()
    }
}
