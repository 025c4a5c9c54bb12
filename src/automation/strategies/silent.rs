use crate::automation::{Automation, DosingEvent, Observation};

/// Observes and never doses.
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl Silent {
    pub const KEY: &'static str = "silent";
}

impl Automation for Silent {
    fn key(&self) -> &'static str {
        Self::KEY
    }

    fn decide(&mut self, _obs: &Observation) -> DosingEvent {
        DosingEvent::NoEvent
    }
}
