//! Dosing decisions and the io-event payload published for each pump step.

use serde::Serialize;

use crate::actuation::PumpChannel;

/// Per-tick decision of an engine. Immutable once produced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DosingEvent {
    NoEvent,
    /// Exchange `volume` of media: add media, remove the same volume of waste.
    #[serde(rename = "dilution_event")]
    Dilution { volume: f64 },
    /// Exchange `volume`, of which `alt_fraction` is alternate media and the rest media.
    #[serde(rename = "alt_media_event")]
    AltMedia { volume: f64, alt_fraction: f64 },
}

impl DosingEvent {
    /// All-alternate-media exchange.
    pub fn alt_media(volume: f64) -> Self {
        DosingEvent::AltMedia {
            volume,
            alt_fraction: 1.0,
        }
    }

    pub fn requires_action(&self) -> bool {
        !matches!(self, DosingEvent::NoEvent)
    }

    /// Pump steps as `(media, alt_media, waste)` millilitres.
    pub fn io_volumes(&self) -> (f64, f64, f64) {
        match *self {
            DosingEvent::NoEvent => (0.0, 0.0, 0.0),
            DosingEvent::Dilution { volume } => (volume, 0.0, volume),
            DosingEvent::AltMedia {
                volume,
                alt_fraction,
            } => {
                let f = alt_fraction.clamp(0.0, 1.0);
                ((1.0 - f) * volume, f * volume, volume)
            }
        }
    }
}

/// Payload of `.../dosing_events`, one per pump step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IoEvent {
    pub volume_change: f64,
    pub event: &'static str,
    pub source_of_event: String,
    /// False when the pump reported a failure; the ledger was not credited.
    pub succeeded: bool,
}

impl IoEvent {
    pub fn new(channel: PumpChannel, volume: f64, source: &str, succeeded: bool) -> Self {
        Self {
            volume_change: volume,
            event: channel.event_name(),
            source_of_event: source.to_string(),
            succeeded,
        }
    }
}
