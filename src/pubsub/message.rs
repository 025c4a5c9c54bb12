//! # Messages carried by the bus.
//!
//! A [`Message`] is a topic, a UTF-8 payload and delivery metadata. Payloads are
//! stored as `Arc<str>` so fan-out to many subscriptions clones a pointer, not text.
//!
//! ## Ordering guarantees
//! Each message gets a globally unique sequence number (`seq`) that increases
//! monotonically per process. Per-subscription delivery order follows publish order;
//! `seq` is informational across topics.
//!
//! ## Example
//! ```rust
//! use bioreactor_control::pubsub::{Message, Qos};
//!
//! let msg = Message::new("pioreactor/unit1/exp1/monitor/$state", "ready")
//!     .with_qos(Qos::ExactlyOnce)
//!     .with_retain(true);
//!
//! assert_eq!(msg.payload_str(), "ready");
//! assert!(msg.retain);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

/// Global sequence counter for message ordering.
static MESSAGE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Delivery guarantee requested by the publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Qos {
    /// Fire and forget.
    #[default]
    AtMostOnce,
    /// Delivered, possibly more than once.
    AtLeastOnce,
    /// Delivered exactly once.
    ExactlyOnce,
}

/// A single bus message.
///
/// - `seq`: monotonic process-wide sequence
/// - `at`: wall-clock publish time (for logs)
/// - `retain`: on publish, asks the broker to cache it; on delivery, marks a replayed cached value
#[derive(Debug, Clone)]
pub struct Message {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Concrete topic (no wildcards).
    pub topic: Arc<str>,
    /// Payload text; empty means "delete" for retained topics.
    pub payload: Arc<str>,
    /// Requested delivery guarantee.
    pub qos: Qos,
    /// Retained flag.
    pub retain: bool,
}

impl Message {
    /// Creates a non-retained, at-most-once message with the next sequence number.
    pub fn new(topic: impl Into<Arc<str>>, payload: impl Into<Arc<str>>) -> Self {
        Self {
            seq: MESSAGE_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            topic: topic.into(),
            payload: payload.into(),
            qos: Qos::AtMostOnce,
            retain: false,
        }
    }

    /// Sets the delivery guarantee.
    #[inline]
    pub fn with_qos(mut self, qos: Qos) -> Self {
        self.qos = qos;
        self
    }

    /// Sets the retained flag.
    #[inline]
    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    #[inline]
    pub fn payload_str(&self) -> &str {
        &self.payload
    }

    /// True for the empty payload used to clear retained state.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Parses the trimmed payload as a float.
    pub fn payload_f64(&self) -> Option<f64> {
        self.payload.trim().parse::<f64>().ok().filter(|v| v.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_increases() {
        let a = Message::new("a", "1");
        let b = Message::new("a", "2");
        assert!(b.seq > a.seq);
    }

    #[test]
    fn payload_f64_trims_and_rejects_garbage() {
        assert_eq!(Message::new("t", " 0.75\n").payload_f64(), Some(0.75));
        assert_eq!(Message::new("t", "NaN").payload_f64(), None);
        assert_eq!(Message::new("t", "{}").payload_f64(), None);
    }
}
