//! # Broker seam and in-memory implementation.
//!
//! [`Broker`] is the transport contract the control plane needs: publish, wildcard
//! subscribe, retained messages and a per-client last will. [`MemoryBroker`] implements
//! it inside one process.
//!
//! ## Architecture
//! ```text
//! Publishers (many):                   Subscriptions (many):
//!   Job A ──┐                       ┌──► [fifo 1] ──► dispatch worker (job A)
//!   Job B ──┼──► MemoryBroker ──────┼──► [fifo 2] ──► dispatch worker (job B)
//!   Timer ──┘    (retained store,   └──► [fifo N] ──► subscribe_once waiter
//!                 last wills)
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never waits on a subscriber.
//! - **Per-subscription FIFO**: each subscription sees messages in publish order; nothing is dropped.
//! - **Retained**: the last retained message per topic is replayed to new subscribers
//!   (when `allow_retained`) with `retain = true`; an empty retained payload deletes the entry.
//! - **Live delivery**: messages forwarded to existing subscribers carry `retain = false`.
//! - **Last will**: `drop_client()` publishes the registered will, as a broker does on an
//!   ungraceful disconnect; `clear_last_will()` is the graceful path.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::message::Message;
use super::topic::{matches, validate_filter, validate_topic};
use crate::error::BusError;

/// Identifier of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Options for [`Broker::subscribe`].
#[derive(Debug, Clone, Copy)]
pub struct SubscribeOptions {
    /// Replay cached retained messages on subscribe.
    pub allow_retained: bool,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self {
            allow_retained: true,
        }
    }
}

impl SubscribeOptions {
    /// Live messages only.
    pub fn live_only() -> Self {
        Self {
            allow_retained: false,
        }
    }
}

/// A live subscription: its id and the receiving end of its queue.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub rx: mpsc::UnboundedReceiver<Message>,
}

/// Publish/subscribe transport used by every job.
///
/// Implementations must be cheap to call from async contexts (no blocking I/O in
/// `publish`) and must preserve per-subscription order.
pub trait Broker: Send + Sync + fmt::Debug {
    /// Publishes a message to every matching subscription.
    fn publish(&self, msg: Message) -> Result<(), BusError>;

    /// Opens a subscription for a topic filter.
    fn subscribe(&self, filter: &str, opts: SubscribeOptions) -> Result<Subscription, BusError>;

    /// Closes a subscription. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);

    /// Registers the message the broker publishes if `client` disappears uncleanly.
    fn set_last_will(&self, client: &str, will: Message) -> Result<(), BusError>;

    /// Forgets the last will of `client` (graceful disconnect).
    fn clear_last_will(&self, client: &str);
}

struct SubEntry {
    filter: String,
    tx: mpsc::UnboundedSender<Message>,
}

#[derive(Default)]
struct BrokerState {
    next_id: u64,
    subs: HashMap<SubscriptionId, SubEntry>,
    retained: HashMap<String, Message>,
    wills: HashMap<String, Message>,
}

/// In-process broker.
///
/// Cloning shares the same state (cheap, `Arc`-backed).
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.lock();
        f.debug_struct("MemoryBroker")
            .field("subscriptions", &st.subs.len())
            .field("retained", &st.retained.len())
            .field("wills", &st.wills.len())
            .finish()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates an ungraceful disconnect: publishes the client's will, if any.
    ///
    /// Returns true if a will was published.
    pub fn drop_client(&self, client: &str) -> bool {
        let will = self.state.lock().wills.remove(client);
        match will {
            Some(msg) => {
                let _ = self.publish(msg);
                true
            }
            None => false,
        }
    }

    /// Currently retained message on `topic`.
    pub fn retained(&self, topic: &str) -> Option<Message> {
        self.state.lock().retained.get(topic).cloned()
    }

    /// Number of open subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.state.lock().subs.len()
    }

    /// Number of open subscriptions that would receive a message on `topic`.
    pub fn subscribers_for(&self, topic: &str) -> usize {
        self.state
            .lock()
            .subs
            .values()
            .filter(|s| matches(&s.filter, topic) && !s.tx.is_closed())
            .count()
    }

    /// True if `client` has a registered last will.
    pub fn has_last_will(&self, client: &str) -> bool {
        self.state.lock().wills.contains_key(client)
    }
}

impl Broker for MemoryBroker {
    fn publish(&self, msg: Message) -> Result<(), BusError> {
        validate_topic(&msg.topic)?;
        let mut st = self.state.lock();

        if msg.retain {
            if msg.is_empty() {
                st.retained.remove(msg.topic.as_ref());
            } else {
                st.retained.insert(msg.topic.to_string(), msg.clone());
            }
        }

        let live = msg.with_retain(false);
        st.subs.retain(|_, sub| {
            if !matches(&sub.filter, &live.topic) {
                return true;
            }
            sub.tx.send(live.clone()).is_ok()
        });
        Ok(())
    }

    fn subscribe(&self, filter: &str, opts: SubscribeOptions) -> Result<Subscription, BusError> {
        validate_filter(filter)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut st = self.state.lock();

        if opts.allow_retained {
            let mut cached: Vec<&Message> = st
                .retained
                .values()
                .filter(|m| matches(filter, &m.topic))
                .collect();
            cached.sort_by_key(|m| m.seq);
            for m in cached {
                let _ = tx.send(m.clone().with_retain(true));
            }
        }

        st.next_id += 1;
        let id = SubscriptionId(st.next_id);
        st.subs.insert(
            id,
            SubEntry {
                filter: filter.to_string(),
                tx,
            },
        );
        Ok(Subscription { id, rx })
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.state.lock().subs.remove(&id);
    }

    fn set_last_will(&self, client: &str, will: Message) -> Result<(), BusError> {
        validate_topic(&will.topic)?;
        self.state.lock().wills.insert(client.to_string(), will);
        Ok(())
    }

    fn clear_last_will(&self, client: &str) {
        self.state.lock().wills.remove(client);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn live_delivery_preserves_order() {
        let broker = MemoryBroker::new();
        let mut sub = broker
            .subscribe("r/+/e/growth_rate", SubscribeOptions::default())
            .unwrap();
        for i in 0..5 {
            broker
                .publish(Message::new("r/u1/e/growth_rate", i.to_string()))
                .unwrap();
        }
        for i in 0..5 {
            let m = sub.rx.recv().await.unwrap();
            assert_eq!(m.payload_str(), i.to_string());
            assert!(!m.retain);
        }
    }

    #[tokio::test]
    async fn retained_replay_and_delete() {
        let broker = MemoryBroker::new();
        broker
            .publish(Message::new("r/u1/e/job/$state", "ready").with_retain(true))
            .unwrap();

        let mut sub = broker
            .subscribe("r/u1/e/job/$state", SubscribeOptions::default())
            .unwrap();
        let m = sub.rx.recv().await.unwrap();
        assert_eq!(m.payload_str(), "ready");
        assert!(m.retain);

        let mut live = broker
            .subscribe("r/u1/e/job/$state", SubscribeOptions::live_only())
            .unwrap();
        assert!(live.rx.try_recv().is_err());

        broker
            .publish(Message::new("r/u1/e/job/$state", "").with_retain(true))
            .unwrap();
        assert!(broker.retained("r/u1/e/job/$state").is_none());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let broker = MemoryBroker::new();
        let mut sub = broker.subscribe("a/b", SubscribeOptions::default()).unwrap();
        broker.unsubscribe(sub.id);
        broker.publish(Message::new("a/b", "x")).unwrap();
        assert!(sub.rx.recv().await.is_none());
        assert_eq!(broker.subscription_count(), 0);
    }

    #[tokio::test]
    async fn last_will_fires_only_on_drop() {
        let broker = MemoryBroker::new();
        broker
            .set_last_will("c1", Message::new("r/u1/e/job/$state", "lost").with_retain(true))
            .unwrap();
        assert!(broker.drop_client("c1"));
        assert_eq!(
            broker.retained("r/u1/e/job/$state").unwrap().payload_str(),
            "lost"
        );
        assert!(!broker.drop_client("c1"));

        broker
            .set_last_will("c2", Message::new("r/u2/e/job/$state", "lost"))
            .unwrap();
        broker.clear_last_will("c2");
        assert!(!broker.drop_client("c2"));
    }

    #[test]
    fn wildcard_publish_is_rejected() {
        let broker = MemoryBroker::new();
        let err = broker.publish(Message::new("a/+/c", "x")).unwrap_err();
        assert_eq!(err.as_label(), "bus_invalid_topic");
    }
}
