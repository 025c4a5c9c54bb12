//! Ask-and-wait helper: take exactly one message from a topic, bounded by a timeout.

use std::time::Duration;

use tokio::time;

use super::broker::{Broker, SubscribeOptions};
use super::message::Message;
use crate::error::BusError;

/// Subscribes to `topic`, returns the first message (retained values count), then unsubscribes.
///
/// Timeout is an ordinary outcome: `Err(BusError::Timeout)`.
pub async fn subscribe_once(
    broker: &dyn Broker,
    topic: &str,
    timeout: Duration,
) -> Result<Message, BusError> {
    let mut sub = broker.subscribe(topic, SubscribeOptions::default())?;
    let res = time::timeout(timeout, sub.rx.recv()).await;
    broker.unsubscribe(sub.id);

    match res {
        Ok(Some(msg)) => Ok(msg),
        Ok(None) => Err(BusError::Closed),
        Err(_) => Err(BusError::Timeout {
            topic: topic.to_string(),
            timeout,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::MemoryBroker;

    #[tokio::test(start_paused = true)]
    async fn returns_retained_value() {
        let broker = MemoryBroker::new();
        broker
            .publish(Message::new("r/u/e/j/x", "1.5").with_retain(true))
            .unwrap();
        let m = subscribe_once(&broker, "r/u/e/j/x", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(m.payload_f64(), Some(1.5));
        assert_eq!(broker.subscription_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_a_value() {
        let broker = MemoryBroker::new();
        let err = subscribe_once(&broker, "r/u/e/j/x", Duration::from_secs(15))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(broker.subscription_count(), 0);
    }
}
