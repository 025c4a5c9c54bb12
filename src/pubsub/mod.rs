//! # Message bus client.
//!
//! The transport seam of the control plane. Jobs publish state and settings, sensors
//! publish readings, and everything is addressed by hierarchical topics.
//!
//! - [`Message`] payload plus delivery metadata.
//! - [`Broker`] the transport contract (publish, subscribe, retained, last will).
//! - [`MemoryBroker`] in-process implementation.
//! - [`subscribe_once`] bounded ask-and-wait.
//! - [`topic`] path layout and wildcard matching.

mod broker;
mod message;
mod request;
pub mod topic;

pub use broker::{Broker, MemoryBroker, SubscribeOptions, Subscription, SubscriptionId};
pub use message::{Message, Qos};
pub use request::subscribe_once;
pub use topic::Topics;
