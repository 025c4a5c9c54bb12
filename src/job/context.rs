//! # Per-job resources.
//!
//! [`JobContext`] owns everything a job acquires from the outside world: its broker
//! subscriptions, the cancellation token that stops its workers and timers, and its
//! published state. Releasing the context releases all of them at once.
//!
//! ```text
//! JobContext
//!   ├── token ────────────┬──► dispatch worker (one per subscription)
//!   │   (parent)          ├──► RepeatedTimer   (child token)
//!   │                     └──► background task (spawned via `spawn`)
//!   ├── subscriptions ──► unsubscribed on release
//!   └── state (watch) ──► current lifecycle state
//! ```

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::dispatch::spawn_worker;
use super::id::JobId;
use super::state::JobState;
use crate::error::{BusError, JobError};
use crate::pubsub::{Broker, Message, Qos, SubscribeOptions, SubscriptionId, Topics};

/// Resources owned by one job.
pub struct JobContext {
    id: JobId,
    label: Arc<str>,
    topics: Topics,
    broker: Arc<dyn Broker>,
    state: watch::Sender<JobState>,
    token: CancellationToken,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl JobContext {
    pub(crate) fn new(id: JobId, topics: Topics, broker: Arc<dyn Broker>) -> Self {
        let (state, _) = watch::channel(JobState::Init);
        Self {
            label: id.to_string().into(),
            id,
            topics,
            broker,
            state,
            token: CancellationToken::new(),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Current lifecycle state.
    pub fn state(&self) -> JobState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<JobState> {
        self.state.subscribe()
    }

    /// False once the job has started releasing its resources.
    ///
    /// Callbacks that were already dispatched check this before mutating state.
    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Topic owned by this job: `‹root›/{unit}/{experiment}/{job}/{attribute}`.
    pub fn topic(&self, attribute: &str) -> String {
        self.topics.job(
            &self.id.unit,
            &self.id.experiment,
            &self.id.job_name,
            attribute,
        )
    }

    /// Topic under this job's unit and experiment: `‹root›/{unit}/{experiment}/{leaf}`.
    pub fn experiment_topic(&self, leaf: &str) -> String {
        self.topics
            .experiment(&self.id.unit, &self.id.experiment, leaf)
    }

    /// Publishes to one of this job's own attributes.
    pub fn publish(
        &self,
        attribute: &str,
        payload: impl Into<Arc<str>>,
        retain: bool,
    ) -> Result<(), BusError> {
        let qos = if retain { Qos::ExactlyOnce } else { Qos::AtLeastOnce };
        self.broker.publish(
            Message::new(self.topic(attribute), payload)
                .with_qos(qos)
                .with_retain(retain),
        )
    }

    /// Token cancelled together with the job; use for timers and helper tasks.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Opens a subscription whose messages are handled by a dedicated worker.
    ///
    /// The subscription is released when the job disconnects.
    pub fn subscribe<F, Fut>(
        &self,
        filter: &str,
        opts: SubscribeOptions,
        handler: F,
    ) -> Result<(), JobError>
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), JobError>> + Send + 'static,
    {
        if !self.is_active() {
            return Err(JobError::Disconnected);
        }
        let sub = self.broker.subscribe(filter, opts)?;
        self.subscriptions.lock().push(sub.id);
        debug!(job = %self.label, filter, "subscribed");
        spawn_worker(
            self.label.clone(),
            filter.into(),
            sub,
            self.token.clone(),
            handler,
        );
        Ok(())
    }

    /// Runs a background future until it completes or the job disconnects.
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.child_token();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {},
                _ = fut => {},
            }
        });
    }

    pub(crate) fn set_state(&self, state: JobState) {
        self.state.send_replace(state);
    }

    /// Cancels workers and timers, then closes every subscription. Safe to call repeatedly.
    pub(crate) fn release(&self) {
        self.token.cancel();
        let subs = std::mem::take(&mut *self.subscriptions.lock());
        for id in subs {
            self.broker.unsubscribe(id);
        }
    }

    pub(crate) fn label(&self) -> &Arc<str> {
        &self.label
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("active", &self.is_active())
            .finish()
    }
}
