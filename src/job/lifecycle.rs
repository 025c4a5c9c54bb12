//! # Job: the shared lifecycle state machine.
//!
//! Every long-running component is a [`Job`]: a [`JobContext`] (resources) plus a
//! [`JobHooks`] implementation (behaviour).
//!
//! ## Construction
//! ```text
//! Job::spawn(id, broker, topics, hooks)
//!   ├─► last will: $state = "lost" (retained)
//!   ├─► subscribe $state/set and <setting>/set for each editable setting
//!   ├─► H::start_passive_listeners()
//!   ├─► state = init,  publish, on_init()
//!   └─► on_transition(init, ready), state = ready, publish, on_ready()
//!
//! any error ──► disconnect (release everything) ──► Err to the caller
//! ```
//!
//! ## Rules
//! - Transitions are serialized per job.
//! - `disconnected` is terminal and idempotent; entering it always releases resources.
//! - `lost` is never entered; requesting it is rejected.
//! - Remote `$state/set` and `<setting>/set` payloads that fail are logged, never fatal.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use super::context::JobContext;
use super::hooks::JobHooks;
use super::id::JobId;
use super::state::JobState;
use crate::error::JobError;
use crate::pubsub::{Broker, Message, Qos, SubscribeOptions, Topics};

/// A managed long-running component.
pub struct Job<H: JobHooks> {
    ctx: JobContext,
    hooks: H,
    transition: Mutex<()>,
}

impl<H: JobHooks> Job<H> {
    /// Builds the job and brings it to `ready`.
    ///
    /// On failure everything acquired so far is released before the error is returned.
    pub async fn spawn(
        id: JobId,
        broker: Arc<dyn Broker>,
        topics: Topics,
        hooks: H,
    ) -> Result<Arc<Self>, JobError> {
        let ctx = JobContext::new(id, topics, broker);
        let will = Message::new(ctx.topic("$state"), JobState::Lost.as_str())
            .with_qos(Qos::ExactlyOnce)
            .with_retain(true);
        ctx.broker().set_last_will(&ctx.id().client_id(), will)?;

        let job = Arc::new(Self {
            ctx,
            hooks,
            transition: Mutex::new(()),
        });

        if let Err(e) = job.bootstrap().await {
            warn!(job = %job.ctx.label(), label = e.as_label(), error = %e, "construction failed, releasing resources");
            job.disconnect().await;
            return Err(e);
        }
        Ok(job)
    }

    async fn bootstrap(self: &Arc<Self>) -> Result<(), JobError> {
        self.listen_for_state_requests()?;
        for name in self.hooks.editable_settings() {
            self.listen_for_setting(name)?;
        }
        H::start_passive_listeners(self).await?;

        let _guard = self.transition.lock().await;
        self.commit(JobState::Init);
        self.hooks.on_init(&self.ctx).await?;
        self.apply(JobState::Init, JobState::Ready).await
    }

    pub fn id(&self) -> &JobId {
        self.ctx.id()
    }

    pub fn state(&self) -> JobState {
        self.ctx.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<JobState> {
        self.ctx.watch_state()
    }

    pub fn context(&self) -> &JobContext {
        &self.ctx
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub fn is_active(&self) -> bool {
        self.ctx.is_active()
    }

    /// Requests a lifecycle transition.
    ///
    /// Same-state requests and requests on a disconnected job are no-ops.
    pub async fn set_state(&self, to: JobState) -> Result<(), JobError> {
        let _guard = self.transition.lock().await;
        let from = self.state();

        if from == JobState::Disconnected {
            debug!(job = %self.ctx.label(), to = %to, "ignoring transition on disconnected job");
            return Ok(());
        }
        if !to.is_requestable() {
            return Err(JobError::InvalidTransition { from, to });
        }
        if to == JobState::Disconnected {
            self.teardown(from).await;
            return Ok(());
        }
        if from == to {
            debug!(job = %self.ctx.label(), state = %to, "already in state");
            return Ok(());
        }
        self.apply(from, to).await
    }

    /// Enters `disconnected`. Never fails; calling it again does nothing.
    pub async fn disconnect(&self) {
        if let Err(e) = self.set_state(JobState::Disconnected).await {
            warn!(job = %self.ctx.label(), error = %e, "disconnect reported an error");
        }
    }

    /// Applies one editable setting through the job's setter.
    pub async fn apply_setting(&self, name: &str, value: &str) -> Result<(), JobError> {
        if !self.hooks.editable_settings().iter().any(|s| s == name) {
            return Err(JobError::UnknownSetting {
                name: name.to_string(),
            });
        }
        if !self.is_active() {
            return Err(JobError::Disconnected);
        }
        match self.hooks.set_setting(&self.ctx, name, value).await? {
            Some(canonical) => {
                self.ctx.publish(name, canonical.as_str(), true)?;
                info!(job = %self.ctx.label(), setting = name, value = %canonical, "updated setting");
            }
            None => info!(job = %self.ctx.label(), setting = name, "updated setting"),
        }
        Ok(())
    }

    /// Applies every known editable setting in `values`; unknown keys are ignored.
    ///
    /// Returns how many settings were applied.
    pub async fn update_settings(&self, values: &Map<String, Value>) -> usize {
        let editable = self.hooks.editable_settings();
        let mut applied = 0;
        for (name, value) in values {
            if !editable.iter().any(|s| s == name) {
                debug!(job = %self.ctx.label(), setting = %name, "ignoring unknown setting");
                continue;
            }
            let raw = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            match self.apply_setting(name, &raw).await {
                Ok(()) => applied += 1,
                Err(e) => {
                    warn!(job = %self.ctx.label(), setting = %name, label = e.as_label(), error = %e, "setting rejected");
                }
            }
        }
        applied
    }

    async fn apply(&self, from: JobState, to: JobState) -> Result<(), JobError> {
        if from != to {
            self.hooks.on_transition(&self.ctx, from, to).await?;
        }
        self.commit(to);
        info!(job = %self.ctx.label(), from = %from, to = %to, "state transition");
        self.arrive(to).await
    }

    async fn arrive(&self, to: JobState) -> Result<(), JobError> {
        match to {
            JobState::Init => self.hooks.on_init(&self.ctx).await,
            JobState::Ready => self.hooks.on_ready(&self.ctx).await,
            JobState::Sleeping => self.hooks.on_sleeping(&self.ctx).await,
            JobState::Disconnected => self.hooks.on_disconnected(&self.ctx).await,
            JobState::Lost => Ok(()),
        }
    }

    fn commit(&self, state: JobState) {
        self.ctx.set_state(state);
        if let Err(e) = self.ctx.publish("$state", state.as_str(), true) {
            warn!(job = %self.ctx.label(), state = %state, error = %e, "failed to publish state");
        }
    }

    async fn teardown(&self, from: JobState) {
        let label = self.ctx.label().clone();
        if let Err(e) = self
            .hooks
            .on_transition(&self.ctx, from, JobState::Disconnected)
            .await
        {
            warn!(job = %label, error = %e, "transition hook failed during disconnect");
        }
        if let Err(e) = self.hooks.on_disconnected(&self.ctx).await {
            warn!(job = %label, error = %e, "on_disconnected failed");
        }

        self.ctx.release();
        self.commit(JobState::Disconnected);
        self.ctx
            .broker()
            .clear_last_will(&self.ctx.id().client_id());
        info!(job = %label, from = %from, "disconnected");
    }

    fn listen_for_state_requests(self: &Arc<Self>) -> Result<(), JobError> {
        let weak = Arc::downgrade(self);
        let topic = self.ctx.topic("$state/set");
        self.ctx
            .subscribe(&topic, SubscribeOptions::live_only(), move |msg| {
                let weak = weak.clone();
                async move {
                    let Some(job) = weak.upgrade() else {
                        return Ok(());
                    };
                    let to: JobState = msg.payload_str().parse()?;
                    job.set_state(to).await
                }
            })
    }

    fn listen_for_setting(self: &Arc<Self>, name: String) -> Result<(), JobError> {
        let weak = Arc::downgrade(self);
        let topic = self.ctx.topic(&format!("{name}/set"));
        let name: Arc<str> = name.into();
        self.ctx
            .subscribe(&topic, SubscribeOptions::live_only(), move |msg| {
                let weak = weak.clone();
                let name = name.clone();
                async move {
                    let Some(job) = weak.upgrade() else {
                        return Ok(());
                    };
                    job.apply_setting(&name, msg.payload_str()).await
                }
            })
    }
}

impl<H: JobHooks> std::fmt::Debug for Job<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job").field("ctx", &self.ctx).finish()
    }
}
