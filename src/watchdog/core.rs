use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::backoff::BackoffPolicy;
use super::peers::PeerTracker;
use crate::config::{ControlConfig, WatchdogConfig};
use crate::error::JobError;
use crate::job::{Job, JobContext, JobHooks, JobId, JobState};
use crate::pubsub::{Broker, Message, Qos, SubscribeOptions, Topics, subscribe_once, topic};

pub const WATCHDOG_JOB: &str = "watchdog";

/// Watchdog behaviour plugged into the job lifecycle.
pub struct WatchdogHooks {
    cfg: WatchdogConfig,
    backoff: BackoffPolicy,
    peers: PeerTracker,
    latest_experiment: Mutex<Option<String>>,
}

impl WatchdogHooks {
    async fn on_peer_state(job: &Arc<Job<Self>>, msg: &Message) {
        let hooks = job.hooks();
        let (Some(unit), Some(experiment)) = (topic::level(&msg.topic, 1), topic::level(&msg.topic, 2))
        else {
            return;
        };
        let state: JobState = match msg.payload_str().parse() {
            Ok(s) => s,
            Err(_) => {
                debug!(topic = %msg.topic, payload = msg.payload_str(), "ignoring unknown peer state");
                return;
            }
        };
        hooks.peers.observe(unit, state).await;
        if state != JobState::Lost || !hooks.peers.open_incident(unit).await {
            return;
        }

        warn!(job = %job.id(), peer = unit, "{unit} seems to be lost. Trying to re-establish connection...");
        let job2 = job.clone();
        let (unit, experiment) = (unit.to_string(), experiment.to_string());
        job.context().spawn(async move {
            Self::recover(&job2, &unit, &experiment).await;
        });
    }

    /// Soft-restart, probe once, then poll with backoff until the peer is back.
    async fn recover(job: &Arc<Job<Self>>, unit: &str, experiment: &str) {
        let hooks = job.hooks();
        let ctx = job.context();
        let cfg = &hooks.cfg;

        sleep(cfg.grace).await;
        hooks.command(ctx, unit, experiment, JobState::Init);
        sleep(cfg.grace).await;
        hooks.command(ctx, unit, experiment, JobState::Ready);
        sleep(cfg.grace).await;

        let state = hooks.probe(ctx, unit, experiment).await;
        if state != JobState::Lost {
            info!(job = %job.id(), peer = unit, "Update: {unit} is connected. All is well.");
            hooks.peers.close_incident(unit, state).await;
            return;
        }
        error!(job = %job.id(), peer = unit, "{unit} was lost. We will continue checking for re-connection however.");

        let mut attempt = 0;
        loop {
            sleep(hooks.backoff.next(attempt)).await;
            attempt = attempt.saturating_add(1);
            let state = hooks.probe(ctx, unit, experiment).await;
            if state != JobState::Lost {
                info!(job = %job.id(), peer = unit, attempts = attempt, "Update: {unit} is connected. All is well.");
                hooks.peers.close_incident(unit, state).await;
                return;
            }
            debug!(job = %job.id(), peer = unit, attempts = attempt, "peer still lost");
        }
    }

    fn command(&self, ctx: &JobContext, unit: &str, experiment: &str, state: JobState) {
        let topic = ctx
            .topics()
            .job(unit, experiment, &self.cfg.watched_job, "$state/set");
        let msg = Message::new(topic, state.as_str()).with_qos(Qos::AtLeastOnce);
        if let Err(e) = ctx.broker().publish(msg) {
            warn!(job = %ctx.id(), peer = unit, error = %e, "failed to send state request");
        }
    }

    /// Current peer state; a silent peer counts as lost.
    async fn probe(&self, ctx: &JobContext, unit: &str, experiment: &str) -> JobState {
        self.peers.record_probe(unit).await;
        let topic = ctx
            .topics()
            .job(unit, experiment, &self.cfg.watched_job, "$state");
        match subscribe_once(ctx.broker().as_ref(), &topic, self.cfg.probe_timeout).await {
            Ok(msg) => msg.payload_str().parse().unwrap_or(JobState::Lost),
            Err(e) => {
                debug!(job = %ctx.id(), peer = unit, error = %e, "probe got no answer");
                JobState::Lost
            }
        }
    }
}

#[async_trait]
impl JobHooks for WatchdogHooks {
    async fn start_passive_listeners(job: &Arc<Job<Self>>) -> Result<(), JobError> {
        let ctx = job.context();

        let weak = Arc::downgrade(job);
        let filter = ctx.topics().fleet(&job.hooks().cfg.watched_job, "$state");
        ctx.subscribe(&filter, SubscribeOptions::live_only(), move |msg| {
            let weak = weak.clone();
            async move {
                if let Some(job) = weak.upgrade() {
                    Self::on_peer_state(&job, &msg).await;
                }
                Ok(())
            }
        })?;

        let weak = Arc::downgrade(job);
        let topic = ctx.topics().global("latest_experiment");
        ctx.subscribe(&topic, SubscribeOptions::live_only(), move |msg| {
            let weak = weak.clone();
            async move {
                if let Some(job) = weak.upgrade() {
                    debug!(job = %job.id(), experiment = msg.payload_str(), "new latest experiment");
                    *job.hooks().latest_experiment.lock() = Some(msg.payload_str().to_string());
                }
                Ok(())
            }
        })
    }
}

/// Leader-side job that tries to bring lost peers back.
///
/// Watches `‹root›/+/+/{watched_job}/$state` (live messages only). When a peer
/// reports `lost` it sends `init` then `ready` to the peer's `$state/set`, probes the
/// peer's state, and keeps polling with backoff until it is no longer lost.
#[derive(Clone)]
pub struct Watchdog {
    job: Arc<Job<WatchdogHooks>>,
}

impl Watchdog {
    /// Starts the watchdog on `unit` under the universal experiment.
    pub async fn spawn(
        unit: &str,
        broker: Arc<dyn Broker>,
        config: &ControlConfig,
    ) -> Result<Self, JobError> {
        let cfg = config.watchdog.clone();
        let hooks = WatchdogHooks {
            backoff: BackoffPolicy::from(&cfg),
            cfg,
            peers: PeerTracker::new(),
            latest_experiment: Mutex::new(None),
        };
        let job = Job::spawn(
            JobId::new(unit, config.bus.universal_experiment.as_str(), WATCHDOG_JOB),
            broker,
            Topics::new(config.bus.root.as_str()),
            hooks,
        )
        .await?;
        Ok(Self { job })
    }

    pub fn peers(&self) -> &PeerTracker {
        &self.job.hooks().peers
    }

    /// Last value seen on `‹root›/latest_experiment`.
    pub fn latest_experiment(&self) -> Option<String> {
        self.job.hooks().latest_experiment.lock().clone()
    }

    pub fn state(&self) -> JobState {
        self.job.state()
    }

    /// Stops the watchdog and every recovery in progress.
    pub async fn disconnect(&self) {
        self.job.disconnect().await;
    }

    pub fn job(&self) -> &Arc<Job<WatchdogHooks>> {
        &self.job
    }
}

impl std::fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watchdog")
            .field("id", self.job.id())
            .field("state", &self.state())
            .finish()
    }
}
