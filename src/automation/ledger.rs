//! # Throughput ledger.
//!
//! Cumulative media and alternate-media volumes for one (unit, experiment), kept as
//! a small job named `throughput_calculating` so the totals live on the bus:
//!
//! ```text
//! ‹root›/{unit}/{exp}/throughput_calculating/media_throughput          retained total
//! ‹root›/{unit}/{exp}/throughput_calculating/media_throughput/set      manual override
//! ‹root›/{unit}/{exp}/throughput_calculating/alt_media_throughput      retained total
//! ‹root›/{unit}/{exp}/throughput_calculating/alt_media_throughput/set  manual override
//! ```
//!
//! ## Rules
//! - On start the totals are read back from the retained topics (missing → 0).
//! - Each credited pump step adds to exactly one counter, once.
//! - Read-modify-write and the republish happen under one lock.
//! - A disconnected ledger refuses credits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::params::{ensure_non_negative, parse_setting};
use crate::actuation::PumpChannel;
use crate::error::JobError;
use crate::job::{Job, JobContext, JobHooks, JobId};
use crate::pubsub::{Broker, Topics, subscribe_once};

pub const LEDGER_JOB: &str = "throughput_calculating";
pub const MEDIA_THROUGHPUT: &str = "media_throughput";
pub const ALT_MEDIA_THROUGHPUT: &str = "alt_media_throughput";

/// Snapshot of both counters, in mL.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Throughput {
    pub media: f64,
    pub alt_media: f64,
}

/// Ledger behaviour plugged into the job lifecycle.
pub struct LedgerHooks {
    totals: Mutex<Throughput>,
    recover_timeout: Duration,
}

impl LedgerHooks {
    fn publish_locked(ctx: &JobContext, name: &str, value: f64) {
        if let Err(e) = ctx.publish(name, value.to_string(), true) {
            warn!(job = %ctx.id(), setting = name, error = %e, "failed to publish throughput");
        }
    }

    async fn recover(&self, ctx: &JobContext, name: &str) -> f64 {
        let topic = ctx.topic(name);
        match subscribe_once(ctx.broker().as_ref(), &topic, self.recover_timeout).await {
            Ok(msg) => match msg.payload_f64() {
                Some(v) => v,
                None => {
                    warn!(topic = %topic, payload = msg.payload_str(), "unreadable retained throughput, starting from 0");
                    0.0
                }
            },
            Err(e) => {
                debug!(topic = %topic, error = %e, "no retained throughput, starting from 0");
                0.0
            }
        }
    }
}

#[async_trait]
impl JobHooks for LedgerHooks {
    fn editable_settings(&self) -> Vec<String> {
        vec![MEDIA_THROUGHPUT.into(), ALT_MEDIA_THROUGHPUT.into()]
    }

    async fn start_passive_listeners(job: &Arc<Job<Self>>) -> Result<(), JobError> {
        let hooks = job.hooks();
        let ctx = job.context();
        let media = hooks.recover(ctx, MEDIA_THROUGHPUT).await;
        let alt_media = hooks.recover(ctx, ALT_MEDIA_THROUGHPUT).await;
        *hooks.totals.lock() = Throughput { media, alt_media };
        info!(job = %ctx.id(), media, alt_media, "recovered throughput");
        Ok(())
    }

    /// Manual override. Published here, under the same lock as [`ThroughputLedger::credit`].
    async fn set_setting(
        &self,
        ctx: &JobContext,
        name: &str,
        value: &str,
    ) -> Result<Option<String>, JobError> {
        let v = ensure_non_negative(name, parse_setting(name, value)?)?;
        let mut totals = self.totals.lock();
        match name {
            MEDIA_THROUGHPUT => totals.media = v,
            ALT_MEDIA_THROUGHPUT => totals.alt_media = v,
            _ => {
                return Err(JobError::UnknownSetting {
                    name: name.to_string(),
                });
            }
        }
        Self::publish_locked(ctx, name, v);
        drop(totals);
        warn!(job = %ctx.id(), setting = name, value = v, "throughput manually overridden");
        Ok(None)
    }
}

/// Handle to a running ledger.
#[derive(Clone)]
pub struct ThroughputLedger {
    job: Arc<Job<LedgerHooks>>,
}

impl ThroughputLedger {
    /// Starts the ledger and recovers its totals from retained state.
    pub async fn spawn(
        unit: &str,
        experiment: &str,
        broker: Arc<dyn Broker>,
        topics: Topics,
        recover_timeout: Duration,
    ) -> Result<Self, JobError> {
        let hooks = LedgerHooks {
            totals: Mutex::new(Throughput::default()),
            recover_timeout,
        };
        let job = Job::spawn(JobId::new(unit, experiment, LEDGER_JOB), broker, topics, hooks).await?;
        Ok(Self { job })
    }

    /// Credits a completed pump step. Waste is not tracked.
    ///
    /// Returns false if nothing was credited.
    pub fn credit(&self, channel: PumpChannel, volume_ml: f64) -> bool {
        let ctx = self.job.context();
        if !ctx.is_active() {
            warn!(job = %ctx.id(), %channel, volume_ml, "ledger disconnected, credit dropped");
            return false;
        }
        let mut totals = self.job.hooks().totals.lock();
        match channel {
            PumpChannel::Media => {
                totals.media += volume_ml;
                LedgerHooks::publish_locked(ctx, MEDIA_THROUGHPUT, totals.media);
            }
            PumpChannel::AltMedia => {
                totals.alt_media += volume_ml;
                LedgerHooks::publish_locked(ctx, ALT_MEDIA_THROUGHPUT, totals.alt_media);
            }
            PumpChannel::Waste => return false,
        }
        true
    }

    pub fn totals(&self) -> Throughput {
        *self.job.hooks().totals.lock()
    }

    pub fn job(&self) -> &Arc<Job<LedgerHooks>> {
        &self.job
    }

    pub async fn disconnect(&self) {
        self.job.disconnect().await;
    }
}

impl std::fmt::Debug for ThroughputLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThroughputLedger")
            .field("totals", &self.totals())
            .field("state", &self.job.state())
            .finish()
    }
}
