//! # Automation engine: the feedback-control loop.
//!
//! An engine is a job named `{kind}_automation` that wraps one strategy, a
//! [`RepeatedTimer`] and a [`ThroughputLedger`].
//!
//! ## Tick
//! ```text
//! tick()
//!   ├─► not active / not ready          → NoEvent
//!   ├─► missing or stale reading        → NoEvent (logged)
//!   ├─► strategy.decide(observation)    → event
//!   └─► event requires action:
//!         for step in [media, alt_media, waste]:
//!           dispense ──► ok  → credit ledger, publish io event (succeeded=true)
//!                    └─► err → publish io event (succeeded=false), stop this tick
//! ```
//!
//! ## Rules
//! - A decision is never computed from a reading older than the staleness threshold.
//! - Readings are timestamped on arrival; growth rate and OD are independent channels.
//! - `sleeping` pauses the timer, keeping ledger and strategy history.
//! - `disconnected` cancels the timer, waits for a running tick to finish its current
//!   pump step, then releases subscriptions and disconnects the ledger.
//! - A retired engine starts no further pump step and publishes no decision.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::event::{DosingEvent, IoEvent};
use super::ledger::ThroughputLedger;
use super::params::{StrategyParams, ensure_positive, parse_setting};
use super::strategy::{Automation, Observation};
use crate::actuation::{Actuator, PumpChannel};
use crate::config::ControlConfig;
use crate::error::{ActuationError, JobError};
use crate::job::{Job, JobContext, JobHooks, JobId, JobState, RepeatedTimer, TimerOptions};
use crate::pubsub::{Broker, SubscribeOptions, Topics};

/// Shared collaborators every engine needs.
#[derive(Clone, Debug)]
pub struct EngineDeps {
    pub broker: Arc<dyn Broker>,
    pub actuator: Arc<dyn Actuator>,
    pub config: Arc<ControlConfig>,
}

impl EngineDeps {
    pub fn new(
        broker: Arc<dyn Broker>,
        actuator: Arc<dyn Actuator>,
        config: Arc<ControlConfig>,
    ) -> Self {
        Self {
            broker,
            actuator,
            config,
        }
    }

    pub fn topics(&self) -> Topics {
        Topics::new(self.config.bus.root.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
struct Reading {
    value: f64,
    at: Instant,
}

#[derive(Debug, Default)]
struct Readings {
    od: Option<Reading>,
    growth_rate: Option<Reading>,
}

/// Engine behaviour plugged into the job lifecycle.
pub struct EngineHooks {
    strategy: Mutex<Box<dyn Automation>>,
    strategy_key: &'static str,
    source: String,
    settings: Vec<String>,
    readings: Mutex<Readings>,
    latest_event: Mutex<Option<DosingEvent>>,
    duration_minutes: Mutex<f64>,
    skip_first_run: bool,
    staleness_threshold: Duration,
    od_sensor: String,
    actuator: Arc<dyn Actuator>,
    ledger: ThroughputLedger,
    timer: Mutex<Option<RepeatedTimer>>,
    /// Held for the whole of a tick or a direct io action.
    in_flight: tokio::sync::Mutex<()>,
    retired: CancellationToken,
}

impl EngineHooks {
    /// One control-loop evaluation.
    async fn tick(&self, ctx: &JobContext) -> DosingEvent {
        if !self.accepting(ctx) {
            return DosingEvent::NoEvent;
        }
        let _running = self.in_flight.lock().await;
        if !self.accepting(ctx) {
            return DosingEvent::NoEvent;
        }
        if ctx.state() != JobState::Ready {
            debug!(job = %ctx.id(), state = %ctx.state(), "not ready, skipping tick");
            return DosingEvent::NoEvent;
        }

        let needs_readings = self.strategy.lock().requires_readings();
        let event = match self.observation(needs_readings) {
            Ok(obs) => self.strategy.lock().decide(&obs),
            Err(reason) => {
                warn!(job = %ctx.id(), reason, "skipping decision");
                DosingEvent::NoEvent
            }
        };

        if event.requires_action() {
            let (media, alt_media, waste) = event.io_volumes();
            match self.execute_io_action(ctx, media, alt_media, waste).await {
                Ok(()) => {}
                Err(e @ ActuationError::Interrupted { .. }) => {
                    info!(job = %ctx.id(), error = %e, "retired during dosing action");
                }
                Err(e) => {
                    error!(job = %ctx.id(), label = e.as_label(), error = %e, "dosing action failed");
                }
            }
        }
        if !self.accepting(ctx) {
            return event;
        }

        *self.latest_event.lock() = Some(event);
        match serde_json::to_string(&event) {
            Ok(json) => {
                if let Err(e) = ctx.publish("latest_event", json, true) {
                    warn!(job = %ctx.id(), error = %e, "failed to publish latest event");
                }
            }
            Err(e) => warn!(job = %ctx.id(), error = %e, "failed to encode latest event"),
        }
        info!(job = %ctx.id(), event = ?event, "tick complete");
        event
    }

    /// Active and not being retired.
    fn accepting(&self, ctx: &JobContext) -> bool {
        ctx.is_active() && !self.retired.is_cancelled()
    }

    /// Latest readings if both exist and the oldest is within the staleness threshold.
    fn observation(&self, needs_readings: bool) -> Result<Observation, &'static str> {
        let r = self.readings.lock();
        if !needs_readings {
            return Ok(Observation {
                od: r.od.map_or(0.0, |x| x.value),
                growth_rate: r.growth_rate.map_or(0.0, |x| x.value),
                dt_minutes: *self.duration_minutes.lock(),
            });
        }
        let (Some(od), Some(gr)) = (r.od, r.growth_rate) else {
            return Err("waiting for growth rate and OD readings");
        };
        let most_stale = od.at.min(gr.at);
        if Instant::now().saturating_duration_since(most_stale) > self.staleness_threshold {
            return Err("readings are too stale");
        }
        Ok(Observation {
            od: od.value,
            growth_rate: gr.value,
            dt_minutes: *self.duration_minutes.lock(),
        })
    }

    /// Runs pump steps in order: media, alt media, waste. Stops at the first failure
    /// or once the engine is retired. Callers hold `in_flight`.
    async fn execute_io_action(
        &self,
        ctx: &JobContext,
        media_ml: f64,
        alt_media_ml: f64,
        waste_ml: f64,
    ) -> Result<(), ActuationError> {
        let steps = [
            (PumpChannel::Media, media_ml),
            (PumpChannel::AltMedia, alt_media_ml),
            (PumpChannel::Waste, waste_ml),
        ];
        for (channel, ml) in steps {
            if ml <= 0.0 {
                continue;
            }
            if !self.accepting(ctx) {
                return Err(ActuationError::Interrupted { channel });
            }
            let res = self.actuator.dispense(channel, ml).await;
            if res.is_ok() && channel != PumpChannel::Waste {
                self.ledger.credit(channel, ml);
            }
            self.publish_io_event(ctx, IoEvent::new(channel, ml, &self.source, res.is_ok()));
            res?;
        }
        Ok(())
    }

    fn publish_io_event(&self, ctx: &JobContext, ev: IoEvent) {
        let res = serde_json::to_string(&ev)
            .map_err(|e| e.to_string())
            .and_then(|json| ctx.publish("dosing_events", json, false).map_err(|e| e.to_string()));
        if let Err(e) = res {
            warn!(job = %ctx.id(), error = %e, "failed to publish io event");
        }
    }

    fn record(&self, slot: fn(&mut Readings) -> &mut Option<Reading>, value: f64) {
        let mut r = self.readings.lock();
        *slot(&mut r) = Some(Reading {
            value,
            at: Instant::now(),
        });
    }

    fn listen(
        job: &Arc<Job<Self>>,
        leaf: &str,
        slot: fn(&mut Readings) -> &mut Option<Reading>,
    ) -> Result<(), JobError> {
        let weak = Arc::downgrade(job);
        let topic = job.context().experiment_topic(leaf);
        job.context()
            .subscribe(&topic, SubscribeOptions::live_only(), move |msg| {
                let weak = weak.clone();
                async move {
                    let Some(job) = weak.upgrade() else {
                        return Ok(());
                    };
                    if !job.is_active() {
                        return Ok(());
                    }
                    match msg.payload_f64() {
                        Some(v) => job.hooks().record(slot, v),
                        None => {
                            warn!(job = %job.id(), topic = %msg.topic, payload = msg.payload_str(), "ignoring unreadable reading");
                        }
                    }
                    Ok(())
                }
            })
    }

    fn with_timer(&self, f: impl FnOnce(&RepeatedTimer)) {
        if let Some(t) = self.timer.lock().as_ref() {
            f(t);
        }
    }
}

#[async_trait]
impl JobHooks for EngineHooks {
    fn editable_settings(&self) -> Vec<String> {
        self.settings.clone()
    }

    async fn start_passive_listeners(job: &Arc<Job<Self>>) -> Result<(), JobError> {
        let hooks = job.hooks();
        Self::listen(job, "growth_rate", |r| &mut r.growth_rate)?;
        Self::listen(job, &format!("od_filtered/{}", hooks.od_sensor), |r| &mut r.od)?;

        let weak = Arc::downgrade(job);
        let period = minutes(*hooks.duration_minutes.lock());
        let timer = RepeatedTimer::spawn(
            format!("{}:timer", job.id()),
            period,
            TimerOptions {
                skip_first_run: hooks.skip_first_run,
                start_paused: true,
            },
            job.context().child_token(),
            move || {
                let weak = weak.clone();
                async move {
                    if let Some(job) = weak.upgrade() {
                        job.hooks().tick(job.context()).await;
                    }
                }
            },
        );
        *hooks.timer.lock() = Some(timer);
        Ok(())
    }

    async fn set_setting(
        &self,
        ctx: &JobContext,
        name: &str,
        value: &str,
    ) -> Result<Option<String>, JobError> {
        let v = parse_setting(name, value)?;
        if name == "duration" {
            let m = ensure_positive(name, v)?;
            *self.duration_minutes.lock() = m;
            self.strategy.lock().set_duration(m);
            self.with_timer(|t| t.set_period(minutes(m)));
        } else {
            self.strategy.lock().apply_setting(name, v)?;
        }
        debug!(job = %ctx.id(), setting = name, value = v, "engine setting applied");
        Ok(Some(v.to_string()))
    }

    async fn on_ready(&self, _ctx: &JobContext) -> Result<(), JobError> {
        self.with_timer(RepeatedTimer::unpause);
        Ok(())
    }

    async fn on_sleeping(&self, _ctx: &JobContext) -> Result<(), JobError> {
        self.with_timer(RepeatedTimer::pause);
        Ok(())
    }

    async fn on_disconnected(&self, ctx: &JobContext) -> Result<(), JobError> {
        self.retired.cancel();
        let timer = self.timer.lock().take();
        if let Some(t) = timer {
            t.cancel();
        }
        // the pump step already under way completes and is credited
        let _idle = self.in_flight.lock().await;
        debug!(job = %ctx.id(), "no tick in flight, releasing ledger");
        self.ledger.disconnect().await;
        Ok(())
    }
}

fn minutes(m: f64) -> Duration {
    Duration::try_from_secs_f64(m * 60.0).unwrap_or(Duration::from_secs(60))
}

/// Handle to a running engine.
#[derive(Clone)]
pub struct AutomationEngine {
    job: Arc<Job<EngineHooks>>,
}

impl AutomationEngine {
    /// Starts the ledger and the engine for an already-validated strategy.
    ///
    /// `params` supplies the engine-level options (`duration`, `skip_first_run`).
    pub async fn spawn(
        unit: &str,
        experiment: &str,
        kind: &str,
        strategy: Box<dyn Automation>,
        params: &StrategyParams,
        deps: &EngineDeps,
    ) -> Result<Self, JobError> {
        let cfg = &deps.config;
        let duration_minutes = params.duration_minutes(cfg)?;
        let skip_first_run = params.flag("skip_first_run")?;

        let ledger = ThroughputLedger::spawn(
            unit,
            experiment,
            deps.broker.clone(),
            deps.topics(),
            cfg.bus.retained_read_timeout,
        )
        .await?;

        let job_name = format!("{kind}_automation");
        let strategy_key = strategy.key();
        let mut settings = vec!["duration".to_string()];
        settings.extend(strategy.settings().iter().map(|s| s.to_string()));

        let hooks = EngineHooks {
            source: format!("{job_name}:{strategy_key}"),
            strategy: Mutex::new(strategy),
            strategy_key,
            settings,
            readings: Mutex::new(Readings::default()),
            latest_event: Mutex::new(None),
            duration_minutes: Mutex::new(duration_minutes),
            skip_first_run,
            staleness_threshold: cfg.automation.staleness_threshold,
            od_sensor: cfg.automation.od_sensor.clone(),
            actuator: deps.actuator.clone(),
            ledger,
            timer: Mutex::new(None),
            in_flight: tokio::sync::Mutex::new(()),
            retired: CancellationToken::new(),
        };

        let job = Job::spawn(
            JobId::new(unit, experiment, job_name),
            deps.broker.clone(),
            deps.topics(),
            hooks,
        )
        .await?;
        info!(job = %job.id(), strategy = strategy_key, duration_minutes, "automation started");
        Ok(Self { job })
    }

    /// Runs one tick now and returns its decision.
    pub async fn run(&self) -> DosingEvent {
        self.job.hooks().tick(self.job.context()).await
    }

    /// Drives the pumps directly, crediting the ledger for each completed step.
    pub async fn execute_io_action(
        &self,
        media_ml: f64,
        alt_media_ml: f64,
        waste_ml: f64,
    ) -> Result<(), ActuationError> {
        let hooks = self.job.hooks();
        let _running = hooks.in_flight.lock().await;
        hooks
            .execute_io_action(self.job.context(), media_ml, alt_media_ml, waste_ml)
            .await
    }

    pub fn latest_event(&self) -> Option<DosingEvent> {
        *self.job.hooks().latest_event.lock()
    }

    pub fn ledger(&self) -> &ThroughputLedger {
        &self.job.hooks().ledger
    }

    pub fn strategy_key(&self) -> &'static str {
        self.job.hooks().strategy_key
    }

    /// Current value of a strategy parameter (or `duration`).
    pub fn setting(&self, name: &str) -> Option<f64> {
        let hooks = self.job.hooks();
        if name == "duration" {
            return Some(*hooks.duration_minutes.lock());
        }
        hooks.strategy.lock().setting(name)
    }

    /// Timer period, if the timer is still alive.
    pub fn period(&self) -> Option<Duration> {
        self.job.hooks().timer.lock().as_ref().map(RepeatedTimer::period)
    }

    pub fn record_od(&self, value: f64) {
        self.job.hooks().record(|r| &mut r.od, value);
    }

    pub fn record_growth_rate(&self, value: f64) {
        self.job.hooks().record(|r| &mut r.growth_rate, value);
    }

    pub async fn apply_setting(&self, name: &str, value: &str) -> Result<(), JobError> {
        self.job.apply_setting(name, value).await
    }

    pub fn state(&self) -> JobState {
        self.job.state()
    }

    pub async fn set_state(&self, to: JobState) -> Result<(), JobError> {
        self.job.set_state(to).await
    }

    pub async fn disconnect(&self) {
        self.job.disconnect().await;
    }

    pub fn is_active(&self) -> bool {
        self.job.is_active()
    }

    pub fn job(&self) -> &Arc<Job<EngineHooks>> {
        &self.job
    }
}

impl std::fmt::Debug for AutomationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutomationEngine")
            .field("id", self.job.id())
            .field("strategy", &self.strategy_key())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::actuation::SimulatedPump;
    use crate::automation::StrategyRegistry;
    use crate::pubsub::{MemoryBroker, Message};

    const PREFIX: &str = "pioreactor/unit1/exp1";
    const JOB: &str = "pioreactor/unit1/exp1/dosing_automation";

    struct Rig {
        broker: MemoryBroker,
        pump: Arc<SimulatedPump>,
        engine: AutomationEngine,
    }

    async fn rig(key: &str, params: StrategyParams) -> Rig {
        let broker = MemoryBroker::new();
        let pump = Arc::new(SimulatedPump::new());
        let config = Arc::new(ControlConfig::default());
        let deps = EngineDeps::new(Arc::new(broker.clone()), pump.clone(), config.clone());
        // the first tick would otherwise race the readings published by the test
        let params = params.with("skip_first_run", true);
        let strategy = StrategyRegistry::with_builtins()
            .build(key, &params, &config)
            .unwrap();
        let engine = AutomationEngine::spawn("unit1", "exp1", "dosing", strategy, &params, &deps)
            .await
            .unwrap();
        Rig {
            broker,
            pump,
            engine,
        }
    }

    fn turbidostat() -> StrategyParams {
        StrategyParams::default()
            .with("target_od", 1.0)
            .with("volume", 0.5)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    fn publish_readings(broker: &MemoryBroker, od: f64, growth_rate: f64) {
        broker
            .publish(Message::new(format!("{PREFIX}/od_filtered/od/1"), od.to_string()))
            .unwrap();
        broker
            .publish(Message::new(
                format!("{PREFIX}/growth_rate"),
                growth_rate.to_string(),
            ))
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn no_decision_without_readings() {
        let r = rig("turbidostat", turbidostat()).await;
        assert_eq!(r.engine.state(), JobState::Ready);
        assert_eq!(r.engine.run().await, DosingEvent::NoEvent);
        assert!(r.pump.dispensed().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_readings_are_never_acted_on() {
        let r = rig("turbidostat", turbidostat()).await;
        r.engine.record_od(1.2);
        r.engine.record_growth_rate(0.1);

        tokio::time::advance(Duration::from_secs(601)).await;
        assert_eq!(r.engine.run().await, DosingEvent::NoEvent);
        assert!(r.pump.dispensed().is_empty());

        // one fresh channel is not enough: the oldest reading decides
        r.engine.record_od(1.2);
        assert_eq!(r.engine.run().await, DosingEvent::NoEvent);

        r.engine.record_growth_rate(0.1);
        assert_eq!(r.engine.run().await, DosingEvent::Dilution { volume: 0.5 });
    }

    #[tokio::test(start_paused = true)]
    async fn turbidostat_doses_from_bus_readings() {
        let r = rig("turbidostat", turbidostat()).await;
        let mut events = r
            .broker
            .subscribe(&format!("{JOB}/dosing_events"), SubscribeOptions::live_only())
            .unwrap();

        let mut decisions = Vec::new();
        for od in [0.98, 1.0, 1.01, 0.99] {
            publish_readings(&r.broker, od, 0.1);
            settle().await;
            decisions.push(r.engine.run().await);
        }
        assert_eq!(
            decisions,
            vec![
                DosingEvent::NoEvent,
                DosingEvent::Dilution { volume: 0.5 },
                DosingEvent::Dilution { volume: 0.5 },
                DosingEvent::NoEvent,
            ]
        );
        assert_eq!(r.pump.total(PumpChannel::Media), 1.0);
        assert_eq!(r.pump.total(PumpChannel::Waste), 1.0);
        assert_eq!(r.engine.ledger().totals().media, 1.0);

        let first: serde_json::Value =
            serde_json::from_str(events.rx.recv().await.unwrap().payload_str()).unwrap();
        assert_eq!(first["event"], "add_media");
        assert_eq!(first["source_of_event"], "dosing_automation:turbidostat");
        assert_eq!(first["succeeded"], true);

        let latest = r.broker.retained(&format!("{JOB}/latest_event")).unwrap();
        assert!(latest.payload_str().contains("no_event"));
        assert_eq!(r.engine.latest_event(), Some(DosingEvent::NoEvent));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_pump_step_aborts_the_action() {
        let r = rig("chemostat", StrategyParams::default().with("volume", 0.5)).await;
        let mut events = r
            .broker
            .subscribe(&format!("{JOB}/dosing_events"), SubscribeOptions::live_only())
            .unwrap();
        r.pump.set_failing(PumpChannel::Media, true);

        let err = r.engine.execute_io_action(0.5, 0.0, 0.5).await.unwrap_err();
        assert_eq!(err.as_label(), "actuation_failed");
        assert_eq!(r.engine.ledger().totals().media, 0.0);
        assert_eq!(r.pump.total(PumpChannel::Waste), 0.0);

        let ev: serde_json::Value =
            serde_json::from_str(events.rx.recv().await.unwrap().payload_str()).unwrap();
        assert_eq!(ev["succeeded"], false);
    }

    #[tokio::test(start_paused = true)]
    async fn alt_media_is_credited_separately() {
        let r = rig("chemostat", StrategyParams::default().with("volume", 0.5)).await;
        r.engine.execute_io_action(0.25, 0.75, 1.0).await.unwrap();
        let totals = r.engine.ledger().totals();
        assert_eq!(totals.media, 0.25);
        assert_eq!(totals.alt_media, 0.75);
        assert_eq!(
            r.pump.dispensed(),
            vec![
                (PumpChannel::Media, 0.25),
                (PumpChannel::AltMedia, 0.75),
                (PumpChannel::Waste, 1.0),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn duration_setting_changes_the_period() {
        let r = rig("turbidostat", turbidostat()).await;
        assert_eq!(r.engine.period(), Some(Duration::from_secs(3600)));

        r.broker
            .publish(Message::new(format!("{JOB}/duration/set"), "30"))
            .unwrap();
        settle().await;

        assert_eq!(r.engine.period(), Some(Duration::from_secs(1800)));
        assert_eq!(r.engine.setting("duration"), Some(30.0));
        assert_eq!(
            r.broker.retained(&format!("{JOB}/duration")).unwrap().payload_str(),
            "30"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn strategy_settings_are_editable() {
        let r = rig("turbidostat", turbidostat()).await;
        r.engine.apply_setting("target_od", "2.0").await.unwrap();
        assert_eq!(r.engine.setting("target_od"), Some(2.0));
        assert!(r.engine.apply_setting("target_od", "-1").await.is_err());
        assert!(r.engine.apply_setting("colour", "blue").await.is_err());
        assert_eq!(r.engine.setting("target_od"), Some(2.0));
    }

    #[tokio::test(start_paused = true)]
    async fn sleeping_pauses_the_timer_and_skips_ticks() {
        let r = rig("turbidostat", turbidostat()).await;
        r.engine.set_state(JobState::Sleeping).await.unwrap();

        let paused = r
            .engine
            .job()
            .hooks()
            .timer
            .lock()
            .as_ref()
            .map(RepeatedTimer::is_paused);
        assert_eq!(paused, Some(true));

        r.engine.record_od(1.5);
        r.engine.record_growth_rate(0.1);
        assert_eq!(r.engine.run().await, DosingEvent::NoEvent);

        r.engine.set_state(JobState::Ready).await.unwrap();
        assert_eq!(r.engine.run().await, DosingEvent::Dilution { volume: 0.5 });
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_releases_everything() {
        let r = rig("turbidostat", turbidostat()).await;
        let gr = format!("{PREFIX}/growth_rate");
        assert_eq!(r.broker.subscribers_for(&gr), 1);

        r.engine.disconnect().await;

        assert_eq!(r.engine.state(), JobState::Disconnected);
        assert_eq!(r.broker.subscribers_for(&gr), 0);
        assert_eq!(r.engine.period(), None);
        assert_eq!(r.engine.ledger().job().state(), JobState::Disconnected);
        assert_eq!(r.engine.run().await, DosingEvent::NoEvent);
    }

    #[tokio::test(start_paused = true)]
    async fn ledger_survives_engine_restart() {
        let broker = MemoryBroker::new();
        let pump = Arc::new(SimulatedPump::new());
        let config = Arc::new(ControlConfig::default());
        let deps = EngineDeps::new(Arc::new(broker.clone()), pump, config.clone());
        let params = StrategyParams::default().with("volume", 0.5);

        for expected in [0.0, 0.5] {
            let strategy = StrategyRegistry::with_builtins()
                .build("chemostat", &params, &config)
                .unwrap();
            let engine =
                AutomationEngine::spawn("unit1", "exp1", "dosing", strategy, &params, &deps)
                    .await
                    .unwrap();
            assert_eq!(engine.ledger().totals().media, expected);
            engine.execute_io_action(0.5, 0.0, 0.5).await.unwrap();
            engine.disconnect().await;
        }
    }

    /// Takes ten seconds per request and tracks how many run at once.
    #[derive(Debug, Default)]
    struct SlowPump {
        inflight: AtomicUsize,
        max_inflight: AtomicUsize,
        done: Mutex<Vec<(PumpChannel, f64)>>,
    }

    #[async_trait]
    impl Actuator for SlowPump {
        async fn dispense(&self, channel: PumpChannel, volume_ml: f64) -> Result<(), ActuationError> {
            let now = self.inflight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_inflight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(10)).await;
            self.inflight.fetch_sub(1, Ordering::SeqCst);
            self.done.lock().push((channel, volume_ml));
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_waits_for_the_running_pump_step() {
        let broker = MemoryBroker::new();
        let pump = Arc::new(SlowPump::default());
        let config = Arc::new(ControlConfig::default());
        let deps = EngineDeps::new(Arc::new(broker.clone()), pump.clone(), config.clone());
        let params = StrategyParams::default()
            .with("volume", 0.5)
            .with("skip_first_run", true);
        let strategy = StrategyRegistry::with_builtins()
            .build("chemostat", &params, &config)
            .unwrap();
        let engine = AutomationEngine::spawn("unit1", "exp1", "dosing", strategy, &params, &deps)
            .await
            .unwrap();
        engine.record_od(1.0);
        engine.record_growth_rate(0.1);

        let ticking = tokio::spawn({
            let engine = engine.clone();
            async move { engine.run().await }
        });
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(pump.inflight.load(Ordering::SeqCst), 1);

        let started = Instant::now();
        engine.disconnect().await;
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert_eq!(pump.inflight.load(Ordering::SeqCst), 0);

        assert_eq!(ticking.await.unwrap(), DosingEvent::Dilution { volume: 0.5 });
        // media finished and was credited; waste never started
        assert_eq!(*pump.done.lock(), vec![(PumpChannel::Media, 0.5)]);
        assert_eq!(pump.max_inflight.load(Ordering::SeqCst), 1);
        assert_eq!(engine.ledger().totals().media, 0.5);
        let retained = broker
            .retained(&format!("{PREFIX}/throughput_calculating/media_throughput"))
            .unwrap();
        assert_eq!(retained.payload_f64(), Some(0.5));
        assert!(broker.retained(&format!("{JOB}/latest_event")).is_none());

        assert_eq!(
            engine.execute_io_action(0.5, 0.0, 0.5).await.unwrap_err().as_label(),
            "actuation_interrupted"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn continuous_cycle_runs_without_readings() {
        let r = rig("continuous_cycle", StrategyParams::default().with("volume", 1.0)).await;
        assert_eq!(r.engine.run().await, DosingEvent::Dilution { volume: 1.0 });

        // stale readings do not hold it back either
        r.engine.record_od(0.2);
        tokio::time::advance(Duration::from_secs(700)).await;
        assert_eq!(r.engine.run().await, DosingEvent::Dilution { volume: 1.0 });
        assert_eq!(r.pump.total(PumpChannel::Media), 2.0);
        assert_eq!(r.engine.ledger().totals().media, 2.0);
    }
}
