use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::automation::{Automation, AutomationEngine, DOSING_KIND, EngineDeps, StrategyRegistry};
use crate::error::{JobError, StrategyError};
use crate::job::{Job, JobContext, JobHooks, JobId, JobState};

use super::{
    error::SwapError,
    slot::{SlotState, SlotStatus},
    spec::StrategySpec,
};

/// Controller behaviour plugged into the job lifecycle.
///
/// The slot mutex is held for the whole swap, so the old engine is fully
/// disconnected before its replacement subscribes and two swaps never interleave.
pub struct ControllerHooks {
    kind: String,
    setting: String,
    registry: Arc<StrategyRegistry>,
    deps: EngineDeps,
    slot: Mutex<SlotState>,
}

impl ControllerHooks {
    /// Replaces the running engine with one built from `spec`.
    ///
    /// Returns the adopted strategy key.
    async fn swap(&self, ctx: &JobContext, spec: StrategySpec) -> Result<String, SwapError> {
        if !ctx.is_active() {
            return Err(SwapError::Disconnected);
        }
        let strategy = self.validate(&spec).inspect_err(|e| {
            warn!(job = %ctx.id(), strategy = %spec.key, label = e.as_label(), error = %e, "rejected strategy, keeping the current one");
        })?;

        let mut slot = self.slot.lock().await;
        if slot.engine.is_none() {
            // start-up race: the initial engine may still be on its way
            debug!(job = %ctx.id(), "no engine yet, retrying once");
            drop(slot);
            tokio::time::sleep(self.deps.config.automation.swap_retry_delay).await;
            slot = self.slot.lock().await;
        }
        if !ctx.is_active() {
            return Err(SwapError::Disconnected);
        }

        let previous = slot.retire().await;
        match self.start(ctx, strategy, &spec).await {
            Ok(engine) => {
                info!(job = %ctx.id(), strategy = %spec.key, previous = ?previous.as_ref().map(|p| p.key.as_str()), "strategy started");
                let key = spec.key.clone();
                slot.adopt(engine, spec);
                Ok(key)
            }
            Err(source) => {
                error!(job = %ctx.id(), strategy = %spec.key, label = source.as_label(), error = %source, "strategy failed to start, no engine running");
                let restored = match previous {
                    Some(prev) if self.deps.config.automation.restore_previous_on_failure => {
                        self.restore(ctx, &mut slot, prev).await
                    }
                    _ => false,
                };
                if !restored {
                    // the retained key must not name a retired strategy
                    if let Err(e) = ctx.publish(&self.setting, "", true) {
                        warn!(job = %ctx.id(), error = %e, "failed to clear strategy key");
                    }
                }
                Err(SwapError::Spawn {
                    key: spec.key,
                    source,
                })
            }
        }
    }

    /// Checks everything that can be checked without touching the running engine.
    fn validate(&self, spec: &StrategySpec) -> Result<Box<dyn Automation>, SwapError> {
        let cfg = &self.deps.config;
        spec.params.duration_minutes(cfg)?;
        spec.params.flag("skip_first_run")?;
        Ok(self.registry.build(&spec.key, &spec.params, cfg)?)
    }

    async fn start(
        &self,
        ctx: &JobContext,
        strategy: Box<dyn Automation>,
        spec: &StrategySpec,
    ) -> Result<AutomationEngine, JobError> {
        let id = ctx.id();
        let engine = AutomationEngine::spawn(
            &id.unit,
            &id.experiment,
            &self.kind,
            strategy,
            &spec.params,
            &self.deps,
        )
        .await?;
        if ctx.state() == JobState::Sleeping {
            if let Err(e) = engine.set_state(JobState::Sleeping).await {
                warn!(job = %ctx.id(), error = %e, "failed to put new engine to sleep");
            }
        }
        Ok(engine)
    }

    /// Rebuilds the previous engine. Returns true if it is running again.
    async fn restore(&self, ctx: &JobContext, slot: &mut SlotState, prev: StrategySpec) -> bool {
        let res = match self.validate(&prev) {
            Ok(strategy) => self.start(ctx, strategy, &prev).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match res {
            Ok(engine) => {
                warn!(job = %ctx.id(), strategy = %prev.key, "restored previous strategy");
                slot.adopt(engine, prev);
                true
            }
            Err(e) => {
                error!(job = %ctx.id(), strategy = %prev.key, error = %e, "failed to restore previous strategy");
                false
            }
        }
    }

    async fn forward(&self, ctx: &JobContext, to: JobState) {
        let slot = self.slot.lock().await;
        let Some(engine) = slot.engine.as_ref() else {
            return;
        };
        if engine.state() != to {
            if let Err(e) = engine.set_state(to).await {
                warn!(job = %ctx.id(), to = %to, error = %e, "failed to forward state to engine");
            }
        }
    }
}

#[async_trait]
impl JobHooks for ControllerHooks {
    fn editable_settings(&self) -> Vec<String> {
        vec![self.setting.clone()]
    }

    async fn set_setting(
        &self,
        ctx: &JobContext,
        name: &str,
        value: &str,
    ) -> Result<Option<String>, JobError> {
        if name != self.setting {
            return Err(JobError::UnknownSetting {
                name: name.to_string(),
            });
        }
        let spec = StrategySpec::from_json(&self.kind, value)?;
        Ok(Some(self.swap(ctx, spec).await?))
    }

    async fn on_ready(&self, ctx: &JobContext) -> Result<(), JobError> {
        self.forward(ctx, JobState::Ready).await;
        Ok(())
    }

    async fn on_sleeping(&self, ctx: &JobContext) -> Result<(), JobError> {
        self.forward(ctx, JobState::Sleeping).await;
        Ok(())
    }

    async fn on_disconnected(&self, ctx: &JobContext) -> Result<(), JobError> {
        self.slot.lock().await.retire().await;
        // empty retained payloads delete the stale values
        for name in self.editable_settings() {
            if let Err(e) = ctx.publish(&name, "", true) {
                warn!(job = %ctx.id(), setting = %name, error = %e, "failed to clear setting");
            }
        }
        Ok(())
    }
}

/// Job that owns exactly one automation engine and hot-swaps it on request.
///
/// Listens on `‹root›/{unit}/{exp}/{kind}_control/{kind}_automation/set` for JSON
/// swap requests and republishes the active key on `.../{kind}_automation`.
#[derive(Clone)]
pub struct AutomationController {
    job: Arc<Job<ControllerHooks>>,
}

impl AutomationController {
    /// Starts the controller and, if given, its initial strategy.
    ///
    /// Only [`DOSING_KIND`] is accepted. An initial strategy that fails to start fails
    /// the whole controller.
    pub async fn spawn(
        unit: &str,
        experiment: &str,
        kind: &str,
        registry: Arc<StrategyRegistry>,
        deps: EngineDeps,
        initial: Option<StrategySpec>,
    ) -> Result<Self, JobError> {
        if kind != DOSING_KIND {
            return Err(StrategyError::UnsupportedKind {
                kind: kind.to_string(),
            }
            .into());
        }
        let hooks = ControllerHooks {
            kind: kind.to_string(),
            setting: format!("{kind}_automation"),
            registry,
            deps: deps.clone(),
            slot: Mutex::new(SlotState::new()),
        };
        let job = Job::spawn(
            JobId::new(unit, experiment, format!("{kind}_control")),
            deps.broker.clone(),
            deps.topics(),
            hooks,
        )
        .await?;
        let controller = Self { job };

        if let Some(spec) = initial {
            if let Err(e) = controller.set_strategy(spec).await {
                controller.disconnect().await;
                return Err(e.into());
            }
        }
        Ok(controller)
    }

    /// Swaps the running strategy. See [`SwapError`] for what is left running on failure.
    pub async fn set_strategy(&self, spec: StrategySpec) -> Result<(), SwapError> {
        let ctx = self.job.context();
        let hooks = self.job.hooks();
        let key = hooks.swap(ctx, spec).await?;
        if let Err(e) = ctx.publish(&hooks.setting, key, true) {
            warn!(job = %ctx.id(), error = %e, "failed to publish strategy key");
        }
        Ok(())
    }

    /// The engine currently running, if any.
    pub async fn engine(&self) -> Option<AutomationEngine> {
        self.job.hooks().slot.lock().await.engine.clone()
    }

    /// Key of the running strategy, if any.
    pub async fn strategy_key(&self) -> Option<String> {
        let slot = self.job.hooks().slot.lock().await;
        match slot.status {
            SlotStatus::Running { .. } => slot.spec.as_ref().map(|s| s.key.clone()),
            _ => None,
        }
    }

    /// How long the running engine has been in place.
    pub async fn uptime(&self) -> Option<Duration> {
        self.job.hooks().slot.lock().await.uptime()
    }

    pub fn kind(&self) -> &str {
        &self.job.hooks().kind
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

    pub fn job(&self) -> &Arc<Job<ControllerHooks>> {
        &self.job
    }
}

impl std::fmt::Debug for AutomationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // a swap in progress holds the slot
        let uptime = self
            .job
            .hooks()
            .slot
            .try_lock()
            .ok()
            .and_then(|slot| slot.uptime());
        f.debug_struct("AutomationController")
            .field("id", self.job.id())
            .field("state", &self.state())
            .field("uptime", &uptime)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex as PlMutex;
    use tokio::time::Instant;

    use crate::actuation::{Actuator, PumpChannel, SimulatedPump};
    use crate::automation::{DosingEvent, Observation, StrategyParams};
    use crate::config::ControlConfig;
    use crate::error::ActuationError;
    use crate::pubsub::{Broker, MemoryBroker, Message};

    const GROWTH_RATE: &str = "pioreactor/unit1/exp1/growth_rate";
    const SETTING: &str = "pioreactor/unit1/exp1/dosing_control/dosing_automation";
    const LEDGER_SET: &str =
        "pioreactor/unit1/exp1/throughput_calculating/media_throughput/set";

    /// Ten seconds per request; remembers the most requests seen at once.
    #[derive(Debug, Default)]
    struct SlowPump {
        inflight: AtomicUsize,
        max_inflight: AtomicUsize,
        done: PlMutex<Vec<(PumpChannel, f64)>>,
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

    fn fast_config() -> ControlConfig {
        let mut config = ControlConfig::default();
        config.bus.retained_read_timeout = Duration::from_millis(50);
        config
    }

    #[derive(Debug)]
    struct Broken;

    impl Automation for Broken {
        fn key(&self) -> &'static str {
            "broken"
        }
        fn settings(&self) -> &'static [&'static str] {
            // not a valid topic level
            &["#"]
        }
        fn decide(&mut self, _obs: &Observation) -> DosingEvent {
            DosingEvent::NoEvent
        }
    }

    fn silent() -> StrategySpec {
        StrategySpec::new("silent", StrategyParams::default())
    }

    fn turbidostat() -> StrategySpec {
        StrategySpec::new(
            "turbidostat",
            StrategyParams::default()
                .with("target_od", 1.0)
                .with("volume", 0.5),
        )
    }

    async fn controller(broker: &MemoryBroker, config: ControlConfig) -> AutomationController {
        let mut registry = StrategyRegistry::with_builtins();
        registry.register("broken", |_, _| Ok(Box::new(Broken)));
        let deps = EngineDeps::new(
            Arc::new(broker.clone()),
            Arc::new(SimulatedPump::new()),
            Arc::new(config),
        );
        AutomationController::spawn(
            "unit1",
            "exp1",
            "dosing",
            Arc::new(registry),
            deps,
            Some(silent()),
        )
        .await
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn swap_leaves_exactly_one_engine() {
        let broker = MemoryBroker::new();
        let c = controller(&broker, ControlConfig::default()).await;
        let old = c.engine().await.unwrap();
        assert_eq!(broker.subscribers_for(GROWTH_RATE), 1);

        c.set_strategy(turbidostat()).await.unwrap();

        assert!(!old.is_active());
        assert_eq!(c.strategy_key().await.as_deref(), Some("turbidostat"));
        assert_eq!(broker.subscribers_for(GROWTH_RATE), 1);
        assert_eq!(broker.retained(SETTING).unwrap().payload_str(), "turbidostat");

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(c.uptime().await.unwrap() >= Duration::from_secs(30));
        assert!(format!("{c:?}").contains("uptime: Some"));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_swaps_never_overlap() {
        let broker = MemoryBroker::new();
        let c = controller(&broker, fast_config()).await;
        let morbidostat = StrategySpec::new(
            "morbidostat",
            StrategyParams::default()
                .with("target_od", 1.0)
                .with("volume", 0.5),
        );

        broker
            .publish(Message::new(
                format!("{SETTING}/set"),
                r#"{"dosing_automation": "chemostat", "volume": 0.5}"#,
            ))
            .unwrap();
        let (a, b) = tokio::join!(c.set_strategy(turbidostat()), c.set_strategy(morbidostat));
        a.unwrap();
        b.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(broker.subscribers_for(GROWTH_RATE), 1);
        assert_eq!(broker.subscribers_for(LEDGER_SET), 1);
        let key = c.strategy_key().await.unwrap();
        assert!(["turbidostat", "morbidostat", "chemostat"].contains(&key.as_str()));
        assert_eq!(c.engine().await.unwrap().strategy_key(), key);
    }

    #[tokio::test(start_paused = true)]
    async fn first_swap_waits_once_for_a_missing_engine() {
        let broker = MemoryBroker::new();
        let deps = EngineDeps::new(
            Arc::new(broker.clone()),
            Arc::new(SimulatedPump::new()),
            Arc::new(fast_config()),
        );
        let c = AutomationController::spawn(
            "unit1",
            "exp1",
            "dosing",
            Arc::new(StrategyRegistry::with_builtins()),
            deps,
            None,
        )
        .await
        .unwrap();
        assert!(c.engine().await.is_none());

        let started = Instant::now();
        c.set_strategy(silent()).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(1));
        assert_eq!(c.strategy_key().await.as_deref(), Some("silent"));

        // an engine is in place now: no wait
        let started = Instant::now();
        c.set_strategy(turbidostat()).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn swap_waits_for_the_old_engines_pump_step() {
        let broker = MemoryBroker::new();
        let pump = Arc::new(SlowPump::default());
        let deps = EngineDeps::new(Arc::new(broker.clone()), pump.clone(), Arc::new(fast_config()));
        let cycle = || {
            StrategySpec::new(
                "continuous_cycle",
                StrategyParams::default().with("volume", 0.5),
            )
        };
        let c = AutomationController::spawn(
            "unit1",
            "exp1",
            "dosing",
            Arc::new(StrategyRegistry::with_builtins()),
            deps,
            Some(cycle()),
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(pump.inflight.load(Ordering::SeqCst), 1);

        c.set_strategy(cycle()).await.unwrap();
        // old media step finished; its waste step never started
        assert_eq!(*pump.done.lock(), vec![(PumpChannel::Media, 0.5)]);

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(pump.max_inflight.load(Ordering::SeqCst), 1);
        assert_eq!(
            *pump.done.lock(),
            vec![(PumpChannel::Media, 0.5), (PumpChannel::Media, 0.5)]
        );
        assert_eq!(c.engine().await.unwrap().ledger().totals().media, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn only_dosing_controllers_are_built() {
        let broker = MemoryBroker::new();
        let deps = EngineDeps::new(
            Arc::new(broker.clone()),
            Arc::new(SimulatedPump::new()),
            Arc::new(ControlConfig::default()),
        );
        let err = AutomationController::spawn(
            "unit1",
            "exp1",
            "led",
            Arc::new(StrategyRegistry::with_builtins()),
            deps,
            None,
        )
        .await
        .unwrap_err();
        assert_eq!(err.as_label(), "strategy_unsupported_kind");
        assert_eq!(broker.subscription_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_request_keeps_the_running_engine() {
        let broker = MemoryBroker::new();
        let c = controller(&broker, ControlConfig::default()).await;
        let old = c.engine().await.unwrap();

        let missing_volume = StrategySpec::new(
            "turbidostat",
            StrategyParams::default().with("target_od", 1.0),
        );
        let err = c.set_strategy(missing_volume).await.unwrap_err();
        assert_eq!(err.as_label(), "swap_invalid_strategy");

        let unknown = StrategySpec::new("nope", StrategyParams::default());
        assert!(c.set_strategy(unknown).await.is_err());

        assert!(old.is_active());
        assert_eq!(c.strategy_key().await.as_deref(), Some("silent"));
        assert_eq!(broker.subscribers_for(GROWTH_RATE), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn swap_from_the_bus() {
        let broker = MemoryBroker::new();
        let c = controller(&broker, ControlConfig::default()).await;

        broker
            .publish(Message::new(
                format!("{SETTING}/set"),
                r#"{"dosing_automation": "chemostat", "volume": "0.5", "duration": "60", "extra": 1}"#,
            ))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;

        let engine = c.engine().await.unwrap();
        assert_eq!(engine.strategy_key(), "chemostat");
        assert_eq!(engine.setting("volume"), Some(0.5));
        assert_eq!(broker.retained(SETTING).unwrap().payload_str(), "chemostat");
        assert_eq!(broker.subscribers_for(GROWTH_RATE), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_start_leaves_no_engine() {
        let broker = MemoryBroker::new();
        let c = controller(&broker, ControlConfig::default()).await;

        let err = c
            .set_strategy(StrategySpec::new("broken", StrategyParams::default()))
            .await
            .unwrap_err();
        assert_eq!(err.as_label(), "swap_spawn_failed");
        assert!(c.engine().await.is_none());
        assert_eq!(c.strategy_key().await, None);
        assert_eq!(c.uptime().await, None);
        assert_eq!(broker.subscribers_for(GROWTH_RATE), 0);
        assert!(broker.retained(SETTING).is_none());

        // a corrected request recovers
        c.set_strategy(turbidostat()).await.unwrap();
        assert_eq!(broker.subscribers_for(GROWTH_RATE), 1);
        assert_eq!(broker.retained(SETTING).unwrap().payload_str(), "turbidostat");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_start_can_restore_previous() {
        let broker = MemoryBroker::new();
        let mut config = ControlConfig::default();
        config.automation.restore_previous_on_failure = true;
        let c = controller(&broker, config).await;

        assert!(c
            .set_strategy(StrategySpec::new("broken", StrategyParams::default()))
            .await
            .is_err());
        assert_eq!(c.strategy_key().await.as_deref(), Some("silent"));
        assert_eq!(broker.subscribers_for(GROWTH_RATE), 1);
        assert_eq!(broker.retained(SETTING).unwrap().payload_str(), "silent");
    }

    #[tokio::test(start_paused = true)]
    async fn lifecycle_is_forwarded_to_the_engine() {
        let broker = MemoryBroker::new();
        let c = controller(&broker, ControlConfig::default()).await;

        c.set_state(JobState::Sleeping).await.unwrap();
        assert_eq!(c.engine().await.unwrap().state(), JobState::Sleeping);

        c.set_strategy(turbidostat()).await.unwrap();
        assert_eq!(c.engine().await.unwrap().state(), JobState::Sleeping);

        c.set_state(JobState::Ready).await.unwrap();
        assert_eq!(c.engine().await.unwrap().state(), JobState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_retires_engine_and_clears_settings() {
        let broker = MemoryBroker::new();
        let c = controller(&broker, ControlConfig::default()).await;
        let engine = c.engine().await.unwrap();
        assert!(broker.retained(SETTING).is_some());

        c.disconnect().await;

        assert_eq!(c.state(), JobState::Disconnected);
        assert!(!engine.is_active());
        assert!(broker.retained(SETTING).is_none());
        assert_eq!(broker.subscription_count(), 0);
        assert_eq!(
            c.set_strategy(turbidostat()).await.unwrap_err().as_label(),
            "swap_disconnected"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn bad_initial_strategy_fails_the_controller() {
        let broker = MemoryBroker::new();
        let deps = EngineDeps::new(
            Arc::new(broker.clone()),
            Arc::new(SimulatedPump::new()),
            Arc::new(ControlConfig::default()),
        );
        let err = AutomationController::spawn(
            "unit1",
            "exp1",
            "dosing",
            Arc::new(StrategyRegistry::with_builtins()),
            deps,
            Some(StrategySpec::new("turbidostat", StrategyParams::default())),
        )
        .await
        .unwrap_err();
        assert_eq!(err.as_label(), "strategy_missing_parameter");
        assert_eq!(broker.subscription_count(), 0);
    }
}
