//! Simulated two-unit fleet on an in-memory bus.
//!
//! - `worker1` runs a dosing controller (turbidostat) fed by a fake OD sensor.
//! - `leader` runs the watchdog; halfway through, worker1's monitor drops off.
//! - A swap request arrives over the bus and changes the strategy to chemostat.
//!
//! Run with `cargo run --example fleet`; stops after 30 s or on Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bioreactor_control::{
    AutomationController, Broker, BusMakeWriter, ControlConfig, EngineDeps, JobState,
    MemoryBroker, Message, SimulatedPump, StrategyParams, StrategyRegistry, StrategySpec, Topics,
    Watchdog, init_tracing, wait_for_shutdown_signal,
};
use tracing::info;

const CONFIG: &str = r#"
[bus]
retained_read_timeout = 0.2

[automation]
staleness_threshold = 30.0

[watchdog]
grace = 1.0
probe_timeout = 2.0
poll_first = 3.0
poll_max = 10.0
poll_factor = 1.5
poll_jitter = "equal"
"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Arc::new(ControlConfig::from_toml_str(CONFIG).context("demo config")?);
    let broker = Arc::new(MemoryBroker::new());
    let topics = Topics::new(cfg.bus.root.as_str());

    let bus_log = BusMakeWriter::new(broker.clone(), &topics, "leader", &cfg.bus.universal_experiment);
    init_tracing(&cfg.logging, Some(bus_log)).context("tracing already installed")?;

    let watchdog = Watchdog::spawn("leader", broker.clone(), &cfg).await?;

    let monitor_state = topics.job("worker1", &cfg.bus.universal_experiment, "monitor", "$state");
    let will = Message::new(monitor_state.as_str(), JobState::Lost.as_str()).with_retain(true);
    broker.set_last_will("worker1-monitor", will)?;
    broker.publish(Message::new(monitor_state.as_str(), JobState::Ready.as_str()).with_retain(true))?;

    let pump = Arc::new(SimulatedPump::new());
    let deps = EngineDeps::new(broker.clone(), pump.clone(), cfg.clone());
    let registry = Arc::new(StrategyRegistry::with_builtins());
    let initial = StrategySpec::new(
        "turbidostat",
        StrategyParams::default()
            .with("target_od", 1.0)
            .with("volume", 0.5)
            .with("duration", 0.05),
    );
    let controller =
        AutomationController::spawn("worker1", "exp1", "dosing", registry, deps, Some(initial))
            .await?;

    let sensor = tokio::spawn(simulate_sensor(broker.clone(), topics.clone()));
    let script = tokio::spawn(script(broker.clone(), topics.clone()));

    tokio::select! {
        res = wait_for_shutdown_signal() => res.context("signal handlers")?,
        _ = tokio::time::sleep(Duration::from_secs(30)) => info!("demo finished"),
    }

    sensor.abort();
    script.abort();
    controller.disconnect().await;
    watchdog.disconnect().await;

    info!(
        media_ml = pump.total(bioreactor_control::PumpChannel::Media),
        waste_ml = pump.total(bioreactor_control::PumpChannel::Waste),
        lost_peers = ?watchdog.peers().lost_peers().await,
        "summary"
    );
    Ok(())
}

/// OD creeps up and is knocked back by each dilution the pump makes.
async fn simulate_sensor(broker: Arc<MemoryBroker>, topics: Topics) {
    let od_topic = topics.experiment("worker1", "exp1", "od_filtered/od/1");
    let gr_topic = topics.experiment("worker1", "exp1", "growth_rate");
    let mut od: f64 = 0.9;
    let mut tick = tokio::time::interval(Duration::from_millis(500));
    loop {
        tick.tick().await;
        od = if od >= 1.05 { 0.92 } else { od + 0.02 };
        let _ = broker.publish(Message::new(od_topic.as_str(), format!("{od:.3}")));
        let _ = broker.publish(Message::new(gr_topic.as_str(), "0.21"));
    }
}

/// Drops worker1's monitor, then swaps the dosing strategy over the bus.
async fn script(broker: Arc<MemoryBroker>, topics: Topics) {
    tokio::time::sleep(Duration::from_secs(8)).await;
    info!("worker1 monitor drops off the network");
    broker.drop_client("worker1-monitor");

    tokio::time::sleep(Duration::from_secs(6)).await;
    let set = topics.job("worker1", "exp1", "dosing_control", "dosing_automation/set");
    let req = r#"{"dosing_automation": "chemostat", "volume": "0.25", "duration": 0.05}"#;
    let _ = broker.publish(Message::new(set, req));

    tokio::time::sleep(Duration::from_secs(6)).await;
    info!("worker1 monitor is back");
    let state = topics.job("worker1", "$experiment", "monitor", "$state");
    let _ = broker.publish(Message::new(state, "ready").with_retain(true));
}
