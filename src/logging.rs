//! # Logging setup.
//!
//! Two `fmt` layers with independent filters:
//!
//! - console: `RUST_LOG` if set, otherwise [`LoggingConfig::filter`];
//! - bus: WARN and above, one message per event on `‹root›/{unit}/{exp}/logs/app`,
//!   so operators watching the bus see failures from every unit.

use std::io::{self, Write};
use std::sync::Arc;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;
use crate::pubsub::{Broker, Message, Qos, Topics};

/// [`MakeWriter`](tracing_subscriber::fmt::MakeWriter) that republishes log lines on the bus.
#[derive(Clone, Debug)]
pub struct BusMakeWriter {
    broker: Arc<dyn Broker>,
    topic: Arc<str>,
}

impl BusMakeWriter {
    pub fn new(broker: Arc<dyn Broker>, topics: &Topics, unit: &str, experiment: &str) -> Self {
        Self {
            broker,
            topic: topics.experiment(unit, experiment, "logs/app").into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl<'a> fmt::MakeWriter<'a> for BusMakeWriter {
    type Writer = BusLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        BusLogWriter {
            broker: self.broker.clone(),
            topic: self.topic.clone(),
            buf: Vec::with_capacity(256),
        }
    }
}

/// Per-event writer. Buffers the formatted line and publishes it on drop.
pub struct BusLogWriter {
    broker: Arc<dyn Broker>,
    topic: Arc<str>,
    buf: Vec<u8>,
}

impl Write for BusLogWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for BusLogWriter {
    fn drop(&mut self) {
        let line = String::from_utf8_lossy(&self.buf);
        let line = line.trim_end();
        if line.is_empty() {
            return;
        }
        // nowhere left to report a failure
        let _ = self
            .broker
            .publish(Message::new(self.topic.clone(), line).with_qos(Qos::AtLeastOnce));
    }
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init_tracing(cfg: &LoggingConfig, bus: Option<BusMakeWriter>) -> Result<(), TryInitError> {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.filter));
    let console = fmt::layer().with_target(false).with_filter(console_filter);

    let bus_layer = bus.filter(|_| cfg.publish_to_bus).map(|writer| {
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .without_time()
            .with_writer(writer)
            .with_filter(LevelFilter::WARN)
    });

    tracing_subscriber::registry()
        .with(console)
        .with(bus_layer)
        .try_init()
}
