//! # Strategy registry.
//!
//! Maps a strategy key to a factory. Built once at start-up (built-ins first,
//! then plugins), wrapped in an `Arc`, and only read afterwards.
//!
//! ```text
//! StrategyRegistry::with_builtins()   silent, turbidostat, morbidostat, chemostat,
//!        │                            pid_turbidostat, pid_morbidostat, continuous_cycle
//!        ├─► register("my_plugin", factory)
//!        ▼
//! Arc<StrategyRegistry> ──► every AutomationController (read-only)
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::warn;

use super::params::StrategyParams;
use super::strategies;
use super::strategy::Automation;
use crate::config::ControlConfig;
use crate::error::StrategyError;

/// Builds a strategy from request parameters.
pub type StrategyFactory = Arc<
    dyn Fn(&StrategyParams, &ControlConfig) -> Result<Box<dyn Automation>, StrategyError>
        + Send
        + Sync,
>;

/// Key → factory table.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    factories: HashMap<String, StrategyFactory>,
}

impl StrategyRegistry {
    /// Registry without any strategies.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with every built-in dosing strategy.
    pub fn with_builtins() -> Self {
        let mut reg = Self::empty();
        strategies::register_builtins(&mut reg);
        reg
    }

    /// Adds or replaces a factory. Plugins call this before the registry is shared.
    pub fn register<F>(&mut self, key: &str, factory: F) -> &mut Self
    where
        F: Fn(&StrategyParams, &ControlConfig) -> Result<Box<dyn Automation>, StrategyError>
            + Send
            + Sync
            + 'static,
    {
        if self
            .factories
            .insert(key.to_string(), Arc::new(factory))
            .is_some()
        {
            warn!(strategy = key, "replacing registered strategy");
        }
        self
    }

    /// Constructs a strategy; fails on unknown key or bad parameters.
    pub fn build(
        &self,
        key: &str,
        params: &StrategyParams,
        cfg: &ControlConfig,
    ) -> Result<Box<dyn Automation>, StrategyError> {
        let factory = self
            .factories
            .get(key)
            .ok_or_else(|| StrategyError::UnknownStrategy {
                key: key.to_string(),
            })?;
        factory(params, cfg)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.factories.contains_key(key)
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}
