//! Strategy parameters as received on the wire.
//!
//! Values may be JSON numbers or numeric strings (`"60"` and `60` are the same);
//! `null` counts as absent. Unknown keys are kept but never required.

use serde_json::{Map, Value};

use crate::config::ControlConfig;
use crate::error::StrategyError;

/// Named parameters of a strategy request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StrategyParams(Map<String, Value>);

impl StrategyParams {
    pub fn new(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Builder-style insert, handy in code and tests.
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.0.insert(name.to_string(), value.into());
        self
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Numeric value, if present.
    pub fn get_f64(&self, name: &str) -> Result<Option<f64>, StrategyError> {
        match self.0.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => parse_number(name, v).map(Some),
        }
    }

    pub fn require_f64(&self, name: &str) -> Result<f64, StrategyError> {
        self.get_f64(name)?
            .ok_or_else(|| StrategyError::MissingParameter {
                name: name.to_string(),
            })
    }

    /// Required and strictly positive.
    pub fn require_positive(&self, name: &str) -> Result<f64, StrategyError> {
        let v = self.require_f64(name)?;
        ensure_positive(name, v)
    }

    /// Boolean flag; accepts `true/false`, `1/0` and their string forms. Absent is false.
    pub fn flag(&self, name: &str) -> Result<bool, StrategyError> {
        match self.0.get(name) {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(b)) => Ok(*b),
            Some(Value::Number(n)) => Ok(n.as_f64().is_some_and(|v| v != 0.0)),
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(true),
                "false" | "0" | "no" | "" => Ok(false),
                _ => Err(StrategyError::invalid(name, "expected a boolean")),
            },
            Some(_) => Err(StrategyError::invalid(name, "expected a boolean")),
        }
    }

    /// Tick period in minutes; falls back to the configured default.
    pub fn duration_minutes(&self, cfg: &ControlConfig) -> Result<f64, StrategyError> {
        let minutes = self
            .get_f64("duration")?
            .unwrap_or(cfg.automation.default_duration_minutes);
        ensure_positive("duration", minutes)
    }
}

/// Parses a number or numeric string.
pub fn parse_number(name: &str, value: &Value) -> Result<f64, StrategyError> {
    let v = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match v {
        Some(v) if v.is_finite() => Ok(v),
        _ => Err(StrategyError::invalid(name, format!("expected a number, got {value}"))),
    }
}

/// Parses a raw setting payload as a number.
pub fn parse_setting(name: &str, raw: &str) -> Result<f64, StrategyError> {
    parse_number(name, &Value::String(raw.to_string()))
}

pub(crate) fn ensure_positive(name: &str, v: f64) -> Result<f64, StrategyError> {
    if v > 0.0 {
        Ok(v)
    } else {
        Err(StrategyError::invalid(name, "must be greater than zero"))
    }
}

pub(crate) fn ensure_non_negative(name: &str, v: f64) -> Result<f64, StrategyError> {
    if v >= 0.0 {
        Ok(v)
    } else {
        Err(StrategyError::invalid(name, "must not be negative"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(json: &str) -> StrategyParams {
        StrategyParams::new(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn numeric_strings_are_numbers() {
        let p = params(r#"{"duration": "60", "volume": 0.5, "target_od": null}"#);
        assert_eq!(p.require_f64("duration").unwrap(), 60.0);
        assert_eq!(p.require_f64("volume").unwrap(), 0.5);
        assert!(matches!(
            p.require_f64("target_od"),
            Err(StrategyError::MissingParameter { .. })
        ));
    }

    #[test]
    fn garbage_is_invalid_not_missing() {
        let p = params(r#"{"volume": "lots", "target_od": [1]}"#);
        assert_eq!(
            p.require_f64("volume").unwrap_err().as_label(),
            "strategy_invalid_parameter"
        );
        assert!(p.require_f64("target_od").is_err());
    }

    #[test]
    fn flags() {
        let p = params(r#"{"a": true, "b": "1", "c": 0, "d": "maybe"}"#);
        assert!(p.flag("a").unwrap());
        assert!(p.flag("b").unwrap());
        assert!(!p.flag("c").unwrap());
        assert!(!p.flag("missing").unwrap());
        assert!(p.flag("d").is_err());
    }

    #[test]
    fn duration_defaults_and_must_be_positive() {
        let cfg = ControlConfig::default();
        assert_eq!(params("{}").duration_minutes(&cfg).unwrap(), 60.0);
        assert!(params(r#"{"duration": 0}"#).duration_minutes(&cfg).is_err());
        assert_eq!(parse_setting("x", " 2.5 ").unwrap(), 2.5);
    }
}
