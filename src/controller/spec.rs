use serde_json::Value;

use crate::automation::StrategyParams;
use crate::error::StrategyError;

/// Request to run a strategy under a controller.
///
/// On the wire this is one JSON object: the strategy key under `{kind}_automation`
/// plus the strategy's parameters, e.g.
/// `{"dosing_automation": "turbidostat", "target_od": 1.0, "volume": "0.5"}`.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategySpec {
    /// Registry key.
    pub key: String,

    /// Strategy and engine parameters.
    pub params: StrategyParams,
}

impl StrategySpec {
    pub fn new(key: impl Into<String>, params: StrategyParams) -> Self {
        Self {
            key: key.into(),
            params,
        }
    }

    /// Decodes a swap request for the given automation kind.
    pub fn from_json(kind: &str, payload: &str) -> Result<Self, StrategyError> {
        let value: Value =
            serde_json::from_str(payload).map_err(|e| StrategyError::MalformedRequest {
                reason: e.to_string(),
            })?;
        let Value::Object(mut map) = value else {
            return Err(StrategyError::MalformedRequest {
                reason: "expected a JSON object".to_string(),
            });
        };

        let field = format!("{kind}_automation");
        let key = match map.remove(&field) {
            Some(Value::String(key)) if !key.trim().is_empty() => key.trim().to_string(),
            Some(other) => {
                return Err(StrategyError::invalid(
                    &field,
                    format!("expected a strategy name, got {other}"),
                ));
            }
            None => return Err(StrategyError::MissingParameter { name: field }),
        };
        Ok(Self::new(key, StrategyParams::new(map)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_key_and_params() {
        let spec = StrategySpec::from_json(
            "dosing",
            r#"{"dosing_automation": "turbidostat", "target_od": 1.0, "duration": "60", "colour": "red"}"#,
        )
        .unwrap();
        assert_eq!(spec.key, "turbidostat");
        assert_eq!(spec.params.require_f64("duration").unwrap(), 60.0);
        assert!(spec.params.as_map().contains_key("colour"));
        assert!(!spec.params.as_map().contains_key("dosing_automation"));
    }

    #[test]
    fn rejects_bad_requests() {
        let label = |p: &str| StrategySpec::from_json("dosing", p).unwrap_err().as_label();
        assert_eq!(label("not json"), "strategy_malformed_request");
        assert_eq!(label("[1, 2]"), "strategy_malformed_request");
        assert_eq!(label(r#"{"volume": 1}"#), "strategy_missing_parameter");
        assert_eq!(label(r#"{"dosing_automation": 3}"#), "strategy_invalid_parameter");
        assert_eq!(
            label(r#"{"led_automation": "silent"}"#),
            "strategy_missing_parameter"
        );
    }
}
