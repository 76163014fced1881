//! Declarative scenario documents.
//!
//! A scenario has two top-level keys: an optional `environment`
//! (pre-configured noise and network conditions) and a `timeline` of
//! `{at, action, …params}` entries. Timestamps accept `"Nms"`, `"Ns"` or
//! bare numeric seconds; entries inside conditional branches may use a
//! leading `+` for stamps relative to the branching event.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapter::JsonMap;
use crate::error::{HarnessError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<EnvironmentSpec>,
    #[serde(default)]
    pub timeline: Vec<TimelineEntry>,
}

impl Scenario {
    /// Parse a scenario from a JSON document. Documents may nest the
    /// payload under a top-level `scenario` key.
    pub fn from_value(value: Value) -> Result<Self> {
        let payload = match value {
            Value::Object(mut map) => map
                .remove("scenario")
                .unwrap_or(Value::Object(map)),
            other => other,
        };
        serde_json::from_value(payload)
            .map_err(|e| HarnessError::Config(format!("scenario document: {e}")))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noise_profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noise_snr_db: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSpec {
    #[serde(default = "default_latency_ms")]
    pub latency_ms: f64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: f64,
    #[serde(default)]
    pub loss: f64,
}

fn default_latency_ms() -> f64 {
    10.0
}

fn default_jitter_ms() -> f64 {
    2.0
}

/// One raw timeline entry. Action-specific parameters are kept as an
/// open map and interpreted by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    #[serde(default)]
    pub at: Value,
    #[serde(default)]
    pub action: String,
    #[serde(flatten)]
    pub params: JsonMap,
}

/// Convert a time value (`"2.5s"`, `"750ms"`, bare number) to seconds.
///
/// With `base` set, a leading `+` makes the stamp relative to it.
pub fn parse_time(value: &Value, base: Option<f64>) -> Result<f64> {
    match value {
        Value::Null => Ok(0.0),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| HarnessError::Config(format!("bad time value: {n}"))),
        Value::String(s) => parse_time_str(s, base),
        other => Err(HarnessError::Config(format!("bad time value: {other}"))),
    }
}

fn parse_time_str(raw: &str, base: Option<f64>) -> Result<f64> {
    let mut value = raw.trim();

    let mut offset = 0.0;
    if let Some(rest) = value.strip_prefix('+') {
        let Some(base) = base else {
            return Err(HarnessError::Config(format!(
                "relative time '{raw}' outside a conditional branch"
            )));
        };
        offset = base;
        value = rest.trim();
    }

    let bad = || HarnessError::Config(format!("bad time string: '{raw}'"));

    let seconds = if let Some(ms) = value.strip_suffix("ms") {
        ms.trim().parse::<f64>().map_err(|_| bad())? / 1000.0
    } else if let Some(s) = value.strip_suffix('s') {
        s.trim().parse::<f64>().map_err(|_| bad())?
    } else {
        value.parse::<f64>().map_err(|_| bad())?
    };

    Ok(offset + seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_suffixed_and_bare_values() {
        assert_eq!(parse_time(&json!("1.5s"), None).unwrap(), 1.5);
        assert_eq!(parse_time(&json!("750ms"), None).unwrap(), 0.75);
        assert_eq!(parse_time(&json!(2), None).unwrap(), 2.0);
        assert_eq!(parse_time(&json!(" 3s "), None).unwrap(), 3.0);
        assert_eq!(parse_time(&json!(0.25), None).unwrap(), 0.25);
        assert_eq!(parse_time(&Value::Null, None).unwrap(), 0.0);
    }

    #[test]
    fn relative_stamps_need_a_base() {
        assert_eq!(parse_time(&json!("+1s"), Some(4.0)).unwrap(), 5.0);
        assert_eq!(parse_time(&json!("+500ms"), Some(1.0)).unwrap(), 1.5);
        assert!(parse_time(&json!("+1s"), None).is_err());
    }

    #[test]
    fn garbage_is_a_config_error() {
        assert!(parse_time(&json!("soon"), None).is_err());
        assert!(parse_time(&json!("10m"), None).is_err());
        assert!(parse_time(&json!(true), None).is_err());
    }

    #[test]
    fn scenario_documents_unwrap_the_scenario_key() {
        let doc = json!({
            "scenario": {
                "name": "booking",
                "environment": { "noise_profile": "cafe" },
                "timeline": [
                    { "at": "0s", "action": "user_speak", "audio": "hi" },
                ],
            }
        });
        let scenario = Scenario::from_value(doc).expect("parse");
        assert_eq!(scenario.name.as_deref(), Some("booking"));
        assert_eq!(scenario.timeline.len(), 1);
        assert_eq!(scenario.timeline[0].action, "user_speak");
        assert_eq!(scenario.timeline[0].params["audio"], json!("hi"));

        let flat = json!({ "timeline": [] });
        let scenario = Scenario::from_value(flat).expect("parse flat");
        assert!(scenario.timeline.is_empty());
    }

    #[test]
    fn network_spec_defaults() {
        let spec: NetworkSpec = serde_json::from_value(json!({ "loss": 0.1 })).expect("parse");
        assert_eq!(spec.latency_ms, 10.0);
        assert_eq!(spec.jitter_ms, 2.0);
        assert_eq!(spec.loss, 0.1);
    }
}
