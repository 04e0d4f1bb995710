//! Event ingestion and feature flag evaluation.
//!
//! These endpoints live on the capture host and authenticate with the
//! project API key in the request body, not the personal key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::client::PostHogClient;
use crate::error::{DriverError, DriverResult};
use crate::executor::ApiRequest;

const CAPTURE_PATH: &str = "/i/v0/e/";
const BATCH_PATH: &str = "/batch/";
const FLAGS_PATH: &str = "/flags/";

/// One analytics event to ingest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureEvent {
    pub event: String,
    pub distinct_id: String,
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// Defaults to ingestion time on the server when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>
}

impl CaptureEvent {
    pub fn new(event: impl Into<String>, distinct_id: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            distinct_id: distinct_id.into(),
            properties: Map::new(),
            timestamp: None
        }
    }

    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_properties(mut self, properties: Map<String, Value>) -> Self {
        self.properties.extend(properties);
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    fn validate(&self, prefix: &str) -> DriverResult<()> {
        if self.event.trim().is_empty() {
            return Err(DriverError::validation(
                format!("{prefix}event"),
                "event name must not be empty"
            ));
        }
        if self.distinct_id.trim().is_empty() {
            return Err(DriverError::validation(
                format!("{prefix}distinct_id"),
                "distinct_id must not be empty"
            ));
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct CapturePayload<'a> {
    api_key: &'a str,
    #[serde(flatten)]
    event: &'a CaptureEvent
}

#[derive(Serialize)]
struct BatchPayload<'a> {
    api_key: &'a str,
    batch: &'a [CaptureEvent]
}

/// Server acknowledgement of an ingestion call.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureAck {
    pub body: Value
}

impl CaptureAck {
    /// The capture endpoints answer `{"status": 1}` or `{"status": "Ok"}`.
    pub fn is_ok(&self) -> bool {
        match self.body.get("status") {
            Some(Value::Number(n)) => n.as_i64() == Some(1),
            Some(Value::String(s)) => s.eq_ignore_ascii_case("ok"),
            _ => false
        }
    }
}

/// Evaluated value of a feature flag for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    Enabled(bool),
    Variant(String)
}

impl FlagValue {
    pub fn is_enabled(&self) -> bool {
        match self {
            Self::Enabled(enabled) => *enabled,
            Self::Variant(_) => true
        }
    }

    pub fn variant(&self) -> Option<&str> {
        match self {
            Self::Variant(v) => Some(v),
            Self::Enabled(_) => None
        }
    }
}

/// Reads `key` out of a flags response.
///
/// v2 responses nest `{"flags": {key: {"enabled", "variant"}}}`; older ones
/// carry `{"featureFlags": {key: bool | variant}}`. A flag missing from both
/// is disabled.
fn flag_from_response(body: &Value, key: &str) -> FlagValue {
    if let Some(flag) = body.get("flags").and_then(|f| f.get(key)) {
        if let Some(variant) = flag.get("variant").and_then(Value::as_str) {
            return FlagValue::Variant(variant.to_string());
        }
        let enabled = flag.get("enabled").and_then(Value::as_bool).unwrap_or(false);
        return FlagValue::Enabled(enabled);
    }

    match body.get("featureFlags").and_then(|f| f.get(key)) {
        Some(Value::Bool(enabled)) => FlagValue::Enabled(*enabled),
        Some(Value::String(variant)) => FlagValue::Variant(variant.clone()),
        _ => FlagValue::Enabled(false)
    }
}

fn encode<T: Serialize>(payload: &T) -> DriverResult<Value> {
    serde_json::to_value(payload).map_err(|e| DriverError::Decode(format!("failed to encode payload: {e}")))
}

impl PostHogClient {
    fn project_api_key(&self) -> DriverResult<&str> {
        self.config()
            .project_api_key
            .as_ref()
            .map(|key| key.expose())
            .ok_or_else(|| DriverError::Authentication {
                status: None,
                message: "a project API key is required for capture and flag calls; set POSTHOG_PROJECT_API_KEY"
                    .to_string()
            })
    }

    /// Ingests a single event.
    pub async fn capture_event(&self, event: CaptureEvent) -> DriverResult<CaptureAck> {
        event.validate("")?;
        let api_key = self.project_api_key()?;

        let body = encode(&CapturePayload {
            api_key,
            event: &event
        })?;
        debug!(event = %event.event, "Capturing event");

        let response = self.send(&ApiRequest::capture(CAPTURE_PATH, body)).await?;
        Ok(CaptureAck {
            body: response.require_json("capture_event")?
        })
    }

    /// Ingests `events` in one request. The batch succeeds or fails as a
    /// whole.
    pub async fn capture_batch(&self, events: Vec<CaptureEvent>) -> DriverResult<CaptureAck> {
        if events.is_empty() {
            return Err(DriverError::validation("events", "batch must contain at least one event"));
        }
        for (i, event) in events.iter().enumerate() {
            event.validate(&format!("events[{i}]."))?;
        }
        let api_key = self.project_api_key()?;

        let body = encode(&BatchPayload {
            api_key,
            batch: &events
        })?;
        debug!(count = events.len(), "Capturing event batch");

        let response = self.send(&ApiRequest::capture(BATCH_PATH, body)).await?;
        Ok(CaptureAck {
            body: response.require_json("capture_batch")?
        })
    }

    /// Evaluates feature flag `key` for `distinct_id`.
    pub async fn evaluate_feature_flag(
        &self,
        key: &str,
        distinct_id: &str,
        person_properties: Option<Map<String, Value>>
    ) -> DriverResult<FlagValue> {
        if key.trim().is_empty() {
            return Err(DriverError::validation("key", "flag key must not be empty"));
        }
        if distinct_id.trim().is_empty() {
            return Err(DriverError::validation("distinct_id", "distinct_id must not be empty"));
        }
        let api_key = self.project_api_key()?;

        let mut body = json!({
            "api_key": api_key,
            "distinct_id": distinct_id,
            "flag_keys_to_evaluate": [key]
        });
        if let Some(props) = person_properties {
            body["person_properties"] = Value::Object(props);
        }

        let request = ApiRequest::capture(FLAGS_PATH, body).with_query("v", 2);
        let response = self.send(&request).await?;
        let body = response.require_json("evaluate_feature_flag")?;
        Ok(flag_from_response(&body, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_payload_shape() {
        let event = CaptureEvent::new("User Signup", "user_1").with_property("plan", "pro");
        let body = encode(&CapturePayload {
            api_key: "phc_test",
            event: &event
        })
        .unwrap();
        assert_eq!(
            body,
            json!({
                "api_key": "phc_test",
                "event": "User Signup",
                "distinct_id": "user_1",
                "properties": {"plan": "pro"}
            })
        );
    }

    #[test]
    fn test_validate_names_field() {
        let err = CaptureEvent::new(" ", "user").validate("events[2].").unwrap_err();
        match err {
            DriverError::Validation { field, .. } => assert_eq!(field, "events[2].event"),
            other => panic!("unexpected {other:?}")
        }
        assert!(CaptureEvent::new("x", "").validate("").is_err());
        assert!(CaptureEvent::new("x", "y").validate("").is_ok());
    }

    #[test]
    fn test_flag_from_v2_response() {
        let body = json!({
            "flags": {
                "beta": {"key": "beta", "enabled": true, "variant": null},
                "layout": {"key": "layout", "enabled": true, "variant": "compact"},
                "off": {"key": "off", "enabled": false}
            }
        });
        assert_eq!(flag_from_response(&body, "beta"), FlagValue::Enabled(true));
        assert_eq!(
            flag_from_response(&body, "layout"),
            FlagValue::Variant("compact".to_string())
        );
        assert_eq!(flag_from_response(&body, "off"), FlagValue::Enabled(false));
        assert_eq!(flag_from_response(&body, "missing"), FlagValue::Enabled(false));
    }

    #[test]
    fn test_flag_from_legacy_response() {
        let body = json!({"featureFlags": {"beta": true, "layout": "wide"}});
        assert!(flag_from_response(&body, "beta").is_enabled());
        assert_eq!(flag_from_response(&body, "layout").variant(), Some("wide"));
        assert!(!flag_from_response(&body, "gone").is_enabled());
    }

    #[test]
    fn test_ack_status() {
        assert!(CaptureAck { body: json!({"status": 1}) }.is_ok());
        assert!(CaptureAck { body: json!({"status": "Ok"}) }.is_ok());
        assert!(!CaptureAck { body: json!({"status": 0}) }.is_ok());
    }
}
