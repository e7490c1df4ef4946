//! Validated telemetry events
//!
//! [`TelemetryEvent`] is what the stores hold and what the analysis components
//! read. The `details` payload is decoded once, here, into [`EventKind`]; a
//! known event type whose payload cannot be decoded becomes
//! [`EventKind::Malformed`] so it still counts towards session timing but
//! contributes nothing else.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::raw_event::{EventType, RawTelemetryEvent, ValidationError};

/// Candidate details some front ends attach to start events
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub middle_name: Option<String>,
    #[serde(default)]
    pub position: Option<String>,
}

impl UserInfo {
    /// Whether the record carries a usable last name
    pub fn has_name(&self) -> bool {
        self.last_name.as_deref().is_some_and(|n| !n.trim().is_empty())
    }
}

/// Payload of `study_started` / `test_started`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartDetails {
    /// Candidate details captured at start, if the page collected them
    pub user_info: Option<UserInfo>,
    /// Identity token echoed in the payload
    pub persistent_id: Option<String>,
    /// Address echoed in the payload by the ingestion layer
    pub ip: Option<String>,
}

/// Typed event payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    StudyStarted(StartDetails),
    TestStarted(StartDetails),
    ModuleViewTime { duration_sec: f64 },
    ScrollDepthMilestone { depth_pct: f64 },
    SelfCheckAnswered,
    FocusLoss,
    ScreenshotAttempt,
    PrintAttempt,
    /// Event type the engine does not interpret
    Other { event_type: String },
    /// Known event type whose details could not be decoded
    Malformed { event_type: EventType, reason: String },
}

impl EventKind {
    /// Event type this payload was decoded from
    pub fn event_type(&self) -> EventType {
        match self {
            EventKind::StudyStarted(_) => EventType::StudyStarted,
            EventKind::TestStarted(_) => EventType::TestStarted,
            EventKind::ModuleViewTime { .. } => EventType::ModuleViewTime,
            EventKind::ScrollDepthMilestone { .. } => EventType::ScrollDepthMilestone,
            EventKind::SelfCheckAnswered => EventType::SelfCheckAnswered,
            EventKind::FocusLoss => EventType::FocusLoss,
            EventKind::ScreenshotAttempt => EventType::ScreenshotAttempt,
            EventKind::PrintAttempt => EventType::PrintAttempt,
            EventKind::Other { event_type } => EventType::Other(event_type.clone()),
            EventKind::Malformed { event_type, .. } => event_type.clone(),
        }
    }

    /// Start payload for `study_started` / `test_started`
    pub fn start_details(&self) -> Option<&StartDetails> {
        match self {
            EventKind::StudyStarted(d) | EventKind::TestStarted(d) => Some(d),
            _ => None,
        }
    }
}

/// A validated telemetry event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub persistent_id: Option<String>,
    pub client_ip: Option<String>,
    pub page: Option<String>,
    pub kind: EventKind,
}

impl TelemetryEvent {
    pub fn event_type(&self) -> EventType {
        self.kind.event_type()
    }

    /// Validate a raw record and decode its payload
    ///
    /// Fails only when the record cannot be attributed to a session. Identity and
    /// page fall back to the copies some clients put inside `details`.
    pub fn from_raw(raw: RawTelemetryEvent) -> Result<Self, ValidationError> {
        raw.validate()?;

        let event_type = EventType::parse(&raw.event_type);
        let kind = match decode_kind(&event_type, &raw.details) {
            Ok(kind) => kind,
            Err(reason) => {
                warn!(
                    session_id = %raw.session_id,
                    event_type = %event_type,
                    %reason,
                    "malformed telemetry details"
                );
                EventKind::Malformed { event_type, reason }
            }
        };

        let persistent_id = non_empty(raw.persistent_id)
            .or_else(|| detail_string(&raw.details, "persistentId"));
        let page = non_empty(raw.page).or_else(|| detail_string(&raw.details, "page"));

        Ok(TelemetryEvent {
            session_id: raw.session_id,
            timestamp: raw.timestamp,
            persistent_id,
            client_ip: non_empty(raw.client_ip),
            page,
            kind,
        })
    }
}

impl TryFrom<RawTelemetryEvent> for TelemetryEvent {
    type Error = ValidationError;

    fn try_from(raw: RawTelemetryEvent) -> Result<Self, Self::Error> {
        TelemetryEvent::from_raw(raw)
    }
}

fn decode_kind(event_type: &EventType, details: &Value) -> Result<EventKind, String> {
    let kind = match event_type {
        EventType::StudyStarted => EventKind::StudyStarted(decode_start(details)),
        EventType::TestStarted => EventKind::TestStarted(decode_start(details)),
        EventType::ModuleViewTime => {
            let duration_sec = required_number(details, "duration")?;
            if duration_sec < 0.0 {
                return Err(format!("negative duration {}", duration_sec));
            }
            EventKind::ModuleViewTime { duration_sec }
        }
        EventType::ScrollDepthMilestone => EventKind::ScrollDepthMilestone {
            depth_pct: required_number(details, "depth")?,
        },
        EventType::SelfCheckAnswered => EventKind::SelfCheckAnswered,
        EventType::FocusLoss => EventKind::FocusLoss,
        EventType::ScreenshotAttempt => EventKind::ScreenshotAttempt,
        EventType::PrintAttempt => EventKind::PrintAttempt,
        EventType::Other(name) => EventKind::Other {
            event_type: name.clone(),
        },
    };
    Ok(kind)
}

/// Start payloads are best effort: an unreadable `userInfo` is simply absent.
fn decode_start(details: &Value) -> StartDetails {
    let user_info = details
        .get("userInfo")
        .and_then(|v| serde_json::from_value::<UserInfo>(v.clone()).ok());
    StartDetails {
        user_info,
        persistent_id: detail_string(details, "persistentId"),
        ip: detail_string(details, "ip"),
    }
}

/// Read a numeric detail that may be sent as a number, `"42"` or `"97%"`
fn required_number(details: &Value, key: &str) -> Result<f64, String> {
    let value = match details {
        Value::Object(map) => map.get(key),
        Value::Null => None,
        _ => return Err("details is not an object".to_string()),
    }
    .ok_or_else(|| format!("missing `{}`", key))?;

    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    };

    match number {
        Some(n) if n.is_finite() => Ok(n),
        _ => Err(format!("`{}` is not numeric: {}", key, value)),
    }
}

fn detail_string(details: &Value, key: &str) -> Option<String> {
    details
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "N/A")
        .map(str::to_string)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn raw(event_type: &str, details: Value) -> RawTelemetryEvent {
        RawTelemetryEvent::new(
            "sess-1",
            event_type,
            Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap(),
        )
        .with_details(details)
    }

    #[test]
    fn test_module_view_time_decodes_duration() {
        let event = TelemetryEvent::from_raw(raw("module_view_time", json!({"duration": 90}))).unwrap();
        assert_eq!(event.kind, EventKind::ModuleViewTime { duration_sec: 90.0 });
    }

    #[test]
    fn test_duration_as_string() {
        let event =
            TelemetryEvent::from_raw(raw("module_view_time", json!({"duration": "45.5"}))).unwrap();
        assert_eq!(event.kind, EventKind::ModuleViewTime { duration_sec: 45.5 });
    }

    #[test]
    fn test_scroll_depth_percent_string() {
        let event =
            TelemetryEvent::from_raw(raw("scroll_depth_milestone", json!({"depth": "97%"}))).unwrap();
        assert_eq!(event.kind, EventKind::ScrollDepthMilestone { depth_pct: 97.0 });
    }

    #[test]
    fn test_missing_key_becomes_malformed() {
        let event = TelemetryEvent::from_raw(raw("module_view_time", json!({}))).unwrap();
        match event.kind {
            EventKind::Malformed { event_type, reason } => {
                assert_eq!(event_type, EventType::ModuleViewTime);
                assert!(reason.contains("duration"));
            }
            other => panic!("expected malformed, got {:?}", other),
        }
    }

    #[test]
    fn test_non_numeric_depth_becomes_malformed() {
        let event =
            TelemetryEvent::from_raw(raw("scroll_depth_milestone", json!({"depth": "deep"}))).unwrap();
        assert!(matches!(event.kind, EventKind::Malformed { .. }));
        assert_eq!(event.event_type(), EventType::ScrollDepthMilestone);
    }

    #[test]
    fn test_details_not_an_object_becomes_malformed() {
        let event =
            TelemetryEvent::from_raw(raw("module_view_time", json!("{not json"))).unwrap();
        assert!(matches!(event.kind, EventKind::Malformed { .. }));
    }

    #[test]
    fn test_start_details_with_user_info() {
        let event = TelemetryEvent::from_raw(raw(
            "test_started",
            json!({
                "userInfo": {"lastName": "Ivanova", "firstName": "Anna"},
                "persistentId": "pid-123456789",
                "ip": "192.168.1.10",
                "page": "test-117"
            }),
        ))
        .unwrap();

        let details = event.kind.start_details().unwrap();
        assert_eq!(
            details.user_info.as_ref().and_then(|u| u.last_name.as_deref()),
            Some("Ivanova")
        );
        assert_eq!(details.ip.as_deref(), Some("192.168.1.10"));
        // Identity and page are lifted from details when the columns are empty
        assert_eq!(event.persistent_id.as_deref(), Some("pid-123456789"));
        assert_eq!(event.page.as_deref(), Some("test-117"));
    }

    #[test]
    fn test_column_identity_wins_over_details() {
        let event = TelemetryEvent::from_raw(
            raw("study_started", json!({"persistentId": "from-details"})).with_identity("from-column"),
        )
        .unwrap();
        assert_eq!(event.persistent_id.as_deref(), Some("from-column"));
    }

    #[test]
    fn test_unknown_type_is_other() {
        let event = TelemetryEvent::from_raw(raw("copy_attempt", Value::Null)).unwrap();
        assert_eq!(
            event.kind,
            EventKind::Other {
                event_type: "copy_attempt".to_string()
            }
        );
    }

    #[test]
    fn test_invalid_session_id_is_rejected() {
        let mut r = raw("focus_loss", Value::Null);
        r.session_id = "../etc".to_string();
        assert!(TelemetryEvent::from_raw(r).is_err());
    }
}
