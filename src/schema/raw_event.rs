//! proctor.telemetry_event.v1 wire format
//!
//! Telemetry arrives loosely typed: a session id, an event type string, a
//! timestamp produced by a client clock, and an open `details` object. This is
//! the shape persisted by the ingestion layer; [`super::TelemetryEvent`] is the
//! validated form the analysis code works with.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Current schema version
pub const SCHEMA_VERSION: &str = "proctor.telemetry_event.v1";

/// Longest accepted session id
pub const MAX_SESSION_ID_LENGTH: usize = 128;

/// Longest accepted event type string
pub const MAX_EVENT_TYPE_LENGTH: usize = 64;

/// Telemetry event types known to the analysis engine
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    StudyStarted,
    TestStarted,
    ModuleViewTime,
    ScrollDepthMilestone,
    SelfCheckAnswered,
    FocusLoss,
    ScreenshotAttempt,
    PrintAttempt,
    /// Any other event type the front end emits
    #[serde(untagged)]
    Other(String),
}

impl EventType {
    pub fn as_str(&self) -> &str {
        match self {
            EventType::StudyStarted => "study_started",
            EventType::TestStarted => "test_started",
            EventType::ModuleViewTime => "module_view_time",
            EventType::ScrollDepthMilestone => "scroll_depth_milestone",
            EventType::SelfCheckAnswered => "self_check_answered",
            EventType::FocusLoss => "focus_loss",
            EventType::ScreenshotAttempt => "screenshot_attempt",
            EventType::PrintAttempt => "print_attempt",
            EventType::Other(name) => name.as_str(),
        }
    }

    pub fn parse(name: &str) -> Self {
        match name {
            "study_started" => EventType::StudyStarted,
            "test_started" => EventType::TestStarted,
            "module_view_time" => EventType::ModuleViewTime,
            "scroll_depth_milestone" => EventType::ScrollDepthMilestone,
            "self_check_answered" => EventType::SelfCheckAnswered,
            "focus_loss" => EventType::FocusLoss,
            "screenshot_attempt" => EventType::ScreenshotAttempt,
            "print_attempt" => EventType::PrintAttempt,
            other => EventType::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A telemetry record as persisted by the ingestion layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTelemetryEvent {
    /// Session the event belongs to
    #[serde(alias = "sessionId")]
    pub session_id: String,
    /// Event type name
    #[serde(alias = "eventType")]
    pub event_type: String,
    /// Client-reported timestamp
    #[serde(
        alias = "eventTimestamp",
        alias = "event_timestamp",
        deserialize_with = "deserialize_timestamp"
    )]
    pub timestamp: DateTime<Utc>,
    /// Stable cookie-derived identity
    #[serde(
        default,
        alias = "persistentId",
        alias = "persistent_identity",
        skip_serializing_if = "Option::is_none"
    )]
    pub persistent_id: Option<String>,
    /// Network address the event was received from
    #[serde(
        default,
        alias = "clientIp",
        alias = "client_address",
        skip_serializing_if = "Option::is_none"
    )]
    pub client_ip: Option<String>,
    /// Page the event was emitted from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
    /// Open key/value payload
    #[serde(default)]
    pub details: serde_json::Value,
}

impl RawTelemetryEvent {
    /// Create a record with empty details
    pub fn new(
        session_id: impl Into<String>,
        event_type: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        RawTelemetryEvent {
            session_id: session_id.into(),
            event_type: event_type.into(),
            timestamp,
            persistent_id: None,
            client_ip: None,
            page: None,
            details: serde_json::Value::Null,
        }
    }

    pub fn with_identity(mut self, persistent_id: impl Into<String>) -> Self {
        self.persistent_id = Some(persistent_id.into());
        self
    }

    pub fn with_client_ip(mut self, client_ip: impl Into<String>) -> Self {
        self.client_ip = Some(client_ip.into());
        self
    }

    pub fn with_page(mut self, page: impl Into<String>) -> Self {
        self.page = Some(page.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    /// Validate the identifying fields of the record
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_session_id(&self.session_id)?;

        if self.event_type.is_empty() {
            return Err(ValidationError::EmptyEventType);
        }
        if self.event_type.chars().count() > MAX_EVENT_TYPE_LENGTH {
            return Err(ValidationError::EventTypeTooLong(self.event_type.chars().count()));
        }

        Ok(())
    }
}

/// Check a session id against the accepted format
pub fn validate_session_id(session_id: &str) -> Result<(), ValidationError> {
    if session_id.is_empty() {
        return Err(ValidationError::EmptySessionId);
    }
    if session_id.len() > MAX_SESSION_ID_LENGTH {
        return Err(ValidationError::SessionIdTooLong(session_id.len()));
    }
    if !session_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ValidationError::InvalidSessionId(session_id.to_string()));
    }
    Ok(())
}

/// Parse a timestamp as RFC 3339, or as a naive ISO 8601 string assumed to be UTC
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    let naive = trimmed.trim_end_matches('Z');
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(naive, fmt).ok())
        .map(|dt| dt.and_utc())
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("unparsable timestamp: {}", raw)))
}

/// Validation errors for telemetry records
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("Session id is empty")]
    EmptySessionId,

    #[error("Session id is {0} characters, limit is {max}", max = MAX_SESSION_ID_LENGTH)]
    SessionIdTooLong(usize),

    #[error("Session id contains characters outside [A-Za-z0-9_-]: {0}")]
    InvalidSessionId(String),

    #[error("Event type is empty")]
    EmptyEventType,

    #[error("Event type is {0} characters, limit is {max}", max = MAX_EVENT_TYPE_LENGTH)]
    EventTypeTooLong(usize),
}
