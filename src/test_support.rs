//! Fixtures shared by the unit tests

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::schema::{EventKind, StartDetails, TelemetryEvent};
use crate::store::{EventQuery, EventStore, StoreError};
use crate::types::TestAttemptSummary;

/// 2024-01-15 at the given hour and minute, UTC
pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, hour, minute, 0).unwrap()
}

pub fn event(session_id: &str, ts: DateTime<Utc>, kind: EventKind) -> TelemetryEvent {
    TelemetryEvent {
        session_id: session_id.to_string(),
        timestamp: ts,
        persistent_id: None,
        client_ip: None,
        page: None,
        kind,
    }
}

pub fn study_start(
    session_id: &str,
    ts: DateTime<Utc>,
    identity: Option<&str>,
    client_ip: Option<&str>,
    page: &str,
) -> TelemetryEvent {
    TelemetryEvent {
        persistent_id: identity.map(str::to_string),
        client_ip: client_ip.map(str::to_string),
        page: Some(page.to_string()),
        ..event(
            session_id,
            ts,
            EventKind::StudyStarted(StartDetails::default()),
        )
    }
}

/// Attempt of the default test type by `pid-1`, starting at 14:00
pub fn attempt(session_id: &str, score: f64, duration_secs: i64) -> TestAttemptSummary {
    let start = at(14, 0);
    TestAttemptSummary {
        session_id: session_id.to_string(),
        identity: Some("pid-1".to_string()),
        client_address: None,
        test_type: "default".to_string(),
        score,
        start_time: start,
        end_time: start + Duration::seconds(duration_secs),
    }
}

/// Event store whose backend is always down
pub struct UnavailableEventStore;

impl EventStore for UnavailableEventStore {
    fn insert(&self, _event: TelemetryEvent) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    fn query(&self, _query: &EventQuery) -> Result<Vec<TelemetryEvent>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    fn session_ids(&self) -> Result<BTreeSet<String>, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}
