//! Storage seams for telemetry, test attempts and identity records
//!
//! The engine only reads through these traits. Persistent backends live with the
//! host application; the in-memory implementations back the CLI and the tests.

mod memory;
mod traits;

pub use memory::{InMemoryAttemptStore, InMemoryEventStore, InMemoryIdentityDirectory};
pub use traits::{EventStore, IdentityDirectory, IdentityRecord, TestAttemptStore};

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::schema::{EventType, TelemetryEvent};

/// Errors raised by storage backends
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("conflicting record: {0}")]
    Conflict(String),
}

impl StoreError {
    /// Failures that may succeed when the same read is issued again
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Open time interval; both bounds are exclusive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.after.map_or(true, |a| ts > a) && self.before.map_or(true, |b| ts < b)
    }

    /// True when no timestamp can satisfy both bounds
    pub fn is_empty(&self) -> bool {
        matches!((self.after, self.before), (Some(a), Some(b)) if a >= b)
    }
}

/// Filter for [`EventStore::query`]; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub session_id: Option<String>,
    pub event_types: Option<HashSet<EventType>>,
    pub time_range: TimeRange,
    pub persistent_id: Option<String>,
    pub client_ip: Option<String>,
    pub page: Option<String>,
}

impl EventQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn event_types(mut self, types: impl IntoIterator<Item = EventType>) -> Self {
        self.event_types = Some(types.into_iter().collect());
        self
    }

    pub fn after(mut self, ts: DateTime<Utc>) -> Self {
        self.time_range.after = Some(ts);
        self
    }

    pub fn before(mut self, ts: DateTime<Utc>) -> Self {
        self.time_range.before = Some(ts);
        self
    }

    pub fn identity(mut self, persistent_id: impl Into<String>) -> Self {
        self.persistent_id = Some(persistent_id.into());
        self
    }

    pub fn client_ip(mut self, client_ip: impl Into<String>) -> Self {
        self.client_ip = Some(client_ip.into());
        self
    }

    pub fn page(mut self, page: impl Into<String>) -> Self {
        self.page = Some(page.into());
        self
    }

    /// Whether an event satisfies every set filter
    pub fn matches(&self, event: &TelemetryEvent) -> bool {
        if let Some(id) = &self.session_id {
            if &event.session_id != id {
                return false;
            }
        }
        if let Some(types) = &self.event_types {
            if !types.contains(&event.event_type()) {
                return false;
            }
        }
        if !self.time_range.contains(event.timestamp) {
            return false;
        }
        fn field_eq(filter: &Option<String>, value: &Option<String>) -> bool {
            filter
                .as_ref()
                .map_or(true, |f| value.as_deref() == Some(f.as_str()))
        }
        field_eq(&self.persistent_id, &event.persistent_id)
            && field_eq(&self.client_ip, &event.client_ip)
            && field_eq(&self.page, &event.page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::schema::EventKind;

    fn event(ts: DateTime<Utc>) -> TelemetryEvent {
        TelemetryEvent {
            session_id: "s1".to_string(),
            timestamp: ts,
            persistent_id: Some("pid".to_string()),
            client_ip: None,
            page: Some("study-117".to_string()),
            kind: EventKind::FocusLoss,
        }
    }

    #[test]
    fn test_time_range_bounds_are_exclusive() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        let range = TimeRange {
            after: Some(t0),
            before: Some(t0 + chrono::Duration::hours(1)),
        };
        assert!(!range.contains(t0));
        assert!(range.contains(t0 + chrono::Duration::seconds(1)));
        assert!(!range.contains(t0 + chrono::Duration::hours(1)));
        assert!(!range.is_empty());

        let inverted = TimeRange {
            after: Some(t0),
            before: Some(t0),
        };
        assert!(inverted.is_empty());
    }

    #[test]
    fn test_query_matches_all_filters() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        let ev = event(t0);

        assert!(EventQuery::new().matches(&ev));
        assert!(EventQuery::new().session("s1").page("study-117").matches(&ev));
        assert!(!EventQuery::new().session("s2").matches(&ev));
        assert!(!EventQuery::new()
            .event_types([EventType::StudyStarted])
            .matches(&ev));
        assert!(!EventQuery::new().client_ip("10.0.0.1").matches(&ev));
        assert!(EventQuery::new().identity("pid").matches(&ev));
    }

    #[test]
    fn test_only_unavailable_is_transient() {
        assert!(StoreError::Unavailable("x".into()).is_transient());
        assert!(!StoreError::Corrupt("x".into()).is_transient());
        assert!(!StoreError::Conflict("x".into()).is_transient());
    }
}
