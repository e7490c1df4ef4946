//! Session correlation
//!
//! Links a test attempt to the study session that preceded it. The candidate's
//! identity is tried first; the client address is a weaker fallback and is
//! therefore bounded to the lookback window.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AnalysisConfig;
use crate::error::ComputeError;
use crate::schema::{EventType, TelemetryEvent};
use crate::store::{EventQuery, EventStore};

/// How a study session was linked to a test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchedBy {
    Identity,
    ClientAddress,
}

/// Study session found for a test attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelatedStudy {
    pub session_id: String,
    /// Earliest `study_started` of the session
    pub started_at: DateTime<Utc>,
    pub matched_by: MatchedBy,
}

/// What to look for
#[derive(Debug, Clone, Copy)]
pub struct CorrelationRequest<'a> {
    pub test_start: DateTime<Utc>,
    pub identity: Option<&'a str>,
    pub client_address: Option<&'a str>,
    /// Study page that must have been opened
    pub study_page: &'a str,
}

/// Finds the study session that causally precedes a test session
pub struct SessionCorrelator<'a> {
    events: &'a dyn EventStore,
    lookback: Duration,
}

impl<'a> SessionCorrelator<'a> {
    pub fn new(events: &'a dyn EventStore, config: &AnalysisConfig) -> Self {
        Self {
            events,
            lookback: config.lookback(),
        }
    }

    /// Latest qualifying study session, or `None` when nothing matches
    pub fn find_study_session(
        &self,
        request: &CorrelationRequest<'_>,
    ) -> Result<Option<CorrelatedStudy>, ComputeError> {
        let base = EventQuery::new()
            .event_types([EventType::StudyStarted])
            .page(request.study_page)
            .before(request.test_start);

        if let Some(identity) = request.identity.filter(|s| !s.is_empty()) {
            let starts = self.events.query(&base.clone().identity(identity))?;
            if let Some(found) = latest_session(&starts, MatchedBy::Identity) {
                debug!(session_id = %found.session_id, "study session matched by identity");
                return Ok(Some(found));
            }
        }

        if let Some(address) = request.client_address.filter(|s| !s.is_empty()) {
            let window_start = request.test_start - self.lookback;
            let starts = self
                .events
                .query(&base.after(window_start).client_ip(address))?;
            if let Some(found) = latest_session(&starts, MatchedBy::ClientAddress) {
                debug!(session_id = %found.session_id, "study session matched by client address");
                return Ok(Some(found));
            }
        }

        Ok(None)
    }
}

/// Group by session, take each session's earliest start, pick the latest group
fn latest_session(starts: &[TelemetryEvent], matched_by: MatchedBy) -> Option<CorrelatedStudy> {
    let mut first_start: BTreeMap<&str, DateTime<Utc>> = BTreeMap::new();
    for event in starts {
        first_start
            .entry(event.session_id.as_str())
            .and_modify(|ts| *ts = (*ts).min(event.timestamp))
            .or_insert(event.timestamp);
    }
    first_start
        .into_iter()
        .max_by_key(|&(id, ts)| (ts, id))
        .map(|(id, ts)| CorrelatedStudy {
            session_id: id.to_string(),
            started_at: ts,
            matched_by,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryEventStore;
    use crate::test_support::{at, study_start};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    const PAGE: &str = "study-117";

    fn request<'a>(identity: Option<&'a str>, address: Option<&'a str>) -> CorrelationRequest<'a> {
        CorrelationRequest {
            test_start: at(14, 0),
            identity,
            client_address: address,
            study_page: PAGE,
        }
    }

    fn find(store: &InMemoryEventStore, req: &CorrelationRequest<'_>) -> Option<CorrelatedStudy> {
        SessionCorrelator::new(store, &AnalysisConfig::default())
            .find_study_session(req)
            .unwrap()
    }

    #[test]
    fn test_identity_picks_latest_preceding_session() {
        let store = InMemoryEventStore::with_events(vec![
            study_start("early", at(9, 0), Some("pid-1"), None, PAGE),
            study_start("late", at(12, 0), Some("pid-1"), None, PAGE),
            study_start("after", at(15, 0), Some("pid-1"), None, PAGE),
            study_start("other-page", at(13, 0), Some("pid-1"), None, "study-999"),
            study_start("other-person", at(13, 30), Some("pid-2"), None, PAGE),
        ]);
        let found = find(&store, &request(Some("pid-1"), None)).unwrap();
        assert_eq!(found.session_id, "late");
        assert_eq!(found.matched_by, MatchedBy::Identity);
    }

    #[test]
    fn test_session_ranked_by_its_earliest_start() {
        // "resumed" restarted at 13:00 but began at 08:00
        let store = InMemoryEventStore::with_events(vec![
            study_start("resumed", at(8, 0), Some("pid-1"), None, PAGE),
            study_start("resumed", at(13, 0), Some("pid-1"), None, PAGE),
            study_start("single", at(11, 0), Some("pid-1"), None, PAGE),
        ]);
        let found = find(&store, &request(Some("pid-1"), None)).unwrap();
        assert_eq!(found.session_id, "single");
    }

    #[test]
    fn test_identity_match_wins_over_address() {
        let store = InMemoryEventStore::with_events(vec![
            study_start("by-id", at(10, 0), Some("pid-1"), None, PAGE),
            study_start("by-ip", at(13, 0), None, Some("10.0.0.7"), PAGE),
        ]);
        let found = find(&store, &request(Some("pid-1"), Some("10.0.0.7"))).unwrap();
        assert_eq!(found.session_id, "by-id");
    }

    #[test]
    fn test_address_fallback_honors_window_and_page() {
        let day_before = Utc.with_ymd_and_hms(2024, 1, 14, 13, 0, 0).unwrap();
        let store = InMemoryEventStore::with_events(vec![
            study_start("too-old", day_before, None, Some("10.0.0.7"), PAGE),
            study_start("wrong-page", at(13, 0), None, Some("10.0.0.7"), "study-118"),
        ]);
        assert_eq!(find(&store, &request(None, Some("10.0.0.7"))), None);

        store
            .insert(study_start("in-window", at(2, 0), None, Some("10.0.0.7"), PAGE))
            .unwrap();
        let found = find(&store, &request(Some("pid-unknown"), Some("10.0.0.7"))).unwrap();
        assert_eq!(found.session_id, "in-window");
        assert_eq!(found.matched_by, MatchedBy::ClientAddress);
    }

    #[test]
    fn test_window_bound_is_exclusive() {
        let exactly_24h = Utc.with_ymd_and_hms(2024, 1, 14, 14, 0, 0).unwrap();
        let store = InMemoryEventStore::with_events(vec![study_start(
            "edge",
            exactly_24h,
            None,
            Some("10.0.0.7"),
            PAGE,
        )]);
        assert_eq!(find(&store, &request(None, Some("10.0.0.7"))), None);
    }

    #[test]
    fn test_no_identity_or_address_finds_nothing() {
        let store = InMemoryEventStore::with_events(vec![study_start(
            "s",
            at(10, 0),
            Some("pid-1"),
            None,
            PAGE,
        )]);
        assert_eq!(find(&store, &request(None, None)), None);
        assert_eq!(find(&store, &request(Some(""), None)), None);
    }
}
