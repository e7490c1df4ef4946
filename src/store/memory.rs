//! In-memory indexed stores
//!
//! Events are kept in insertion order with secondary indexes by session id,
//! event type and timestamp, so the lookups the analysis components issue never
//! scan the whole log.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::traits::{EventStore, IdentityDirectory, IdentityRecord, TestAttemptStore};
use super::{EventQuery, StoreError};
use crate::schema::{EventType, TelemetryEvent};
use crate::types::TestAttemptSummary;

#[derive(Default)]
struct EventLog {
    events: Vec<TelemetryEvent>,
    by_session: HashMap<String, Vec<usize>>,
    by_type: HashMap<EventType, Vec<usize>>,
    by_time: BTreeMap<DateTime<Utc>, Vec<usize>>,
}

impl EventLog {
    fn push(&mut self, event: TelemetryEvent) {
        let idx = self.events.len();
        self.by_session
            .entry(event.session_id.clone())
            .or_default()
            .push(idx);
        self.by_type.entry(event.event_type()).or_default().push(idx);
        self.by_time.entry(event.timestamp).or_default().push(idx);
        self.events.push(event);
    }

    /// Smallest index list that can answer the query
    fn candidates(&self, query: &EventQuery) -> Vec<usize> {
        if let Some(id) = &query.session_id {
            return self.by_session.get(id).cloned().unwrap_or_default();
        }
        if let Some(types) = &query.event_types {
            return types
                .iter()
                .filter_map(|t| self.by_type.get(t))
                .flatten()
                .copied()
                .collect();
        }
        let range = query.time_range;
        if range.after.is_some() || range.before.is_some() {
            let lower = range.after.map_or(Bound::Unbounded, Bound::Excluded);
            let upper = range.before.map_or(Bound::Unbounded, Bound::Excluded);
            return self
                .by_time
                .range((lower, upper))
                .flat_map(|(_, ids)| ids.iter().copied())
                .collect();
        }
        (0..self.events.len()).collect()
    }
}

/// Thread-safe in-memory [`EventStore`]
#[derive(Default)]
pub struct InMemoryEventStore {
    log: RwLock<EventLog>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-loaded with events
    pub fn with_events(events: impl IntoIterator<Item = TelemetryEvent>) -> Self {
        let store = Self::new();
        {
            let mut log = store.log.write();
            for event in events {
                log.push(event);
            }
        }
        store
    }

    pub fn len(&self) -> usize {
        self.log.read().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventStore for InMemoryEventStore {
    fn insert(&self, event: TelemetryEvent) -> Result<(), StoreError> {
        self.log.write().push(event);
        Ok(())
    }

    fn query(&self, query: &EventQuery) -> Result<Vec<TelemetryEvent>, StoreError> {
        if query.time_range.is_empty() {
            return Ok(Vec::new());
        }
        let log = self.log.read();
        let mut hits: Vec<usize> = log
            .candidates(query)
            .into_iter()
            .filter(|&idx| query.matches(&log.events[idx]))
            .collect();
        hits.sort_by_key(|&idx| (log.events[idx].timestamp, idx));
        hits.dedup();
        Ok(hits.into_iter().map(|idx| log.events[idx].clone()).collect())
    }

    fn session_ids(&self) -> Result<BTreeSet<String>, StoreError> {
        Ok(self.log.read().by_session.keys().cloned().collect())
    }

    fn insert_batch(&self, events: Vec<TelemetryEvent>) -> Result<usize, StoreError> {
        let count = events.len();
        let mut log = self.log.write();
        for event in events {
            log.push(event);
        }
        Ok(count)
    }
}

/// Thread-safe in-memory [`TestAttemptStore`]
#[derive(Default)]
pub struct InMemoryAttemptStore {
    attempts: RwLock<BTreeMap<String, TestAttemptSummary>>,
}

impl InMemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished attempt; a session id holds at most one summary
    pub fn record(&self, summary: TestAttemptSummary) -> Result<(), StoreError> {
        let mut attempts = self.attempts.write();
        if attempts.contains_key(&summary.session_id) {
            return Err(StoreError::Conflict(format!(
                "session {} already has a recorded attempt",
                summary.session_id
            )));
        }
        attempts.insert(summary.session_id.clone(), summary);
        Ok(())
    }

    pub fn with_attempts(
        attempts: impl IntoIterator<Item = TestAttemptSummary>,
    ) -> Result<Self, StoreError> {
        let store = Self::new();
        for attempt in attempts {
            store.record(attempt)?;
        }
        Ok(store)
    }
}

impl TestAttemptStore for InMemoryAttemptStore {
    fn get(&self, session_id: &str) -> Result<Option<TestAttemptSummary>, StoreError> {
        Ok(self.attempts.read().get(session_id).cloned())
    }

    fn list_completed(&self) -> Result<Vec<TestAttemptSummary>, StoreError> {
        Ok(self.attempts.read().values().cloned().collect())
    }
}

/// Thread-safe in-memory [`IdentityDirectory`]
#[derive(Default)]
pub struct InMemoryIdentityDirectory {
    records: RwLock<HashMap<String, IdentityRecord>>,
}

impl InMemoryIdentityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, record: IdentityRecord) {
        self.records.write().insert(record.identity.clone(), record);
    }
}

impl IdentityDirectory for InMemoryIdentityDirectory {
    fn lookup(&self, identity: &str) -> Result<Option<IdentityRecord>, StoreError> {
        Ok(self.records.read().get(identity).cloned())
    }

    fn lookup_many(
        &self,
        identities: &BTreeSet<String>,
    ) -> Result<HashMap<String, IdentityRecord>, StoreError> {
        let records = self.records.read();
        Ok(identities
            .iter()
            .filter_map(|id| records.get(id).map(|r| (id.clone(), r.clone())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{at, attempt, event};
    use pretty_assertions::assert_eq;

    use crate::schema::EventKind;

    fn sample_store() -> InMemoryEventStore {
        InMemoryEventStore::with_events(vec![
            event("s1", at(10, 5), EventKind::FocusLoss),
            event("s2", at(10, 0), EventKind::PrintAttempt),
            event("s1", at(10, 0), EventKind::SelfCheckAnswered),
            event("s1", at(10, 5), EventKind::PrintAttempt),
        ])
    }

    #[test]
    fn test_query_by_session_is_time_ordered() {
        let store = sample_store();
        let events = store.query(&EventQuery::new().session("s1")).unwrap();
        let kinds: Vec<_> = events.iter().map(|e| e.event_type()).collect();
        // Equal timestamps keep insertion order
        assert_eq!(
            kinds,
            vec![
                EventType::SelfCheckAnswered,
                EventType::FocusLoss,
                EventType::PrintAttempt
            ]
        );
    }

    #[test]
    fn test_query_by_types() {
        let store = sample_store();
        let events = store
            .query(&EventQuery::new().event_types([EventType::PrintAttempt, EventType::FocusLoss]))
            .unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].session_id, "s2");
    }

    #[test]
    fn test_query_by_time_range() {
        let store = sample_store();
        let events = store.query(&EventQuery::new().after(at(10, 0))).unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.timestamp == at(10, 5)));

        let empty = store
            .query(&EventQuery::new().after(at(10, 5)).before(at(10, 5)))
            .unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_session_ids() {
        let store = sample_store();
        let ids: Vec<String> = store.session_ids().unwrap().into_iter().collect();
        assert_eq!(ids, vec!["s1".to_string(), "s2".to_string()]);
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_attempt_store_rejects_second_summary() {
        let store = InMemoryAttemptStore::new();
        store.record(attempt("t1", 95.0, 90)).unwrap();
        let err = store.record(attempt("t1", 50.0, 90)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.get("t1").unwrap().map(|a| a.score), Some(95.0));
        assert_eq!(store.list_completed().unwrap().len(), 1);
        assert!(store.get("t2").unwrap().is_none());
    }

    #[test]
    fn test_identity_directory_lookup_many() {
        let directory = InMemoryIdentityDirectory::new();
        directory.upsert(IdentityRecord {
            identity: "pid-1".to_string(),
            last_name: "Petrov".to_string(),
            first_name: "Ivan".to_string(),
        });
        let wanted: BTreeSet<String> = ["pid-1", "pid-2"].iter().map(|s| s.to_string()).collect();
        let found = directory.lookup_many(&wanted).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found["pid-1"].last_name, "Petrov");
    }
}
