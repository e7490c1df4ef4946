//! Storage traits consumed by the analysis components

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::{EventQuery, StoreError};
use crate::schema::TelemetryEvent;
use crate::types::TestAttemptSummary;

/// Append-only telemetry storage
pub trait EventStore: Send + Sync {
    /// Append one validated event
    fn insert(&self, event: TelemetryEvent) -> Result<(), StoreError>;

    /// Events matching the query, ordered by timestamp then insertion order
    fn query(&self, query: &EventQuery) -> Result<Vec<TelemetryEvent>, StoreError>;

    /// Every session id that has at least one event
    fn session_ids(&self) -> Result<BTreeSet<String>, StoreError>;

    /// Append a batch, returning how many events were stored
    fn insert_batch(&self, events: Vec<TelemetryEvent>) -> Result<usize, StoreError> {
        let mut stored = 0;
        for event in events {
            self.insert(event)?;
            stored += 1;
        }
        Ok(stored)
    }
}

/// Storage of completed test attempts
pub trait TestAttemptStore: Send + Sync {
    /// Summary for a session, if the test was finished
    fn get(&self, session_id: &str) -> Result<Option<TestAttemptSummary>, StoreError>;

    /// All recorded attempts
    fn list_completed(&self) -> Result<Vec<TestAttemptSummary>, StoreError>;
}

/// Known candidate record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRecord {
    pub identity: String,
    pub last_name: String,
    pub first_name: String,
}

/// Lookup of candidate records by identity token
pub trait IdentityDirectory: Send + Sync {
    fn lookup(&self, identity: &str) -> Result<Option<IdentityRecord>, StoreError>;

    /// Resolve many identities at once; unknown tokens are absent from the map
    fn lookup_many(
        &self,
        identities: &BTreeSet<String>,
    ) -> Result<HashMap<String, IdentityRecord>, StoreError> {
        let mut found = HashMap::with_capacity(identities.len());
        for identity in identities {
            if let Some(record) = self.lookup(identity)? {
                found.insert(identity.clone(), record);
            }
        }
        Ok(found)
    }
}
