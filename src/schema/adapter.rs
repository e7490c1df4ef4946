//! Adapter for reading telemetry batches
//!
//! Strict parsers fail on the first unreadable record and are meant for
//! validation tooling. The `ingest_*` functions follow the batch posture of the
//! engine: a bad record is logged, reported and skipped, never fatal.

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ComputeError;
use crate::schema::event::TelemetryEvent;
use crate::schema::raw_event::{RawTelemetryEvent, ValidationError};

/// Adapter for converting raw telemetry to validated events
pub struct TelemetryAdapter;

/// A record that could not be ingested
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    /// Zero-based record index (line index for NDJSON input)
    pub index: usize,
    pub session_id: Option<String>,
    pub reason: String,
}

/// Result of a lenient ingestion pass
#[derive(Debug, Default)]
pub struct IngestOutcome {
    pub events: Vec<TelemetryEvent>,
    pub rejected: Vec<Rejection>,
}

impl TelemetryAdapter {
    /// Parse a JSON array of raw records
    pub fn parse_array(json: &str) -> Result<Vec<RawTelemetryEvent>, ComputeError> {
        let events: Vec<RawTelemetryEvent> = serde_json::from_str(json)?;
        Ok(events)
    }

    /// Parse NDJSON (newline-delimited JSON) raw records
    pub fn parse_ndjson(ndjson: &str) -> Result<Vec<RawTelemetryEvent>, ComputeError> {
        let mut events = Vec::new();
        for (line_num, line) in ndjson.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<RawTelemetryEvent>(trimmed) {
                Ok(event) => events.push(event),
                Err(e) => {
                    return Err(ComputeError::ParseError(format!(
                        "Failed to parse line {}: {}",
                        line_num + 1,
                        e
                    )));
                }
            }
        }
        Ok(events)
    }

    /// Leniently ingest NDJSON, skipping unreadable or invalid lines
    pub fn ingest_ndjson(ndjson: &str) -> IngestOutcome {
        let records = ndjson
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                let parsed = serde_json::from_str::<Value>(line.trim()).map_err(|e| e.to_string());
                (idx, parsed)
            });
        Self::ingest_values(records)
    }

    /// Leniently ingest a JSON array; only a non-array document is an error
    pub fn ingest_array(json: &str) -> Result<IngestOutcome, ComputeError> {
        let values: Vec<Value> = serde_json::from_str(json)?;
        Ok(Self::ingest_values(
            values.into_iter().enumerate().map(|(idx, v)| (idx, Ok(v))),
        ))
    }

    /// Validate a batch of raw records
    pub fn validate_events(events: &[RawTelemetryEvent]) -> Vec<ValidationResult> {
        events
            .iter()
            .enumerate()
            .map(|(idx, event)| ValidationResult {
                index: idx,
                session_id: Some(event.session_id.clone()),
                result: event.validate().err(),
            })
            .filter(|r| r.result.is_some())
            .collect()
    }

    fn ingest_values<I>(records: I) -> IngestOutcome
    where
        I: Iterator<Item = (usize, Result<Value, String>)>,
    {
        let mut outcome = IngestOutcome::default();
        for (index, value) in records {
            let value = match value {
                Ok(v) => v,
                Err(reason) => {
                    outcome.reject(index, None, reason);
                    continue;
                }
            };
            let session_hint = value
                .get("session_id")
                .or_else(|| value.get("sessionId"))
                .and_then(Value::as_str)
                .map(str::to_string);
            match serde_json::from_value::<RawTelemetryEvent>(value) {
                Ok(raw) => outcome.accept(index, raw),
                Err(e) => outcome.reject(index, session_hint, e.to_string()),
            }
        }
        outcome.log_summary();
        outcome
    }
}

impl IngestOutcome {
    fn accept(&mut self, index: usize, raw: RawTelemetryEvent) {
        let session_id = raw.session_id.clone();
        match TelemetryEvent::from_raw(raw) {
            Ok(event) => self.events.push(event),
            Err(e) => self.reject(index, Some(session_id), e.to_string()),
        }
    }

    fn reject(&mut self, index: usize, session_id: Option<String>, reason: String) {
        warn!(index, session_id = ?session_id, %reason, "skipping telemetry record");
        self.rejected.push(Rejection {
            index,
            session_id,
            reason,
        });
    }

    fn log_summary(&self) {
        debug!(
            accepted = self.events.len(),
            rejected = self.rejected.len(),
            "telemetry ingestion finished"
        );
    }
}

/// Result of event validation
#[derive(Debug)]
pub struct ValidationResult {
    pub index: usize,
    pub session_id: Option<String>,
    pub result: Option<ValidationError>,
}
