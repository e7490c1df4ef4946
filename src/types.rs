//! Core data types for the integrity analysis engine
//!
//! Inputs (test attempt summaries, finished-result payloads, pointer traces) and
//! the plain report structures returned to callers. Report types serialize with
//! camelCase keys, matching what the dashboard consumes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One completed, scored test attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestAttemptSummary {
    pub session_id: String,
    /// Stable identity of the candidate, if known
    #[serde(default, alias = "persistentId")]
    pub identity: Option<String>,
    /// Address the result was submitted from
    #[serde(default, alias = "clientIp")]
    pub client_address: Option<String>,
    pub test_type: String,
    /// Percentage score, 0-100
    pub score: f64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl TestAttemptSummary {
    /// Wall-clock duration of the attempt in seconds
    pub fn duration_seconds(&self) -> f64 {
        (self.end_time - self.start_time).num_milliseconds() as f64 / 1000.0
    }
}

/// Single pointer sample: position in pixels and elapsed milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointerSample {
    pub x: f64,
    pub y: f64,
    pub t_ms: f64,
}

impl PointerSample {
    pub fn new(x: f64, y: f64, t_ms: f64) -> Self {
        Self { x, y, t_ms }
    }

    /// Decode a `[x, y, t]` triple; anything else is rejected
    pub fn from_value(value: &Value) -> Option<Self> {
        let items = value.as_array()?;
        if items.len() < 3 {
            return None;
        }
        let x = items[0].as_f64()?;
        let y = items[1].as_f64()?;
        let t = items[2].as_f64()?;
        if !(x.is_finite() && y.is_finite() && t.is_finite()) {
            return None;
        }
        Some(Self::new(x, y, t))
    }
}

/// Ordered pointer samples captured while answering one question
pub type PointerTrace = Vec<PointerSample>;

/// Per-question behavioral metrics inside a finished result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionMetrics {
    #[serde(default)]
    pub mouse_movements: Vec<Value>,
}

/// Behavioral metrics section of a finished result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehavioralMetrics {
    #[serde(default)]
    pub per_question: Vec<QuestionMetrics>,
}

/// Finished-result payload, reduced to what trajectory analysis reads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishedResult {
    pub session_id: String,
    #[serde(default)]
    pub behavioral_metrics: BehavioralMetrics,
}

impl FinishedResult {
    /// Pointer traces keyed by question index
    ///
    /// Questions without movement data are omitted; malformed samples are dropped.
    pub fn traces(&self) -> BTreeMap<usize, PointerTrace> {
        self.behavioral_metrics
            .per_question
            .iter()
            .enumerate()
            .filter_map(|(idx, q)| {
                let trace: PointerTrace = q
                    .mouse_movements
                    .iter()
                    .filter_map(PointerSample::from_value)
                    .collect();
                (!trace.is_empty()).then_some((idx, trace))
            })
            .collect()
    }
}

/// Engagement measured for one study session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Engagement {
    pub engagement_score: i64,
    pub duration_seconds: i64,
}

/// Verdict of the anomaly classifier for one attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub suspicious: bool,
    pub reason: Option<String>,
    /// Study session the attempt was correlated with
    pub study_session_id: Option<String>,
    pub engagement: Engagement,
}

impl Classification {
    /// Not suspicious because the policy or identity data cannot support a verdict
    pub fn insufficient_signal() -> Self {
        Self {
            suspicious: false,
            reason: None,
            study_session_id: None,
            engagement: Engagement::default(),
        }
    }
}

/// Test figures shown for a suspicious attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResultInfo {
    pub score: f64,
    pub duration_seconds: i64,
}

/// Study figures shown for a suspicious attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyInfo {
    pub study_session_id: Option<String>,
    pub duration_seconds: i64,
    pub engagement_score: i64,
}

/// A test attempt flagged as suspicious
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspiciousAttempt {
    pub session_id: String,
    pub test_type: String,
    pub identity: Option<String>,
    pub test_result: TestResultInfo,
    pub study_info: StudyInfo,
    pub reason: String,
}

/// Kind of session inferred from its first start event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionType {
    Test,
    Study,
    Unknown,
}

/// Where a displayed identity came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    /// Known identity record
    Directory,
    /// Candidate details embedded in the first start event
    EventLog,
    /// Truncated identity token
    IdentityToken,
    Unknown,
}

/// Display identity for a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityInfo {
    pub last_name: String,
    pub first_name: String,
    pub source: IdentitySource,
}

impl IdentityInfo {
    pub fn unknown() -> Self {
        Self {
            last_name: "N/A".to_string(),
            first_name: "N/A".to_string(),
            source: IdentitySource::Unknown,
        }
    }
}

/// Proctoring violation counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationCounts {
    pub focus_loss: u32,
    pub screenshots: u32,
    pub prints: u32,
}

/// A session with telemetry but no completed result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbandonedSession {
    pub session_id: String,
    pub session_type: SessionType,
    pub start_time: DateTime<Utc>,
    pub identity_info: IdentityInfo,
    pub client_address: Option<String>,
    pub violation_counts: ViolationCounts,
}

/// Pair key (`"{a}_vs_{b}"`) → question index → similarity (0-100, one decimal)
pub type SimilarityMatrix = BTreeMap<String, BTreeMap<usize, f64>>;

/// Producer metadata attached to every report
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerInfo {
    pub name: String,
    pub version: String,
    /// Unique id of this analysis run
    pub run_id: String,
}

/// Envelope around the result of one analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport<T> {
    pub producer: ProducerInfo,
    pub computed_at_utc: DateTime<Utc>,
    pub data: T,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_attempt_duration() {
        let attempt = TestAttemptSummary {
            session_id: "t1".to_string(),
            identity: None,
            client_address: None,
            test_type: "default".to_string(),
            score: 95.0,
            start_time: Utc.with_ymd_and_hms(2024, 1, 15, 14, 0, 0).unwrap(),
            end_time: Utc.with_ymd_and_hms(2024, 1, 15, 14, 1, 30).unwrap(),
        };
        assert_eq!(attempt.duration_seconds(), 90.0);
    }

    #[test]
    fn test_attempt_deserialization_aliases() {
        let json = r#"{
            "sessionId": "t1",
            "persistentId": "pid",
            "clientIp": "10.0.0.2",
            "testType": "PD_152",
            "score": 88,
            "startTime": "2024-01-15T14:00:00Z",
            "endTime": "2024-01-15T14:05:00Z"
        }"#;
        let attempt: TestAttemptSummary = serde_json::from_str(json).unwrap();
        assert_eq!(attempt.identity.as_deref(), Some("pid"));
        assert_eq!(attempt.client_address.as_deref(), Some("10.0.0.2"));
        assert_eq!(attempt.score, 88.0);
    }

    #[test]
    fn test_pointer_sample_from_value() {
        assert_eq!(
            PointerSample::from_value(&json!([10, 20.5, 300])),
            Some(PointerSample::new(10.0, 20.5, 300.0))
        );
        assert_eq!(PointerSample::from_value(&json!([10, 20])), None);
        assert_eq!(PointerSample::from_value(&json!(["a", 1, 2])), None);
        assert_eq!(PointerSample::from_value(&json!({"x": 1})), None);
    }

    #[test]
    fn test_finished_result_traces() {
        let result: FinishedResult = serde_json::from_value(json!({
            "sessionId": "s1",
            "behavioralMetrics": {
                "perQuestion": [
                    {"mouseMovements": [[0, 0, 0], [1, 1, 16], "junk"]},
                    {"latency": 1200},
                    {"mouseMovements": [[5, 5, 0]]}
                ]
            }
        }))
        .unwrap();

        let traces = result.traces();
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[&0].len(), 2);
        assert!(!traces.contains_key(&1));
        assert_eq!(traces[&2][0], PointerSample::new(5.0, 5.0, 0.0));
    }

    #[test]
    fn test_violation_counts_json_keys() {
        let counts = ViolationCounts {
            focus_loss: 3,
            screenshots: 1,
            prints: 0,
        };
        let value = serde_json::to_value(counts).unwrap();
        assert_eq!(value["focusLoss"], 3);
        assert_eq!(value["screenshots"], 1);
    }

    #[test]
    fn test_session_type_serialization() {
        assert_eq!(serde_json::to_string(&SessionType::Study).unwrap(), "\"study\"");
    }
}
