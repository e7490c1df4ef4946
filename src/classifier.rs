//! Anomaly classification of completed test attempts
//!
//! An attempt is suspicious when a high score, a fast completion and low
//! engagement with the matching study material all coincide. Missing policy
//! data or an anonymous attempt is not an error; the attempt is simply not
//! flagged.

use tracing::{debug, info};

use crate::budget::AnalysisBudget;
use crate::config::AnalysisConfig;
use crate::correlator::{CorrelationRequest, SessionCorrelator};
use crate::engagement::score_session;
use crate::error::ComputeError;
use crate::policy::{PolicyConfig, Thresholds};
use crate::store::{EventStore, TestAttemptStore};
use crate::types::{
    Classification, Engagement, StudyInfo, SuspiciousAttempt, TestAttemptSummary, TestResultInfo,
};

/// Classifies test attempts against a policy snapshot
pub struct AnomalyClassifier<'a> {
    events: &'a dyn EventStore,
    policy: &'a PolicyConfig,
    correlator: SessionCorrelator<'a>,
}

impl<'a> AnomalyClassifier<'a> {
    pub fn new(events: &'a dyn EventStore, policy: &'a PolicyConfig, config: &AnalysisConfig) -> Self {
        Self {
            events,
            policy,
            correlator: SessionCorrelator::new(events, config),
        }
    }

    /// Classify one attempt
    pub fn classify(&self, attempt: &TestAttemptSummary) -> Result<Classification, ComputeError> {
        let Some(study_page) = self.policy.study_page_for(&attempt.test_type) else {
            debug!(
                session_id = %attempt.session_id,
                test_type = %attempt.test_type,
                "no study page mapped, skipping"
            );
            return Ok(Classification::insufficient_signal());
        };

        let identity = attempt.identity.as_deref().filter(|s| !s.is_empty());
        let address = attempt.client_address.as_deref().filter(|s| !s.is_empty());
        if identity.is_none() && address.is_none() {
            debug!(session_id = %attempt.session_id, "anonymous attempt, skipping");
            return Ok(Classification::insufficient_signal());
        }

        let study = self.correlator.find_study_session(&CorrelationRequest {
            test_start: attempt.start_time,
            identity,
            client_address: address,
            study_page,
        })?;

        let engagement = match &study {
            Some(s) => score_session(self.events, &s.session_id)?,
            None => Engagement::default(),
        };

        let thresholds = self.policy.thresholds_for(&attempt.test_type);
        let suspicious = is_suspicious(attempt, engagement.engagement_score, thresholds);
        let reason = suspicious.then(|| reason_text(attempt, engagement.engagement_score));

        Ok(Classification {
            suspicious,
            reason,
            study_session_id: study.map(|s| s.session_id),
            engagement,
        })
    }

    /// Classify every recorded attempt and return the flagged ones
    pub fn suspicious_attempts(
        &self,
        attempts: &dyn TestAttemptStore,
        budget: &AnalysisBudget,
    ) -> Result<Vec<SuspiciousAttempt>, ComputeError> {
        let all = attempts.list_completed()?;
        let mut flagged = Vec::new();
        for attempt in &all {
            budget.check()?;
            let verdict = self.classify(attempt)?;
            if let Some(report) = to_report(attempt, verdict) {
                flagged.push(report);
            }
        }
        info!(
            attempts = all.len(),
            suspicious = flagged.len(),
            "behavior analysis finished"
        );
        Ok(flagged)
    }
}

/// High score, fast completion and low engagement, all at once
pub fn is_suspicious(attempt: &TestAttemptSummary, engagement_score: i64, t: &Thresholds) -> bool {
    attempt.score >= t.min_score
        && attempt.duration_seconds() < t.max_duration_seconds
        && engagement_score < t.min_engagement_score
}

fn reason_text(attempt: &TestAttemptSummary, engagement_score: i64) -> String {
    format!(
        "High score ({}%) with fast completion ({}s) and low study engagement (score: {})",
        attempt.score,
        attempt.duration_seconds() as i64,
        engagement_score
    )
}

fn to_report(attempt: &TestAttemptSummary, verdict: Classification) -> Option<SuspiciousAttempt> {
    if !verdict.suspicious {
        return None;
    }
    Some(SuspiciousAttempt {
        session_id: attempt.session_id.clone(),
        test_type: attempt.test_type.clone(),
        identity: attempt.identity.clone(),
        test_result: TestResultInfo {
            score: attempt.score,
            duration_seconds: attempt.duration_seconds() as i64,
        },
        study_info: StudyInfo {
            study_session_id: verdict.study_session_id,
            duration_seconds: verdict.engagement.duration_seconds,
            engagement_score: verdict.engagement.engagement_score,
        },
        reason: verdict.reason.unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EventKind;
    use crate::store::{InMemoryAttemptStore, InMemoryEventStore};
    use crate::test_support::{at, attempt, event, study_start, UnavailableEventStore};
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    /// Default-policy test type mapped to a study page
    fn policy() -> PolicyConfig {
        let mut policy = PolicyConfig::default();
        policy
            .study_pages
            .insert("default".to_string(), "study-1".to_string());
        policy
    }

    /// Study session for pid-1 worth exactly `minutes` engagement points
    fn study_worth(minutes: i64) -> InMemoryEventStore {
        InMemoryEventStore::with_events(vec![
            study_start("study-a", at(12, 0), Some("pid-1"), None, "study-1"),
            event(
                "study-a",
                at(12, 0) + Duration::minutes(minutes),
                EventKind::ModuleViewTime {
                    duration_sec: minutes as f64 * 60.0,
                },
            ),
        ])
    }

    fn classify(store: &InMemoryEventStore, a: &TestAttemptSummary) -> Classification {
        let policy = policy();
        AnomalyClassifier::new(store, &policy, &AnalysisConfig::default())
            .classify(a)
            .unwrap()
    }

    #[test]
    fn test_fast_high_score_low_engagement_is_suspicious() {
        let store = study_worth(10);
        let verdict = classify(&store, &attempt("t1", 95.0, 90));
        assert!(verdict.suspicious);
        assert_eq!(verdict.engagement.engagement_score, 10);
        assert_eq!(verdict.study_session_id.as_deref(), Some("study-a"));
        assert_eq!(
            verdict.reason.as_deref(),
            Some("High score (95%) with fast completion (90s) and low study engagement (score: 10)")
        );
    }

    #[test]
    fn test_sufficient_engagement_is_not_suspicious() {
        let store = study_worth(20);
        let verdict = classify(&store, &attempt("t1", 95.0, 90));
        assert!(!verdict.suspicious);
        assert_eq!(verdict.reason, None);
    }

    #[test]
    fn test_each_condition_is_required() {
        let store = study_worth(10);
        assert!(!classify(&store, &attempt("t1", 89.9, 90)).suspicious);
        assert!(!classify(&store, &attempt("t1", 95.0, 180)).suspicious);
    }

    #[test]
    fn test_no_study_session_means_zero_engagement() {
        let store = InMemoryEventStore::new();
        let verdict = classify(&store, &attempt("t1", 100.0, 60));
        assert!(verdict.suspicious);
        assert_eq!(verdict.study_session_id, None);
        assert_eq!(verdict.engagement, Engagement::default());
    }

    #[test]
    fn test_unmapped_test_type_is_never_suspicious() {
        let store = InMemoryEventStore::new();
        let mut a = attempt("t1", 100.0, 10);
        a.test_type = "UNMAPPED".to_string();
        assert_eq!(classify(&store, &a), Classification::insufficient_signal());
    }

    #[test]
    fn test_anonymous_attempt_is_never_suspicious() {
        let store = InMemoryEventStore::new();
        let mut a = attempt("t1", 100.0, 10);
        a.identity = None;
        a.client_address = Some(String::new());
        assert_eq!(classify(&store, &a), Classification::insufficient_signal());
    }

    #[test]
    fn test_per_type_thresholds_apply() {
        // INFOSEC_117 allows at most 120 s and expects engagement 10
        let store = InMemoryEventStore::with_events(vec![
            study_start("study-b", at(12, 0), Some("pid-1"), None, "study-117"),
            event(
                "study-b",
                at(12, 5),
                EventKind::ModuleViewTime { duration_sec: 600.0 },
            ),
        ]);
        let mut a = attempt("t1", 95.0, 100);
        a.test_type = "INFOSEC_117".to_string();
        assert!(!classify(&store, &a).suspicious);

        a.session_id = "t2".to_string();
        let fresh = InMemoryEventStore::new();
        assert!(classify(&fresh, &a).suspicious);
    }

    #[test]
    fn test_suspicious_attempts_report() {
        let events = study_worth(10);
        let attempts = InMemoryAttemptStore::with_attempts(vec![
            attempt("t1", 95.0, 90),
            attempt("t2", 50.0, 90),
        ])
        .unwrap();
        let policy = policy();
        let flagged = AnomalyClassifier::new(&events, &policy, &AnalysisConfig::default())
            .suspicious_attempts(&attempts, &AnalysisBudget::unbounded())
            .unwrap();

        assert_eq!(flagged.len(), 1);
        let report = &flagged[0];
        assert_eq!(report.session_id, "t1");
        assert_eq!(report.test_result.duration_seconds, 90);
        assert_eq!(report.study_info.engagement_score, 10);
        assert_eq!(report.study_info.duration_seconds, 600);
    }

    #[test]
    fn test_storage_failure_is_propagated() {
        let policy = policy();
        let err = AnomalyClassifier::new(&UnavailableEventStore, &policy, &AnalysisConfig::default())
            .classify(&attempt("t1", 95.0, 90))
            .unwrap_err();
        assert!(matches!(err, ComputeError::Storage(_)));
    }
}
