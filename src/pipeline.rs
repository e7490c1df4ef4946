//! Engine orchestration
//!
//! [`IntegrityEngine`] is the public entry point. It owns handles to the stores
//! and the policy source and exposes the three analyses (trajectory similarity,
//! suspicious attempts, abandoned sessions) plus telemetry ingestion.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::abandonment::AbandonmentReconciler;
use crate::budget::AnalysisBudget;
use crate::cache::TtlCache;
use crate::classifier::AnomalyClassifier;
use crate::config::{AnalysisConfig, CompletionPolicy};
use crate::error::ComputeError;
use crate::policy::PolicyProvider;
use crate::schema::{IngestOutcome, Rejection, TelemetryAdapter};
use crate::store::{EventStore, IdentityDirectory, TestAttemptStore};
use crate::trajectory::{compare_sessions, similarity_with, SessionTraces, SimilarityParams};
use crate::types::{
    AbandonedSession, AnalysisReport, Classification, FinishedResult, PointerSample, ProducerInfo,
    SimilarityMatrix, SuspiciousAttempt, TestAttemptSummary,
};
use crate::{ENGINE_VERSION, PRODUCER_NAME};

/// Result of loading telemetry into the event store
#[derive(Debug, Default)]
pub struct IngestSummary {
    pub stored: usize,
    pub rejected: Vec<Rejection>,
}

/// Behavioral-integrity analysis engine
///
/// All analyses are read-only and may run concurrently from several threads.
pub struct IntegrityEngine {
    events: Arc<dyn EventStore>,
    attempts: Arc<dyn TestAttemptStore>,
    directory: Option<Arc<dyn IdentityDirectory>>,
    policy: Arc<dyn PolicyProvider>,
    config: AnalysisConfig,
    abandoned_cache: Option<TtlCache<CompletionPolicy, Vec<AbandonedSession>>>,
}

impl IntegrityEngine {
    /// Create an engine; the configuration is validated up front
    pub fn new(
        events: Arc<dyn EventStore>,
        attempts: Arc<dyn TestAttemptStore>,
        policy: Arc<dyn PolicyProvider>,
        config: AnalysisConfig,
    ) -> Result<Self, ComputeError> {
        config.validate()?;
        Ok(Self {
            events,
            attempts,
            directory: None,
            policy,
            config,
            abandoned_cache: None,
        })
    }

    /// Resolve abandoned-session names through a candidate directory
    pub fn with_directory(mut self, directory: Arc<dyn IdentityDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Reuse abandoned-session listings for `ttl`
    pub fn with_abandoned_cache(mut self, ttl: Duration) -> Self {
        self.abandoned_cache = Some(TtlCache::new(ttl));
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Re-read the policy from its source
    pub fn reload_policy(&self) -> Result<(), ComputeError> {
        self.policy.reload()
    }

    /// Validate NDJSON telemetry and append the good records
    pub fn ingest_ndjson(&self, ndjson: &str) -> Result<IngestSummary, ComputeError> {
        self.store_outcome(TelemetryAdapter::ingest_ndjson(ndjson))
    }

    /// Validate a JSON array of telemetry and append the good records
    pub fn ingest_json(&self, json: &str) -> Result<IngestSummary, ComputeError> {
        self.store_outcome(TelemetryAdapter::ingest_array(json)?)
    }

    fn store_outcome(&self, outcome: IngestOutcome) -> Result<IngestSummary, ComputeError> {
        let stored = self.events.insert_batch(outcome.events)?;
        if let Some(cache) = &self.abandoned_cache {
            cache.clear();
        }
        Ok(IngestSummary {
            stored,
            rejected: outcome.rejected,
        })
    }

    /// Similarity of two pointer traces under the engine's stroke settings
    pub fn similarity(&self, a: &[PointerSample], b: &[PointerSample]) -> Result<f64, ComputeError> {
        similarity_with(
            a,
            b,
            &SimilarityParams::from(&self.config),
            &AnalysisBudget::unbounded(),
        )
    }

    /// Compare every pair of finished results on their shared questions
    pub fn pairwise_similarity(
        &self,
        results: &[FinishedResult],
        budget: &AnalysisBudget,
    ) -> Result<SimilarityMatrix, ComputeError> {
        let sessions: Vec<SessionTraces> = results.iter().map(SessionTraces::from).collect();
        compare_sessions(&sessions, &self.config, budget)
    }

    /// Classify a single attempt against the current policy
    pub fn classify(&self, attempt: &TestAttemptSummary) -> Result<Classification, ComputeError> {
        let policy = self.policy.current();
        AnomalyClassifier::new(self.events.as_ref(), &policy, &self.config).classify(attempt)
    }

    /// Completed attempts the classifier flags as suspicious
    pub fn suspicious_attempts(
        &self,
        budget: &AnalysisBudget,
    ) -> Result<Vec<SuspiciousAttempt>, ComputeError> {
        let policy = self.policy.current();
        AnomalyClassifier::new(self.events.as_ref(), &policy, &self.config)
            .suspicious_attempts(self.attempts.as_ref(), budget)
    }

    /// Sessions with telemetry but no completed result, newest first
    pub fn list_abandoned(
        &self,
        budget: &AnalysisBudget,
    ) -> Result<Vec<AbandonedSession>, ComputeError> {
        let compute = || {
            let mut reconciler = AbandonmentReconciler::new(
                self.events.as_ref(),
                self.attempts.as_ref(),
                &self.config,
            );
            if let Some(directory) = &self.directory {
                reconciler = reconciler.with_directory(directory.as_ref());
            }
            reconciler.list_abandoned(budget)
        };
        match &self.abandoned_cache {
            Some(cache) => cache.get_or_try_insert_with(self.config.completion_policy, compute),
            None => compute(),
        }
    }

    /// Wrap analysis output with producer metadata and a fresh run id
    pub fn report<T>(&self, data: T) -> AnalysisReport<T> {
        let report = AnalysisReport {
            producer: ProducerInfo {
                name: PRODUCER_NAME.to_string(),
                version: ENGINE_VERSION.to_string(),
                run_id: Uuid::new_v4().to_string(),
            },
            computed_at_utc: Utc::now(),
            data,
        };
        info!(run_id = %report.producer.run_id, "analysis report created");
        report
    }
}
