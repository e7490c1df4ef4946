//! Abandonment reconciliation
//!
//! Sessions that produced telemetry but never a completed result. Each one is
//! summarized with its start time, violation counters and the best identity we
//! can reconstruct for it.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::budget::AnalysisBudget;
use crate::config::{AnalysisConfig, CompletionPolicy};
use crate::error::ComputeError;
use crate::schema::{EventKind, TelemetryEvent};
use crate::store::{EventQuery, EventStore, IdentityDirectory, IdentityRecord, TestAttemptStore};
use crate::types::{
    AbandonedSession, IdentityInfo, IdentitySource, SessionType, TestAttemptSummary,
    ViolationCounts,
};

/// Lists sessions without a completed result
pub struct AbandonmentReconciler<'a> {
    events: &'a dyn EventStore,
    attempts: &'a dyn TestAttemptStore,
    directory: Option<&'a dyn IdentityDirectory>,
    config: &'a AnalysisConfig,
}

/// Per-session facts gathered before identity resolution
struct SessionScan {
    session_id: String,
    start_time: chrono::DateTime<chrono::Utc>,
    session_type: SessionType,
    first_start: Option<TelemetryEvent>,
    violations: ViolationCounts,
}

impl<'a> AbandonmentReconciler<'a> {
    pub fn new(
        events: &'a dyn EventStore,
        attempts: &'a dyn TestAttemptStore,
        config: &'a AnalysisConfig,
    ) -> Self {
        Self {
            events,
            attempts,
            directory: None,
            config,
        }
    }

    /// Resolve names through a directory of known candidates
    pub fn with_directory(mut self, directory: &'a dyn IdentityDirectory) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Session ids that count as completed under the configured policy
    pub fn completed_ids(&self) -> Result<HashSet<String>, ComputeError> {
        let attempts = self.attempts.list_completed()?;
        Ok(attempts
            .into_iter()
            .filter(|a| is_completed(a, self.config))
            .map(|a| a.session_id)
            .collect())
    }

    /// Abandoned sessions, most recently started first
    pub fn list_abandoned(&self, budget: &AnalysisBudget) -> Result<Vec<AbandonedSession>, ComputeError> {
        let completed = self.completed_ids()?;
        let candidates: Vec<String> = self
            .events
            .session_ids()?
            .into_iter()
            .filter(|id| !completed.contains(id))
            .collect();

        let mut scans = Vec::with_capacity(candidates.len());
        for session_id in candidates {
            budget.check()?;
            let events = self.events.query(&EventQuery::new().session(session_id.as_str()))?;
            if let Some(scan) = scan_session(session_id, events) {
                scans.push(scan);
            }
        }

        let identities: BTreeSet<String> = scans
            .iter()
            .filter_map(|s| s.first_start.as_ref())
            .filter_map(|e| e.persistent_id.clone())
            .collect();
        let known = match self.directory {
            Some(directory) if !identities.is_empty() => {
                directory.lookup_many(&identities).unwrap_or_else(|e| {
                    warn!(error = %e, "identity directory lookup failed, using event log names");
                    HashMap::new()
                })
            }
            _ => HashMap::new(),
        };
        debug!(
            identities = identities.len(),
            resolved = known.len(),
            "resolved abandoned session identities"
        );

        let mut sessions: Vec<AbandonedSession> = scans
            .into_iter()
            .map(|scan| {
                let identity_info =
                    identity_info(scan.first_start.as_ref(), &known, self.config.identity_token_chars);
                AbandonedSession {
                    client_address: scan.first_start.as_ref().and_then(client_address),
                    session_id: scan.session_id,
                    session_type: scan.session_type,
                    start_time: scan.start_time,
                    identity_info,
                    violation_counts: scan.violations,
                }
            })
            .collect();

        sessions.sort_by(|a, b| {
            b.start_time
                .cmp(&a.start_time)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });

        info!(
            completed = completed.len(),
            abandoned = sessions.len(),
            "abandonment reconciliation finished"
        );
        Ok(sessions)
    }
}

/// Whether a recorded attempt closes its session
pub fn is_completed(attempt: &TestAttemptSummary, config: &AnalysisConfig) -> bool {
    match config.completion_policy {
        CompletionPolicy::AnyRecordedScore => true,
        CompletionPolicy::PassingScoreOnly => attempt.score >= config.passing_score,
    }
}

/// Events arrive time-ordered from the store
fn scan_session(session_id: String, events: Vec<TelemetryEvent>) -> Option<SessionScan> {
    let start_time = events.iter().map(|e| e.timestamp).min()?;
    let mut violations = ViolationCounts::default();
    let mut first_start = None;

    for event in events {
        match event.kind {
            EventKind::FocusLoss => violations.focus_loss += 1,
            EventKind::ScreenshotAttempt => violations.screenshots += 1,
            EventKind::PrintAttempt => violations.prints += 1,
            _ => {}
        }
        if first_start.is_none() && event.kind.start_details().is_some() {
            first_start = Some(event);
        }
    }

    let session_type = match first_start.as_ref().map(|e| &e.kind) {
        Some(EventKind::TestStarted(_)) => SessionType::Test,
        Some(EventKind::StudyStarted(_)) => SessionType::Study,
        _ => SessionType::Unknown,
    };

    Some(SessionScan {
        session_id,
        start_time,
        session_type,
        first_start,
        violations,
    })
}

/// Address column first, then the address echoed in the start payload
fn client_address(start: &TelemetryEvent) -> Option<String> {
    start.client_ip.clone().or_else(|| {
        start
            .kind
            .start_details()
            .and_then(|d| d.ip.clone())
    })
}

/// Directory record, then event-log details, then a truncated identity token
fn identity_info(
    start: Option<&TelemetryEvent>,
    known: &HashMap<String, IdentityRecord>,
    token_chars: usize,
) -> IdentityInfo {
    let Some(start) = start else {
        return IdentityInfo::unknown();
    };

    if let Some(record) = start.persistent_id.as_ref().and_then(|id| known.get(id)) {
        return IdentityInfo {
            last_name: record.last_name.clone(),
            first_name: record.first_name.clone(),
            source: IdentitySource::Directory,
        };
    }

    let user_info = start
        .kind
        .start_details()
        .and_then(|d| d.user_info.as_ref())
        .filter(|u| u.has_name());
    if let Some(user) = user_info {
        return IdentityInfo {
            last_name: user.last_name.clone().unwrap_or_default(),
            first_name: user
                .first_name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| "N/A".to_string()),
            source: IdentitySource::EventLog,
        };
    }

    if let Some(token) = start.persistent_id.as_deref() {
        let prefix: String = token.chars().take(token_chars).collect();
        return IdentityInfo {
            last_name: "N/A".to_string(),
            first_name: format!("ID: {}...", prefix),
            source: IdentitySource::IdentityToken,
        };
    }

    IdentityInfo::unknown()
}
