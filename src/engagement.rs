//! Engagement scoring for study sessions
//!
//! A study session earns one point per full minute of module view time, a
//! bonus for the deepest scroll milestone reached, and two points per
//! self-check answered.

use tracing::debug;

use crate::error::ComputeError;
use crate::schema::{EventKind, TelemetryEvent};
use crate::store::{EventQuery, EventStore};
use crate::types::Engagement;

/// Scroll depth (percent) that earns the full bonus
pub const DEEP_SCROLL_PCT: f64 = 95.0;
pub const DEEP_SCROLL_POINTS: i64 = 10;

/// Scroll depth (percent) that earns the partial bonus
pub const HALF_SCROLL_PCT: f64 = 50.0;
pub const HALF_SCROLL_POINTS: i64 = 5;

pub const SELF_CHECK_POINTS: i64 = 2;

const SECONDS_PER_POINT: f64 = 60.0;

/// Score an already-loaded set of events from one session
pub fn score_events(events: &[TelemetryEvent]) -> Engagement {
    let mut view_seconds = 0.0;
    let mut max_depth: Option<f64> = None;
    let mut self_checks: i64 = 0;

    for event in events {
        match &event.kind {
            EventKind::ModuleViewTime { duration_sec } => view_seconds += duration_sec,
            EventKind::ScrollDepthMilestone { depth_pct } => {
                max_depth = Some(max_depth.map_or(*depth_pct, |d| d.max(*depth_pct)));
            }
            EventKind::SelfCheckAnswered => self_checks += 1,
            _ => {}
        }
    }

    let mut score = (view_seconds / SECONDS_PER_POINT).floor() as i64;
    score += match max_depth {
        Some(d) if d >= DEEP_SCROLL_PCT => DEEP_SCROLL_POINTS,
        Some(d) if d >= HALF_SCROLL_PCT => HALF_SCROLL_POINTS,
        _ => 0,
    };
    score += self_checks * SELF_CHECK_POINTS;

    Engagement {
        engagement_score: score,
        duration_seconds: session_duration(events),
    }
}

/// Whole seconds between the first and last event; 0 with fewer than two
fn session_duration(events: &[TelemetryEvent]) -> i64 {
    if events.len() < 2 {
        return 0;
    }
    let first = events.iter().map(|e| e.timestamp).min();
    let last = events.iter().map(|e| e.timestamp).max();
    match (first, last) {
        (Some(first), Some(last)) => (last - first).num_seconds(),
        _ => 0,
    }
}

/// Load a study session from the store and score it
pub fn score_session(
    store: &dyn EventStore,
    study_session_id: &str,
) -> Result<Engagement, ComputeError> {
    let events = store.query(&EventQuery::new().session(study_session_id))?;
    let engagement = score_events(&events);
    debug!(
        session_id = study_session_id,
        events = events.len(),
        score = engagement.engagement_score,
        duration = engagement.duration_seconds,
        "scored study session"
    );
    Ok(engagement)
}
