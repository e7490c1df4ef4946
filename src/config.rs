//! Analysis configuration
//!
//! Tunable constants for the heuristics. Everything here is approximate by nature
//! (pause detection, correlation windows), so none of it is hard-coded in the
//! algorithms themselves.

use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::ComputeError;

/// Default gap between pointer samples that ends a stroke (seconds)
pub const DEFAULT_PAUSE_THRESHOLD_SEC: f64 = 0.25;

/// Default minimum number of points a stroke needs to be comparable
pub const DEFAULT_MIN_STROKE_POINTS: usize = 10;

/// Default lookback window for address-based correlation (hours)
pub const DEFAULT_LOOKBACK_HOURS: i64 = 24;

/// Default passing score (percent)
pub const DEFAULT_PASSING_SCORE: f64 = 80.0;

/// Default number of identity characters shown in reports
pub const DEFAULT_IDENTITY_TOKEN_CHARS: usize = 8;

/// Default cap on samples per trace accepted by the batch comparator
pub const DEFAULT_MAX_TRACE_SAMPLES: usize = 5_000;

/// Which test attempts count as "completed" when reconciling abandoned sessions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPolicy {
    /// Any recorded attempt summary completes the session
    #[default]
    AnyRecordedScore,
    /// Only attempts at or above the passing score complete the session
    PassingScoreOnly,
}

/// Configuration shared by all analysis components
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Inter-sample gap (seconds) that terminates stroke extraction
    pub pause_threshold_sec: f64,
    /// Minimum stroke length for a meaningful comparison
    pub min_stroke_points: usize,
    /// Lookback window for address-keyed correlation (hours)
    pub lookback_hours: i64,
    /// Passing score, used by [`CompletionPolicy::PassingScoreOnly`]
    pub passing_score: f64,
    /// Completion semantics for the abandonment reconciler
    pub completion_policy: CompletionPolicy,
    /// Characters of the identity token shown when no better identity exists
    pub identity_token_chars: usize,
    /// Longest trace the batch comparator accepts; longer traces are truncated
    pub max_trace_samples: usize,
    /// Worker threads for pairwise comparison (0 = one per core)
    pub similarity_workers: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            pause_threshold_sec: DEFAULT_PAUSE_THRESHOLD_SEC,
            min_stroke_points: DEFAULT_MIN_STROKE_POINTS,
            lookback_hours: DEFAULT_LOOKBACK_HOURS,
            passing_score: DEFAULT_PASSING_SCORE,
            completion_policy: CompletionPolicy::default(),
            identity_token_chars: DEFAULT_IDENTITY_TOKEN_CHARS,
            max_trace_samples: DEFAULT_MAX_TRACE_SAMPLES,
            similarity_workers: 0,
        }
    }
}

impl AnalysisConfig {
    /// Lookback window as a chrono duration
    pub fn lookback(&self) -> Duration {
        Duration::hours(self.lookback_hours)
    }

    /// Pause threshold in milliseconds, matching trace sample units
    pub fn pause_threshold_ms(&self) -> f64 {
        self.pause_threshold_sec * 1000.0
    }

    /// Parse configuration from TOML; missing keys take their defaults
    pub fn from_toml(content: &str) -> Result<Self, ComputeError> {
        let config: AnalysisConfig = toml::from_str(content)
            .map_err(|e| ComputeError::ConfigError(format!("invalid config TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ComputeError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ComputeError::ConfigError(format!("failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml(&content)
    }

    /// Reject values the algorithms cannot work with
    pub fn validate(&self) -> Result<(), ComputeError> {
        if !(self.pause_threshold_sec.is_finite() && self.pause_threshold_sec > 0.0) {
            return Err(ComputeError::ConfigError(
                "pause_threshold_sec must be a positive number".to_string(),
            ));
        }
        if self.min_stroke_points < 2 {
            return Err(ComputeError::ConfigError(
                "min_stroke_points must be at least 2".to_string(),
            ));
        }
        if self.lookback_hours <= 0 {
            return Err(ComputeError::ConfigError(
                "lookback_hours must be positive".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.passing_score) {
            return Err(ComputeError::ConfigError(
                "passing_score must be within 0-100".to_string(),
            ));
        }
        if self.max_trace_samples < self.min_stroke_points {
            return Err(ComputeError::ConfigError(
                "max_trace_samples must not be below min_stroke_points".to_string(),
            ));
        }
        Ok(())
    }
}
