//! Per-test-type classification policy
//!
//! Thresholds and the test type → study page mapping are owned by the caller and
//! may change at runtime, so the classifier reads them through a [`PolicyProvider`]
//! on every call instead of holding a copy.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ComputeError;

/// Thresholds for one test type
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Scores at or above this are "high"
    pub min_score: f64,
    /// Tests shorter than this (seconds) are "fast"
    #[serde(alias = "max_test_duration_sec")]
    pub max_duration_seconds: f64,
    /// Engagement below this is "low"
    pub min_engagement_score: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_score: 90.0,
            max_duration_seconds: 180.0,
            min_engagement_score: 15,
        }
    }
}

/// Complete classification policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Fallback thresholds for test types without an explicit entry
    #[serde(default)]
    pub default: Thresholds,
    /// Thresholds keyed by test type
    #[serde(default)]
    pub thresholds: HashMap<String, Thresholds>,
    /// Study page a candidate is expected to visit before each test type
    #[serde(default)]
    pub study_pages: HashMap<String, String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        let mut thresholds = HashMap::new();
        thresholds.insert(
            "INFOSEC_117".to_string(),
            Thresholds {
                min_score: 90.0,
                max_duration_seconds: 120.0,
                min_engagement_score: 10,
            },
        );

        let mut study_pages = HashMap::new();
        study_pages.insert("INFOSEC_117".to_string(), "study-117".to_string());
        study_pages.insert("PD_152".to_string(), "studytest-152".to_string());

        Self {
            default: Thresholds::default(),
            thresholds,
            study_pages,
        }
    }
}

impl PolicyConfig {
    /// Thresholds for a test type, falling back to the default entry
    pub fn thresholds_for(&self, test_type: &str) -> &Thresholds {
        self.thresholds.get(test_type).unwrap_or(&self.default)
    }

    /// Required study page for a test type, if one is mapped
    pub fn study_page_for(&self, test_type: &str) -> Option<&str> {
        self.study_pages.get(test_type).map(String::as_str)
    }

    /// Parse a policy from TOML
    pub fn from_toml(content: &str) -> Result<Self, ComputeError> {
        let policy: PolicyConfig = toml::from_str(content)
            .map_err(|e| ComputeError::PolicyError(format!("invalid policy TOML: {}", e)))?;
        policy.validate()?;
        Ok(policy)
    }

    /// Load a policy from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ComputeError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ComputeError::PolicyError(format!("failed to read policy file {:?}: {}", path, e))
        })?;
        Self::from_toml(&content)
    }

    /// Check every threshold and page entry for consistency
    pub fn validate(&self) -> Result<(), ComputeError> {
        validate_thresholds("default", &self.default)?;
        for (test_type, thresholds) in &self.thresholds {
            validate_thresholds(test_type, thresholds)?;
        }
        for (test_type, page) in &self.study_pages {
            if page.trim().is_empty() {
                return Err(ComputeError::PolicyError(format!(
                    "study page for {} must not be empty",
                    test_type
                )));
            }
        }
        Ok(())
    }
}

fn validate_thresholds(name: &str, t: &Thresholds) -> Result<(), ComputeError> {
    if !(0.0..=100.0).contains(&t.min_score) {
        return Err(ComputeError::PolicyError(format!(
            "{}: min_score must be within 0-100",
            name
        )));
    }
    if !(t.max_duration_seconds.is_finite() && t.max_duration_seconds > 0.0) {
        return Err(ComputeError::PolicyError(format!(
            "{}: max_duration_seconds must be positive",
            name
        )));
    }
    if t.min_engagement_score < 0 {
        return Err(ComputeError::PolicyError(format!(
            "{}: min_engagement_score must not be negative",
            name
        )));
    }
    Ok(())
}

/// Source of the current policy
pub trait PolicyProvider: Send + Sync {
    /// Snapshot of the current policy
    fn current(&self) -> Arc<PolicyConfig>;

    /// Re-read the policy from its source
    fn reload(&self) -> Result<(), ComputeError>;
}

/// In-memory policy provider, replaced wholesale via [`StaticPolicyProvider::set`]
pub struct StaticPolicyProvider {
    policy: RwLock<Arc<PolicyConfig>>,
}

impl StaticPolicyProvider {
    pub fn new(policy: PolicyConfig) -> Self {
        Self {
            policy: RwLock::new(Arc::new(policy)),
        }
    }

    /// Replace the policy after validating it
    pub fn set(&self, policy: PolicyConfig) -> Result<(), ComputeError> {
        policy.validate()?;
        *self.policy.write() = Arc::new(policy);
        Ok(())
    }
}

impl Default for StaticPolicyProvider {
    fn default() -> Self {
        Self::new(PolicyConfig::default())
    }
}

impl PolicyProvider for StaticPolicyProvider {
    fn current(&self) -> Arc<PolicyConfig> {
        self.policy.read().clone()
    }

    fn reload(&self) -> Result<(), ComputeError> {
        Ok(())
    }
}

/// File-backed policy provider; `reload` swaps in the file's latest contents
pub struct FilePolicyProvider {
    path: PathBuf,
    policy: RwLock<Arc<PolicyConfig>>,
}

impl FilePolicyProvider {
    /// Load the initial policy from `path`
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ComputeError> {
        let path = path.into();
        let policy = PolicyConfig::load(&path)?;
        Ok(Self {
            path,
            policy: RwLock::new(Arc::new(policy)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PolicyProvider for FilePolicyProvider {
    fn current(&self) -> Arc<PolicyConfig> {
        self.policy.read().clone()
    }

    fn reload(&self) -> Result<(), ComputeError> {
        // A bad file leaves the previous policy in place.
        let policy = PolicyConfig::load(&self.path)?;
        *self.policy.write() = Arc::new(policy);
        info!(path = ?self.path, "policy reloaded");
        Ok(())
    }
}
