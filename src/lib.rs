//! Proctor Analytics - behavioral-integrity analysis for proctored tests
//!
//! Turns proctoring telemetry into integrity signals: engagement with study
//! material before a test, statistically suspicious test attempts, sessions
//! that were started but never finished, and pairwise similarity between
//! candidates' pointer-movement traces.
//!
//! ## Modules
//!
//! - **Schema**: telemetry wire format, boundary validation and typed events
//! - **Store**: event, attempt and identity storage seams
//! - **Analyses**: trajectory similarity, engagement, correlation,
//!   classification and abandonment reconciliation
//! - **Pipeline**: the [`IntegrityEngine`] facade

pub mod abandonment;
pub mod budget;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod correlator;
pub mod engagement;
pub mod error;
pub mod pipeline;
pub mod policy;
pub mod schema;
pub mod store;
pub mod trajectory;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use budget::AnalysisBudget;
pub use config::{AnalysisConfig, CompletionPolicy};
pub use error::ComputeError;
pub use pipeline::{IngestSummary, IntegrityEngine};
pub use policy::{FilePolicyProvider, PolicyConfig, PolicyProvider, StaticPolicyProvider, Thresholds};

// Schema exports
pub use schema::{RawTelemetryEvent, TelemetryAdapter, TelemetryEvent, SCHEMA_VERSION};

// Analysis exports
pub use trajectory::{compare_sessions, similarity};

/// Engine version embedded in every report
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for reports
pub const PRODUCER_NAME: &str = "proctor-analytics";
