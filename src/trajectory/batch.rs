//! Pairwise comparison of many sessions
//!
//! Every unordered pair of sessions is compared on each question both sessions
//! answered. The (pair × question) jobs run on a rayon pool.

use std::collections::BTreeMap;

use rayon::prelude::*;
use tracing::{debug, warn};

use super::similarity::{similarity_with, SimilarityParams};
use crate::budget::AnalysisBudget;
use crate::config::AnalysisConfig;
use crate::error::ComputeError;
use crate::types::{FinishedResult, PointerSample, PointerTrace, SimilarityMatrix};

/// Pointer traces of one session, keyed by question index
#[derive(Debug, Clone, Default)]
pub struct SessionTraces {
    pub session_id: String,
    pub traces: BTreeMap<usize, PointerTrace>,
}

impl SessionTraces {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            traces: BTreeMap::new(),
        }
    }
}

impl From<&FinishedResult> for SessionTraces {
    fn from(result: &FinishedResult) -> Self {
        Self {
            session_id: result.session_id.clone(),
            traces: result.traces(),
        }
    }
}

/// Key under which a pair appears in the similarity matrix
pub fn pair_key(a: &str, b: &str) -> String {
    format!("{}_vs_{}", a, b)
}

/// Round a similarity to one decimal
pub fn round_score(score: f64) -> f64 {
    (score * 10.0).round() / 10.0
}

struct Job<'a> {
    pair: usize,
    question: usize,
    a: &'a [PointerSample],
    b: &'a [PointerSample],
}

/// Compare every pair of sessions on their shared questions
///
/// Each pair is keyed `a_vs_b` with `a` listed before `b` in the input. The
/// matrix iterates in key order, not input order. Pairs with no shared
/// question map to an empty entry. Traces longer than `max_trace_samples` are
/// cut to that length.
pub fn compare_sessions(
    sessions: &[SessionTraces],
    config: &AnalysisConfig,
    budget: &AnalysisBudget,
) -> Result<SimilarityMatrix, ComputeError> {
    if sessions.len() < 2 {
        return Err(ComputeError::InsufficientInput(
            "need at least 2 sessions for comparison".to_string(),
        ));
    }

    let params = SimilarityParams::from(config);
    let cap = config.max_trace_samples;

    let mut pair_keys = Vec::new();
    let mut jobs = Vec::new();
    for (i, first) in sessions.iter().enumerate() {
        for second in &sessions[i + 1..] {
            let pair = pair_keys.len();
            pair_keys.push(pair_key(&first.session_id, &second.session_id));
            for (&question, trace_a) in &first.traces {
                if let Some(trace_b) = second.traces.get(&question) {
                    jobs.push(Job {
                        pair,
                        question,
                        a: capped(trace_a, cap, &first.session_id, question),
                        b: capped(trace_b, cap, &second.session_id, question),
                    });
                }
            }
        }
    }

    debug!(
        sessions = sessions.len(),
        pairs = pair_keys.len(),
        comparisons = jobs.len(),
        "comparing pointer trajectories"
    );

    let run = || {
        jobs.par_iter()
            .map(|job| {
                budget.check()?;
                let score = similarity_with(job.a, job.b, &params, budget)?;
                Ok((job.pair, job.question, round_score(score)))
            })
            .collect::<Result<Vec<_>, ComputeError>>()
    };

    let scores = if config.similarity_workers > 0 {
        rayon::ThreadPoolBuilder::new()
            .num_threads(config.similarity_workers)
            .build()
            .map_err(|e| ComputeError::ConfigError(format!("similarity worker pool: {}", e)))?
            .install(run)?
    } else {
        run()?
    };

    let mut matrix: SimilarityMatrix = pair_keys
        .iter()
        .map(|key| (key.clone(), BTreeMap::new()))
        .collect();
    for (pair, question, score) in scores {
        if let Some(row) = matrix.get_mut(&pair_keys[pair]) {
            row.insert(question, score);
        }
    }
    Ok(matrix)
}

fn capped<'a>(
    trace: &'a PointerTrace,
    cap: usize,
    session_id: &str,
    question: usize,
) -> &'a [PointerSample] {
    if trace.len() > cap {
        warn!(
            session_id,
            question,
            samples = trace.len(),
            cap,
            "pointer trace truncated"
        );
        &trace[..cap]
    } else {
        trace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn line(n: usize, slope: f64) -> PointerTrace {
        (0..n)
            .map(|i| PointerSample::new(i as f64 * 10.0, i as f64 * slope, i as f64 * 16.0))
            .collect()
    }

    fn session(id: &str, questions: &[(usize, PointerTrace)]) -> SessionTraces {
        SessionTraces {
            session_id: id.to_string(),
            traces: questions.iter().cloned().collect(),
        }
    }

    #[test]
    fn test_requires_two_sessions() {
        let only = vec![session("a", &[(0, line(20, 1.0))])];
        let err = compare_sessions(&only, &AnalysisConfig::default(), &AnalysisBudget::unbounded())
            .unwrap_err();
        assert!(matches!(err, ComputeError::InsufficientInput(_)));
    }

    #[test]
    fn test_pair_keys_follow_input_but_iterate_sorted() {
        let sessions = vec![
            session("zeta", &[(0, line(20, 1.0))]),
            session("alpha", &[(0, line(20, 1.0))]),
            session("mid", &[(0, line(20, 1.0))]),
        ];
        let matrix =
            compare_sessions(&sessions, &AnalysisConfig::default(), &AnalysisBudget::unbounded())
                .unwrap();

        let keys: Vec<&str> = matrix.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["alpha_vs_mid", "zeta_vs_alpha", "zeta_vs_mid"]);
    }

    #[test]
    fn test_matrix_covers_shared_questions_only() {
        let sessions = vec![
            session("a", &[(0, line(20, 1.0)), (1, line(20, 2.0))]),
            session("b", &[(0, line(20, 1.0)), (2, line(20, 2.0))]),
            session("c", &[]),
        ];
        let matrix =
            compare_sessions(&sessions, &AnalysisConfig::default(), &AnalysisBudget::unbounded())
                .unwrap();

        let keys: Vec<&str> = matrix.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["a_vs_b", "a_vs_c", "b_vs_c"]);
        assert_eq!(matrix["a_vs_b"].len(), 1);
        assert_eq!(matrix["a_vs_b"][&0], 100.0);
        assert!(matrix["a_vs_c"].is_empty());
    }

    #[test]
    fn test_dedicated_worker_pool() {
        let sessions = vec![
            session("a", &[(0, line(20, 1.0))]),
            session("b", &[(0, line(20, 3.0))]),
        ];
        let config = AnalysisConfig {
            similarity_workers: 2,
            ..AnalysisConfig::default()
        };
        let matrix = compare_sessions(&sessions, &config, &AnalysisBudget::unbounded()).unwrap();
        let score = matrix["a_vs_b"][&0];
        assert!((0.0..=100.0).contains(&score));
        assert_eq!(score, round_score(score));
    }

    #[test]
    fn test_cancelled_budget_fails_batch() {
        let sessions = vec![
            session("a", &[(0, line(20, 1.0))]),
            session("b", &[(0, line(20, 1.0))]),
        ];
        let budget = AnalysisBudget::unbounded();
        budget.cancel();
        let err = compare_sessions(&sessions, &AnalysisConfig::default(), &budget).unwrap_err();
        assert!(matches!(err, ComputeError::Cancelled));
    }

    #[test]
    fn test_round_score() {
        assert_eq!(round_score(87.26), 87.3);
        assert_eq!(round_score(0.04), 0.0);
    }
}
