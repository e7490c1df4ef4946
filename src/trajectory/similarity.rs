//! Three-factor trajectory similarity
//!
//! Compares the initial strokes of two pointer traces by shape (DTW over
//! box-normalized points), bounding-box scale and centroid position. High
//! scores are stretched so near-identical input stands out.

use serde::{Deserialize, Serialize};

use super::dtw::{dtw_distance, Point};
use super::stroke::extract_stroke;
use crate::budget::AnalysisBudget;
use crate::config::{AnalysisConfig, DEFAULT_MIN_STROKE_POINTS, DEFAULT_PAUSE_THRESHOLD_SEC};
use crate::error::ComputeError;
use crate::types::PointerSample;

pub const SHAPE_WEIGHT: f64 = 0.60;
pub const SCALE_WEIGHT: f64 = 0.25;
pub const POSITION_WEIGHT: f64 = 0.15;

/// Side of the box strokes are normalized into before DTW
pub const NORMALIZED_BOX_PX: f64 = 1000.0;

/// Bounding-box size difference at which scale similarity reaches zero
pub const SCALE_TOLERANCE_PX: f64 = 500.0;

/// Centroid distance at which position similarity reaches zero
pub const MAX_DISTANCE_THRESHOLD_PX: f64 = 1000.0;

/// Combined scores above this are contrast-stretched
pub const CONTRAST_KNEE: f64 = 80.0;
const CONTRAST_GAIN: f64 = 1.5;

/// Stroke parameters for a comparison
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityParams {
    pub pause_threshold_ms: f64,
    pub min_stroke_points: usize,
}

impl Default for SimilarityParams {
    fn default() -> Self {
        Self {
            pause_threshold_ms: DEFAULT_PAUSE_THRESHOLD_SEC * 1000.0,
            min_stroke_points: DEFAULT_MIN_STROKE_POINTS,
        }
    }
}

impl From<&AnalysisConfig> for SimilarityParams {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            pause_threshold_ms: config.pause_threshold_ms(),
            min_stroke_points: config.min_stroke_points,
        }
    }
}

/// Per-factor scores of one comparison, each 0-100
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityBreakdown {
    pub shape: f64,
    pub scale: f64,
    pub position: f64,
    /// Weighted, contrast-stretched and clamped result
    pub combined: f64,
}

/// Similarity of two traces with default parameters, 0-100
///
/// Returns 0 when either trace has fewer than two samples or either stroke is
/// shorter than the minimum.
pub fn similarity(a: &[PointerSample], b: &[PointerSample]) -> f64 {
    // An unbounded budget is never cancelled
    compare(a, b, &SimilarityParams::default(), &AnalysisBudget::unbounded())
        .map(|r| r.map_or(0.0, |s| s.combined))
        .unwrap_or(0.0)
}

/// Similarity of two traces, 0-100, honoring the budget
pub fn similarity_with(
    a: &[PointerSample],
    b: &[PointerSample],
    params: &SimilarityParams,
    budget: &AnalysisBudget,
) -> Result<f64, ComputeError> {
    Ok(compare(a, b, params, budget)?.map_or(0.0, |s| s.combined))
}

/// Full comparison; `None` when the strokes carry too little signal
pub fn compare(
    a: &[PointerSample],
    b: &[PointerSample],
    params: &SimilarityParams,
    budget: &AnalysisBudget,
) -> Result<Option<SimilarityBreakdown>, ComputeError> {
    if a.len() < 2 || b.len() < 2 {
        return Ok(None);
    }
    let stroke_a = extract_stroke(a, params.pause_threshold_ms);
    let stroke_b = extract_stroke(b, params.pause_threshold_ms);
    if stroke_a.len() < params.min_stroke_points || stroke_b.len() < params.min_stroke_points {
        return Ok(None);
    }

    let pa: Vec<Point> = stroke_a.iter().map(|s| (s.x, s.y)).collect();
    let pb: Vec<Point> = stroke_b.iter().map(|s| (s.x, s.y)).collect();

    let shape = shape_similarity(&pa, &pb, budget)?;
    let scale = scale_similarity(&pa, &pb);
    let position = position_similarity(&pa, &pb);

    let mut combined = shape * SHAPE_WEIGHT + scale * SCALE_WEIGHT + position * POSITION_WEIGHT;
    if combined > CONTRAST_KNEE {
        combined = CONTRAST_KNEE + (combined - CONTRAST_KNEE) * CONTRAST_GAIN;
    }

    Ok(Some(SimilarityBreakdown {
        shape,
        scale,
        position,
        combined: combined.clamp(0.0, 100.0),
    }))
}

struct Bounds {
    min: Point,
    max: Point,
}

impl Bounds {
    fn of(points: &[Point]) -> Self {
        let init = Bounds {
            min: (f64::INFINITY, f64::INFINITY),
            max: (f64::NEG_INFINITY, f64::NEG_INFINITY),
        };
        points.iter().fold(init, |b, &(x, y)| Bounds {
            min: (b.min.0.min(x), b.min.1.min(y)),
            max: (b.max.0.max(x), b.max.1.max(y)),
        })
    }

    fn size(&self) -> Point {
        (self.max.0 - self.min.0, self.max.1 - self.min.1)
    }
}

fn normalize(points: &[Point]) -> Vec<Point> {
    let bounds = Bounds::of(points);
    let (w, h) = bounds.size();
    let w = if w == 0.0 { 1.0 } else { w };
    let h = if h == 0.0 { 1.0 } else { h };
    points
        .iter()
        .map(|&(x, y)| {
            (
                NORMALIZED_BOX_PX * (x - bounds.min.0) / w,
                NORMALIZED_BOX_PX * (y - bounds.min.1) / h,
            )
        })
        .collect()
}

fn shape_similarity(a: &[Point], b: &[Point], budget: &AnalysisBudget) -> Result<f64, ComputeError> {
    let distance = dtw_distance(&normalize(a), &normalize(b), budget)?;
    let max_dist = NORMALIZED_BOX_PX * std::f64::consts::SQRT_2 * a.len().max(b.len()) as f64;
    let normalized = if max_dist > 0.0 { distance / max_dist } else { 1.0 };
    Ok(((1.0 - normalized) * 100.0).clamp(0.0, 100.0))
}

fn scale_similarity(a: &[Point], b: &[Point]) -> f64 {
    let (wa, ha) = Bounds::of(a).size();
    let (wb, hb) = Bounds::of(b).size();
    let width = (1.0 - (wa - wb).abs() / SCALE_TOLERANCE_PX).max(0.0);
    let height = (1.0 - (ha - hb).abs() / SCALE_TOLERANCE_PX).max(0.0);
    (width + height) / 2.0 * 100.0
}

fn centroid(points: &[Point]) -> Point {
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), &(x, y)| (sx + x, sy + y));
    (sx / n, sy / n)
}

fn position_similarity(a: &[Point], b: &[Point]) -> f64 {
    let (ax, ay) = centroid(a);
    let (bx, by) = centroid(b);
    let distance = ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt();
    (1.0 - distance / MAX_DISTANCE_THRESHOLD_PX).max(0.0) * 100.0
}
