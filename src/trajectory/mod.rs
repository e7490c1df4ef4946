//! Pointer trajectory similarity
//!
//! Pure functions comparing pointer-movement traces, used to flag identical or
//! collusive input between candidates.

mod batch;
mod dtw;
mod similarity;
mod stroke;

pub use batch::{compare_sessions, pair_key, round_score, SessionTraces};
pub use dtw::{dtw_distance, Point};
pub use similarity::{
    compare, similarity, similarity_with, SimilarityBreakdown, SimilarityParams,
    MAX_DISTANCE_THRESHOLD_PX, POSITION_WEIGHT, SCALE_WEIGHT, SHAPE_WEIGHT,
};
pub use stroke::extract_stroke;
