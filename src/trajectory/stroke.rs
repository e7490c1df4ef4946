//! Stroke extraction
//!
//! A stroke is the initial deliberate movement of a trace: everything before the
//! first pause longer than the threshold.

use crate::types::PointerSample;

/// Prefix of `trace` that ends before the first gap longer than `pause_threshold_ms`
///
/// Traces shorter than two samples are returned unchanged.
pub fn extract_stroke(trace: &[PointerSample], pause_threshold_ms: f64) -> &[PointerSample] {
    if trace.len() < 2 {
        return trace;
    }
    let cut = trace
        .windows(2)
        .position(|pair| pair[1].t_ms - pair[0].t_ms > pause_threshold_ms)
        .map_or(trace.len(), |i| i + 1);
    &trace[..cut]
}
