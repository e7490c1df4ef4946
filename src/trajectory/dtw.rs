//! Dynamic time warping over 2-D points

use crate::budget::AnalysisBudget;
use crate::error::ComputeError;

/// A point in the plane
pub type Point = (f64, f64);

fn euclidean(a: Point, b: Point) -> f64 {
    let dx = a.0 - b.0;
    let dy = a.1 - b.1;
    (dx * dx + dy * dy).sqrt()
}

/// Exact DTW distance with Euclidean point cost
///
/// Runs in O(n·m) time and O(m) memory. The budget is checked once per row.
/// Either input being empty yields `f64::INFINITY`.
pub fn dtw_distance(a: &[Point], b: &[Point], budget: &AnalysisBudget) -> Result<f64, ComputeError> {
    if a.is_empty() || b.is_empty() {
        return Ok(f64::INFINITY);
    }

    let m = b.len();
    let mut prev = vec![f64::INFINITY; m + 1];
    let mut curr = vec![f64::INFINITY; m + 1];
    prev[0] = 0.0;

    for &pa in a {
        budget.check()?;
        curr[0] = f64::INFINITY;
        for (j, &pb) in b.iter().enumerate() {
            let best = prev[j].min(prev[j + 1]).min(curr[j]);
            curr[j + 1] = euclidean(pa, pb) + best;
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    Ok(prev[m])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(n: usize, offset: f64) -> Vec<Point> {
        (0..n).map(|i| (i as f64, offset)).collect()
    }

    #[test]
    fn test_identical_sequences_have_zero_distance() {
        let a = line(20, 0.0);
        let d = dtw_distance(&a, &a, &AnalysisBudget::unbounded()).unwrap();
        assert_eq!(d, 0.0);
    }

    #[test]
    fn test_constant_offset() {
        let a = line(5, 0.0);
        let b = line(5, 3.0);
        let d = dtw_distance(&a, &b, &AnalysisBudget::unbounded()).unwrap();
        assert!((d - 15.0).abs() < 1e-9, "{}", d);
    }

    #[test]
    fn test_warping_absorbs_repeated_points() {
        let a = vec![(0.0, 0.0), (1.0, 0.0), (2.0, 0.0)];
        let b = vec![(0.0, 0.0), (1.0, 0.0), (1.0, 0.0), (2.0, 0.0)];
        let d = dtw_distance(&a, &b, &AnalysisBudget::unbounded()).unwrap();
        assert_eq!(d, 0.0);
    }

    #[test]
    fn test_symmetric() {
        let a = vec![(0.0, 0.0), (3.0, 4.0), (6.0, 1.0)];
        let b = vec![(1.0, 1.0), (2.0, 2.0), (5.0, 5.0), (7.0, 0.0)];
        let budget = AnalysisBudget::unbounded();
        assert_eq!(
            dtw_distance(&a, &b, &budget).unwrap(),
            dtw_distance(&b, &a, &budget).unwrap()
        );
    }

    #[test]
    fn test_empty_input_is_infinite() {
        let d = dtw_distance(&[], &line(3, 0.0), &AnalysisBudget::unbounded()).unwrap();
        assert!(d.is_infinite());
    }

    #[test]
    fn test_cancelled_budget_aborts() {
        let budget = AnalysisBudget::unbounded();
        budget.cancel();
        let a = line(10, 0.0);
        assert!(matches!(
            dtw_distance(&a, &a, &budget),
            Err(ComputeError::Cancelled)
        ));
    }
}
