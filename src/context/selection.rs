//! Token position selection
//!
//! Both selectors return positions in ascending (reading) order.

use std::cmp::Ordering;
use std::ops::Range;

/// Keep the first `⌈k/2⌉` and last `⌊k/2⌋` of `len` positions, at least one
/// on each side. Everything is kept when `len <= k`.
pub fn head_tail_positions(len: usize, top_k: usize) -> Vec<usize> {
    if len <= top_k {
        return (0..len).collect();
    }

    let head = top_k.div_ceil(2).max(1);
    let tail = (top_k / 2).max(1);
    if head + tail >= len {
        return (0..len).collect();
    }

    (0..head).chain(len - tail..len).collect()
}

fn rank_score(score: f32) -> f32 {
    if score.is_nan() {
        f32::NEG_INFINITY
    } else {
        score
    }
}

/// Pick the `top_k` highest-scoring positions inside `candidates`.
///
/// Positions outside `candidates` (query and separator) are never selected.
/// Equal scores prefer the earlier position; NaN ranks lowest.
pub fn top_k_positions(scores: &[f32], candidates: Range<usize>, top_k: usize) -> Vec<usize> {
    let candidates = candidates.start.min(scores.len())..candidates.end.min(scores.len());
    let mut positions: Vec<usize> = candidates.collect();

    positions.sort_by(|&a, &b| {
        rank_score(scores[b])
            .partial_cmp(&rank_score(scores[a]))
            .unwrap_or(Ordering::Equal)
            .then(a.cmp(&b))
    });
    positions.truncate(top_k);
    positions.sort_unstable();
    positions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_head_tail_keeps_both_ends() {
        assert_eq!(head_tail_positions(10, 4), vec![0, 1, 8, 9]);
        assert_eq!(head_tail_positions(10, 5), vec![0, 1, 2, 8, 9]);
    }

    #[test]
    fn test_head_tail_short_input_unchanged() {
        assert_eq!(head_tail_positions(3, 4), vec![0, 1, 2]);
        assert_eq!(head_tail_positions(0, 4), Vec::<usize>::new());
    }

    #[test]
    fn test_head_tail_minimum_one_per_side() {
        assert_eq!(head_tail_positions(10, 1), vec![0, 9]);
    }

    #[test]
    fn test_top_k_reorders_to_reading_order() {
        let scores = [0.1, 0.9, 0.2, 0.5];
        assert_eq!(top_k_positions(&scores, 0..4, 3), vec![1, 2, 3]);
    }

    #[test]
    fn test_top_k_excludes_positions_before_context() {
        let scores = [5.0, 5.0, 0.1, 0.3, 0.2];
        assert_eq!(top_k_positions(&scores, 2..5, 2), vec![3, 4]);
    }

    #[test]
    fn test_top_k_ties_prefer_earlier_positions() {
        let scores = [0.5, 0.5, 0.5, 0.5];
        assert_eq!(top_k_positions(&scores, 0..4, 2), vec![0, 1]);
    }

    #[test]
    fn test_top_k_nan_ranks_lowest() {
        let scores = [f32::NAN, 0.0, f32::NAN, -1.0];
        assert_eq!(top_k_positions(&scores, 0..4, 2), vec![1, 3]);
    }

    #[test]
    fn test_top_k_larger_than_candidates() {
        let scores = [1.0, 0.2, 0.3];
        assert_eq!(top_k_positions(&scores, 1..3, 10), vec![1, 2]);
    }
}
