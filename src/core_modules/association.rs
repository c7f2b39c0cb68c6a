// THEORY:
// The association engine solves the "data association problem" for one pair of box
// sets: A (track predictions) and B (detections). It is stateless and shared by every
// tracker.
//
// Key architectural principles:
// 1.  **IOU Gate**: A pair `(i, j)` is admissible only if `IOU(A[i], B[j]) >= threshold`.
//     Inadmissible pairs are never returned, even when they are the only candidate.
// 2.  **Exact Assignment**: Among admissible pairs the engine maximises the total IOU
//     margin `sum(IOU - threshold)`, which is the classic minimum-cost assignment with
//     cost `1 - IOU` and an unmatched cost of `(1 - threshold) / 2` per side. The
//     Kuhn-Munkres solver makes the result independent of input order.
// 3.  **Deterministic Ties**: Scores are quantised and combined with a small penalty
//     `(i - j)^2` per pair, so equal-score solutions resolve toward the assignment
//     that pairs low indices with each other.

use pathfinding::prelude::{Matrix, kuhn_munkres};

use crate::core_modules::geometry::BBox;

/// Resolution of the quantised IOU margin.
const SCORE_SCALE: f64 = 100_000.0;

/// The outcome of associating box set A with box set B.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Matching {
    /// `(index into A, index into B)`, sorted by A index.
    pub matches: Vec<(usize, usize)>,
    pub unmatched_a: Vec<usize>,
    pub unmatched_b: Vec<usize>,
}

impl Matching {
    fn all_unmatched(len_a: usize, len_b: usize) -> Self {
        Self {
            matches: Vec::new(),
            unmatched_a: (0..len_a).collect(),
            unmatched_b: (0..len_b).collect(),
        }
    }
}

/// Pairwise IOU, `result[i][j] = IOU(a[i], b[j])`.
pub fn iou_matrix(a: &[BBox], b: &[BBox]) -> Vec<Vec<f64>> {
    a.iter()
        .map(|box_a| b.iter().map(|box_b| box_a.iou(box_b)).collect())
        .collect()
}

/// Associates two box sets by IOU with the given admissibility threshold.
pub fn match_boxes(a: &[BBox], b: &[BBox], match_threshold: f64) -> Matching {
    assign(&iou_matrix(a, b), a.len(), b.len(), match_threshold)
}

/// Solves the assignment for a precomputed `len_a x len_b` similarity matrix.
pub fn assign(similarity: &[Vec<f64>], len_a: usize, len_b: usize, threshold: f64) -> Matching {
    if len_a == 0 || len_b == 0 {
        return Matching::all_unmatched(len_a, len_b);
    }

    // The solver needs rows <= columns.
    let transposed = len_a > len_b;
    let (rows, cols) = if transposed {
        (len_b, len_a)
    } else {
        (len_a, len_b)
    };

    let tie_scale = (rows * cols * cols) as i64 + 1;
    let mut weights = Matrix::new(rows, cols, 0i64);
    let mut any_admissible = false;
    for r in 0..rows {
        for c in 0..cols {
            let (i, j) = if transposed { (c, r) } else { (r, c) };
            let value = similarity[i][j];
            if !value.is_finite() || value < threshold {
                continue;
            }
            any_admissible = true;
            let margin = ((value - threshold) * SCORE_SCALE).round() as i64 + 1;
            let penalty = (i as i64 - j as i64).pow(2);
            weights[(r, c)] = margin * tie_scale - penalty;
        }
    }
    if !any_admissible {
        return Matching::all_unmatched(len_a, len_b);
    }

    let (_, assignment) = kuhn_munkres(&weights);

    let mut matched_a = vec![false; len_a];
    let mut matched_b = vec![false; len_b];
    let mut matches = Vec::new();
    for (r, &c) in assignment.iter().enumerate() {
        let (i, j) = if transposed { (c, r) } else { (r, c) };
        let value = similarity[i][j];
        if value.is_finite() && value >= threshold {
            matches.push((i, j));
            matched_a[i] = true;
            matched_b[j] = true;
        }
    }
    matches.sort_unstable();

    Matching {
        matches,
        unmatched_a: (0..len_a).filter(|&i| !matched_a[i]).collect(),
        unmatched_b: (0..len_b).filter(|&j| !matched_b[j]).collect(),
    }
}
