use crate::{EvalError, EvalResult};
use ndarray::{ArrayView1, ArrayView2};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankAccuracy {
    pub rank1: f64,
    pub rank_k: f64,
}

/// Class indices ordered by descending score; equal scores keep the lower index first.
pub fn ranked_classes(scores: ArrayView1<'_, f32>) -> Vec<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]).then(a.cmp(&b)));
    order
}

/// Fraction of rows whose true class is the top score, and among the top `k` scores.
pub fn rank_k_accuracy(
    predictions: ArrayView2<'_, f32>,
    ground_truth: &[u32],
    k: usize,
) -> EvalResult<RankAccuracy> {
    let n = predictions.nrows();
    if ground_truth.len() != n {
        return Err(EvalError::Dimension(format!(
            "{} ground-truth labels for {n} prediction rows",
            ground_truth.len()
        )));
    }
    if n == 0 {
        return Ok(RankAccuracy {
            rank1: 0.0,
            rank_k: 0.0,
        });
    }
    let mut rank1 = 0usize;
    let mut rank_k = 0usize;
    for (row, &truth) in predictions.rows().into_iter().zip(ground_truth) {
        let order = ranked_classes(row);
        let truth = truth as usize;
        if order.first() == Some(&truth) {
            rank1 += 1;
        }
        if order.iter().take(k).any(|&c| c == truth) {
            rank_k += 1;
        }
    }
    Ok(RankAccuracy {
        rank1: rank1 as f64 / n as f64,
        rank_k: rank_k as f64 / n as f64,
    })
}
