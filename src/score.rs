//! Cross-validation scorer and penalty selector (regression mode).
//!
//! Each fold's held-out samples are predicted with the coefficients trained
//! on every other fold (guaranteed by the mapper's leave-one-fold-out
//! construction), scored with the coefficient of determination, and the
//! per-fold scores are averaged per `(label, alpha)`. Selection dense-ranks
//! penalties per label by descending mean R² and keeps rank 1; a tie at
//! rank 1 is broken deterministically toward the smallest penalty value.

use crate::apply::fold_predictions;
use crate::catalog::{CovariateMatrix, LabelMatrix, SampleBlocks};
use crate::error::RidgeError;
use crate::types::{AlphaMap, BlockRow, CvRow, FitKey, ModelRow};
use itertools::Itertools;
use ndarray::ArrayView1;
use std::collections::BTreeMap;

/// Out-of-fold R² of one `(fold, label, alpha)` cell.
#[derive(Debug, Clone, PartialEq)]
pub struct FoldScore {
    pub sample_block: String,
    pub label: String,
    pub alpha_id: String,
    pub r2: f64,
}

/// Coefficient of determination. A zero-variance truth vector yields a
/// non-finite score, which ranks behind every finite competitor.
pub fn r2_score(y_true: ArrayView1<f64>, y_pred: ArrayView1<f64>) -> f64 {
    let n = y_true.len() as f64;
    let mean = y_true.sum() / n;
    let ss_tot: f64 = y_true.iter().map(|y| (y - mean) * (y - mean)).sum();
    let ss_res: f64 = y_true
        .iter()
        .zip(y_pred.iter())
        .map(|(y, p)| (y - p) * (y - p))
        .sum();
    1.0 - ss_res / ss_tot
}

/// Scores one fold: held-out predictions against true label values, once
/// per `(label, alpha)`.
pub fn score_fold(
    key: &FitKey,
    block_rows: &[BlockRow],
    model_rows: &[ModelRow],
    labels: &LabelMatrix,
    sample_blocks: &SampleBlocks,
    covariates: &CovariateMatrix,
    alphas: &AlphaMap,
) -> Result<Vec<FoldScore>, RidgeError> {
    let samples = sample_blocks.members(&key.sample_block).ok_or_else(|| {
        RidgeError::SchemaMismatch(format!(
            "sample block '{}' is not in the catalog",
            key.sample_block
        ))
    })?;
    let truth = labels.gather(samples)?;
    let predictions = fold_predictions(
        key,
        block_rows,
        model_rows,
        labels.label_names(),
        sample_blocks,
        covariates,
        alphas,
    )?;

    predictions
        .into_iter()
        .map(|p| {
            let idx = labels.label_index(&p.label).ok_or_else(|| {
                RidgeError::SchemaMismatch(format!(
                    "label '{}' is not in the label table",
                    p.label
                ))
            })?;
            Ok(FoldScore {
                sample_block: key.sample_block.clone(),
                label: p.label,
                alpha_id: p.alpha_id,
                r2: r2_score(truth.column(idx), p.y_hat.view()),
            })
        })
        .collect()
}

/// Mean out-of-fold R² per `(label, alpha)`, in deterministic key order.
pub fn mean_scores(scores: &[FoldScore]) -> Vec<(String, String, f64)> {
    let mut grouped: BTreeMap<(String, String), Vec<f64>> = BTreeMap::new();
    for score in scores {
        grouped
            .entry((score.label.clone(), score.alpha_id.clone()))
            .or_default()
            .push(score.r2);
    }
    grouped
        .into_iter()
        .map(|((label, alpha_id), r2s)| {
            let mean = r2s.iter().sum::<f64>() / r2s.len() as f64;
            (label, alpha_id, mean)
        })
        .collect()
}

/// Dense rank of `values` in descending order: ties share a rank, and the
/// next distinct value's rank grows by exactly one. NaN sorts with negative
/// infinity so a degenerate score never wins.
pub fn dense_rank_desc(values: &[f64]) -> Vec<usize> {
    fn norm(v: f64) -> f64 {
        if v.is_nan() { f64::NEG_INFINITY } else { v }
    }
    values
        .iter()
        .map(|v| {
            1 + values
                .iter()
                .filter(|other| norm(**other) > norm(*v))
                .map(|other| norm(*other).to_bits())
                .unique()
                .count()
        })
        .collect()
}

/// Selects, per label, the penalty with the best mean out-of-fold R².
///
/// Ties at rank 1 are broken toward the smallest penalty value, so the
/// output always holds exactly one row per label.
pub fn select_best(
    means: &[(String, String, f64)],
    alphas: &AlphaMap,
) -> Result<Vec<CvRow>, RidgeError> {
    let mut by_label: BTreeMap<&str, Vec<(&str, f64)>> = BTreeMap::new();
    for (label, alpha_id, mean) in means {
        by_label
            .entry(label.as_str())
            .or_default()
            .push((alpha_id.as_str(), *mean));
    }

    let mut out = Vec::with_capacity(by_label.len());
    for (label, candidates) in by_label {
        let r2s: Vec<f64> = candidates.iter().map(|(_, r2)| *r2).collect();
        let ranks = dense_rank_desc(&r2s);
        let tied: Vec<(&str, f64)> = candidates
            .iter()
            .zip(ranks.iter())
            .filter(|(_, rank)| **rank == 1)
            .map(|(candidate, _)| *candidate)
            .collect();
        let winner = tied
            .into_iter()
            .min_by(|a, b| {
                let va = alphas.value_of(a.0).unwrap_or(f64::INFINITY);
                let vb = alphas.value_of(b.0).unwrap_or(f64::INFINITY);
                va.total_cmp(&vb)
            })
            .ok_or_else(|| {
                RidgeError::SchemaMismatch(format!(
                    "no scored penalties available for label '{label}'"
                ))
            })?;
        out.push(CvRow {
            label: label.to_string(),
            alpha_id: winner.0.to_string(),
            r2_mean: winner.1,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn r2_is_one_for_perfect_predictions() {
        let y = array![1.0, 2.0, 3.0];
        assert_abs_diff_eq!(r2_score(y.view(), y.view()), 1.0);
    }

    #[test]
    fn r2_is_zero_when_predicting_the_mean() {
        let y = array![1.0, 2.0, 3.0];
        let mean = array![2.0, 2.0, 2.0];
        assert_abs_diff_eq!(r2_score(y.view(), mean.view()), 0.0);
    }

    #[test]
    fn tied_scores_share_the_top_dense_rank() {
        let ranks = dense_rank_desc(&[0.9, 0.9, 0.5]);
        assert_eq!(ranks, vec![1, 1, 2]);
    }

    #[test]
    fn ranks_are_dense_across_distinct_values() {
        let ranks = dense_rank_desc(&[0.2, 0.8, 0.5, 0.8]);
        assert_eq!(ranks, vec![3, 1, 2, 1]);
    }

    #[test]
    fn rank_one_ties_resolve_to_the_smallest_penalty() {
        let alphas = AlphaMap::new(&[10.0, 1.0, 100.0]).unwrap();
        let means = vec![
            ("y".to_string(), "alpha_0".to_string(), 0.9),
            ("y".to_string(), "alpha_1".to_string(), 0.9),
            ("y".to_string(), "alpha_2".to_string(), 0.5),
        ];
        let selected = select_best(&means, &alphas).unwrap();
        assert_eq!(selected.len(), 1);
        // alpha_1 carries the smaller penalty value of the tied pair.
        assert_eq!(selected[0].alpha_id, "alpha_1");
        assert_abs_diff_eq!(selected[0].r2_mean, 0.9);
    }

    #[test]
    fn selection_emits_exactly_one_row_per_label() {
        let alphas = AlphaMap::new(&[0.0, 1.0]).unwrap();
        let means = vec![
            ("y0".to_string(), "alpha_0".to_string(), 0.3),
            ("y0".to_string(), "alpha_1".to_string(), 0.7),
            ("y1".to_string(), "alpha_0".to_string(), 0.8),
            ("y1".to_string(), "alpha_1".to_string(), 0.2),
        ];
        let selected = select_best(&means, &alphas).unwrap();
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].label, "y0");
        assert_eq!(selected[0].alpha_id, "alpha_1");
        assert_eq!(selected[1].label, "y1");
        assert_eq!(selected[1].alpha_id, "alpha_0");
    }

    #[test]
    fn mean_scores_average_across_folds() {
        let score = |fold: &str, r2: f64| FoldScore {
            sample_block: fold.to_string(),
            label: "y".to_string(),
            alpha_id: "alpha_0".to_string(),
            r2,
        };
        let means = mean_scores(&[score("s0", 0.4), score("s1", 0.8)]);
        assert_eq!(means.len(), 1);
        assert_abs_diff_eq!(means[0].2, 0.6);
    }
}
