//! Predictor / Transformer.
//!
//! Applies fitted coefficients to a fold's raw block data. The same kernel
//! backs three consumers: the reduced-matrix output of a reduction fit, the
//! out-of-fold predictions scored during cross-validation, and the final
//! prediction table of a regression fit.
//!
//! Coverage policy: coefficients are joined to data columns by header. A
//! model row whose header has no data column, or a data column with no
//! model row, contributes nothing. Incomplete coverage surfaces as a
//! missing-row result, not an error.

use crate::catalog::{CovariateMatrix, SampleBlocks};
use crate::error::RidgeError;
use crate::normal_eqn::assemble_block;
use crate::types::{AlphaMap, BlockRow, CvRow, FitKey, ModelRow, PredictionRow, ReducedRow};
use ahash::AHashMap;
use ndarray::{Array1, Array2};

/// Predicted values of one fitted model for the samples of one fold.
#[derive(Debug, Clone, PartialEq)]
pub struct FoldPrediction {
    pub label: String,
    pub alpha_id: String,
    pub y_hat: Array1<f64>,
}

/// Multiplies a fold's block matrix against every penalty's coefficient
/// column, producing one prediction vector per `(label, alpha)`.
pub fn fold_predictions(
    key: &FitKey,
    block_rows: &[BlockRow],
    model_rows: &[ModelRow],
    label_names: &[String],
    sample_blocks: &SampleBlocks,
    covariates: &CovariateMatrix,
    alphas: &AlphaMap,
) -> Result<Vec<FoldPrediction>, RidgeError> {
    let samples = sample_blocks.members(&key.sample_block).ok_or_else(|| {
        RidgeError::SchemaMismatch(format!(
            "sample block '{}' is not in the catalog",
            key.sample_block
        ))
    })?;
    let assembled = assemble_block(key.scope.as_deref(), block_rows, samples, covariates)?;

    let out_labels: Vec<String> = match &key.label {
        Some(label) => vec![label.clone()],
        None => label_names.to_vec(),
    };

    let column_of: AHashMap<&str, usize> = assembled
        .rows
        .iter()
        .enumerate()
        .map(|(j, row)| (row.header.as_str(), j))
        .collect();

    let mut out = Vec::with_capacity(alphas.len() * out_labels.len());
    for (alpha_id, _) in alphas.iter() {
        let mut beta = Array2::zeros((assembled.rows.len(), out_labels.len()));
        for model_row in model_rows.iter().filter(|r| r.alpha_id == alpha_id) {
            let Some(&j) = column_of.get(model_row.header.as_str()) else {
                continue; // no data column for this coefficient: dropped
            };
            if model_row.coefficients.len() != out_labels.len() {
                return Err(RidgeError::SchemaMismatch(format!(
                    "model row for header '{}' carries {} coefficients, expected {}",
                    model_row.header,
                    model_row.coefficients.len(),
                    out_labels.len()
                )));
            }
            for (col, value) in model_row.coefficients.iter().enumerate() {
                beta[[j, col]] = *value;
            }
        }
        let y_hat = assembled.x.dot(&beta);
        for (col, label) in out_labels.iter().enumerate() {
            out.push(FoldPrediction {
                label: label.clone(),
                alpha_id: alpha_id.to_string(),
                y_hat: y_hat.column(col).to_owned(),
            });
        }
    }
    Ok(out)
}

/// Reduction-mode output: every penalty's prediction column is retained,
/// shrinking the group's header block to one column per `(label, alpha)`.
pub fn apply_model(
    key: &FitKey,
    block_rows: &[BlockRow],
    model_rows: &[ModelRow],
    label_names: &[String],
    sample_blocks: &SampleBlocks,
    covariates: &CovariateMatrix,
    alphas: &AlphaMap,
) -> Result<Vec<ReducedRow>, RidgeError> {
    let header_block = key.scope.clone().ok_or_else(|| {
        RidgeError::SchemaMismatch(
            "reduced output requires a header-block-scoped fit group".to_string(),
        )
    })?;
    let predictions = fold_predictions(
        key,
        block_rows,
        model_rows,
        label_names,
        sample_blocks,
        covariates,
        alphas,
    )?;
    Ok(predictions
        .into_iter()
        .map(|p| ReducedRow {
            header_block: header_block.clone(),
            sample_block: key.sample_block.clone(),
            label: p.label,
            alpha_id: p.alpha_id,
            values: p.y_hat.to_vec(),
        })
        .collect())
}

/// Regression-mode output: predictions filtered to each label's selected
/// penalty by an exact `alpha_id` join against the CV table.
pub fn predict_selected(
    key: &FitKey,
    block_rows: &[BlockRow],
    model_rows: &[ModelRow],
    label_names: &[String],
    sample_blocks: &SampleBlocks,
    covariates: &CovariateMatrix,
    alphas: &AlphaMap,
    cv_rows: &[CvRow],
) -> Result<Vec<PredictionRow>, RidgeError> {
    let predictions = fold_predictions(
        key,
        block_rows,
        model_rows,
        label_names,
        sample_blocks,
        covariates,
        alphas,
    )?;
    Ok(predictions
        .into_iter()
        .filter(|p| {
            cv_rows
                .iter()
                .any(|cv| cv.label == p.label && cv.alpha_id == p.alpha_id)
        })
        .map(|p| PredictionRow {
            sample_block: key.sample_block.clone(),
            label: p.label,
            alpha_id: p.alpha_id,
            values: p.y_hat.to_vec(),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::LabelMatrix;
    use crate::normal_eqn::block_statistics;
    use crate::solve::solve_normal_eqns;
    use crate::types::NormalEqnRow;
    use approx::assert_abs_diff_eq;

    /// Fit on a block's own pooled statistics at zero penalty, then apply
    /// the model back to the same block: noiseless linear data must be
    /// recovered exactly.
    #[test]
    fn round_trip_recovers_generating_coefficients() {
        let blocks = SampleBlocks::new(vec![(
            "s0".to_string(),
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
        )])
        .unwrap();
        // y = 2*x0 - 1*x1, exactly.
        let labels = LabelMatrix::from_triples(&[
            ("a".to_string(), "y".to_string(), 2.0),
            ("b".to_string(), "y".to_string(), -1.0),
            ("c".to_string(), "y".to_string(), 3.0),
        ])
        .unwrap();
        let block_rows = vec![
            BlockRow {
                header_block: "hb0".to_string(),
                sample_block: "s0".to_string(),
                header: "x0".to_string(),
                label: None,
                sort_key: 0,
                values: vec![1.0, 0.0, 2.0],
            },
            BlockRow {
                header_block: "hb0".to_string(),
                sample_block: "s0".to_string(),
                header: "x1".to_string(),
                label: None,
                sort_key: 1,
                values: vec![0.0, 1.0, 1.0],
            },
        ];
        let key = FitKey {
            scope: Some("hb0".to_string()),
            sample_block: "s0".to_string(),
            label: None,
        };
        let cov = CovariateMatrix::empty();
        let alphas = AlphaMap::new(&[0.0]).unwrap();

        // Pooled statistics: the no-CV single-block path.
        let (meta, xtx, xty) =
            block_statistics(&key, &block_rows, &labels, &blocks, &cov).unwrap();
        let eqn_rows: Vec<NormalEqnRow> = meta
            .iter()
            .enumerate()
            .map(|(j, m)| NormalEqnRow {
                scope: key.scope.clone(),
                fold: key.sample_block.clone(),
                header_block: m.header_block.clone(),
                header: m.header.clone(),
                label: None,
                sort_key: m.sort_key,
                xtx_row: xtx.row(j).to_owned(),
                xty_row: xty.row(j).to_owned(),
            })
            .collect();
        let model =
            solve_normal_eqns(&key, eqn_rows, &alphas, &["y".to_string()]).unwrap();
        let b0 = model.iter().find(|r| r.header == "x0").unwrap();
        let b1 = model.iter().find(|r| r.header == "x1").unwrap();
        assert_abs_diff_eq!(b0.coefficients[0], 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(b1.coefficients[0], -1.0, epsilon = 1e-9);

        let reduced = apply_model(
            &key,
            &block_rows,
            &model,
            &["y".to_string()],
            &blocks,
            &cov,
            &alphas,
        )
        .unwrap();
        assert_eq!(reduced.len(), 1);
        let values = &reduced[0].values;
        assert_abs_diff_eq!(values[0], 2.0, epsilon = 1e-9);
        assert_abs_diff_eq!(values[1], -1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(values[2], 3.0, epsilon = 1e-9);
    }

    #[test]
    fn coefficients_without_data_columns_are_dropped() {
        let blocks =
            SampleBlocks::new(vec![("s0".to_string(), vec!["a".to_string()])]).unwrap();
        let block_rows = vec![BlockRow {
            header_block: "hb0".to_string(),
            sample_block: "s0".to_string(),
            header: "x0".to_string(),
            label: None,
            sort_key: 0,
            values: vec![4.0],
        }];
        let model_rows = vec![
            ModelRow {
                header_block: "hb0".to_string(),
                sample_block: "s0".to_string(),
                header: "x0".to_string(),
                label: None,
                alpha_id: "alpha_0".to_string(),
                sort_key: 0,
                coefficients: vec![0.5],
            },
            ModelRow {
                header_block: "hb0".to_string(),
                sample_block: "s0".to_string(),
                header: "missing".to_string(),
                label: None,
                alpha_id: "alpha_0".to_string(),
                sort_key: 7,
                coefficients: vec![100.0],
            },
        ];
        let key = FitKey {
            scope: Some("hb0".to_string()),
            sample_block: "s0".to_string(),
            label: None,
        };
        let out = fold_predictions(
            &key,
            &block_rows,
            &model_rows,
            &["y".to_string()],
            &blocks,
            &CovariateMatrix::empty(),
            &AlphaMap::new(&[1.0]).unwrap(),
        )
        .unwrap();
        assert_eq!(out.len(), 1);
        assert_abs_diff_eq!(out[0].y_hat[0], 2.0);
    }
}
