//! Regularized solver.
//!
//! Rebuilds the combined normal-equation system for one fit group from its
//! reduced per-header rows and solves `(XᵀX + a·D)·β = XᵀY` once per
//! requested penalty via Cholesky factorization. `D` is the identity
//! restricted to penalized rows; covariate rows (negative sort key) carry a
//! zero diagonal and are never shrunk. The system is positive-definite for
//! any `a > 0`; `a = 0` is only solvable when `XᵀX` itself has full rank.

use crate::error::RidgeError;
use crate::types::{AlphaMap, FitKey, ModelRow, NormalEqnRow};
use ndarray::Array2;
use ndarray_linalg::{FactorizeC, SolveC, UPLO};

/// Solves one fit group at every requested penalty.
///
/// Emits one [`ModelRow`] per (matrix row, penalty). A factorization failure
/// at any requested penalty fails this group with
/// [`RidgeError::SingularSystem`]; the caller decides whether sibling groups
/// keep their results (they are computed independently and are unaffected).
pub fn solve_normal_eqns(
    key: &FitKey,
    mut rows: Vec<NormalEqnRow>,
    alphas: &AlphaMap,
    label_names: &[String],
) -> Result<Vec<ModelRow>, RidgeError> {
    rows.sort_by(|a, b| (a.sort_key, &a.header).cmp(&(b.sort_key, &b.header)));
    let k = rows.len();
    if k == 0 {
        return Err(RidgeError::SchemaMismatch(format!(
            "no statistics arrived for group [{key}]"
        )));
    }
    let n_labels = match &key.label {
        Some(_) => 1,
        None => label_names.len(),
    };

    let mut xtx = Array2::zeros((k, k));
    let mut xty = Array2::zeros((k, n_labels));
    for (j, row) in rows.iter().enumerate() {
        if row.xtx_row.len() != k || row.xty_row.len() != n_labels {
            return Err(RidgeError::SchemaMismatch(format!(
                "statistics row for header '{}' has width {}x{}, expected {k}x{n_labels}",
                row.header,
                row.xtx_row.len(),
                row.xty_row.len()
            )));
        }
        xtx.row_mut(j).assign(&row.xtx_row);
        xty.row_mut(j).assign(&row.xty_row);
    }

    // Penalized rows are the data headers; covariates keep a zero diagonal.
    let penalty_diag: Vec<f64> = rows
        .iter()
        .map(|row| if row.sort_key >= 0 { 1.0 } else { 0.0 })
        .collect();

    let mut out = Vec::with_capacity(k * alphas.len());
    for (alpha_id, alpha) in alphas.iter() {
        let mut system = xtx.clone();
        for (j, d) in penalty_diag.iter().enumerate() {
            system[[j, j]] += alpha * d;
        }
        let singular = |source| RidgeError::SingularSystem {
            key: key.to_string(),
            alpha_id: alpha_id.to_string(),
            alpha,
            source,
        };
        let factor = system.factorizec(UPLO::Lower).map_err(singular)?;
        let mut betas = Array2::zeros((k, n_labels));
        for col in 0..n_labels {
            let rhs = xty.column(col).to_owned();
            let solution = factor.solvec(&rhs).map_err(|source| {
                RidgeError::SingularSystem {
                    key: key.to_string(),
                    alpha_id: alpha_id.to_string(),
                    alpha,
                    source,
                }
            })?;
            betas.column_mut(col).assign(&solution);
        }
        for (j, row) in rows.iter().enumerate() {
            out.push(ModelRow {
                header_block: row.header_block.clone(),
                sample_block: key.sample_block.clone(),
                header: row.header.clone(),
                label: key.label.clone(),
                alpha_id: alpha_id.to_string(),
                sort_key: row.sort_key,
                coefficients: betas.row(j).to_vec(),
            });
        }
    }
    Ok(out)
}
