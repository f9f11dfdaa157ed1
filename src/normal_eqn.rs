//! Sufficient-statistics mapper and reducer.
//!
//! The mapper turns one raw block into its normal-equation contribution
//! `(XᵀX, XᵀY)` and replicates that contribution once per *other* sample
//! block, tagged with that block as the destination fold. After the reducer
//! sums contributions per fold, the statistics grouped under fold `k` are
//! exactly those of every sample block except `k`, which is the system needed to fit
//! a model that is later evaluated, unbiased, on fold `k`. One pass over the
//! data therefore supports leave-one-fold-out cross-validation without ever
//! fitting on an evaluation fold.
//!
//! Summation is elementwise matrix addition, so the reducer is associative
//! and commutative by construction: partial sums may be combined in any
//! order or tree shape. Reimplementations must preserve this property.

use crate::catalog::{CovariateMatrix, LabelMatrix, SampleBlocks};
use crate::error::RidgeError;
use crate::types::{BlockRow, FitKey, NormalEqnRow};
use ndarray::{s, Array1, Array2, Axis};
use std::collections::BTreeMap;

/// Tag used as the `header_block` of covariate coefficient rows when a fit
/// spans every header block and no single block name applies.
pub const COVARIATE_BLOCK: &str = "covariates";

/// Provenance of one row/column of an assembled fit matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixRow {
    pub header_block: String,
    pub header: String,
    pub sort_key: i64,
}

/// The dense design matrix for one fit group: covariate columns first (in
/// covariate-table order, carrying negative sort keys), then the block's
/// headers ordered by `(sort_key, header)`.
#[derive(Debug)]
pub struct AssembledBlock {
    pub x: Array2<f64>,
    pub rows: Vec<MatrixRow>,
}

/// Stacks a map group's rows into the dense block matrix for the samples of
/// `sample_block`, prepending covariates. Ragged value vectors and negative
/// input sort keys are schema mismatches.
pub fn assemble_block(
    scope: Option<&str>,
    block_rows: &[BlockRow],
    samples: &[String],
    covariates: &CovariateMatrix,
) -> Result<AssembledBlock, RidgeError> {
    let mut sorted: Vec<&BlockRow> = block_rows.iter().collect();
    sorted.sort_by(|a, b| (a.sort_key, &a.header).cmp(&(b.sort_key, &b.header)));

    let n = samples.len();
    let cov = covariates.gather(samples)?;
    let c = cov.ncols();
    let mut x = Array2::zeros((n, c + sorted.len()));
    x.slice_mut(s![.., ..c]).assign(&cov);

    let cov_block = scope.unwrap_or(COVARIATE_BLOCK);
    let mut rows = Vec::with_capacity(c + sorted.len());
    for (j, name) in covariates.names().iter().enumerate() {
        rows.push(MatrixRow {
            header_block: cov_block.to_string(),
            header: name.clone(),
            sort_key: j as i64 - c as i64,
        });
    }
    for (j, row) in sorted.iter().enumerate() {
        if row.sort_key < 0 {
            return Err(RidgeError::SchemaMismatch(format!(
                "header '{}' has negative sort key {}; negative keys are reserved for covariates",
                row.header, row.sort_key
            )));
        }
        if row.values.len() != n {
            return Err(RidgeError::SchemaMismatch(format!(
                "header '{}' carries {} values but sample block has {} samples",
                row.header,
                row.values.len(),
                n
            )));
        }
        for (i, v) in row.values.iter().enumerate() {
            x[[i, c + j]] = *v;
        }
        rows.push(MatrixRow {
            header_block: row.header_block.clone(),
            header: row.header.clone(),
            sort_key: row.sort_key,
        });
    }
    Ok(AssembledBlock { x, rows })
}

/// The pooled normal-equation statistics of one block over its own samples:
/// `(row provenance, XᵀX, XᵀY)`. This is the no-exclusion form; callers that
/// need cross-validation must go through [`map_normal_eqns`] instead.
pub fn block_statistics(
    key: &FitKey,
    block_rows: &[BlockRow],
    labels: &LabelMatrix,
    sample_blocks: &SampleBlocks,
    covariates: &CovariateMatrix,
) -> Result<(Vec<MatrixRow>, Array2<f64>, Array2<f64>), RidgeError> {
    let samples = sample_blocks.members(&key.sample_block).ok_or_else(|| {
        RidgeError::SchemaMismatch(format!(
            "sample block '{}' is not in the catalog",
            key.sample_block
        ))
    })?;
    let assembled = assemble_block(key.scope.as_deref(), block_rows, samples, covariates)?;

    let all_labels = labels.gather(samples)?;
    let y = match &key.label {
        Some(label) => {
            let idx = labels.label_index(label).ok_or_else(|| {
                RidgeError::SchemaMismatch(format!("label '{label}' is not in the label table"))
            })?;
            all_labels.column(idx).insert_axis(Axis(1)).to_owned()
        }
        None => all_labels,
    };

    let xtx = assembled.x.t().dot(&assembled.x);
    let xty = assembled.x.t().dot(&y);
    Ok((assembled.rows, xtx, xty))
}

/// Sufficient-Statistics Mapper.
///
/// Emits the group's contribution once per other sample block, keyed by that
/// block as the held-out fold. With a single sample block there is no other
/// fold to contribute to; the group degenerates to one all-zero record keyed
/// to itself, so a downstream solve at `alpha = 0` fails rather than
/// silently fitting on the evaluation fold.
pub fn map_normal_eqns(
    key: &FitKey,
    block_rows: &[BlockRow],
    labels: &LabelMatrix,
    sample_blocks: &SampleBlocks,
    covariates: &CovariateMatrix,
) -> Result<Vec<NormalEqnRow>, RidgeError> {
    let (rows, xtx, xty) = block_statistics(key, block_rows, labels, sample_blocks, covariates)?;

    let folds: Vec<&str> = sample_blocks.other_blocks(&key.sample_block).collect();
    let mut out = Vec::with_capacity(rows.len() * folds.len().max(1));
    if folds.is_empty() {
        for row in rows.iter() {
            out.push(NormalEqnRow {
                scope: key.scope.clone(),
                fold: key.sample_block.clone(),
                header_block: row.header_block.clone(),
                header: row.header.clone(),
                label: key.label.clone(),
                sort_key: row.sort_key,
                xtx_row: Array1::zeros(xtx.ncols()),
                xty_row: Array1::zeros(xty.ncols()),
            });
        }
        return Ok(out);
    }
    for fold in folds {
        for (j, row) in rows.iter().enumerate() {
            out.push(NormalEqnRow {
                scope: key.scope.clone(),
                fold: fold.to_string(),
                header_block: row.header_block.clone(),
                header: row.header.clone(),
                label: key.label.clone(),
                sort_key: row.sort_key,
                xtx_row: xtx.row(j).to_owned(),
                xty_row: xty.row(j).to_owned(),
            });
        }
    }
    Ok(out)
}

/// Statistics Reducer: elementwise sum of one header's contributions, kept
/// separate per destination fold. Arrival order is irrelevant.
pub fn reduce_normal_eqns(rows: Vec<NormalEqnRow>) -> Result<Vec<NormalEqnRow>, RidgeError> {
    let mut by_fold: BTreeMap<String, NormalEqnRow> = BTreeMap::new();
    for row in rows {
        match by_fold.get_mut(&row.fold) {
            None => {
                by_fold.insert(row.fold.clone(), row);
            }
            Some(acc) => {
                if acc.xtx_row.len() != row.xtx_row.len()
                    || acc.xty_row.len() != row.xty_row.len()
                {
                    return Err(RidgeError::SchemaMismatch(format!(
                        "statistics for header '{}' have mismatched widths across folds",
                        acc.header
                    )));
                }
                acc.xtx_row += &row.xtx_row;
                acc.xty_row += &row.xty_row;
            }
        }
    }
    Ok(by_fold.into_values().collect())
}
