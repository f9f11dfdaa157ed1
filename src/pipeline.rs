//! Pipeline orchestration: the two public entry points.
//!
//! [`RidgeReducer`] shrinks a wide block of correlated headers to one
//! prediction column per `(penalty, label)`. [`RidgeRegression`] fits the
//! full model and selects, per label, the penalty with the best mean
//! out-of-fold R². Both run the same map → reduce → solve pipeline over the
//! keyed-grouping substrate; they differ only in fit scope (per header
//! block versus spanning all of them) and in what `transform` emits.
//!
//! Coverage caveat: a sample or header absent from a group at join time is
//! silently dropped from that group's output rather than raised as an
//! error. Callers that need exhaustiveness should compare output sample
//! sets against the catalog.

use crate::apply::{apply_model, predict_selected};
use crate::catalog::{CovariateMatrix, LabelMatrix, SampleBlocks};
use crate::error::RidgeError;
use crate::exec::KeyedBackend;
use crate::normal_eqn::{map_normal_eqns, reduce_normal_eqns};
use crate::score::{mean_scores, score_fold, select_best};
use crate::solve::solve_normal_eqns;
use crate::types::{
    AlphaMap, BlockRow, CvRow, FitKey, KeySchema, ModelRow, PredictionRow, ReducedRow,
};

/// Validates the block table once, before any grouped work: consistent
/// label tagging and non-negative sort keys.
fn validate_block_table(block_rows: &[BlockRow]) -> Result<KeySchema, RidgeError> {
    let schema = KeySchema::resolve(block_rows)?;
    if let Some(bad) = block_rows.iter().find(|r| r.sort_key < 0) {
        return Err(RidgeError::SchemaMismatch(format!(
            "header '{}' has negative sort key {}",
            bad.header, bad.sort_key
        )));
    }
    Ok(schema)
}

fn block_fit_key(row: &BlockRow, scoped: bool) -> FitKey {
    FitKey {
        scope: scoped.then(|| row.header_block.clone()),
        sample_block: row.sample_block.clone(),
        label: row.label.clone(),
    }
}

fn model_fit_key(row: &ModelRow, scoped: bool) -> FitKey {
    FitKey {
        scope: scoped.then(|| row.header_block.clone()),
        sample_block: row.sample_block.clone(),
        label: row.label.clone(),
    }
}

/// A shuffle record joining raw block data with fitted coefficients so both
/// reach the same fold group.
enum Joined {
    Block(BlockRow),
    Model(ModelRow),
}

fn split_joined(group: Vec<Joined>) -> (Vec<BlockRow>, Vec<ModelRow>) {
    let mut blocks = Vec::new();
    let mut models = Vec::new();
    for record in group {
        match record {
            Joined::Block(row) => blocks.push(row),
            Joined::Model(row) => models.push(row),
        }
    }
    (blocks, models)
}

/// Runs map → reduce → solve and returns the model table.
fn fit_models<B: KeyedBackend>(
    backend: &B,
    block_rows: Vec<BlockRow>,
    labels: &LabelMatrix,
    sample_blocks: &SampleBlocks,
    covariates: &CovariateMatrix,
    alphas: &AlphaMap,
    scoped: bool,
) -> Result<Vec<ModelRow>, RidgeError> {
    let mapped = backend.group_apply(
        block_rows,
        |row| block_fit_key(row, scoped),
        |key, group| map_normal_eqns(key, &group, labels, sample_blocks, covariates),
    )?;
    log::info!("mapper emitted {} statistics rows", mapped.len());

    let reduced = backend.group_apply(
        mapped,
        |row| row.reduce_key(),
        |_key, group| reduce_normal_eqns(group),
    )?;
    log::info!("reducer combined into {} per-fold rows", reduced.len());

    let models = backend.group_apply(
        reduced,
        |row| row.fit_key(),
        |key, group| solve_normal_eqns(key, group, alphas, labels.label_names()),
    )?;
    log::info!("solver produced {} model rows", models.len());
    Ok(models)
}

/// Feature-space reduction: fits one ridge model per header block, fold,
/// penalty, and label, then replaces each block's headers with the models'
/// prediction columns.
#[derive(Debug, Clone)]
pub struct RidgeReducer {
    alphas: AlphaMap,
}

impl RidgeReducer {
    pub fn new(alphas: &[f64]) -> Result<Self, RidgeError> {
        Ok(Self {
            alphas: AlphaMap::new(alphas)?,
        })
    }

    pub fn alphas(&self) -> &AlphaMap {
        &self.alphas
    }

    /// Fits the reducer model: one coefficient row per header, fold, and
    /// penalty, per header block.
    pub fn fit<B: KeyedBackend>(
        &self,
        backend: &B,
        block_rows: Vec<BlockRow>,
        labels: &LabelMatrix,
        sample_blocks: &SampleBlocks,
        covariates: &CovariateMatrix,
    ) -> Result<Vec<ModelRow>, RidgeError> {
        validate_block_table(&block_rows)?;
        log::info!(
            "reduction fit: {} block rows, {} folds, {} penalties",
            block_rows.len(),
            sample_blocks.len(),
            self.alphas.len()
        );
        fit_models(
            backend,
            block_rows,
            labels,
            sample_blocks,
            covariates,
            &self.alphas,
            true,
        )
    }

    /// Transforms the block matrix into the reduced matrix: every penalty
    /// is retained as a parallel output column.
    pub fn transform<B: KeyedBackend>(
        &self,
        backend: &B,
        block_rows: Vec<BlockRow>,
        labels: &LabelMatrix,
        sample_blocks: &SampleBlocks,
        model_rows: Vec<ModelRow>,
        covariates: &CovariateMatrix,
    ) -> Result<Vec<ReducedRow>, RidgeError> {
        validate_block_table(&block_rows)?;
        let joined = block_rows
            .into_iter()
            .map(Joined::Block)
            .chain(model_rows.into_iter().map(Joined::Model))
            .collect();
        backend.group_apply(
            joined,
            |record| match record {
                Joined::Block(row) => block_fit_key(row, true),
                Joined::Model(row) => model_fit_key(row, true),
            },
            |key, group| {
                let (blocks, models) = split_joined(group);
                apply_model(
                    key,
                    &blocks,
                    &models,
                    labels.label_names(),
                    sample_blocks,
                    covariates,
                    &self.alphas,
                )
            },
        )
    }
}

/// Full ridge regression with leave-one-fold-out cross-validation.
#[derive(Debug, Clone)]
pub struct RidgeRegression {
    alphas: AlphaMap,
}

impl RidgeRegression {
    pub fn new(alphas: &[f64]) -> Result<Self, RidgeError> {
        Ok(Self {
            alphas: AlphaMap::new(alphas)?,
        })
    }

    pub fn alphas(&self) -> &AlphaMap {
        &self.alphas
    }

    /// Fits one model per fold and penalty spanning every header block,
    /// scores each fold's held-out predictions, and selects the best
    /// penalty per label. Returns the model table and the CV table.
    ///
    /// With a single sample block the leave-one-fold-out statistics are
    /// all-zero and cross-validation is undefined; the fit surfaces this as
    /// a `SingularSystem` when a zero penalty is requested.
    pub fn fit<B: KeyedBackend>(
        &self,
        backend: &B,
        block_rows: Vec<BlockRow>,
        labels: &LabelMatrix,
        sample_blocks: &SampleBlocks,
        covariates: &CovariateMatrix,
    ) -> Result<(Vec<ModelRow>, Vec<CvRow>), RidgeError> {
        validate_block_table(&block_rows)?;
        log::info!(
            "regression fit: {} block rows, {} folds, {} penalties",
            block_rows.len(),
            sample_blocks.len(),
            self.alphas.len()
        );
        let models = fit_models(
            backend,
            block_rows.clone(),
            labels,
            sample_blocks,
            covariates,
            &self.alphas,
            false,
        )?;

        let joined = block_rows
            .into_iter()
            .map(Joined::Block)
            .chain(models.iter().cloned().map(Joined::Model))
            .collect();
        let fold_scores = backend.group_apply(
            joined,
            |record| match record {
                Joined::Block(row) => block_fit_key(row, false),
                Joined::Model(row) => model_fit_key(row, false),
            },
            |key, group| {
                let (blocks, group_models) = split_joined(group);
                score_fold(
                    key,
                    &blocks,
                    &group_models,
                    labels,
                    sample_blocks,
                    covariates,
                    &self.alphas,
                )
            },
        )?;
        let means = mean_scores(&fold_scores);
        let cv = select_best(&means, &self.alphas)?;
        for row in &cv {
            log::info!(
                "selected {} for label '{}' (mean out-of-fold r2 = {:.4})",
                row.alpha_id,
                row.label,
                row.r2_mean
            );
        }
        Ok((models, cv))
    }

    /// Predicts every sample at its label's selected penalty.
    pub fn transform<B: KeyedBackend>(
        &self,
        backend: &B,
        block_rows: Vec<BlockRow>,
        labels: &LabelMatrix,
        sample_blocks: &SampleBlocks,
        model_rows: Vec<ModelRow>,
        cv_rows: &[CvRow],
        covariates: &CovariateMatrix,
    ) -> Result<Vec<PredictionRow>, RidgeError> {
        validate_block_table(&block_rows)?;
        let joined = block_rows
            .into_iter()
            .map(Joined::Block)
            .chain(model_rows.into_iter().map(Joined::Model))
            .collect();
        backend.group_apply(
            joined,
            |record| match record {
                Joined::Block(row) => block_fit_key(row, false),
                Joined::Model(row) => model_fit_key(row, false),
            },
            |key, group| {
                let (blocks, models) = split_joined(group);
                predict_selected(
                    key,
                    &blocks,
                    &models,
                    labels.label_names(),
                    sample_blocks,
                    covariates,
                    &self.alphas,
                    cv_rows,
                )
            },
        )
    }
}
