// ========================================================================================
//                             Shared Data Contracts
// ========================================================================================

// This file is only for types that pass between pipeline stages; types used
// by a single stage live next to that stage.

use crate::error::RidgeError;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered, validated penalty set with stable identifiers.
///
/// Built once per pipeline run and threaded explicitly through every stage,
/// so `alpha_0, alpha_1, …` mean the same thing in the model table, the CV
/// table, and every output table, and joins on `alpha_id` are exact string
/// matches rather than numeric comparisons.
#[derive(Debug, Clone, PartialEq)]
pub struct AlphaMap {
    entries: Vec<(String, f64)>,
}

impl AlphaMap {
    /// Validates and enumerates the penalty set. Identifiers follow the
    /// input enumeration order.
    pub fn new(values: &[f64]) -> Result<Self, RidgeError> {
        if values.is_empty() {
            return Err(RidgeError::InvalidConfiguration(
                "the penalty set must contain at least one value".to_string(),
            ));
        }
        if let Some(bad) = values.iter().find(|v| !(**v >= 0.0)) {
            return Err(RidgeError::InvalidConfiguration(format!(
                "penalty values must all be non-negative and finite, got {bad}"
            )));
        }
        let entries = values
            .iter()
            .enumerate()
            .map(|(i, &a)| (format!("alpha_{i}"), a))
            .collect();
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates `(alpha_id, value)` pairs in enumeration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(id, a)| (id.as_str(), *a))
    }

    pub fn value_of(&self, alpha_id: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(id, _)| id == alpha_id)
            .map(|(_, a)| *a)
    }

    /// The smallest penalty in the set.
    pub fn min_value(&self) -> f64 {
        self.entries
            .iter()
            .map(|(_, a)| *a)
            .fold(f64::INFINITY, f64::min)
    }
}

/// Whether the block table carries a `label` key dimension.
///
/// Resolved once at pipeline construction from the input rows, instead of
/// re-inspecting column presence inside every stage. Mixed tagging across
/// rows is a schema mismatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySchema {
    WithLabelDimension,
    WithoutLabelDimension,
}

impl KeySchema {
    pub fn resolve(rows: &[BlockRow]) -> Result<Self, RidgeError> {
        let mut labeled = 0usize;
        for row in rows {
            if row.label.is_some() {
                labeled += 1;
            }
        }
        if labeled == 0 {
            Ok(KeySchema::WithoutLabelDimension)
        } else if labeled == rows.len() {
            Ok(KeySchema::WithLabelDimension)
        } else {
            Err(RidgeError::SchemaMismatch(format!(
                "label tag present on {labeled} of {} block rows; it must be on all or none",
                rows.len()
            )))
        }
    }
}

/// Map/solve group key: one fit per `(scope, sample_block[, label])`.
///
/// `scope` is the header block the fit is confined to; `None` means the fit
/// spans every header block (full-regression mode). `sample_block` names the
/// fold the fitted model is evaluated on, i.e. the fold whose samples the
/// underlying statistics exclude.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FitKey {
    pub scope: Option<String>,
    pub sample_block: String,
    pub label: Option<String>,
}

impl fmt::Display for FitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(hb) => write!(f, "header_block={hb}, ")?,
            None => {}
        }
        write!(f, "sample_block={}", self.sample_block)?;
        if let Some(label) = &self.label {
            write!(f, ", label={label}")?;
        }
        Ok(())
    }
}

/// Reduce group key: all folds' contributions for one header land together.
/// Carries the header's own block so equal header names in distinct header
/// blocks never merge, even when the fit scope spans all blocks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ReduceKey {
    pub scope: Option<String>,
    pub header_block: String,
    pub header: String,
    pub label: Option<String>,
}

/// One row of the input block table: one header's values across the samples
/// of one sample block, in membership order. `sort_key` gives the stable
/// column order of headers within a fit group and must be non-negative
/// (negative keys are reserved for covariate rows created internally).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockRow {
    pub header_block: String,
    pub sample_block: String,
    pub header: String,
    pub label: Option<String>,
    pub sort_key: i64,
    pub values: Vec<f64>,
}

/// One row of a normal-equation contribution: the `header` row of `XᵀX` and
/// `XᵀY`, destined for the model that holds out `fold`. Produced by the
/// mapper, summed per fold by the reducer, consumed by the solver.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalEqnRow {
    pub scope: Option<String>,
    pub fold: String,
    pub header_block: String,
    pub header: String,
    pub label: Option<String>,
    pub sort_key: i64,
    pub xtx_row: Array1<f64>,
    pub xty_row: Array1<f64>,
}

impl NormalEqnRow {
    pub fn reduce_key(&self) -> ReduceKey {
        ReduceKey {
            scope: self.scope.clone(),
            header_block: self.header_block.clone(),
            header: self.header.clone(),
            label: self.label.clone(),
        }
    }

    pub fn fit_key(&self) -> FitKey {
        FitKey {
            scope: self.scope.clone(),
            sample_block: self.fold.clone(),
            label: self.label.clone(),
        }
    }
}

/// One fitted coefficient row: `coefficients` holds one value per label
/// (a single value when the fit key carried a label). `sample_block` names
/// the fold the row's statistics excluded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRow {
    pub header_block: String,
    pub sample_block: String,
    pub header: String,
    pub label: Option<String>,
    pub alpha_id: String,
    pub sort_key: i64,
    pub coefficients: Vec<f64>,
}

/// Cross-validation outcome: the selected penalty for one label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvRow {
    pub label: String,
    pub alpha_id: String,
    pub r2_mean: f64,
}

/// One reduced-matrix output column: the ridge predictions of one
/// `(header_block, label, alpha)` model for the samples of one sample block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReducedRow {
    pub header_block: String,
    pub sample_block: String,
    pub label: String,
    pub alpha_id: String,
    pub values: Vec<f64>,
}

/// One prediction output row: fitted values for one sample block and label
/// at that label's selected penalty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRow {
    pub sample_block: String,
    pub label: String,
    pub alpha_id: String,
    pub values: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alpha_ids_follow_enumeration_order() {
        let alphas = AlphaMap::new(&[10.0, 0.0, 3.5]).unwrap();
        let pairs: Vec<_> = alphas.iter().collect();
        assert_eq!(
            pairs,
            vec![("alpha_0", 10.0), ("alpha_1", 0.0), ("alpha_2", 3.5)]
        );
        assert_eq!(alphas.value_of("alpha_2"), Some(3.5));
        assert_eq!(alphas.min_value(), 0.0);
    }

    #[test]
    fn negative_or_empty_penalties_are_rejected() {
        assert!(matches!(
            AlphaMap::new(&[]),
            Err(RidgeError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            AlphaMap::new(&[1.0, -0.5]),
            Err(RidgeError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            AlphaMap::new(&[f64::NAN]),
            Err(RidgeError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn key_schema_rejects_mixed_label_tagging() {
        let row = |label: Option<&str>| BlockRow {
            header_block: "hb0".to_string(),
            sample_block: "s0".to_string(),
            header: "x0".to_string(),
            label: label.map(str::to_string),
            sort_key: 0,
            values: vec![1.0],
        };
        assert_eq!(
            KeySchema::resolve(&[row(None), row(None)]).unwrap(),
            KeySchema::WithoutLabelDimension
        );
        assert_eq!(
            KeySchema::resolve(&[row(Some("y")), row(Some("y"))]).unwrap(),
            KeySchema::WithLabelDimension
        );
        assert!(KeySchema::resolve(&[row(None), row(Some("y"))]).is_err());
    }
}
