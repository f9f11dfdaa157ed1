//! Block catalog and broadcast tables.
//!
//! The catalog describes how samples are partitioned into blocks (each block
//! doubling as one cross-validation fold). The label and covariate matrices
//! are dense, in-memory, read-only tables shared by every worker for the
//! lifetime of a pipeline run; they are built once from long-format triples
//! and indexed by sample identifier.

use crate::error::RidgeError;
use ahash::AHashMap;
use ndarray::Array2;

/// Partition of the sample set into named, ordered blocks.
#[derive(Debug, Clone)]
pub struct SampleBlocks {
    order: Vec<String>,
    members: AHashMap<String, Vec<String>>,
}

impl SampleBlocks {
    /// Builds the partition, rejecting duplicate sample membership eagerly.
    /// Block iteration order follows the input order.
    pub fn new(blocks: Vec<(String, Vec<String>)>) -> Result<Self, RidgeError> {
        if blocks.is_empty() {
            return Err(RidgeError::InvalidConfiguration(
                "at least one sample block is required".to_string(),
            ));
        }
        let mut order = Vec::with_capacity(blocks.len());
        let mut members = AHashMap::with_capacity(blocks.len());
        let mut seen: AHashMap<&str, &str> = AHashMap::new();
        for (name, samples) in &blocks {
            if members.contains_key(name) {
                return Err(RidgeError::InvalidConfiguration(format!(
                    "sample block '{name}' is declared twice"
                )));
            }
            for sample in samples {
                if let Some(other) = seen.insert(sample.as_str(), name.as_str()) {
                    return Err(RidgeError::InvalidConfiguration(format!(
                        "sample '{sample}' appears in blocks '{other}' and '{name}'"
                    )));
                }
            }
            order.push(name.clone());
            members.insert(name.clone(), samples.clone());
        }
        Ok(Self { order, members })
    }

    /// Block names in declaration order.
    pub fn names(&self) -> &[String] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn members(&self, block: &str) -> Option<&[String]> {
        self.members.get(block).map(Vec::as_slice)
    }

    /// Block names other than `block`, in declaration order.
    pub fn other_blocks<'a>(&'a self, block: &'a str) -> impl Iterator<Item = &'a str> {
        self.order
            .iter()
            .map(String::as_str)
            .filter(move |name| *name != block)
    }

    pub fn total_samples(&self) -> usize {
        self.members.values().map(Vec::len).sum()
    }
}

/// Dense sample × column matrix pivoted from `(sample_id, column, value)`
/// triples. Row and column order follow first appearance in the input.
#[derive(Debug, Clone)]
struct PivotedTable {
    columns: Vec<String>,
    column_index: AHashMap<String, usize>,
    sample_index: AHashMap<String, usize>,
    values: Array2<f64>,
}

impl PivotedTable {
    fn from_triples(kind: &str, triples: &[(String, String, f64)]) -> Result<Self, RidgeError> {
        let mut columns: Vec<String> = Vec::new();
        let mut column_index: AHashMap<String, usize> = AHashMap::new();
        let mut samples: Vec<String> = Vec::new();
        let mut sample_index: AHashMap<String, usize> = AHashMap::new();
        for (sample, column, _) in triples {
            column_index.entry(column.clone()).or_insert_with(|| {
                columns.push(column.clone());
                columns.len() - 1
            });
            sample_index.entry(sample.clone()).or_insert_with(|| {
                samples.push(sample.clone());
                samples.len() - 1
            });
        }
        let mut values = Array2::from_elem((samples.len(), columns.len()), f64::NAN);
        for (sample, column, value) in triples {
            let i = sample_index[sample.as_str()];
            let j = column_index[column.as_str()];
            values[[i, j]] = *value;
        }
        if let Some(((i, j), _)) = values.indexed_iter().find(|(_, v)| v.is_nan()) {
            return Err(RidgeError::SchemaMismatch(format!(
                "{kind} table is not dense: sample '{}' has no value for '{}'",
                samples[i], columns[j]
            )));
        }
        Ok(Self {
            columns,
            column_index,
            sample_index,
            values,
        })
    }

    /// Materializes the rows for `samples`, in the given order. A sample
    /// missing from the table is a schema mismatch.
    fn gather(&self, kind: &str, samples: &[String]) -> Result<Array2<f64>, RidgeError> {
        let mut out = Array2::zeros((samples.len(), self.columns.len()));
        for (i, sample) in samples.iter().enumerate() {
            let row = self.sample_index.get(sample).ok_or_else(|| {
                RidgeError::SchemaMismatch(format!(
                    "sample '{sample}' has no row in the {kind} table"
                ))
            })?;
            out.row_mut(i).assign(&self.values.row(*row));
        }
        Ok(out)
    }
}

/// Dense sample × label matrix, broadcast read-only to every stage.
#[derive(Debug, Clone)]
pub struct LabelMatrix {
    table: PivotedTable,
}

impl LabelMatrix {
    pub fn from_triples(triples: &[(String, String, f64)]) -> Result<Self, RidgeError> {
        if triples.is_empty() {
            return Err(RidgeError::SchemaMismatch(
                "label table is empty".to_string(),
            ));
        }
        Ok(Self {
            table: PivotedTable::from_triples("label", triples)?,
        })
    }

    pub fn label_names(&self) -> &[String] {
        &self.table.columns
    }

    pub fn label_index(&self, label: &str) -> Option<usize> {
        self.table.column_index.get(label).copied()
    }

    /// Label rows for `samples`, shape `samples.len() × n_labels`.
    pub fn gather(&self, samples: &[String]) -> Result<Array2<f64>, RidgeError> {
        self.table.gather("label", samples)
    }
}

/// Optional dense sample × covariate matrix. Covariate columns enter every
/// model unpenalized; an empty matrix means no covariates.
#[derive(Debug, Clone)]
pub struct CovariateMatrix {
    table: Option<PivotedTable>,
}

impl CovariateMatrix {
    pub fn empty() -> Self {
        Self { table: None }
    }

    pub fn from_triples(triples: &[(String, String, f64)]) -> Result<Self, RidgeError> {
        if triples.is_empty() {
            return Ok(Self::empty());
        }
        Ok(Self {
            table: Some(PivotedTable::from_triples("covariate", triples)?),
        })
    }

    pub fn names(&self) -> &[String] {
        self.table.as_ref().map(|t| t.columns.as_slice()).unwrap_or(&[])
    }

    pub fn n_covariates(&self) -> usize {
        self.names().len()
    }

    /// Covariate rows for `samples`, shape `samples.len() × n_covariates`
    /// (zero columns when no covariates were supplied).
    pub fn gather(&self, samples: &[String]) -> Result<Array2<f64>, RidgeError> {
        match &self.table {
            Some(table) => table.gather("covariate", samples),
            None => Ok(Array2::zeros((samples.len(), 0))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triples(rows: &[(&str, &str, f64)]) -> Vec<(String, String, f64)> {
        rows.iter()
            .map(|(s, c, v)| (s.to_string(), c.to_string(), *v))
            .collect()
    }

    #[test]
    fn overlapping_sample_blocks_are_rejected() {
        let err = SampleBlocks::new(vec![
            ("s0".to_string(), vec!["a".to_string(), "b".to_string()]),
            ("s1".to_string(), vec!["b".to_string()]),
        ])
        .unwrap_err();
        assert!(matches!(err, RidgeError::InvalidConfiguration(_)));
    }

    #[test]
    fn other_blocks_excludes_the_named_fold() {
        let blocks = SampleBlocks::new(vec![
            ("s0".to_string(), vec!["a".to_string()]),
            ("s1".to_string(), vec!["b".to_string()]),
            ("s2".to_string(), vec!["c".to_string()]),
        ])
        .unwrap();
        let others: Vec<_> = blocks.other_blocks("s1").collect();
        assert_eq!(others, vec!["s0", "s2"]);
        assert_eq!(blocks.total_samples(), 3);
    }

    #[test]
    fn label_matrix_pivots_in_first_appearance_order() {
        let labels = LabelMatrix::from_triples(&triples(&[
            ("a", "y0", 1.0),
            ("a", "y1", 2.0),
            ("b", "y0", 3.0),
            ("b", "y1", 4.0),
        ]))
        .unwrap();
        assert_eq!(labels.label_names(), &["y0".to_string(), "y1".to_string()]);
        let rows = labels
            .gather(&["b".to_string(), "a".to_string()])
            .unwrap();
        assert_eq!(rows[[0, 0]], 3.0);
        assert_eq!(rows[[1, 1]], 2.0);
    }

    #[test]
    fn sparse_label_table_is_a_schema_mismatch() {
        let err = LabelMatrix::from_triples(&triples(&[
            ("a", "y0", 1.0),
            ("b", "y1", 4.0),
        ]))
        .unwrap_err();
        assert!(matches!(err, RidgeError::SchemaMismatch(_)));
    }

    #[test]
    fn missing_sample_surfaces_at_gather_time() {
        let labels = LabelMatrix::from_triples(&triples(&[("a", "y0", 1.0)])).unwrap();
        assert!(labels.gather(&["z".to_string()]).is_err());
    }

    #[test]
    fn empty_covariates_gather_to_zero_columns() {
        let cov = CovariateMatrix::empty();
        let rows = cov.gather(&["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(rows.dim(), (2, 0));
    }
}
