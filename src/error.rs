//! Crate-wide error taxonomy.
//!
//! Configuration and schema problems are raised eagerly, before any grouped
//! work starts. Numerical failures are scoped to the group that produced
//! them: the failing key travels with the error, sibling groups finish
//! undisturbed, and the overall fit aborts once the failure surfaces past
//! aggregation. The computation is deterministic, so nothing is retried.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RidgeError {
    /// Bad caller input detected before any distributed work: a negative or
    /// empty penalty set, or sample blocks that fail to partition the
    /// sample set.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The normal-equation matrix for one fit group was not positive-definite
    /// at a requested penalty. Scoped to the named group; other groups are
    /// unaffected.
    #[error(
        "normal equations are singular for group [{key}] at {alpha_id} (alpha = {alpha}): {source}"
    )]
    SingularSystem {
        key: String,
        alpha_id: String,
        alpha: f64,
        #[source]
        source: ndarray_linalg::error::LinalgError,
    },

    /// The block table or a broadcast table does not have the shape the
    /// pipeline was configured for: mixed label tagging, a negative sort
    /// key, ragged value vectors, or a sample missing from the label or
    /// covariate matrix.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
}
