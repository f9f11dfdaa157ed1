//! The keyed-grouping execution boundary.
//!
//! Every stage of the engine communicates through exactly one primitive: a
//! full shuffle that delivers all records sharing a key to one processing
//! unit, followed by an independent transformation of each group. The
//! substrate behind that primitive is a collaborator; the engine only
//! depends on the [`KeyedBackend`] contract.
//!
//! [`RayonBackend`] is the in-process reference implementation: groups are
//! formed in key order and handed to the rayon pool, one task per group,
//! with no shared mutable state between tasks. Broadcast inputs reach the
//! transformation as captured shared references, matching the read-only
//! broadcast semantics a cluster substrate would provide.

use crate::error::RidgeError;
use rayon::prelude::*;
use std::collections::BTreeMap;

/// A substrate able to group records by key and apply a transformation to
/// each group independently.
///
/// Contract: all records with equal keys are presented to a single
/// invocation of `transform`; invocations for distinct keys may run on any
/// worker in any order; the concatenated output preserves key order so runs
/// are deterministic. One group's failure must not corrupt sibling groups;
/// the first failure (in key order) is surfaced after the parallel pass.
pub trait KeyedBackend {
    fn group_apply<R, K, T, KF, F>(
        &self,
        records: Vec<R>,
        key_of: KF,
        transform: F,
    ) -> Result<Vec<T>, RidgeError>
    where
        R: Send,
        K: Ord + Send,
        T: Send,
        KF: Fn(&R) -> K,
        F: Fn(&K, Vec<R>) -> Result<Vec<T>, RidgeError> + Sync;
}

/// Local data-parallel substrate: one rayon task per key group.
#[derive(Debug, Clone, Copy, Default)]
pub struct RayonBackend;

impl KeyedBackend for RayonBackend {
    fn group_apply<R, K, T, KF, F>(
        &self,
        records: Vec<R>,
        key_of: KF,
        transform: F,
    ) -> Result<Vec<T>, RidgeError>
    where
        R: Send,
        K: Ord + Send,
        T: Send,
        KF: Fn(&R) -> K,
        F: Fn(&K, Vec<R>) -> Result<Vec<T>, RidgeError> + Sync,
    {
        let mut groups: BTreeMap<K, Vec<R>> = BTreeMap::new();
        for record in records {
            let key = key_of(&record);
            groups.entry(key).or_default().push(record);
        }
        log::debug!("shuffle produced {} key groups", groups.len());

        let results: Vec<Result<Vec<T>, RidgeError>> = groups
            .into_iter()
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|(key, group)| transform(&key, group))
            .collect();

        let mut out = Vec::new();
        for result in results {
            match result {
                Ok(mut rows) => out.append(&mut rows),
                Err(err) => {
                    log::error!("group transformation failed: {err}");
                    return Err(err);
                }
            }
        }
        Ok(out)
    }
}
