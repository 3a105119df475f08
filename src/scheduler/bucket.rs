//! Size buckets: how many documents of a given cost run at once, and with how
//! many solver threads each.

use crate::error::{Error, Result};
use capcoref_core::Document;
use serde::{Deserialize, Serialize};

/// Solve cost of a document with `n` mentions and `b` boxes: `n(n-1) + n*b`.
///
/// Counts the ordered mention pairs plus mention-box pairs, the number of
/// decisions a joint solve makes.
#[must_use]
pub fn estimate_cost(doc: &Document) -> usize {
    let n = doc.len();
    n * n.saturating_sub(1) + n * doc.boxes.len()
}

/// One size class of documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    /// Largest cost admitted. `None` admits everything.
    pub max_cost: Option<usize>,
    /// Documents solved concurrently.
    pub workers: usize,
    /// Solver threads granted to each worker.
    pub threads_per_worker: usize,
}

impl Bucket {
    /// Create a bucket.
    #[must_use]
    pub fn new(max_cost: Option<usize>, workers: usize, threads_per_worker: usize) -> Self {
        Self {
            max_cost,
            workers,
            threads_per_worker,
        }
    }

    /// Whether a document of `cost` belongs here.
    #[must_use]
    pub fn admits(&self, cost: usize) -> bool {
        self.max_cost.map_or(true, |max| cost <= max)
    }
}

/// Default buckets for a machine with `cpus` cores.
///
/// Small documents run one per core, single-threaded; medium ones share the
/// cores in groups of up to four threads; large ones run one at a time with
/// every core.
#[must_use]
pub fn default_buckets(cpus: usize) -> Vec<Bucket> {
    let cpus = cpus.max(1);
    let medium_threads = cpus.min(4);
    vec![
        Bucket::new(Some(90), cpus, 1),
        Bucket::new(Some(420), (cpus / medium_threads).max(1), medium_threads),
        Bucket::new(None, 1, cpus),
    ]
}

/// Get number of CPUs (fallback to 4).
pub(crate) fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(4)
}

/// Check a bucket list: non-empty, positive sizes, increasing bounds.
pub fn validate_buckets(buckets: &[Bucket]) -> Result<()> {
    if buckets.is_empty() {
        return Err(Error::invalid_config("at least one bucket is required"));
    }
    let mut previous: Option<usize> = None;
    for (i, bucket) in buckets.iter().enumerate() {
        if bucket.workers == 0 || bucket.threads_per_worker == 0 {
            return Err(Error::invalid_config(format!(
                "bucket {}: workers and threads_per_worker must be positive",
                i
            )));
        }
        match (previous, bucket.max_cost) {
            (_, None) if i + 1 != buckets.len() => {
                return Err(Error::invalid_config(format!(
                    "bucket {}: only the last bucket may be unbounded",
                    i
                )));
            }
            (Some(prev), Some(max)) if max <= prev => {
                return Err(Error::invalid_config(format!(
                    "bucket {}: max_cost {} does not exceed the previous bound {}",
                    i, max, prev
                )));
            }
            _ => {}
        }
        previous = bucket.max_cost;
    }
    Ok(())
}

/// Index of the bucket for a document of `cost`: the first that admits it,
/// else the last.
#[must_use]
pub fn bucket_for(buckets: &[Bucket], cost: usize) -> usize {
    buckets
        .iter()
        .position(|b| b.admits(cost))
        .unwrap_or(buckets.len().saturating_sub(1))
}
