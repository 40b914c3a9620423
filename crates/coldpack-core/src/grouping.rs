//! Size-bounded selection of archivable dataset batches.
//!
//! Not a bin-packing optimizer: grouping is greedy, deterministic and keeps
//! the stable input order. Candidates are grouped by (experiment, type),
//! sub-grouped by sample when a type group would exceed the maximum, and each
//! group either fits as a whole, contributes its longest in-order prefix that
//! fits, or is dropped when it cannot reach the minimum. Members left over
//! from an oversized group are not selected in this run; a later sweep picks
//! them up once enough siblings accumulate.

use std::sync::Arc;

use tracing::{debug, info};

use coldpack_types::{Dataset, Result};

use crate::services::DatasetContentProvider;

/// Grouping policy with configured per-container size bounds.
pub struct GroupingPolicy {
    min_archive_size: u64,
    max_archive_size: u64,
    content_provider: Arc<dyn DatasetContentProvider>,
}

impl GroupingPolicy {
    pub fn new(
        min_archive_size: u64,
        max_archive_size: u64,
        content_provider: Arc<dyn DatasetContentProvider>,
    ) -> Self {
        Self {
            min_archive_size,
            max_archive_size,
            content_provider,
        }
    }

    /// Partition `candidates` into archivable batches. The union of the
    /// returned batches is a subset of the input; no batch exceeds the
    /// maximum; no batch falls under the minimum.
    pub fn filter(&self, candidates: Vec<Dataset>) -> Result<Vec<Vec<Dataset>>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let candidates = self.patch_unknown_sizes(candidates)?;

        let mut batches = Vec::new();
        for group in group_by_key(candidates, |d| (d.experiment.clone(), d.dataset_type.clone())) {
            let total: u64 = group.iter().map(Dataset::size_or_zero).sum();
            if total > self.max_archive_size {
                // Oversized type group: fall back to per-sample groups.
                for sample_group in group_by_key(group, |d| d.sample.clone()) {
                    if let Some(batch) = self.select_from_group(sample_group) {
                        batches.push(batch);
                    }
                }
            } else if let Some(batch) = self.select_from_group(group) {
                batches.push(batch);
            }
        }
        Ok(batches)
    }

    /// Query the content provider for every candidate whose reported size is
    /// unknown and patch it in place.
    fn patch_unknown_sizes(&self, mut candidates: Vec<Dataset>) -> Result<Vec<Dataset>> {
        for dataset in &mut candidates {
            if dataset.size_in_bytes.is_none() {
                let size = self.content_provider.size_on_disk(&dataset.code)?;
                debug!(code = %dataset.code, size, "patched unknown dataset size from disk");
                dataset.size_in_bytes = Some(size);
            }
        }
        Ok(candidates)
    }

    /// Apply the size bounds to one group, returning at most one batch.
    fn select_from_group(&self, group: Vec<Dataset>) -> Option<Vec<Dataset>> {
        let total: u64 = group.iter().map(Dataset::size_or_zero).sum();

        if total < self.min_archive_size {
            info!(
                total,
                min = self.min_archive_size,
                "dropping group below the minimum archive size"
            );
            return None;
        }
        if total <= self.max_archive_size {
            return Some(group);
        }

        // Oversized: peel off the longest in-order prefix that still fits.
        // The remainder stays unselected until a later run.
        let mut batch = Vec::new();
        let mut batch_size = 0u64;
        let mut left_behind = 0usize;
        for dataset in group {
            let size = dataset.size_or_zero();
            if batch_size + size <= self.max_archive_size {
                batch_size += size;
                batch.push(dataset);
            } else {
                left_behind += 1;
            }
        }
        debug!(
            selected = batch.len(),
            left_behind, batch_size, "split oversized group"
        );

        if batch_size < self.min_archive_size {
            info!(
                batch_size,
                min = self.min_archive_size,
                "dropping undersized remainder of an oversized group"
            );
            return None;
        }
        Some(batch)
    }
}

/// Stable grouping: groups appear in first-seen key order, members keep
/// their input order.
fn group_by_key<K, F>(datasets: Vec<Dataset>, key_of: F) -> Vec<Vec<Dataset>>
where
    K: PartialEq,
    F: Fn(&Dataset) -> K,
{
    let mut keys: Vec<K> = Vec::new();
    let mut groups: Vec<Vec<Dataset>> = Vec::new();
    for dataset in datasets {
        let key = key_of(&dataset);
        match keys.iter().position(|k| *k == key) {
            Some(idx) => groups[idx].push(dataset),
            None => {
                keys.push(key);
                groups.push(vec![dataset]);
            }
        }
    }
    groups
}
