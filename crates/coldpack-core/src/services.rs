//! Collaborator contracts consumed by the engine.
//!
//! The surrounding system resolves these through its own composition layer;
//! the engine takes them as explicit constructor parameters instead of a
//! process-wide service locator.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use coldpack_types::{ArchivingStatus, ColdpackError, DatasetCode, Result};

/// Serializes concurrent archive attempts on the same dataset so that two
/// orchestrator invocations never read an in-flux share copy.
pub trait LockManager: Send + Sync {
    fn lock(&self, code: &DatasetCode) -> Result<()>;
    fn release_lock(&self, code: &DatasetCode);
}

/// Free-space probe for a destination path, in kilobytes.
pub trait FreeSpaceProvider: Send + Sync {
    fn free_space_kb(&self, path: &Path) -> Result<u64>;
}

/// Schedules physical deletion of dataset share copies through the
/// surrounding system's retry machinery.
pub trait DatasetDeleter: Send + Sync {
    fn schedule_deletion(
        &self,
        codes: &[DatasetCode],
        max_retries: u32,
        retry_wait_secs: u64,
    ) -> Result<()>;
}

/// Pushes archiving-status transitions back into the dataset catalog.
/// Updates are batched: one call per status value per batch.
pub trait StatusUpdater: Send + Sync {
    fn update(
        &self,
        codes: &[DatasetCode],
        status: ArchivingStatus,
        present_in_archive: bool,
    ) -> Result<()>;
}

/// Informs the surrounding system that a restored dataset is accessible on a
/// share again.
pub trait DatasetAccessNotifier: Send + Sync {
    fn notify_access(&self, code: &DatasetCode) -> Result<()>;
}

/// Measures a single dataset's on-disk root size. Used to patch unknown
/// sizes before grouping or validation.
pub trait DatasetContentProvider: Send + Sync {
    fn size_on_disk(&self, code: &DatasetCode) -> Result<u64>;
}

/// Records the current share id and measured size of a dataset in the
/// catalog before it is packed.
pub trait DatasetBookkeeper: Send + Sync {
    fn update_share_and_size(&self, code: &DatasetCode, share_id: &str, size: u64) -> Result<()>;
}

/// Re-submits datasets for individual re-archiving after a replication
/// failure tore their container down.
pub trait ArchiveResubmission: Send + Sync {
    fn resubmit(&self, codes: &[DatasetCode]) -> Result<()>;
}

/// In-process lock manager: a mutexed set of held codes.
#[derive(Debug, Default)]
pub struct ProcessLockManager {
    held: Mutex<HashSet<DatasetCode>>,
}

impl ProcessLockManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockManager for ProcessLockManager {
    fn lock(&self, code: &DatasetCode) -> Result<()> {
        let mut held = match self.held.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !held.insert(code.clone()) {
            return Err(ColdpackError::Locked(code.to_string()));
        }
        Ok(())
    }

    fn release_lock(&self, code: &DatasetCode) {
        let mut held = match self.held.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        held.remove(code);
    }
}

/// Free-space provider backed by statvfs.
#[cfg(unix)]
#[derive(Debug, Default)]
pub struct StatvfsFreeSpaceProvider;

#[cfg(unix)]
impl FreeSpaceProvider for StatvfsFreeSpaceProvider {
    fn free_space_kb(&self, path: &Path) -> Result<u64> {
        let stat = nix::sys::statvfs::statvfs(path)
            .map_err(|e| ColdpackError::Other(format!("statvfs({}): {e}", path.display())))?;
        let bytes = stat.blocks_available() as u64 * stat.fragment_size() as u64;
        Ok(bytes / 1024)
    }
}
