//! In-memory collaborator fakes shared by the unit tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use coldpack_types::{ArchivingStatus, Dataset, DatasetCode, Result};

use crate::services::{
    ArchiveResubmission, DatasetAccessNotifier, DatasetBookkeeper, DatasetDeleter,
    FreeSpaceProvider, StatusUpdater,
};

/// Records every status update the engine emits, in call order.
#[derive(Default)]
pub struct RecordingStatusUpdater {
    pub updates: Mutex<Vec<(Vec<DatasetCode>, ArchivingStatus, bool)>>,
}

impl RecordingStatusUpdater {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn last(&self) -> Option<(Vec<DatasetCode>, ArchivingStatus, bool)> {
        self.updates.lock().unwrap().last().cloned()
    }

    pub fn all(&self) -> Vec<(Vec<DatasetCode>, ArchivingStatus, bool)> {
        self.updates.lock().unwrap().clone()
    }
}

impl StatusUpdater for RecordingStatusUpdater {
    fn update(
        &self,
        codes: &[DatasetCode],
        status: ArchivingStatus,
        present_in_archive: bool,
    ) -> Result<()> {
        self.updates
            .lock()
            .unwrap()
            .push((codes.to_vec(), status, present_in_archive));
        Ok(())
    }
}

/// Records scheduled share-copy deletions.
#[derive(Default)]
pub struct RecordingDeleter {
    pub scheduled: Mutex<Vec<Vec<DatasetCode>>>,
}

impl RecordingDeleter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scheduled_codes(&self) -> Vec<Vec<DatasetCode>> {
        self.scheduled.lock().unwrap().clone()
    }
}

impl DatasetDeleter for RecordingDeleter {
    fn schedule_deletion(
        &self,
        codes: &[DatasetCode],
        _max_retries: u32,
        _retry_wait_secs: u64,
    ) -> Result<()> {
        self.scheduled.lock().unwrap().push(codes.to_vec());
        Ok(())
    }
}

/// Records datasets resubmitted for re-archiving.
#[derive(Default)]
pub struct RecordingResubmission {
    pub resubmitted: Mutex<Vec<Vec<DatasetCode>>>,
}

impl RecordingResubmission {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn all(&self) -> Vec<Vec<DatasetCode>> {
        self.resubmitted.lock().unwrap().clone()
    }
}

impl ArchiveResubmission for RecordingResubmission {
    fn resubmit(&self, codes: &[DatasetCode]) -> Result<()> {
        self.resubmitted.lock().unwrap().push(codes.to_vec());
        Ok(())
    }
}

/// Records access notifications for restored datasets.
#[derive(Default)]
pub struct RecordingAccessNotifier {
    pub notified: Mutex<Vec<DatasetCode>>,
}

impl RecordingAccessNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn all(&self) -> Vec<DatasetCode> {
        self.notified.lock().unwrap().clone()
    }
}

impl DatasetAccessNotifier for RecordingAccessNotifier {
    fn notify_access(&self, code: &DatasetCode) -> Result<()> {
        self.notified.lock().unwrap().push(code.clone());
        Ok(())
    }
}

/// Bookkeeper that accepts everything.
#[derive(Debug, Default)]
pub struct NullBookkeeper;

impl DatasetBookkeeper for NullBookkeeper {
    fn update_share_and_size(&self, _code: &DatasetCode, _share_id: &str, _size: u64) -> Result<()> {
        Ok(())
    }
}

/// Free-space provider returning a fixed value, adjustable at runtime.
pub struct FixedFreeSpace {
    kb: AtomicU64,
}

impl FixedFreeSpace {
    pub fn new(kb: u64) -> Arc<Self> {
        Arc::new(Self {
            kb: AtomicU64::new(kb),
        })
    }

    pub fn set_kb(&self, kb: u64) {
        self.kb.store(kb, Ordering::SeqCst);
    }
}

impl FreeSpaceProvider for FixedFreeSpace {
    fn free_space_kb(&self, _path: &Path) -> Result<u64> {
        Ok(self.kb.load(Ordering::SeqCst))
    }
}

/// Write a dataset directory under `share` and return its descriptor.
pub fn write_dataset(share: &Path, code: &str, files: &[(&str, &[u8])]) -> Dataset {
    let root = share.join(code);
    std::fs::create_dir_all(&root).unwrap();
    for (rel, data) in files {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }
    let size = crate::fileops::directory_size(&root).unwrap();
    Dataset {
        code: DatasetCode::from(code),
        experiment: "EXP-1".into(),
        dataset_type: "RAW".into(),
        sample: None,
        size_in_bytes: Some(size),
        share_id: Some("share-1".into()),
        location: root,
    }
}

/// A dataset descriptor of the given size with no backing files.
pub fn dataset_descriptor(code: &str, size: u64) -> Dataset {
    Dataset {
        code: DatasetCode::from(code),
        experiment: "EXP-1".into(),
        dataset_type: "RAW".into(),
        sample: None,
        size_in_bytes: Some(size),
        share_id: Some("share-1".into()),
        location: PathBuf::from(format!("/share-1/{code}")),
    }
}
