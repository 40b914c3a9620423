//! Replication finalization.
//!
//! After a container is copied to the final destination, a replica copy may
//! still be in flight. The finalizer is scheduled with the original and
//! replica paths and waits for byte parity before the batch counts as
//! durably archived. On timeout the container is structurally failed: its
//! metadata row is deleted and its datasets are resubmitted for individual
//! re-archiving rather than left in limbo.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, info, warn};

use coldpack_types::{ArchivingStatus, ColdpackError, DatasetCode, Result};

use crate::fileops::FileOperations;
use crate::metadata::{MetadataStore, MetadataTransaction};
use crate::services::{ArchiveResubmission, DatasetDeleter, StatusUpdater};
use crate::waiting::wait_until;

/// Retry settings handed to the dataset deleter once an archive copy is
/// confirmed durable.
pub(crate) const SHARE_DELETION_MAX_RETRIES: u32 = 11;
pub(crate) const SHARE_DELETION_RETRY_WAIT_SECS: u64 = 300;

pub const PARAM_ORIGINAL_FILE_PATH: &str = "original-file-path";
pub const PARAM_REPLICATED_FILE_PATH: &str = "replicated-file-path";
pub const PARAM_POLLING_TIME: &str = "finalizer-polling-time";
pub const PARAM_MAX_WAITING_TIME: &str = "finalizer-max-waiting-time";
pub const PARAM_STATUS: &str = "status";
pub const PARAM_START_TIME: &str = "start-time";

/// Parameters of one scheduled finalizer run, carried as a key/value map so
/// an external task scheduler can persist them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizerParams {
    pub original_file_path: PathBuf,
    pub replicated_file_path: PathBuf,
    pub polling_time: Duration,
    pub max_waiting_time: Duration,
    /// Terminal status applied on success: `ARCHIVED` for a first archive,
    /// `AVAILABLE` for a re-add to archive.
    pub status: ArchivingStatus,
    pub start_time: DateTime<Utc>,
}

impl FinalizerParams {
    pub fn to_map(&self) -> HashMap<String, String> {
        HashMap::from([
            (
                PARAM_ORIGINAL_FILE_PATH.to_string(),
                self.original_file_path.to_string_lossy().into_owned(),
            ),
            (
                PARAM_REPLICATED_FILE_PATH.to_string(),
                self.replicated_file_path.to_string_lossy().into_owned(),
            ),
            (
                PARAM_POLLING_TIME.to_string(),
                self.polling_time.as_millis().to_string(),
            ),
            (
                PARAM_MAX_WAITING_TIME.to_string(),
                self.max_waiting_time.as_millis().to_string(),
            ),
            (PARAM_STATUS.to_string(), self.status.to_string()),
            (
                PARAM_START_TIME.to_string(),
                self.start_time.timestamp_millis().to_string(),
            ),
        ])
    }

    pub fn from_map(map: &HashMap<String, String>) -> Result<Self> {
        fn required<'a>(map: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
            map.get(key)
                .map(String::as_str)
                .ok_or_else(|| ColdpackError::Config(format!("missing finalizer parameter '{key}'")))
        }
        let millis = |key: &str| -> Result<u64> {
            required(map, key)?
                .parse()
                .map_err(|_| ColdpackError::Config(format!("invalid finalizer parameter '{key}'")))
        };
        let start_millis: i64 = required(map, PARAM_START_TIME)?
            .parse()
            .map_err(|_| ColdpackError::Config("invalid finalizer start-time".into()))?;
        let start_time = Utc
            .timestamp_millis_opt(start_millis)
            .single()
            .ok_or_else(|| ColdpackError::Config("invalid finalizer start-time".into()))?;
        Ok(Self {
            original_file_path: PathBuf::from(required(map, PARAM_ORIGINAL_FILE_PATH)?),
            replicated_file_path: PathBuf::from(required(map, PARAM_REPLICATED_FILE_PATH)?),
            polling_time: Duration::from_millis(millis(PARAM_POLLING_TIME)?),
            max_waiting_time: Duration::from_millis(millis(PARAM_MAX_WAITING_TIME)?),
            status: required(map, PARAM_STATUS)?
                .parse()
                .map_err(ColdpackError::Config)?,
            start_time,
        })
    }
}

/// Hands a finalizer run to the external task scheduler.
pub trait FinalizerScheduler: Send + Sync {
    fn schedule(&self, params: FinalizerParams) -> Result<()>;
}

/// Outcome of one finalizer run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizerOutcome {
    /// Replica reached byte parity; batch is durably archived.
    Succeeded,
    /// Parity was not reached within the maximum wait; the container was
    /// unregistered and its datasets resubmitted.
    TimedOut,
}

pub struct ReplicationFinalizer {
    store: Arc<dyn MetadataStore>,
    file_ops: Arc<dyn FileOperations>,
    status: Arc<dyn StatusUpdater>,
    deleter: Arc<dyn DatasetDeleter>,
    resubmission: Arc<dyn ArchiveResubmission>,
}

impl ReplicationFinalizer {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        file_ops: Arc<dyn FileOperations>,
        status: Arc<dyn StatusUpdater>,
        deleter: Arc<dyn DatasetDeleter>,
        resubmission: Arc<dyn ArchiveResubmission>,
    ) -> Self {
        Self {
            store,
            file_ops,
            status,
            deleter,
            resubmission,
        }
    }

    /// Run one scheduled finalization to completion. The scheduler
    /// guarantees that no two runs for the same container overlap.
    pub fn run(&self, params: &FinalizerParams) -> Result<FinalizerOutcome> {
        let container_name = params
            .original_file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                ColdpackError::Config(format!(
                    "finalizer original path '{}' has no file name",
                    params.original_file_path.display()
                ))
            })?;
        let container = self
            .store
            .container_by_path(&container_name)?
            .ok_or_else(|| ColdpackError::ContainerNotFound(container_name.clone()))?;
        let members = self.store.datasets_by_container(container.id)?;
        let codes: Vec<DatasetCode> = members.iter().map(|d| d.code.clone()).collect();

        // The budget counts from the scheduled start time, so a crashed and
        // re-run finalization does not get a fresh clock.
        let elapsed = (Utc::now() - params.start_time)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let remaining = params.max_waiting_time.saturating_sub(elapsed);

        let parity = wait_until(
            || match self.replica_matches(params) {
                Ok(matches) => matches,
                Err(err) => {
                    warn!(error = %err, "replication parity check failed");
                    false
                }
            },
            params.polling_time,
            Some(remaining),
        );

        if parity {
            info!(
                container = container_name,
                datasets = codes.len(),
                "replication confirmed"
            );
            self.status.update(&codes, params.status, true)?;
            self.deleter.schedule_deletion(
                &codes,
                SHARE_DELETION_MAX_RETRIES,
                SHARE_DELETION_RETRY_WAIT_SECS,
            )?;
            return Ok(FinalizerOutcome::Succeeded);
        }

        warn!(
            container = container_name,
            max_wait_secs = params.max_waiting_time.as_secs(),
            "replication timed out; unregistering container and resubmitting datasets"
        );
        let mut tx = self.store.begin()?;
        tx.delete_container(container.id)?;
        tx.commit()?;
        // The row is gone, so the archive copy is an orphan now.
        self.file_ops
            .delete_container_from_final_destination(&container.path)?;
        self.status
            .update(&codes, ArchivingStatus::Available, false)?;
        self.resubmission.resubmit(&codes)?;
        Ok(FinalizerOutcome::TimedOut)
    }

    fn replica_matches(&self, params: &FinalizerParams) -> Result<bool> {
        let original = self.file_ops.file_size(&params.original_file_path)?;
        let replica = self.file_ops.file_size(&params.replicated_file_path)?;
        debug!(?original, ?replica, "replication parity poll");
        match (original, replica) {
            (Some(original), Some(replica)) => Ok(original == replica),
            _ => Ok(false),
        }
    }
}
