//! Archive orchestrator.
//!
//! `archive` packs a pre-grouped batch of datasets into one container file,
//! waits for free space at the final destination, copies the container there,
//! commits the metadata rows and either finalizes immediately or hands off to
//! the replication finalizer. `unarchive` restores whole containers back onto
//! a share, optionally deferring the work to the maintenance sweep.
//!
//! Both entry points run on the caller's thread and may block for long
//! periods. They never fail halfway in silence: every submitted dataset code
//! gets exactly one outcome in the returned report, and a failed archive
//! attempt leaves no committed metadata behind.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

use coldpack_types::{
    ArchivingStatus, BatchReport, ColdpackError, Dataset, DatasetCode, DatasetOutcome, Result,
};

use crate::cleaner::ArchiveCleaner;
use crate::config::ArchiverConfig;
use crate::fileops::FileOperations;
use crate::finalizer::{
    FinalizerOutcome, FinalizerParams, FinalizerScheduler, ReplicationFinalizer,
    SHARE_DELETION_MAX_RETRIES, SHARE_DELETION_RETRY_WAIT_SECS,
};
use crate::metadata::{ArchivedDatasetRecord, MetadataStore, MetadataTransaction};
use crate::services::{
    ArchiveResubmission, DatasetAccessNotifier, DatasetBookkeeper, DatasetDeleter,
    FreeSpaceProvider, LockManager, StatusUpdater,
};
use crate::waiting::wait_until;

/// External collaborators the orchestrator drives. Resolved by the composing
/// layer and passed in explicitly.
pub struct Collaborators {
    pub locks: Arc<dyn LockManager>,
    pub free_space: Arc<dyn FreeSpaceProvider>,
    pub status: Arc<dyn StatusUpdater>,
    pub deleter: Arc<dyn DatasetDeleter>,
    pub access: Arc<dyn DatasetAccessNotifier>,
    pub bookkeeper: Arc<dyn DatasetBookkeeper>,
    pub resubmission: Arc<dyn ArchiveResubmission>,
}

pub struct Archiver {
    config: ArchiverConfig,
    free_space_poll: Duration,
    finalizer_poll: Duration,
    finalizer_max_wait: Duration,
    store: Arc<dyn MetadataStore>,
    file_ops: Arc<dyn FileOperations>,
    cleaner: Arc<ArchiveCleaner>,
    scheduler: Arc<dyn FinalizerScheduler>,
    services: Collaborators,
    finalizer: ReplicationFinalizer,
}

impl Archiver {
    /// Fatal configuration problems surface here, not at first use.
    pub fn new(
        config: ArchiverConfig,
        store: Arc<dyn MetadataStore>,
        file_ops: Arc<dyn FileOperations>,
        cleaner: Arc<ArchiveCleaner>,
        scheduler: Arc<dyn FinalizerScheduler>,
        services: Collaborators,
    ) -> Result<Self> {
        config.validate()?;
        let free_space_poll = config.free_space_polling_interval()?;
        let finalizer_poll = config.finalizer_polling_interval()?;
        let finalizer_max_wait = config.finalizer_max_waiting()?;
        let finalizer = ReplicationFinalizer::new(
            Arc::clone(&store),
            Arc::clone(&file_ops),
            Arc::clone(&services.status),
            Arc::clone(&services.deleter),
            Arc::clone(&services.resubmission),
        );
        Ok(Self {
            config,
            free_space_poll,
            finalizer_poll,
            finalizer_max_wait,
            store,
            file_ops,
            cleaner,
            scheduler,
            services,
            finalizer,
        })
    }

    /// Archive one pre-grouped batch. With `wait_for_replication` the call
    /// blocks until the replica is confirmed (or times out); otherwise the
    /// finalizer is scheduled and the call returns once the primary copy is
    /// committed.
    pub fn archive(&self, datasets: &[Dataset], wait_for_replication: bool) -> BatchReport {
        if datasets.is_empty() {
            return BatchReport::new();
        }
        let codes: Vec<DatasetCode> = datasets.iter().map(|d| d.code.clone()).collect();
        match self.try_archive(datasets, &codes, wait_for_replication) {
            Ok(report) => report,
            Err(err) => {
                error!(datasets = codes.len(), error = %err, "archive attempt failed");
                self.revert_status(&codes);
                BatchReport::all(&codes, DatasetOutcome::Error(err.to_string()))
            }
        }
    }

    fn try_archive(
        &self,
        datasets: &[Dataset],
        codes: &[DatasetCode],
        wait_for_replication: bool,
    ) -> Result<BatchReport> {
        let memberships: Vec<Option<ArchivedDatasetRecord>> = codes
            .iter()
            .map(|code| self.store.dataset_by_code(code))
            .collect::<Result<_>>()?;

        // Datasets already in a committed container are exempt from the size
        // bounds; a batch of nothing but those is a no-op, not a duplicate.
        if memberships.iter().all(Option::is_some) {
            info!(datasets = codes.len(), "batch is already archived");
            return Ok(BatchReport::all(codes, DatasetOutcome::Ok));
        }
        let new_total: u64 = datasets
            .iter()
            .zip(&memberships)
            .filter(|(_, m)| m.is_none())
            .map(|(d, _)| d.size_or_zero())
            .sum();
        if new_total < self.config.minimum_container_size_in_bytes
            || new_total > self.config.maximum_container_size_in_bytes
        {
            return Err(ColdpackError::Validation(format!(
                "batch size of {new_total} bytes is outside the container bounds [{}, {}]",
                self.config.minimum_container_size_in_bytes,
                self.config.maximum_container_size_in_bytes
            )));
        }

        // (1) record current share and size for first-time members.
        for (dataset, membership) in datasets.iter().zip(&memberships) {
            if membership.is_none() {
                if let Some(share_id) = &dataset.share_id {
                    self.services.bookkeeper.update_share_and_size(
                        &dataset.code,
                        share_id,
                        dataset.size_or_zero(),
                    )?;
                }
            }
        }

        // (2) pack into staging under per-dataset locks.
        let container_name = self.file_ops.generate_container_path(&datasets[0].experiment);
        let packed = {
            let _guard = LockGuard::acquire(self.services.locks.as_ref(), codes)?;
            self.file_ops.create_container(&container_name, datasets)
        };
        let packed_bytes = match packed {
            Ok(bytes) => bytes,
            Err(err) => {
                self.cleaner.delete(&self.file_ops.stage_path(&container_name));
                return Err(err);
            }
        };
        info!(
            container = container_name,
            datasets = codes.len(),
            bytes = packed_bytes,
            "container staged"
        );

        // (3) block until the final destination has room. No upper bound.
        self.wait_for_free_space(packed_bytes + self.config.free_space_safety_margin_bytes);

        // (4) copy to the final destination.
        if let Err(err) = self.file_ops.copy_to_final_destination(&container_name) {
            self.cleaner.delete(&self.file_ops.stage_path(&container_name));
            return Err(err);
        }
        let final_path = self.file_ops.final_path(&container_name);

        // Start the replica copy too. Byte parity is confirmed later by the
        // finalizer, so an implementation may complete the copy
        // asynchronously after returning here.
        if self.file_ops.is_replica_configured() {
            if let Err(err) = self.file_ops.copy_to_replica(&container_name) {
                self.cleaner.delete(&final_path);
                self.cleaner.delete(&self.file_ops.stage_path(&container_name));
                return Err(err);
            }
        }

        // (5) commit only after the physical copy succeeded, so a container
        // row existing implies the container file exists.
        let container_id = match self.commit_metadata(&container_name, datasets, &memberships) {
            Ok(id) => id,
            Err(err) => {
                self.cleaner.delete(&final_path);
                self.cleaner.delete(&self.file_ops.stage_path(&container_name));
                return Err(err);
            }
        };

        // (6) sanity check: re-read the container and compare byte counts.
        if let Err(err) = self.verify_container(&final_path, packed_bytes, datasets.len()) {
            self.unregister_container(container_id)?;
            self.cleaner.delete(&final_path);
            self.cleaner.delete(&self.file_ops.stage_path(&container_name));
            return Err(err);
        }

        // (7) the staging copy is no longer needed.
        self.cleaner.delete(&self.file_ops.stage_path(&container_name));

        let re_archived: Vec<DatasetCode> = codes
            .iter()
            .zip(&memberships)
            .filter(|(_, m)| m.is_some())
            .map(|(c, _)| c.clone())
            .collect();

        if !self.file_ops.is_replica_configured() {
            self.services
                .status
                .update(codes, ArchivingStatus::Archived, true)?;
            // (8) share copies of re-archived members are redundant now.
            if !re_archived.is_empty() {
                self.services.deleter.schedule_deletion(
                    &re_archived,
                    SHARE_DELETION_MAX_RETRIES,
                    SHARE_DELETION_RETRY_WAIT_SECS,
                )?;
            }
            info!(container = container_name, "archived without replication");
            return Ok(BatchReport::all(codes, DatasetOutcome::Ok));
        }

        // Replica configured: archived but not yet durable.
        self.services
            .status
            .update(codes, ArchivingStatus::Archived, false)?;
        let replicated_file_path = self
            .file_ops
            .replica_path(&container_name)
            .ok_or_else(|| ColdpackError::Config("replicated destination not set".into()))?;
        let params = FinalizerParams {
            original_file_path: final_path,
            replicated_file_path,
            polling_time: self.finalizer_poll,
            max_waiting_time: self.finalizer_max_wait,
            status: ArchivingStatus::Archived,
            start_time: Utc::now(),
        };

        if wait_for_replication {
            return match self.finalizer.run(&params)? {
                FinalizerOutcome::Succeeded => Ok(BatchReport::all(codes, DatasetOutcome::Ok)),
                FinalizerOutcome::TimedOut => Ok(BatchReport::all(
                    codes,
                    DatasetOutcome::Error(
                        ColdpackError::ReplicationTimeout(container_name).to_string(),
                    ),
                )),
            };
        }
        self.scheduler.schedule(params)?;
        Ok(BatchReport::all(codes, DatasetOutcome::Ok))
    }

    /// Restore the containers owning the requested datasets. Containers are
    /// always restored whole; the report covers the requested codes only.
    pub fn unarchive(
        &self,
        codes: &[DatasetCode],
        destination_share: &Path,
        force: bool,
    ) -> BatchReport {
        let mut report = BatchReport::new();
        let mut resolved: Vec<ArchivedDatasetRecord> = Vec::new();
        for code in codes {
            match self.store.dataset_by_code(code) {
                Ok(Some(record)) => resolved.push(record),
                Ok(None) => report.push(
                    code.clone(),
                    DatasetOutcome::Error(
                        ColdpackError::DatasetNotFound(code.to_string()).to_string(),
                    ),
                ),
                Err(err) => report.push(code.clone(), DatasetOutcome::Error(err.to_string())),
            }
        }
        if resolved.is_empty() {
            return report;
        }

        if let Err(err) = self.check_unarchiving_capacity(&resolved) {
            warn!(error = %err, "unarchive request rejected");
            let resolved_codes: Vec<DatasetCode> =
                resolved.iter().map(|r| r.code.clone()).collect();
            report.merge(BatchReport::all(
                &resolved_codes,
                DatasetOutcome::Error(err.to_string()),
            ));
            return report;
        }

        // Container-by-container, in first-seen order. One container's
        // failure never blocks the others.
        let mut container_order: Vec<i64> = Vec::new();
        let mut requested_by_container: HashMap<i64, Vec<DatasetCode>> = HashMap::new();
        for record in &resolved {
            if !container_order.contains(&record.container_id) {
                container_order.push(record.container_id);
            }
            requested_by_container
                .entry(record.container_id)
                .or_default()
                .push(record.code.clone());
        }

        for container_id in container_order {
            let outcome = match self.restore_container(container_id, destination_share, force) {
                Ok(outcome) => outcome,
                Err(err) => {
                    error!(container_id, error = %err, "unarchiving failed");
                    DatasetOutcome::Error(err.to_string())
                }
            };
            for code in &requested_by_container[&container_id] {
                report.push(code.clone(), outcome.clone());
            }
        }
        report
    }

    /// Admission control for unarchiving: the requested bytes plus the bytes
    /// already reserved by containers flagged for deferred unarchiving must
    /// stay under the configured capacity.
    fn check_unarchiving_capacity(&self, requested: &[ArchivedDatasetRecord]) -> Result<()> {
        let maximum_bytes = self.config.maximum_unarchiving_capacity_in_bytes();
        let requested_bytes: u64 = requested.iter().map(|r| r.size_in_bytes).sum();
        let requested_containers: HashSet<i64> =
            requested.iter().map(|r| r.container_id).collect();

        let mut reserved_bytes = 0u64;
        for container in self.store.containers_with_unarchiving_requested()? {
            // A re-request for an already flagged container must not count
            // its own size twice.
            if requested_containers.contains(&container.id) {
                continue;
            }
            reserved_bytes += self
                .store
                .datasets_by_container(container.id)?
                .iter()
                .map(|d| d.size_in_bytes)
                .sum::<u64>();
        }

        if requested_bytes + reserved_bytes > maximum_bytes {
            return Err(ColdpackError::CapacityExceeded {
                requested_bytes,
                reserved_bytes,
                maximum_bytes,
            });
        }
        Ok(())
    }

    fn restore_container(
        &self,
        container_id: i64,
        destination_share: &Path,
        force: bool,
    ) -> Result<DatasetOutcome> {
        let container = self
            .store
            .container_by_id(container_id)?
            .ok_or_else(|| ColdpackError::ContainerNotFound(container_id.to_string()))?;

        if self.config.delay_unarchiving && !force {
            let mut tx = self.store.begin()?;
            tx.set_unarchiving_requested(container.id, true)?;
            tx.commit()?;
            info!(container = container.path, "unarchiving deferred");
            return Ok(DatasetOutcome::Deferred);
        }

        let members = self.store.datasets_by_container(container.id)?;
        let needed: u64 = members.iter().map(|d| d.size_in_bytes).sum();
        let free = self
            .services
            .free_space
            .free_space_kb(destination_share)?
            .saturating_mul(1024);
        if free < needed {
            return Err(ColdpackError::Validation(format!(
                "share '{}' has {free} bytes free, container '{}' needs {needed}",
                destination_share.display(),
                container.path
            )));
        }

        self.file_ops
            .extract_container(&self.file_ops.final_path(&container.path), destination_share)?;

        for member in &members {
            if let Err(err) = self.services.access.notify_access(&member.code) {
                warn!(code = %member.code, error = %err, "access notification failed");
            }
        }

        // The container stays in the archive for future re-use, so presence
        // is retained across the restore.
        let member_codes: Vec<DatasetCode> = members.iter().map(|d| d.code.clone()).collect();
        self.services
            .status
            .update(&member_codes, ArchivingStatus::Available, true)?;

        if container.unarchiving_requested {
            let mut tx = self.store.begin()?;
            tx.set_unarchiving_requested(container.id, false)?;
            tx.commit()?;
        }
        info!(
            container = container.path,
            datasets = members.len(),
            "container restored"
        );
        Ok(DatasetOutcome::Ok)
    }

    fn wait_for_free_space(&self, needed_bytes: u64) {
        let destination = self.config.final_destination.clone();
        wait_until(
            || match self.services.free_space.free_space_kb(&destination) {
                Ok(kb) => {
                    let enough = kb.saturating_mul(1024) >= needed_bytes;
                    if !enough {
                        info!(
                            free_kb = kb,
                            needed_bytes,
                            destination = %destination.display(),
                            "waiting for free space at the final destination"
                        );
                    }
                    enough
                }
                Err(err) => {
                    warn!(error = %err, "free-space probe failed");
                    false
                }
            },
            self.free_space_poll,
            None,
        );
    }

    fn commit_metadata(
        &self,
        container_name: &str,
        datasets: &[Dataset],
        memberships: &[Option<ArchivedDatasetRecord>],
    ) -> Result<i64> {
        let mut tx = self.store.begin()?;
        let container_id = tx.create_container(container_name)?;
        for (dataset, membership) in datasets.iter().zip(memberships) {
            // Re-archiving replaces the old membership row.
            if membership.is_some() {
                tx.delete_dataset(&dataset.code)?;
            }
            tx.add_dataset(&dataset.code, container_id, dataset.size_or_zero())?;
        }
        tx.commit()?;
        Ok(container_id)
    }

    fn verify_container(
        &self,
        final_path: &Path,
        expected_bytes: u64,
        expected_datasets: usize,
    ) -> Result<()> {
        let stats = self.file_ops.retrieve_container_stats(final_path)?;
        if stats.total_bytes != expected_bytes || stats.per_dataset.len() != expected_datasets {
            return Err(ColdpackError::InvalidFormat(format!(
                "container '{}' holds {} bytes across {} datasets, expected {} bytes across {}",
                final_path.display(),
                stats.total_bytes,
                stats.per_dataset.len(),
                expected_bytes,
                expected_datasets
            )));
        }
        Ok(())
    }

    fn unregister_container(&self, container_id: i64) -> Result<()> {
        let mut tx = self.store.begin()?;
        tx.delete_container(container_id)?;
        tx.commit()
    }

    fn revert_status(&self, codes: &[DatasetCode]) {
        if let Err(err) =
            self.services
                .status
                .update(codes, ArchivingStatus::Available, false)
        {
            warn!(error = %err, "cannot revert archiving status");
        }
    }
}

/// Holds per-dataset locks for the packaging step; released on drop.
struct LockGuard<'a> {
    locks: &'a dyn LockManager,
    held: Vec<DatasetCode>,
}

impl<'a> LockGuard<'a> {
    fn acquire(locks: &'a dyn LockManager, codes: &[DatasetCode]) -> Result<Self> {
        let mut guard = Self {
            locks,
            held: Vec::with_capacity(codes.len()),
        };
        for code in codes {
            locks.lock(code)?;
            guard.held.push(code.clone());
        }
        Ok(guard)
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        for code in &self.held {
            self.locks.release_lock(code);
        }
    }
}
