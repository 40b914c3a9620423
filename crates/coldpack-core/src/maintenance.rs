//! Periodic sweep draining deferred unarchiving requests.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};

use coldpack_types::{DatasetCode, Result};

use crate::archiver::Archiver;
use crate::metadata::{ContainerRecord, MetadataStore, MetadataTransaction};

/// Invoked by an external scheduler; each run drains every container flagged
/// for deferred unarchiving through the orchestrator's forced restore path.
pub struct UnarchivingMaintenanceTask {
    store: Arc<dyn MetadataStore>,
    archiver: Arc<Archiver>,
    /// Scratch share restored containers are extracted onto.
    destination_share: PathBuf,
}

impl UnarchivingMaintenanceTask {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        archiver: Arc<Archiver>,
        destination_share: PathBuf,
    ) -> Self {
        Self {
            store,
            archiver,
            destination_share,
        }
    }

    /// One sweep. Each container's cycle is its own transaction; a failing
    /// container is logged and skipped, never blocking the rest.
    pub fn run(&self) -> Result<()> {
        let flagged = self.store.containers_with_unarchiving_requested()?;
        if flagged.is_empty() {
            return Ok(());
        }
        info!(containers = flagged.len(), "draining deferred unarchiving requests");

        for container in flagged {
            if let Err(err) = self.drain_container(&container) {
                error!(
                    container = container.path,
                    error = %err,
                    "deferred unarchiving failed; container must be re-flagged by a new request"
                );
            }
        }
        Ok(())
    }

    fn drain_container(&self, container: &ContainerRecord) -> Result<()> {
        // Clear the flag before restoring so a crash mid-run cannot cause
        // unbounded retries. A stuck container needs a fresh unarchive call.
        let mut tx = self.store.begin()?;
        tx.set_unarchiving_requested(container.id, false)?;
        tx.commit()?;

        let codes: Vec<DatasetCode> = self
            .store
            .datasets_by_container(container.id)?
            .into_iter()
            .map(|d| d.code)
            .collect();
        let report = self
            .archiver
            .unarchive(&codes, &self.destination_share, true);
        if !report.is_ok() {
            return Err(coldpack_types::ColdpackError::Other(format!(
                "restore of container '{}' reported failures: {report}",
                container.path
            )));
        }
        Ok(())
    }
}
