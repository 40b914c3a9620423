//! Packaging and copy collaborator.
//!
//! The orchestrator only depends on the [`FileOperations`] trait; the
//! shipped [`LocalFileOperations`] packages datasets into a single container
//! file on local filesystems.

mod local;
mod pack;

pub use local::{directory_size, LocalFileOperations, ShareContentProvider};
pub use pack::{ContainerStats, PACK_MAGIC, PACK_VERSION};

use std::path::{Path, PathBuf};

use coldpack_types::{Dataset, Result};

/// Packages selected datasets into one container file, copies it between
/// staging, final and replica destinations, and reads it back for
/// unarchiving.
pub trait FileOperations: Send + Sync {
    /// Produce a fresh, unique container file name for a batch belonging to
    /// the given experiment.
    fn generate_container_path(&self, experiment: &str) -> String;

    /// Stream-pack the datasets into a container file in the staging
    /// location. Returns the total number of payload bytes written.
    fn create_container(&self, container_path: &str, datasets: &[Dataset]) -> Result<u64>;

    fn copy_to_final_destination(&self, container_path: &str) -> Result<()>;

    fn copy_to_replica(&self, container_path: &str) -> Result<()>;

    fn is_replica_configured(&self) -> bool;

    fn stage_path(&self, container_path: &str) -> PathBuf;

    fn final_path(&self, container_path: &str) -> PathBuf;

    fn replica_path(&self, container_path: &str) -> Option<PathBuf>;

    /// Byte count of a container file, or `None` while it does not exist.
    /// Replication parity is confirmed by comparing these counts.
    fn file_size(&self, path: &Path) -> Result<Option<u64>>;

    /// Re-read a container and report its byte statistics for the sanity
    /// check against the source datasets.
    fn retrieve_container_stats(&self, path: &Path) -> Result<ContainerStats>;

    /// Restore every dataset in the container onto the given share, laid out
    /// as `<share>/<dataset code>/...`.
    fn extract_container(&self, path: &Path, destination_share: &Path) -> Result<()>;

    fn delete_container_from_final_destination(&self, container_path: &str) -> Result<()>;
}
