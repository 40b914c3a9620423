//! Container and archived-dataset bookkeeping.
//!
//! The store is transactional: all mutations of one archiving attempt happen
//! inside a unit of work that commits or rolls back wholesale, so a container
//! row and its member rows never appear partially. Reads outside a
//! transaction observe the last committed state.

mod memory;

pub use memory::MemoryMetadataStore;

use coldpack_types::{DatasetCode, Result};

/// One packaged archive unit. Its total byte size equals the sum of its
/// member datasets' sizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    pub id: i64,
    /// Container file name relative to the final destination.
    pub path: String,
    pub unarchiving_requested: bool,
}

/// Membership record: one dataset inside one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedDatasetRecord {
    pub id: i64,
    pub code: DatasetCode,
    pub container_id: i64,
    pub size_in_bytes: u64,
}

/// Unit of work over the metadata store: begin → mutate → commit | rollback.
pub trait MetadataTransaction {
    /// Insert a container row and return its assigned id.
    fn create_container(&mut self, path: &str) -> Result<i64>;

    /// Insert a membership row and return its assigned id.
    fn add_dataset(&mut self, code: &DatasetCode, container_id: i64, size_in_bytes: u64)
        -> Result<i64>;

    /// Remove a dataset's membership row, if any.
    fn delete_dataset(&mut self, code: &DatasetCode) -> Result<()>;

    /// Remove a container row together with its membership rows.
    fn delete_container(&mut self, container_id: i64) -> Result<()>;

    fn set_unarchiving_requested(&mut self, container_id: i64, requested: bool) -> Result<()>;

    fn commit(self: Box<Self>) -> Result<()>;

    /// Discard all mutations of this unit of work. Dropping an uncommitted
    /// transaction has the same effect.
    fn rollback(self: Box<Self>);
}

/// Read queries plus transaction entry point.
pub trait MetadataStore: Send + Sync {
    fn begin(&self) -> Result<Box<dyn MetadataTransaction + '_>>;

    fn container_by_id(&self, id: i64) -> Result<Option<ContainerRecord>>;

    fn container_by_path(&self, path: &str) -> Result<Option<ContainerRecord>>;

    fn dataset_by_code(&self, code: &DatasetCode) -> Result<Option<ArchivedDatasetRecord>>;

    fn datasets_by_container(&self, container_id: i64) -> Result<Vec<ArchivedDatasetRecord>>;

    fn containers_with_unarchiving_requested(&self) -> Result<Vec<ContainerRecord>>;
}
