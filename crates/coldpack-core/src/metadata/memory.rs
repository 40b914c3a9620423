use std::sync::{Arc, Mutex, MutexGuard};

use coldpack_types::{DatasetCode, Result};

use super::{ArchivedDatasetRecord, ContainerRecord, MetadataStore, MetadataTransaction};

#[derive(Debug, Default, Clone)]
struct StoreState {
    containers: Vec<ContainerRecord>,
    datasets: Vec<ArchivedDatasetRecord>,
    next_container_id: i64,
    next_dataset_id: i64,
}

/// In-memory transactional metadata store.
///
/// Transactions work on a snapshot of the committed state and swap it back in
/// on commit. That is sufficient for the engine's access pattern, where one
/// archiving or maintenance cycle owns its transaction; it is not a general
/// multi-writer store.
#[derive(Debug, Clone, Default)]
pub struct MemoryMetadataStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> MutexGuard<'_, StoreState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Number of committed container rows. Test helper.
    pub fn container_count(&self) -> usize {
        self.locked().containers.len()
    }
}

impl MetadataStore for MemoryMetadataStore {
    fn begin(&self) -> Result<Box<dyn MetadataTransaction + '_>> {
        let snapshot = self.locked().clone();
        Ok(Box::new(MemoryTransaction {
            store: self,
            working: snapshot,
        }))
    }

    fn container_by_id(&self, id: i64) -> Result<Option<ContainerRecord>> {
        Ok(self.locked().containers.iter().find(|c| c.id == id).cloned())
    }

    fn container_by_path(&self, path: &str) -> Result<Option<ContainerRecord>> {
        Ok(self
            .locked()
            .containers
            .iter()
            .find(|c| c.path == path)
            .cloned())
    }

    fn dataset_by_code(&self, code: &DatasetCode) -> Result<Option<ArchivedDatasetRecord>> {
        Ok(self
            .locked()
            .datasets
            .iter()
            .find(|d| &d.code == code)
            .cloned())
    }

    fn datasets_by_container(&self, container_id: i64) -> Result<Vec<ArchivedDatasetRecord>> {
        Ok(self
            .locked()
            .datasets
            .iter()
            .filter(|d| d.container_id == container_id)
            .cloned()
            .collect())
    }

    fn containers_with_unarchiving_requested(&self) -> Result<Vec<ContainerRecord>> {
        Ok(self
            .locked()
            .containers
            .iter()
            .filter(|c| c.unarchiving_requested)
            .cloned()
            .collect())
    }
}

struct MemoryTransaction<'a> {
    store: &'a MemoryMetadataStore,
    working: StoreState,
}

impl MetadataTransaction for MemoryTransaction<'_> {
    fn create_container(&mut self, path: &str) -> Result<i64> {
        self.working.next_container_id += 1;
        let id = self.working.next_container_id;
        self.working.containers.push(ContainerRecord {
            id,
            path: path.to_string(),
            unarchiving_requested: false,
        });
        Ok(id)
    }

    fn add_dataset(
        &mut self,
        code: &DatasetCode,
        container_id: i64,
        size_in_bytes: u64,
    ) -> Result<i64> {
        self.working.next_dataset_id += 1;
        let id = self.working.next_dataset_id;
        self.working.datasets.push(ArchivedDatasetRecord {
            id,
            code: code.clone(),
            container_id,
            size_in_bytes,
        });
        Ok(id)
    }

    fn delete_dataset(&mut self, code: &DatasetCode) -> Result<()> {
        self.working.datasets.retain(|d| &d.code != code);
        Ok(())
    }

    fn delete_container(&mut self, container_id: i64) -> Result<()> {
        self.working.containers.retain(|c| c.id != container_id);
        self.working.datasets.retain(|d| d.container_id != container_id);
        Ok(())
    }

    fn set_unarchiving_requested(&mut self, container_id: i64, requested: bool) -> Result<()> {
        for container in &mut self.working.containers {
            if container.id == container_id {
                container.unarchiving_requested = requested;
            }
        }
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        *self.store.locked() = self.working;
        Ok(())
    }

    fn rollback(self: Box<Self>) {
        // Dropping the working snapshot discards all mutations.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_makes_rows_visible_atomically() {
        let store = MemoryMetadataStore::new();
        let mut tx = store.begin().unwrap();
        let id = tx.create_container("pack-0001.cpk").unwrap();
        tx.add_dataset(&DatasetCode::from("DS-1"), id, 10).unwrap();
        tx.add_dataset(&DatasetCode::from("DS-2"), id, 20).unwrap();

        // Nothing visible before commit.
        assert!(store.container_by_path("pack-0001.cpk").unwrap().is_none());

        tx.commit().unwrap();
        let container = store.container_by_path("pack-0001.cpk").unwrap().unwrap();
        assert_eq!(store.datasets_by_container(container.id).unwrap().len(), 2);
    }

    #[test]
    fn rollback_discards_everything() {
        let store = MemoryMetadataStore::new();
        let mut tx = store.begin().unwrap();
        let id = tx.create_container("pack-0001.cpk").unwrap();
        tx.add_dataset(&DatasetCode::from("DS-1"), id, 10).unwrap();
        tx.rollback();
        assert_eq!(store.container_count(), 0);
        assert!(store.dataset_by_code(&DatasetCode::from("DS-1")).unwrap().is_none());
    }

    #[test]
    fn delete_container_removes_members_too() {
        let store = MemoryMetadataStore::new();
        let mut tx = store.begin().unwrap();
        let id = tx.create_container("pack-0001.cpk").unwrap();
        tx.add_dataset(&DatasetCode::from("DS-1"), id, 10).unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin().unwrap();
        tx.delete_container(id).unwrap();
        tx.commit().unwrap();
        assert!(store.dataset_by_code(&DatasetCode::from("DS-1")).unwrap().is_none());
    }

    #[test]
    fn unarchiving_flag_is_queryable() {
        let store = MemoryMetadataStore::new();
        let mut tx = store.begin().unwrap();
        let id = tx.create_container("pack-0001.cpk").unwrap();
        tx.set_unarchiving_requested(id, true).unwrap();
        tx.commit().unwrap();
        let flagged = store.containers_with_unarchiving_requested().unwrap();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].id, id);
    }
}
