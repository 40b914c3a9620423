use std::fs::{self, File};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::debug;
use walkdir::WalkDir;

use coldpack_types::{ColdpackError, Dataset, DatasetCode, Result};

use crate::services::DatasetContentProvider;

use super::pack::{read_stats, PackReader, PackWriter};
use super::{ContainerStats, FileOperations};

/// Container file name suffix.
const CONTAINER_SUFFIX: &str = ".cpk";

/// File-operations collaborator for local filesystems: staging, final and
/// replica destinations are plain directories.
pub struct LocalFileOperations {
    staging: PathBuf,
    final_destination: PathBuf,
    replica: Option<PathBuf>,
}

impl LocalFileOperations {
    pub fn new(staging: PathBuf, final_destination: PathBuf, replica: Option<PathBuf>) -> Self {
        Self {
            staging,
            final_destination,
            replica,
        }
    }

    fn copy_container(&self, container_path: &str, destination: &Path) -> Result<()> {
        let source = self.stage_path(container_path);
        fs::create_dir_all(destination)?;
        // Copy to a temp name first, then rename, so a reader at the
        // destination never sees a partial container.
        let tmp = destination.join(format!(
            "{container_path}.tmp-{:08x}",
            rand::random::<u32>()
        ));
        let target = destination.join(container_path);
        fs::copy(&source, &tmp)?;
        fs::rename(&tmp, &target)?;
        debug!(container = container_path, target = %target.display(), "copied container");
        Ok(())
    }
}

impl FileOperations for LocalFileOperations {
    fn generate_container_path(&self, experiment: &str) -> String {
        let sanitized: String = experiment
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        format!(
            "{sanitized}-{}-{:08x}{CONTAINER_SUFFIX}",
            Utc::now().format("%Y%m%d-%H%M%S"),
            rand::random::<u32>()
        )
    }

    fn create_container(&self, container_path: &str, datasets: &[Dataset]) -> Result<u64> {
        fs::create_dir_all(&self.staging)?;
        let target = self.stage_path(container_path);
        let tmp = self.staging.join(format!(
            "{container_path}.tmp-{:08x}",
            rand::random::<u32>()
        ));

        let result = (|| {
            let mut writer = PackWriter::new(File::create(&tmp)?)?;
            for dataset in datasets {
                pack_dataset(&mut writer, dataset)?;
            }
            writer.finish()
        })();

        match result {
            Ok(total) => {
                fs::rename(&tmp, &target)?;
                debug!(container = container_path, total, "created container in staging");
                Ok(total)
            }
            Err(err) => {
                let _ = fs::remove_file(&tmp);
                Err(err)
            }
        }
    }

    fn copy_to_final_destination(&self, container_path: &str) -> Result<()> {
        self.copy_container(container_path, &self.final_destination)
    }

    fn copy_to_replica(&self, container_path: &str) -> Result<()> {
        let replica = self.replica.clone().ok_or_else(|| {
            ColdpackError::Config("no replicated destination configured".into())
        })?;
        self.copy_container(container_path, &replica)
    }

    fn is_replica_configured(&self) -> bool {
        self.replica.is_some()
    }

    fn stage_path(&self, container_path: &str) -> PathBuf {
        self.staging.join(container_path)
    }

    fn final_path(&self, container_path: &str) -> PathBuf {
        self.final_destination.join(container_path)
    }

    fn replica_path(&self, container_path: &str) -> Option<PathBuf> {
        self.replica.as_ref().map(|r| r.join(container_path))
    }

    fn file_size(&self, path: &Path) -> Result<Option<u64>> {
        match fs::metadata(path) {
            Ok(meta) => Ok(Some(meta.len())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn retrieve_container_stats(&self, path: &Path) -> Result<ContainerStats> {
        read_stats(path)
    }

    fn extract_container(&self, path: &Path, destination_share: &Path) -> Result<()> {
        let mut reader = PackReader::open(path)?;
        while let Some(meta) = reader.next_meta()? {
            let rel = sanitize_rel_path(&meta.rel_path)?;
            let target = destination_share.join(meta.code.as_str()).join(rel);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&target)?;
            reader.read_payload(meta.size, &mut out)?;
        }
        Ok(())
    }

    fn delete_container_from_final_destination(&self, container_path: &str) -> Result<()> {
        match fs::remove_file(self.final_path(container_path)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Walk one dataset directory in deterministic order and add every regular
/// file to the container.
fn pack_dataset<W: std::io::Write>(
    writer: &mut PackWriter<W>,
    dataset: &Dataset,
) -> Result<()> {
    let root = &dataset.location;
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            ColdpackError::Other(format!("walking {}: {e}", root.display()))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|_| {
                ColdpackError::Other(format!(
                    "entry {} escapes dataset root {}",
                    entry.path().display(),
                    root.display()
                ))
            })?
            .to_string_lossy()
            .replace('\\', "/");
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        let file = File::open(entry.path())?;
        writer.add_entry(&dataset.code, &rel, size, file)?;
    }
    Ok(())
}

/// Reject entry paths that could escape the destination share.
fn sanitize_rel_path(rel: &str) -> Result<PathBuf> {
    let path = Path::new(rel);
    if path.is_absolute()
        || path
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(ColdpackError::InvalidFormat(format!(
            "unsafe entry path '{rel}'"
        )));
    }
    Ok(path.to_path_buf())
}

/// Sum of all regular-file sizes under `root`.
pub fn directory_size(root: &Path) -> Result<u64> {
    let mut total = 0u64;
    for entry in WalkDir::new(root) {
        let entry =
            entry.map_err(|e| ColdpackError::Other(format!("walking {}: {e}", root.display())))?;
        if entry.file_type().is_file() {
            total += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }
    Ok(total)
}

/// Content provider resolving dataset codes to directories under one share
/// root (`<share>/<code>`).
pub struct ShareContentProvider {
    share_root: PathBuf,
}

impl ShareContentProvider {
    pub fn new(share_root: PathBuf) -> Self {
        Self { share_root }
    }
}

impl DatasetContentProvider for ShareContentProvider {
    fn size_on_disk(&self, code: &DatasetCode) -> Result<u64> {
        let root = self.share_root.join(code.as_str());
        if !root.is_dir() {
            return Err(ColdpackError::DatasetNotFound(code.to_string()));
        }
        directory_size(&root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_dataset(share: &Path, code: &str, files: &[(&str, &[u8])]) -> Dataset {
        let root = share.join(code);
        for (rel, data) in files {
            let path = root.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, data).unwrap();
        }
        Dataset {
            code: DatasetCode::from(code),
            experiment: "EXP-1".into(),
            dataset_type: "RAW".into(),
            sample: None,
            size_in_bytes: None,
            share_id: Some("share-1".into()),
            location: root,
        }
    }

    fn ops(tmp: &Path) -> LocalFileOperations {
        LocalFileOperations::new(
            tmp.join("stage"),
            tmp.join("final"),
            Some(tmp.join("replica")),
        )
    }

    #[test]
    fn pack_copy_and_extract_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let share = tmp.path().join("share");
        let ds1 = write_dataset(&share, "DS-1", &[("a.txt", b"alpha"), ("sub/b.txt", b"beta")]);
        let ds2 = write_dataset(&share, "DS-2", &[("c.txt", b"gamma")]);

        let ops = ops(tmp.path());
        let name = ops.generate_container_path("EXP-1");
        let total = ops.create_container(&name, &[ds1, ds2]).unwrap();
        assert_eq!(total, 14);

        ops.copy_to_final_destination(&name).unwrap();
        let stats = ops.retrieve_container_stats(&ops.final_path(&name)).unwrap();
        assert_eq!(stats.total_bytes, 14);
        assert_eq!(stats.per_dataset[&DatasetCode::from("DS-1")], 9);

        let restore = tmp.path().join("restore");
        ops.extract_container(&ops.final_path(&name), &restore).unwrap();
        assert_eq!(fs::read(restore.join("DS-1/sub/b.txt")).unwrap(), b"beta");
        assert_eq!(fs::read(restore.join("DS-2/c.txt")).unwrap(), b"gamma");
    }

    #[test]
    fn replica_copy_reaches_byte_parity() {
        let tmp = tempfile::tempdir().unwrap();
        let share = tmp.path().join("share");
        let ds = write_dataset(&share, "DS-1", &[("a.txt", b"alpha")]);

        let ops = ops(tmp.path());
        let name = ops.generate_container_path("EXP-1");
        ops.create_container(&name, &[ds]).unwrap();
        ops.copy_to_final_destination(&name).unwrap();
        ops.copy_to_replica(&name).unwrap();

        let original = ops.file_size(&ops.final_path(&name)).unwrap();
        let replica = ops.file_size(&ops.replica_path(&name).unwrap()).unwrap();
        assert_eq!(original, replica);
        assert!(original.unwrap() > 0);
    }

    #[test]
    fn missing_container_has_no_size() {
        let tmp = tempfile::tempdir().unwrap();
        let ops = ops(tmp.path());
        assert_eq!(ops.file_size(Path::new("/nonexistent.cpk")).unwrap(), None);
    }

    #[test]
    fn share_content_provider_measures_roots() {
        let tmp = tempfile::tempdir().unwrap();
        let share = tmp.path().join("share");
        write_dataset(&share, "DS-1", &[("a.txt", b"12345")]);

        let provider = ShareContentProvider::new(share);
        assert_eq!(provider.size_on_disk(&DatasetCode::from("DS-1")).unwrap(), 5);
        assert!(provider.size_on_disk(&DatasetCode::from("DS-404")).is_err());
    }
}
