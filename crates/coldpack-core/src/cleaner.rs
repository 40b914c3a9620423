//! Routes deletions either to immediate synchronous removal or to the
//! deletion queue owning the path's prefix.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use coldpack_types::{ColdpackError, Result};

use crate::config::CleanerConfig;
use crate::deletion::{DeletionQueue, DeletionQueueWorker};
use crate::notify::Notifier;

pub struct ArchiveCleaner {
    /// Prefix routes in configuration order; first match wins.
    routes: Vec<(PathBuf, DeletionQueue)>,
    workers: Mutex<Vec<DeletionQueueWorker>>,
}

impl ArchiveCleaner {
    /// Build the cleaner and its per-prefix deletion queues. A missing
    /// deletion-requests directory with async prefixes configured is a fatal
    /// configuration error, raised here and not at first use.
    pub fn new(config: &CleanerConfig, notifier: Arc<dyn Notifier>) -> Result<Self> {
        config.validate()?;

        let mut routes = Vec::new();
        if !config.file_path_prefixes_for_async_deletion.is_empty() {
            let requests_root = config
                .deletion_requests_dir
                .as_ref()
                .ok_or_else(|| {
                    // validate() already rejects this; keep the invariant local.
                    ColdpackError::Config("deletion-requests-dir is required".into())
                })?;
            let poll_interval = config.deletion_polling_interval()?;
            let timeout = config.deletion_timeout_duration()?;

            for prefix in &config.file_path_prefixes_for_async_deletion {
                let queue = DeletionQueue::new(
                    requests_root.join(sanitize_prefix(prefix)),
                    poll_interval,
                    timeout,
                    config.email.clone(),
                    Arc::clone(&notifier),
                )?;
                routes.push((prefix.clone(), queue));
            }
        }

        Ok(Self {
            routes,
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Start one worker thread per configured prefix.
    pub fn start(&self) {
        let mut workers = self.locked_workers();
        if !workers.is_empty() {
            return;
        }
        for (_, queue) in &self.routes {
            workers.push(queue.start());
        }
    }

    /// Signal all workers to shut down and join them.
    pub fn stop(&self) {
        for worker in self.locked_workers().drain(..) {
            worker.stop();
        }
    }

    /// Delete `path`: enqueue on the matching prefix's queue, or remove
    /// synchronously. Failures are logged, never raised.
    pub fn delete(&self, path: &Path) {
        if let Some(queue) = self.queue_for(path) {
            if let Err(err) = queue.request_deletion(path) {
                warn!(path = %path.display(), error = %err, "cannot enqueue deletion request");
            }
            return;
        }

        let attempt = if path.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        match attempt {
            Ok(()) => info!(path = %path.display(), "deleted"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "already absent")
            }
            Err(err) => warn!(path = %path.display(), error = %err, "deletion failed"),
        }
    }

    /// The deletion queue responsible for `path`, if any prefix matches.
    pub fn queue_for(&self, path: &Path) -> Option<&DeletionQueue> {
        self.routes
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix))
            .map(|(_, queue)| queue)
    }

    fn locked_workers(&self) -> std::sync::MutexGuard<'_, Vec<DeletionQueueWorker>> {
        match self.workers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Directory name for one prefix's request records. The encoding is
/// injective: path separators become `_`, every other non-alphanumeric
/// character is hex-escaped, so distinct prefixes never share a directory
/// and the mapping is stable across restarts.
fn sanitize_prefix(prefix: &Path) -> String {
    prefix
        .to_string_lossy()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_string()
            } else if c == '/' || c == '\\' {
                "_".to_string()
            } else {
                format!("-{:06x}", c as u32)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use crate::notify::LogNotifier;

    use super::*;

    fn config(tmp: &Path, prefixes: Vec<PathBuf>) -> CleanerConfig {
        CleanerConfig {
            deletion_requests_dir: Some(tmp.join("requests")),
            file_path_prefixes_for_async_deletion: prefixes,
            ..CleanerConfig::default()
        }
    }

    #[test]
    fn async_prefix_without_requests_dir_is_fatal() {
        let config = CleanerConfig {
            deletion_requests_dir: None,
            file_path_prefixes_for_async_deletion: vec![PathBuf::from("/archive")],
            ..CleanerConfig::default()
        };
        assert!(ArchiveCleaner::new(&config, Arc::new(LogNotifier)).is_err());
    }

    #[test]
    fn unmatched_path_is_deleted_synchronously() {
        let tmp = tempfile::tempdir().unwrap();
        let victim = tmp.path().join("victim.txt");
        fs::write(&victim, b"x").unwrap();

        let cleaner = ArchiveCleaner::new(
            &config(tmp.path(), vec![tmp.path().join("async-zone")]),
            Arc::new(LogNotifier),
        )
        .unwrap();
        cleaner.delete(&victim);
        assert!(!victim.exists());
    }

    #[test]
    fn matched_path_is_enqueued_not_deleted() {
        let tmp = tempfile::tempdir().unwrap();
        let zone = tmp.path().join("async-zone");
        let victim = zone.join("container.cpk");
        fs::create_dir_all(&zone).unwrap();
        fs::write(&victim, b"x").unwrap();

        let cleaner =
            ArchiveCleaner::new(&config(tmp.path(), vec![zone.clone()]), Arc::new(LogNotifier))
                .unwrap();
        cleaner.delete(&victim);

        // Still present until a queue poll runs.
        assert!(victim.exists());
        let queue = cleaner.queue_for(&victim).unwrap();
        assert_eq!(queue.pending_count().unwrap(), 1);
        queue.poll_once();
        assert!(!victim.exists());
    }

    #[test]
    fn prefixes_differing_only_in_separators_get_separate_queues() {
        // `/a/b` and `/a_b` must not collapse to one request directory.
        assert_ne!(
            sanitize_prefix(Path::new("/a/b")),
            sanitize_prefix(Path::new("/a_b"))
        );

        let tmp = tempfile::tempdir().unwrap();
        let zone_a = tmp.path().join("zone").join("x");
        let zone_b = tmp.path().join("zone_x");
        fs::create_dir_all(&zone_a).unwrap();
        fs::create_dir_all(&zone_b).unwrap();
        let victim_a = zone_a.join("a.cpk");
        let victim_b = zone_b.join("b.cpk");
        fs::write(&victim_a, b"x").unwrap();
        fs::write(&victim_b, b"y").unwrap();

        let cleaner = ArchiveCleaner::new(
            &config(tmp.path(), vec![zone_a.clone(), zone_b.clone()]),
            Arc::new(LogNotifier),
        )
        .unwrap();
        cleaner.delete(&victim_a);
        cleaner.delete(&victim_b);

        // One pending request per queue, not two merged into one.
        assert_eq!(cleaner.queue_for(&victim_a).unwrap().pending_count().unwrap(), 1);
        assert_eq!(cleaner.queue_for(&victim_b).unwrap().pending_count().unwrap(), 1);
    }

    #[test]
    fn missing_target_never_raises() {
        let tmp = tempfile::tempdir().unwrap();
        let cleaner =
            ArchiveCleaner::new(&config(tmp.path(), Vec::new()), Arc::new(LogNotifier)).unwrap();
        cleaner.delete(&tmp.path().join("never-existed"));
    }

    #[test]
    fn worker_lifecycle_start_stop() {
        let tmp = tempfile::tempdir().unwrap();
        let zone = tmp.path().join("async-zone");
        let mut cfg = config(tmp.path(), vec![zone.clone()]);
        cfg.deletion_polling_time = "1 s".into();
        let cleaner = ArchiveCleaner::new(&cfg, Arc::new(LogNotifier)).unwrap();

        let victim = zone.join("file.bin");
        fs::create_dir_all(&zone).unwrap();
        fs::write(&victim, b"x").unwrap();
        cleaner.delete(&victim);

        cleaner.start();
        // The worker polls once immediately on startup.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while victim.exists() && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        cleaner.stop();
        assert!(!victim.exists());
    }
}
