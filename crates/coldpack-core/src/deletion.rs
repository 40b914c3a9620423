//! Durable, crash-recoverable asynchronous deletion.
//!
//! Every pending removal is one small record file in a well-known directory,
//! named `<yyyyMMdd-HHmmss>_<sequence>.deletionrequest` with the absolute
//! target path as content. The name encodes creation time for age tracking
//! and sorts records in request order; the directory is the only state shared
//! across process restarts. A worker thread polls the directory, retries
//! failed deletions indefinitely, and escalates overdue targets to an
//! operator exactly once per record.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use coldpack_types::Result;

use crate::config::EmailConfig;
use crate::notify::{render_overdue_notification, Notifier};

const REQUEST_SUFFIX: &str = ".deletionrequest";
const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Durable deletion queue for one directory prefix.
#[derive(Clone)]
pub struct DeletionQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    requests_dir: PathBuf,
    poll_interval: Duration,
    timeout: Duration,
    sequence: AtomicU64,
    email: Option<EmailConfig>,
    notifier: Arc<dyn Notifier>,
    /// Record names already escalated; each request notifies at most once.
    notified: Mutex<HashSet<String>>,
}

/// Handle to a running worker thread. Stopping signals shutdown and joins.
pub struct DeletionQueueWorker {
    stop_tx: Sender<()>,
    handle: std::thread::JoinHandle<()>,
}

impl DeletionQueueWorker {
    pub fn stop(self) {
        let _ = self.stop_tx.send(());
        let _ = self.handle.join();
    }
}

/// One parsed request record.
struct RequestRecord {
    record_path: PathBuf,
    record_name: String,
    created: NaiveDateTime,
    target: PathBuf,
}

impl DeletionQueue {
    pub fn new(
        requests_dir: PathBuf,
        poll_interval: Duration,
        timeout: Duration,
        email: Option<EmailConfig>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        fs::create_dir_all(&requests_dir)?;
        let sequence = AtomicU64::new(highest_existing_sequence(&requests_dir)? + 1);
        Ok(Self {
            inner: Arc::new(QueueInner {
                requests_dir,
                poll_interval,
                timeout,
                sequence,
                email,
                notifier,
                notified: Mutex::new(HashSet::new()),
            }),
        })
    }

    /// Durably enqueue a deletion request and return immediately. Safe to
    /// call before the worker is started; records survive process restarts.
    pub fn request_deletion(&self, target: &Path) -> Result<()> {
        let seq = self.inner.sequence.fetch_add(1, Ordering::SeqCst);
        // The sequence is zero-padded so the lexicographic record order used
        // by the worker matches numeric order within one second.
        let name = format!(
            "{}_{seq:010}{REQUEST_SUFFIX}",
            Utc::now().format(TIMESTAMP_FORMAT)
        );
        let record_path = self.inner.requests_dir.join(&name);
        // Write-then-rename so a concurrently scanning worker never reads a
        // half-written record.
        let tmp = self.inner.requests_dir.join(format!(".{name}.tmp"));
        fs::write(&tmp, target.to_string_lossy().as_bytes())?;
        fs::rename(&tmp, &record_path)?;
        debug!(target = %target.display(), record = name, "deletion requested");
        Ok(())
    }

    /// Start the background worker. It runs one poll immediately (picking up
    /// records left by a previous process run), then once per interval until
    /// stopped.
    pub fn start(&self) -> DeletionQueueWorker {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let inner = Arc::clone(&self.inner);
        let handle = std::thread::spawn(move || {
            inner.poll_cycle();
            loop {
                match stop_rx.recv_timeout(inner.poll_interval) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => inner.poll_cycle(),
                }
            }
        });
        DeletionQueueWorker { stop_tx, handle }
    }

    /// Run one poll cycle on the caller's thread. Exposed for external
    /// schedulers and deterministic tests.
    pub fn poll_once(&self) {
        self.inner.poll_cycle();
    }

    /// Number of request records currently on disk.
    pub fn pending_count(&self) -> Result<usize> {
        Ok(scan_records(&self.inner.requests_dir)?.len())
    }
}

impl QueueInner {
    fn poll_cycle(&self) {
        let records = match scan_records(&self.requests_dir) {
            Ok(records) => records,
            Err(err) => {
                warn!(dir = %self.requests_dir.display(), error = %err, "cannot scan deletion requests");
                return;
            }
        };

        let now = Utc::now().naive_utc();
        let mut overdue: Vec<PathBuf> = Vec::new();

        for record in records {
            if !record.target.exists() {
                // Deletion succeeded earlier, or the target never existed.
                self.finish_record(&record);
                continue;
            }

            let attempt = if record.target.is_dir() {
                fs::remove_dir_all(&record.target)
            } else {
                fs::remove_file(&record.target)
            };
            if let Err(err) = &attempt {
                debug!(target = %record.target.display(), error = %err, "deletion attempt failed");
            }

            if record.target.exists() {
                let age = (now - record.created)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                if age >= self.timeout {
                    warn!(
                        target = %record.target.display(),
                        age_secs = age.as_secs(),
                        "deletion request overdue, still retrying"
                    );
                    if self.mark_notified(&record.record_name) {
                        overdue.push(record.target.clone());
                    }
                } else {
                    warn!(target = %record.target.display(), "deletion failed, will retry");
                }
            } else {
                self.finish_record(&record);
            }
        }

        if !overdue.is_empty() {
            self.escalate(&overdue);
        }
    }

    fn finish_record(&self, record: &RequestRecord) {
        if let Err(err) = fs::remove_file(&record.record_path) {
            warn!(record = %record.record_path.display(), error = %err, "cannot remove request record");
            return;
        }
        let mut notified = lock_set(&self.notified);
        notified.remove(&record.record_name);
        info!(target = %record.target.display(), "deletion request completed");
    }

    /// Returns true the first time a record is marked, false afterwards.
    fn mark_notified(&self, record_name: &str) -> bool {
        lock_set(&self.notified).insert(record_name.to_string())
    }

    /// One notification per poll cycle, batching all newly overdue targets.
    fn escalate(&self, overdue: &[PathBuf]) {
        match &self.email {
            Some(email) => {
                let message = render_overdue_notification(email, overdue);
                if let Err(err) = self.notifier.notify(&message) {
                    warn!(error = %err, "operator notification failed");
                }
            }
            None => {
                warn!(
                    targets = ?overdue,
                    "deletion requests overdue and no notification email configured"
                );
            }
        }
    }
}

fn lock_set(set: &Mutex<HashSet<String>>) -> std::sync::MutexGuard<'_, HashSet<String>> {
    match set.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Parse `<yyyyMMdd-HHmmss>_<sequence>.deletionrequest`; anything else is a
/// foreign file and yields `None`.
fn parse_record_name(name: &str) -> Option<(NaiveDateTime, u64)> {
    let stem = name.strip_suffix(REQUEST_SUFFIX)?;
    let (timestamp, sequence) = stem.split_once('_')?;
    let created = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;
    let sequence = sequence.parse().ok()?;
    Some((created, sequence))
}

/// Collect valid request records in name (creation) order.
fn scan_records(dir: &Path) -> Result<Vec<RequestRecord>> {
    let mut records = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let record_name = entry.file_name().to_string_lossy().into_owned();
        let Some((created, _)) = parse_record_name(&record_name) else {
            continue;
        };
        let record_path = entry.path();
        let content = match fs::read_to_string(&record_path) {
            Ok(content) => content,
            Err(err) => {
                warn!(record = %record_path.display(), error = %err, "unreadable request record");
                continue;
            }
        };
        let target = PathBuf::from(content.trim());
        if target.as_os_str().is_empty() {
            continue;
        }
        records.push(RequestRecord {
            record_path,
            record_name,
            created,
            target,
        });
    }
    records.sort_by(|a, b| a.record_name.cmp(&b.record_name));
    Ok(records)
}

fn highest_existing_sequence(dir: &Path) -> Result<u64> {
    let mut highest = 0;
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if let Some((_, sequence)) = parse_record_name(&name) {
            highest = highest.max(sequence);
        }
    }
    Ok(highest)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use crate::notify::NotificationMessage;

    use super::*;

    struct RecordingNotifier {
        messages: StdMutex<Vec<NotificationMessage>>,
    }

    impl RecordingNotifier {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                messages: StdMutex::new(Vec::new()),
            })
        }

        fn count(&self) -> usize {
            self.messages.lock().unwrap().len()
        }
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, message: &NotificationMessage) -> Result<()> {
            self.messages.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn email() -> EmailConfig {
        EmailConfig {
            email_address: "ops@example.org".into(),
            email_from_address: "archiver@example.org".into(),
            email_subject: "overdue".into(),
            email_template: "${file-list}".into(),
        }
    }

    fn queue(dir: &Path, timeout: Duration, notifier: Arc<dyn Notifier>) -> DeletionQueue {
        DeletionQueue::new(
            dir.to_path_buf(),
            Duration::from_millis(10),
            timeout,
            Some(email()),
            notifier,
        )
        .unwrap()
    }

    #[test]
    fn request_for_missing_target_is_drained_without_error() {
        let tmp = tempfile::tempdir().unwrap();
        let queue = queue(
            &tmp.path().join("requests"),
            Duration::from_secs(3600),
            RecordingNotifier::new(),
        );
        queue
            .request_deletion(Path::new("/no/such/path/anywhere"))
            .unwrap();
        assert_eq!(queue.pending_count().unwrap(), 1);
        queue.poll_once();
        assert_eq!(queue.pending_count().unwrap(), 0);
    }

    #[test]
    fn deletes_files_and_directories_recursively() {
        let tmp = tempfile::tempdir().unwrap();
        let victim_dir = tmp.path().join("victim");
        fs::create_dir_all(victim_dir.join("nested")).unwrap();
        fs::write(victim_dir.join("nested/file.txt"), b"x").unwrap();
        let victim_file = tmp.path().join("loose.txt");
        fs::write(&victim_file, b"y").unwrap();

        let queue = queue(
            &tmp.path().join("requests"),
            Duration::from_secs(3600),
            RecordingNotifier::new(),
        );
        queue.request_deletion(&victim_dir).unwrap();
        queue.request_deletion(&victim_file).unwrap();
        queue.poll_once();

        assert!(!victim_dir.exists());
        assert!(!victim_file.exists());
        assert_eq!(queue.pending_count().unwrap(), 0);
    }

    #[test]
    fn records_survive_queue_restart() {
        let tmp = tempfile::tempdir().unwrap();
        let requests = tmp.path().join("requests");
        let victim = tmp.path().join("victim.txt");
        fs::write(&victim, b"z").unwrap();

        {
            let queue = queue(&requests, Duration::from_secs(3600), RecordingNotifier::new());
            queue.request_deletion(&victim).unwrap();
            // Process "crashes" before any poll.
        }

        let queue = queue(&requests, Duration::from_secs(3600), RecordingNotifier::new());
        assert_eq!(queue.pending_count().unwrap(), 1);
        queue.poll_once();
        assert!(!victim.exists());
        assert_eq!(queue.pending_count().unwrap(), 0);
    }

    #[test]
    fn foreign_files_are_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let requests = tmp.path().join("requests");
        fs::create_dir_all(&requests).unwrap();
        fs::write(requests.join("README.txt"), b"not a request").unwrap();
        fs::write(requests.join("garbage.deletionrequest"), b"/tmp/x").unwrap();

        let queue = queue(&requests, Duration::from_secs(3600), RecordingNotifier::new());
        assert_eq!(queue.pending_count().unwrap(), 0);
        queue.poll_once();
        assert!(requests.join("README.txt").exists());
        assert!(requests.join("garbage.deletionrequest").exists());
    }

    #[test]
    fn sequence_resumes_after_existing_records() {
        let tmp = tempfile::tempdir().unwrap();
        let requests = tmp.path().join("requests");
        fs::create_dir_all(&requests).unwrap();
        fs::write(requests.join("20260101-000000_7.deletionrequest"), b"/tmp/x").unwrap();

        let queue = queue(&requests, Duration::from_secs(3600), RecordingNotifier::new());
        queue.request_deletion(Path::new("/tmp/y")).unwrap();
        let names: Vec<String> = fs::read_dir(&requests)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().any(|n| n.ends_with("_0000000008.deletionrequest")));
    }

    #[test]
    fn record_names_sort_in_request_order_across_sequence_widths() {
        let tmp = tempfile::tempdir().unwrap();
        let requests = tmp.path().join("requests");
        fs::create_dir_all(&requests).unwrap();
        // Resume one below a width boundary so the next two requests get
        // sequences 9 and 10 within the same second.
        fs::write(requests.join("20260101-000000_8.deletionrequest"), b"/tmp/x").unwrap();

        let queue = queue(&requests, Duration::from_secs(3600), RecordingNotifier::new());
        queue.request_deletion(Path::new("/tmp/nine")).unwrap();
        queue.request_deletion(Path::new("/tmp/ten")).unwrap();

        let mut names: Vec<String> = fs::read_dir(&requests)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| parse_record_name(n).map(|(_, s)| s >= 9).unwrap_or(false))
            .collect();
        names.sort();
        assert_eq!(names.len(), 2);
        assert!(names[0].ends_with("_0000000009.deletionrequest"));
        assert!(names[1].ends_with("_0000000010.deletionrequest"));
    }

    #[cfg(unix)]
    #[test]
    fn overdue_target_is_escalated_exactly_once() {
        use std::os::unix::fs::PermissionsExt;

        // Permission bits do not stop root from deleting.
        if unsafe { nix::libc::geteuid() } == 0 {
            return;
        }

        let tmp = tempfile::tempdir().unwrap();
        let guard_dir = tmp.path().join("locked");
        fs::create_dir_all(&guard_dir).unwrap();
        let victim = guard_dir.join("stuck.txt");
        fs::write(&victim, b"cannot delete me").unwrap();
        fs::set_permissions(&guard_dir, fs::Permissions::from_mode(0o555)).unwrap();

        let notifier = RecordingNotifier::new();
        // Zero timeout: the request is overdue on its first failed poll.
        let queue = queue(&tmp.path().join("requests"), Duration::ZERO, notifier.clone());
        queue.request_deletion(&victim).unwrap();

        queue.poll_once();
        queue.poll_once();
        assert_eq!(notifier.count(), 1);
        assert_eq!(queue.pending_count().unwrap(), 1);

        // Unblock and verify the retry finally succeeds.
        fs::set_permissions(&guard_dir, fs::Permissions::from_mode(0o755)).unwrap();
        queue.poll_once();
        assert!(!victim.exists());
        assert_eq!(queue.pending_count().unwrap(), 0);
    }
}
