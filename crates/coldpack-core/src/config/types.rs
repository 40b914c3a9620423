use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use coldpack_types::{ColdpackError, Result};

use super::defaults::*;

/// Configuration of the archive orchestrator and replication finalizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiverConfig {
    /// Minimum total size of a container, in bytes.
    pub minimum_container_size_in_bytes: u64,
    /// Maximum total size of a container, in bytes.
    pub maximum_container_size_in_bytes: u64,
    /// Cap on the total size of datasets admitted for unarchiving, counting
    /// containers already flagged for deferred unarchiving.
    pub maximum_unarchiving_capacity_in_megabytes: u64,
    /// Where containers are assembled before the final copy.
    pub staging_destination: PathBuf,
    /// Where committed containers live.
    pub final_destination: PathBuf,
    /// Optional replica destination; when set, archiving is only durable once
    /// the replication finalizer confirms byte parity.
    #[serde(default)]
    pub replicated_destination: Option<PathBuf>,
    /// When true, unarchive requests are recorded and drained later by the
    /// maintenance sweep instead of being served immediately.
    #[serde(default)]
    pub delay_unarchiving: bool,
    /// Extra bytes required on top of the container size when waiting for
    /// free space at the final destination.
    #[serde(default = "default_free_space_safety_margin_bytes")]
    pub free_space_safety_margin_bytes: u64,
    #[serde(default = "default_free_space_polling_time")]
    pub free_space_polling_time: String,
    #[serde(default = "default_finalizer_polling_time")]
    pub finalizer_polling_time: String,
    #[serde(default = "default_finalizer_max_waiting_time")]
    pub finalizer_max_waiting_time: String,
}

impl ArchiverConfig {
    pub fn free_space_polling_interval(&self) -> Result<Duration> {
        parse_human_duration(&self.free_space_polling_time)
    }

    pub fn finalizer_polling_interval(&self) -> Result<Duration> {
        parse_human_duration(&self.finalizer_polling_time)
    }

    pub fn finalizer_max_waiting(&self) -> Result<Duration> {
        parse_human_duration(&self.finalizer_max_waiting_time)
    }

    pub fn maximum_unarchiving_capacity_in_bytes(&self) -> u64 {
        self.maximum_unarchiving_capacity_in_megabytes * 1024 * 1024
    }

    /// Fatal configuration problems are raised here, at construction time of
    /// the orchestrator, never at first use.
    pub fn validate(&self) -> Result<()> {
        if self.minimum_container_size_in_bytes > self.maximum_container_size_in_bytes {
            return Err(ColdpackError::Config(format!(
                "minimum container size ({}) exceeds maximum ({})",
                self.minimum_container_size_in_bytes, self.maximum_container_size_in_bytes
            )));
        }
        self.free_space_polling_interval()?;
        self.finalizer_polling_interval()?;
        self.finalizer_max_waiting()?;
        Ok(())
    }
}

/// Configuration of the archive cleaner and its deletion queues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanerConfig {
    /// Directory holding durable deletion-request records. Required whenever
    /// any async prefix is configured.
    #[serde(default)]
    pub deletion_requests_dir: Option<PathBuf>,
    /// Path prefixes routed to asynchronous deletion. Accepts a list or a
    /// comma-separated string via [`CleanerConfig::parse_prefix_list`].
    #[serde(default)]
    pub file_path_prefixes_for_async_deletion: Vec<PathBuf>,
    #[serde(default = "default_deletion_polling_time")]
    pub deletion_polling_time: String,
    #[serde(default = "default_deletion_timeout")]
    pub deletion_timeout: String,
    /// Operator notification settings for overdue deletions.
    #[serde(default)]
    pub email: Option<EmailConfig>,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            deletion_requests_dir: None,
            file_path_prefixes_for_async_deletion: Vec::new(),
            deletion_polling_time: default_deletion_polling_time(),
            deletion_timeout: default_deletion_timeout(),
            email: None,
        }
    }
}

impl CleanerConfig {
    pub fn deletion_polling_interval(&self) -> Result<Duration> {
        parse_human_duration(&self.deletion_polling_time)
    }

    pub fn deletion_timeout_duration(&self) -> Result<Duration> {
        parse_human_duration(&self.deletion_timeout)
    }

    /// Parse the `file-path-prefixes-for-async-deletion` form of the prefix
    /// list: comma-separated paths, empty entries ignored.
    pub fn parse_prefix_list(raw: &str) -> Vec<PathBuf> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if !self.file_path_prefixes_for_async_deletion.is_empty()
            && self.deletion_requests_dir.is_none()
        {
            return Err(ColdpackError::Config(
                "deletion-requests-dir is required when async deletion prefixes are configured"
                    .into(),
            ));
        }
        self.deletion_polling_interval()?;
        self.deletion_timeout_duration()?;
        if let Some(email) = &self.email {
            email.validate()?;
        }
        Ok(())
    }
}

/// Settings used to render the overdue-deletion operator notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub email_address: String,
    pub email_from_address: String,
    pub email_subject: String,
    /// Message template; must contain the `${file-list}` placeholder which is
    /// replaced by the overdue target paths, one per line.
    pub email_template: String,
}

impl EmailConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.email_template.contains(crate::notify::FILE_LIST_PLACEHOLDER) {
            return Err(ColdpackError::Config(format!(
                "email-template must contain the {} placeholder",
                crate::notify::FILE_LIST_PLACEHOLDER
            )));
        }
        Ok(())
    }
}
