use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Archiving status of a dataset, driven by the engine but owned by the
/// surrounding catalog.
///
/// Durability of the archive copy is tracked separately by the orthogonal
/// `present_in_archive` flag passed alongside every status update: false
/// while only the primary archive copy exists and replication is pending,
/// true once replication is confirmed or no replication is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArchivingStatus {
    /// The dataset lives only on an online share.
    Available,
    /// The dataset lives in an archive container (and possibly on a share).
    Archived,
}

impl fmt::Display for ArchivingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchivingStatus::Available => f.write_str("AVAILABLE"),
            ArchivingStatus::Archived => f.write_str("ARCHIVED"),
        }
    }
}

impl FromStr for ArchivingStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "AVAILABLE" => Ok(ArchivingStatus::Available),
            "ARCHIVED" => Ok(ArchivingStatus::Archived),
            other => Err(format!("unknown archiving status: '{other}'")),
        }
    }
}
