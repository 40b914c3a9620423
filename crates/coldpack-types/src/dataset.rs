use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Unique identifier of an immutable, directory-shaped dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetCode(pub String);

impl DatasetCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DatasetCode {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Descriptor of one dataset as seen by the archiving engine.
///
/// `size_in_bytes` may be unknown when the catalog has not yet measured the
/// dataset; the grouping policy patches it from the content provider before
/// any size-bound decision is made.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub code: DatasetCode,
    /// Identifier of the owning experiment.
    pub experiment: String,
    /// Dataset type code (e.g. raw, processed).
    pub dataset_type: String,
    /// Owning sample, when the dataset is sample-attached.
    pub sample: Option<String>,
    pub size_in_bytes: Option<u64>,
    /// Identifier of the share currently holding the online copy.
    pub share_id: Option<String>,
    /// Absolute root of the dataset directory on its share.
    pub location: PathBuf,
}

impl Dataset {
    /// Size to use in grouping and validation arithmetic. Callers must have
    /// patched unknown sizes beforehand; unknown counts as zero here.
    pub fn size_or_zero(&self) -> u64 {
        self.size_in_bytes.unwrap_or(0)
    }
}
