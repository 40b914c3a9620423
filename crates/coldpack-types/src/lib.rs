pub mod dataset;
pub mod error;
pub mod report;
pub mod status;

pub use dataset::{Dataset, DatasetCode};
pub use error::{ColdpackError, Result};
pub use report::{BatchReport, DatasetOutcome};
pub use status::ArchivingStatus;
