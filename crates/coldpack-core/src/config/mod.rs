mod defaults;
mod types;

pub use defaults::parse_human_duration;
pub use types::{ArchiverConfig, CleanerConfig, EmailConfig};
