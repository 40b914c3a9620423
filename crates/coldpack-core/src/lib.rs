//! Tiered-archiving engine: moves groups of immutable dataset directories
//! from online shares into consolidated archive containers, keeps a ledger of
//! which datasets live in which container, restores them on demand, and
//! safely deletes the freed originals.
//!
//! The engine is deliberately synchronous: `archive`/`unarchive` run on the
//! caller's thread and may block on free-space polls; the deletion queue runs
//! one dedicated worker thread per configured path prefix; the replication
//! finalizer and the unarchiving maintenance sweep are invoked by an external
//! scheduler. All waits are fixed-interval polls so that a crashed or
//! restarted process resumes from durable state without missed notifications.

pub mod archiver;
pub mod cleaner;
pub mod config;
pub mod deletion;
pub mod fileops;
pub mod finalizer;
pub mod grouping;
pub mod maintenance;
pub mod metadata;
pub mod notify;
pub mod services;
pub mod waiting;

#[cfg(test)]
mod testutil;

pub use coldpack_types::{
    ArchivingStatus, BatchReport, ColdpackError, Dataset, DatasetCode, DatasetOutcome, Result,
};
