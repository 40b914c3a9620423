use thiserror::Error;

pub type Result<T> = std::result::Result<T, ColdpackError>;

#[derive(Debug, Error)]
pub enum ColdpackError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error(
        "unarchiving capacity exceeded: requested {requested_bytes} bytes plus \
         {reserved_bytes} bytes already reserved would exceed the maximum of {maximum_bytes} bytes"
    )]
    CapacityExceeded {
        requested_bytes: u64,
        reserved_bytes: u64,
        maximum_bytes: u64,
    },

    #[error("container not found: '{0}'")]
    ContainerNotFound(String),

    #[error("dataset not found: '{0}'")]
    DatasetNotFound(String),

    #[error("invalid container format: {0}")]
    InvalidFormat(String),

    #[error("replication of container '{0}' did not complete within the configured maximum wait")]
    ReplicationTimeout(String),

    #[error("dataset '{0}' is locked by another archiving operation")]
    Locked(String),

    #[error("{0}")]
    Other(String),
}
