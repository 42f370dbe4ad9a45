//! Typed errors for the storage and routing layers.
//!
//! The `kind` string travels on the wire so the sending side of a record
//! RPC can rebuild the typed error (the duplicate-key kind drives the
//! create retry loop).

use crate::storage::types::RecordId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("record {rid} already exists")]
    RecordDuplicated { rid: RecordId },

    #[error("record {rid} not found")]
    RecordNotFound { rid: RecordId },

    #[error("version conflict on {rid}: expected {expected}, actual {actual}")]
    VersionConflict {
        rid: RecordId,
        expected: i32,
        actual: i32,
    },

    #[error("{0}")]
    DistributedUnavailable(&'static str),

    #[error("remote rpc failed: {0}")]
    RemoteRpc(String),

    #[error("storage error: {0}")]
    Local(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Stable identifier used in RPC error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::RecordDuplicated { .. } => "record_duplicated",
            StorageError::RecordNotFound { .. } => "record_not_found",
            StorageError::VersionConflict { .. } => "version_conflict",
            StorageError::DistributedUnavailable(_) => "distributed_unavailable",
            StorageError::RemoteRpc(_) => "remote_rpc",
            StorageError::Local(_) => "local",
            StorageError::Serialization(_) => "serialization",
            StorageError::Io(_) => "io",
        }
    }

    /// Rebuilds the typed error from a wire `kind` + message. Kinds the
    /// caller cannot act on collapse into `RemoteRpc`.
    pub fn from_wire(kind: &str, message: String, rid: RecordId) -> Self {
        match kind {
            "record_duplicated" => StorageError::RecordDuplicated { rid },
            "record_not_found" => StorageError::RecordNotFound { rid },
            "distributed_unavailable" => {
                StorageError::DistributedUnavailable("transactions are not supported in distributed environment")
            }
            _ => StorageError::RemoteRpc(message),
        }
    }
}
