use serde::{Deserialize, Serialize};
use std::fmt;

/// Cluster position of a record that has not been placed yet.
pub const CLUSTER_POSITION_NEW: i64 = -1;

/// Identifier of a record: the cluster it belongs to plus its position
/// inside that cluster. The position doubles as the DHT routing key.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub cluster_id: i16,
    pub cluster_position: i64,
}

impl RecordId {
    pub fn new(cluster_id: i16) -> Self {
        Self {
            cluster_id,
            cluster_position: CLUSTER_POSITION_NEW,
        }
    }

    pub fn with_position(cluster_id: i16, cluster_position: i64) -> Self {
        Self {
            cluster_id,
            cluster_position,
        }
    }

    /// A record is new until a cluster position has been assigned.
    pub fn is_new(&self) -> bool {
        self.cluster_position < 0
    }

    /// The position reinterpreted as the unsigned 64-bit ring key.
    pub fn routing_key(&self) -> u64 {
        self.cluster_position as u64
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}:{}", self.cluster_id, self.cluster_position)
    }
}

/// On-disk locator of a record payload, stored in a bucket value slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalPosition {
    pub data_segment_id: i32,
    pub data_segment_pos: i64,
    pub record_type: u8,
    pub record_version: i32,
}

/// A record payload as read back from a data segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBuffer {
    pub content: Vec<u8>,
    pub record_type: u8,
    pub version: i32,
}

/// Whether a record operation flushes the cluster writeback lists before
/// returning or leaves them registered for a later flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationMode {
    Synchronous,
    Asynchronous,
}

/// Result of a record operation together with the node it was served by.
/// `from_remote` is true when a peer RPC produced the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult<T> {
    pub result: T,
    pub from_remote: bool,
}

impl<T> OperationResult<T> {
    pub fn local(result: T) -> Self {
        Self {
            result,
            from_remote: false,
        }
    }

    pub fn remote(result: T) -> Self {
        Self {
            result,
            from_remote: true,
        }
    }
}

/// Completion callback for record operations. Invoked only when the
/// operation is served by the local storage; remote-served operations
/// return without calling it.
pub type RecordCallback<T> = Box<dyn FnOnce(&RecordId, &T) + Send>;
