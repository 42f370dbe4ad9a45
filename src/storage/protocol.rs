//! Record RPC Protocol
//!
//! Endpoints and Data Transfer Objects for record operations forwarded
//! between peers. A node that resolves a record's successor to another
//! member serializes the operation into one of these requests and POSTs
//! it to the owner; the owner executes it against its own storage and
//! answers with the matching response DTO.
//!
//! Errors travel as [`ErrorResponse`] with a stable `kind` string so the
//! sender can rebuild the typed error (the duplicate-key kind is what
//! drives the create retry loop).

use crate::storage::types::{PhysicalPosition, RecordId};
use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// Store a record on the owning node.
pub const ENDPOINT_CREATE_RECORD: &str = "/records/create";
/// Read a record from the owning node.
pub const ENDPOINT_READ_RECORD: &str = "/records/read";
/// Update a record on the owning node.
pub const ENDPOINT_UPDATE_RECORD: &str = "/records/update";
/// Delete a record on the owning node.
pub const ENDPOINT_DELETE_RECORD: &str = "/records/delete";

// --- Data Transfer Objects ---

/// Payload for a forwarded create. The record id already carries the
/// cluster position chosen by the sender; the receiving node keeps it
/// unless its storage reports the position as taken.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRecordRequest {
    /// Name of the target storage on the receiving node.
    pub storage: String,
    pub record_id: RecordId,
    pub content: Vec<u8>,
    pub version: i32,
    pub record_type: u8,
}

/// Acknowledgment of a create: the position the record ended up at.
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRecordResponse {
    /// Final cluster position; the sender writes it back into the
    /// caller's record id.
    pub cluster_position: i64,
    pub position: PhysicalPosition,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReadRecordResponse {
    pub content: Vec<u8>,
    pub record_type: u8,
    pub version: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateRecordRequest {
    pub storage: String,
    pub record_id: RecordId,
    pub content: Vec<u8>,
    pub version: i32,
    pub record_type: u8,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateRecordResponse {
    /// Version after the update.
    pub version: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteRecordRequest {
    pub storage: String,
    pub record_id: RecordId,
    pub version: i32,
    /// True when this request is already the forwarded side of another
    /// node's delete. The receiver then executes locally and never
    /// forwards again, which is what breaks forwarding cycles.
    pub forwarded: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeleteRecordResponse {
    pub deleted: bool,
}

/// Wire form of a typed storage error.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub kind: String,
    pub message: String,
}
