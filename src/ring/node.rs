//! Peer handles produced by successor resolution.
//!
//! [`DhtNode`] is what a routing decision yields: either this node (the
//! caller short-circuits into its own wrapped storage) or a remote peer
//! holding the record's ring range. Remote record operations are JSON
//! RPCs against the peer's record endpoints; their error bodies are
//! mapped back into typed [`StorageError`]s so the duplicate-key signal
//! survives the wire.
//!
//! No retries happen here. A transport fault surfaces unchanged as
//! `RemoteRpc`; retry policy belongs to the database client above.

use crate::membership::types::NodeId;
use crate::storage::error::StorageError;
use crate::storage::protocol::{
    CreateRecordRequest, CreateRecordResponse, DeleteRecordRequest, DeleteRecordResponse,
    ENDPOINT_CREATE_RECORD, ENDPOINT_DELETE_RECORD, ENDPOINT_READ_RECORD, ENDPOINT_UPDATE_RECORD,
    ErrorResponse, ReadRecordResponse, UpdateRecordRequest, UpdateRecordResponse,
};
use crate::storage::types::{RawBuffer, RecordId};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// A resolved successor: this node or a reachable peer.
pub enum DhtNode {
    Local(NodeId),
    Remote(RemoteNode),
}

impl DhtNode {
    pub fn node_id(&self) -> NodeId {
        match self {
            DhtNode::Local(id) => *id,
            DhtNode::Remote(node) => node.node_id(),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, DhtNode::Local(_))
    }
}

/// RPC client for one remote peer.
pub struct RemoteNode {
    id: NodeId,
    base_url: String,
    client: reqwest::Client,
}

impl RemoteNode {
    pub fn new(id: NodeId, http_addr: std::net::SocketAddr, client: reqwest::Client) -> Self {
        Self {
            id,
            base_url: format!("http://{http_addr}"),
            client,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.id
    }

    pub async fn create_record(
        &self,
        storage: &str,
        record_id: RecordId,
        content: &[u8],
        version: i32,
        record_type: u8,
    ) -> Result<CreateRecordResponse, StorageError> {
        self.post(
            ENDPOINT_CREATE_RECORD,
            &CreateRecordRequest {
                storage: storage.to_string(),
                record_id,
                content: content.to_vec(),
                version,
                record_type,
            },
            record_id,
        )
        .await
    }

    pub async fn read_record(
        &self,
        storage: &str,
        record_id: RecordId,
    ) -> Result<RawBuffer, StorageError> {
        let url = format!(
            "{}{}/{}/{}?storage={}",
            self.base_url, ENDPOINT_READ_RECORD, record_id.cluster_id, record_id.cluster_position,
            storage
        );

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| StorageError::RemoteRpc(e.to_string()))?;

        let body: ReadRecordResponse = Self::decode(response, record_id).await?;
        Ok(RawBuffer {
            content: body.content,
            record_type: body.record_type,
            version: body.version,
        })
    }

    pub async fn update_record(
        &self,
        storage: &str,
        record_id: RecordId,
        content: &[u8],
        version: i32,
        record_type: u8,
    ) -> Result<i32, StorageError> {
        let body: UpdateRecordResponse = self
            .post(
                ENDPOINT_UPDATE_RECORD,
                &UpdateRecordRequest {
                    storage: storage.to_string(),
                    record_id,
                    content: content.to_vec(),
                    version,
                    record_type,
                },
                record_id,
            )
            .await?;
        Ok(body.version)
    }

    /// Deletes on the owning peer. The request is marked `forwarded` so
    /// the receiver executes locally instead of routing again.
    pub async fn delete_record(
        &self,
        storage: &str,
        record_id: RecordId,
        version: i32,
    ) -> Result<bool, StorageError> {
        let body: DeleteRecordResponse = self
            .post(
                ENDPOINT_DELETE_RECORD,
                &DeleteRecordRequest {
                    storage: storage.to_string(),
                    record_id,
                    version,
                    forwarded: true,
                },
                record_id,
            )
            .await?;
        Ok(body.deleted)
    }

    async fn post<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        endpoint: &str,
        request: &Req,
        record_id: RecordId,
    ) -> Result<Resp, StorageError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, endpoint))
            .json(request)
            .send()
            .await
            .map_err(|e| StorageError::RemoteRpc(e.to_string()))?;

        Self::decode(response, record_id).await
    }

    async fn decode<Resp: DeserializeOwned>(
        response: reqwest::Response,
        record_id: RecordId,
    ) -> Result<Resp, StorageError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<Resp>()
                .await
                .map_err(|e| StorageError::RemoteRpc(e.to_string()));
        }

        match response.json::<ErrorResponse>().await {
            Ok(body) => Err(StorageError::from_wire(&body.kind, body.message, record_id)),
            Err(_) => Err(StorageError::RemoteRpc(format!(
                "peer answered {status} for {record_id}"
            ))),
        }
    }
}
