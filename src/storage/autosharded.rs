//! Autosharded storage: the record routing core.
//!
//! Wraps the local embedded storage and intercepts every record
//! operation. Records in undistributable clusters, and deletes that are
//! already the forwarded side of another node's delete, go straight to
//! the wrapped storage. Everything else resolves the successor of the
//! record's cluster position: the local node short-circuits into the
//! wrapped storage, a remote node gets the operation as an RPC.
//!
//! Creates draw their cluster position from a Mersenne-Twister stream.
//! When the owning peer reports the position as taken, the position is
//! redrawn; after ten retries the duplicate surfaces to the caller, so a
//! single logical create issues at most eleven peer RPCs.
//!
//! Transactions are refused outright: there is no coordinator protocol
//! at this layer and a partial commit would be worse than none.

use crate::membership::types::NodeId;
use crate::ring::node::DhtNode;
use crate::ring::server::ServerInstance;
use crate::storage::error::StorageError;
use crate::storage::local::LocalStorage;
use crate::storage::types::{
    CLUSTER_POSITION_NEW, OperationMode, OperationResult, PhysicalPosition, RawBuffer,
    RecordCallback, RecordId,
};
use parking_lot::Mutex;
use rand_mt::Mt64;
use std::collections::HashSet;
use std::sync::Arc;

/// Storage type identifier kept byte-for-byte stable: metadata written
/// by existing deployments carries this exact (misspelled) string.
pub const STORAGE_TYPE: &str = "autoshareded";

const CREATE_RETRY_LIMIT: u32 = 10;

/// Source of fresh cluster positions for the create path. Draws must be
/// uniform on `[0, 2^63)`; nothing depends on the generator's identity.
pub trait PositionSource: Send + Sync {
    fn next_position(&self) -> i64;
}

/// The production source: one Mersenne-Twister stream behind a mutex,
/// seeded from system entropy.
pub struct TwisterPositions {
    generator: Mutex<Mt64>,
}

impl TwisterPositions {
    pub fn new() -> Self {
        Self {
            generator: Mutex::new(Mt64::new(rand::random::<u64>())),
        }
    }
}

impl Default for TwisterPositions {
    fn default() -> Self {
        Self::new()
    }
}

impl PositionSource for TwisterPositions {
    fn next_position(&self) -> i64 {
        // Clearing the sign bit keeps the draw exactly uniform on
        // [0, 2^63), with no negative i64::MIN artifact.
        (self.generator.lock().next_u64() & (i64::MAX as u64)) as i64
    }
}

pub struct AutoshardedStorage {
    wrapped: Arc<LocalStorage>,
    server: Arc<ServerInstance>,
    positions: Box<dyn PositionSource>,
    undistributed_clusters: HashSet<i16>,
}

impl AutoshardedStorage {
    pub fn new(
        server: Arc<ServerInstance>,
        wrapped: Arc<LocalStorage>,
        undistributable_clusters: &HashSet<String>,
    ) -> Arc<Self> {
        Self::with_position_source(
            server,
            wrapped,
            undistributable_clusters,
            Box::new(TwisterPositions::new()),
        )
    }

    pub fn with_position_source(
        server: Arc<ServerInstance>,
        wrapped: Arc<LocalStorage>,
        undistributable_clusters: &HashSet<String>,
        positions: Box<dyn PositionSource>,
    ) -> Arc<Self> {
        let mut undistributed = HashSet::new();
        for cluster_name in undistributable_clusters {
            match wrapped.cluster_id_by_name(cluster_name) {
                Some(cluster_id) => {
                    undistributed.insert(cluster_id);
                }
                None => {
                    tracing::warn!(
                        cluster = %cluster_name,
                        "undistributable cluster not present in storage, skipping"
                    );
                }
            }
        }

        Arc::new(Self {
            wrapped,
            server,
            positions,
            undistributed_clusters: undistributed,
        })
    }

    /// Each peer presents its ring id as its storage id.
    pub fn storage_id(&self) -> NodeId {
        self.server.local_node_id()
    }

    pub fn storage_type(&self) -> &'static str {
        STORAGE_TYPE
    }

    pub fn name(&self) -> &str {
        self.wrapped.name()
    }

    // ------------------------------------------------------------------
    // Record operations
    // ------------------------------------------------------------------

    pub async fn create_record(
        &self,
        data_segment_id: i32,
        rid: &mut RecordId,
        content: &[u8],
        version: i32,
        record_type: u8,
        mode: OperationMode,
        callback: Option<RecordCallback<PhysicalPosition>>,
    ) -> Result<OperationResult<PhysicalPosition>, StorageError> {
        if self.undistributed_clusters.contains(&rid.cluster_id) {
            return self.wrapped.create_record(
                data_segment_id,
                rid,
                content,
                version,
                record_type,
                mode,
                callback,
            );
        }

        let mut retry_count = 0;
        let created = loop {
            if rid.is_new() {
                rid.cluster_position = self.positions.next_position();
            }

            let remote = match self.server.find_successor(rid.routing_key()) {
                DhtNode::Local(_) => {
                    tracing::info!("Record {} has been distributed to this node", rid);

                    return self.wrapped.create_record(
                        data_segment_id,
                        rid,
                        content,
                        version,
                        record_type,
                        mode,
                        callback,
                    );
                }
                DhtNode::Remote(remote) => remote,
            };

            match remote
                .create_record(self.wrapped.name(), *rid, content, version, record_type)
                .await
            {
                Ok(response) => break response,
                Err(error @ StorageError::RecordDuplicated { .. }) => {
                    retry_count += 1;
                    if retry_count > CREATE_RETRY_LIMIT {
                        return Err(error);
                    }
                    tracing::debug!(
                        "Position {} already taken on {}, redrawing (retry {})",
                        rid.cluster_position,
                        remote.node_id(),
                        retry_count
                    );
                    rid.cluster_position = CLUSTER_POSITION_NEW;
                }
                Err(error) => return Err(error),
            }
        };

        rid.cluster_position = created.cluster_position;

        Ok(OperationResult::remote(created.position))
    }

    pub async fn read_record(
        &self,
        rid: &RecordId,
        fetch_plan: Option<&str>,
        ignore_cache: bool,
        callback: Option<RecordCallback<RawBuffer>>,
    ) -> Result<OperationResult<RawBuffer>, StorageError> {
        if self.undistributed_clusters.contains(&rid.cluster_id) {
            return self.wrapped.read_record(rid, fetch_plan, ignore_cache, callback);
        }

        match self.server.find_successor(rid.routing_key()) {
            DhtNode::Local(_) => self.wrapped.read_record(rid, fetch_plan, ignore_cache, callback),
            DhtNode::Remote(remote) => {
                let buffer = remote.read_record(self.wrapped.name(), *rid).await?;
                Ok(OperationResult::remote(buffer))
            }
        }
    }

    pub async fn update_record(
        &self,
        rid: &RecordId,
        content: &[u8],
        version: i32,
        record_type: u8,
        mode: OperationMode,
        callback: Option<RecordCallback<i32>>,
    ) -> Result<OperationResult<i32>, StorageError> {
        if self.undistributed_clusters.contains(&rid.cluster_id) {
            return self
                .wrapped
                .update_record(rid, content, version, record_type, mode, callback);
        }

        match self.server.find_successor(rid.routing_key()) {
            DhtNode::Local(_) => self
                .wrapped
                .update_record(rid, content, version, record_type, mode, callback),
            DhtNode::Remote(remote) => {
                let new_version = remote
                    .update_record(self.wrapped.name(), *rid, content, version, record_type)
                    .await?;
                Ok(OperationResult::remote(new_version))
            }
        }
    }

    /// Deletes a record. `forwarded` marks the call as the receiving side
    /// of another node's delete: it then executes locally, which is what
    /// keeps two nodes from forwarding the same delete back and forth.
    pub async fn delete_record(
        &self,
        rid: &RecordId,
        version: i32,
        mode: OperationMode,
        forwarded: bool,
        callback: Option<RecordCallback<bool>>,
    ) -> Result<OperationResult<bool>, StorageError> {
        if forwarded || self.undistributed_clusters.contains(&rid.cluster_id) {
            return self.wrapped.delete_record(rid, version, mode, callback);
        }

        match self.server.find_successor(rid.routing_key()) {
            DhtNode::Local(_) => self.wrapped.delete_record(rid, version, mode, callback),
            DhtNode::Remote(remote) => {
                let deleted = remote
                    .delete_record(self.wrapped.name(), *rid, version)
                    .await?;
                Ok(OperationResult::remote(deleted))
            }
        }
    }

    // ------------------------------------------------------------------
    // Transactions
    // ------------------------------------------------------------------

    pub fn commit(&self) -> Result<(), StorageError> {
        Err(StorageError::DistributedUnavailable(
            "transactions are not supported in distributed environment",
        ))
    }

    pub fn rollback(&self) -> Result<(), StorageError> {
        Err(StorageError::DistributedUnavailable(
            "transactions are not supported in distributed environment",
        ))
    }

    // ------------------------------------------------------------------
    // Administrative pass-through
    // ------------------------------------------------------------------

    pub fn add_cluster(&self, cluster_name: &str) -> Result<i16, StorageError> {
        self.wrapped.add_cluster(cluster_name)
    }

    pub fn drop_cluster(&self, cluster_name: &str) -> Result<bool, StorageError> {
        self.wrapped.drop_cluster(cluster_name)
    }

    pub fn cluster_id_by_name(&self, cluster_name: &str) -> Option<i16> {
        self.wrapped.cluster_id_by_name(cluster_name)
    }

    pub fn cluster_name_by_id(&self, cluster_id: i16) -> Option<String> {
        self.wrapped.cluster_name_by_id(cluster_id)
    }

    pub fn cluster_names(&self) -> Vec<String> {
        self.wrapped.cluster_names()
    }

    pub fn clusters(&self) -> usize {
        self.wrapped.clusters()
    }

    pub fn default_cluster_id(&self) -> i16 {
        self.wrapped.default_cluster_id()
    }

    pub fn add_data_segment(&self, segment_name: &str) -> Result<i32, StorageError> {
        self.wrapped.add_data_segment(segment_name)
    }

    pub fn count(&self, cluster_id: i16) -> Result<u64, StorageError> {
        self.wrapped.count(cluster_id)
    }

    pub fn count_many(&self, cluster_ids: &[i16]) -> Result<u64, StorageError> {
        self.wrapped.count_many(cluster_ids)
    }

    pub fn count_records(&self) -> u64 {
        self.wrapped.count_records()
    }

    pub fn is_closed(&self) -> bool {
        self.wrapped.is_closed()
    }

    pub fn close(&self) -> Result<(), StorageError> {
        self.wrapped.close()
    }

    pub fn reload(&self) -> Result<(), StorageError> {
        self.wrapped.reload()
    }

    pub fn is_lh_clusters_used(&self) -> bool {
        self.wrapped.is_lh_clusters_used()
    }

    /// The wrapped storage computes entry positions without any ring
    /// indirection.
    pub fn cluster_positions_for_entry(
        &self,
        cluster_id: i16,
        entry: i64,
    ) -> Result<Vec<i64>, StorageError> {
        self.wrapped.cluster_positions_for_entry(cluster_id, entry)
    }

    pub fn call_in_lock<T>(&self, f: impl FnOnce() -> T, exclusive: bool) -> T {
        self.wrapped.call_in_lock(f, exclusive)
    }
}
