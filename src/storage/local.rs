//! Local embedded storage.
//!
//! A directory-backed storage holding named linear-hashing clusters (the
//! position index) and append-only data segments (the record payloads).
//! This is the storage each node wraps with the autosharded router; it
//! serves every record that routes to the local ring position and every
//! record in an undistributable cluster.
//!
//! The storage configuration file records the cluster/segment registry
//! and the on-disk byte order, so a directory written on one host stays
//! readable on another.

use crate::lhpe::cluster::LhpeCluster;
use crate::lhpe::convert;
use crate::storage::error::StorageError;
use crate::storage::types::{
    OperationMode, OperationResult, PhysicalPosition, RawBuffer, RecordCallback, RecordId,
};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

const CONFIG_FILE: &str = "storage.json";

/// Header prepended to every data segment entry:
/// `[len u32][record_type u8][version i32]`.
const SEGMENT_HEADER_SIZE: usize = 9;

#[derive(Debug, Serialize, Deserialize)]
struct StorageConfigFile {
    name: String,
    byte_order: String,
    default_cluster_id: i16,
    clusters: Vec<RegistryEntry16>,
    segments: Vec<RegistryEntry32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct RegistryEntry16 {
    id: i16,
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct RegistryEntry32 {
    id: i32,
    name: String,
}

/// Append-only file of record payloads. Positions handed out by `append`
/// are byte offsets and never move; deleted entries are left in place.
pub struct DataSegment {
    id: i32,
    name: String,
    inner: Mutex<SegmentFile>,
}

struct SegmentFile {
    file: File,
    len: u64,
}

impl DataSegment {
    fn open(dir: &Path, name: &str, id: i32) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(dir.join(format!("{name}.ods")))?;
        let len = file.metadata()?.len();

        Ok(Self {
            id,
            name: name.to_string(),
            inner: Mutex::new(SegmentFile { file, len }),
        })
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends an entry and returns its segment position.
    fn append(&self, record_type: u8, version: i32, content: &[u8]) -> io::Result<i64> {
        let mut header = [0u8; SEGMENT_HEADER_SIZE];
        convert::put_u32(&mut header, 0, content.len() as u32);
        header[4] = record_type;
        convert::put_i32(&mut header, 5, version);

        let mut inner = self.inner.lock();
        let position = inner.len;

        inner.file.seek(SeekFrom::Start(position))?;
        inner.file.write_all(&header)?;
        inner.file.write_all(content)?;
        inner.len += (SEGMENT_HEADER_SIZE + content.len()) as u64;

        Ok(position as i64)
    }

    fn read(&self, position: i64) -> Result<RawBuffer, StorageError> {
        let mut inner = self.inner.lock();

        let mut header = [0u8; SEGMENT_HEADER_SIZE];
        inner.file.seek(SeekFrom::Start(position as u64))?;
        inner.file.read_exact(&mut header)?;

        let len = convert::get_u32(&header, 0) as usize;
        let record_type = header[4];
        let version = convert::get_i32(&header, 5);

        let mut content = vec![0u8; len];
        inner.file.read_exact(&mut content)?;

        Ok(RawBuffer {
            content,
            record_type,
            version,
        })
    }
}

pub struct LocalStorage {
    name: String,
    dir: PathBuf,
    clusters: RwLock<Vec<Option<Arc<Mutex<LhpeCluster>>>>>,
    cluster_ids: DashMap<String, i16>,
    segments: RwLock<Vec<Option<Arc<DataSegment>>>>,
    segment_ids: DashMap<String, i32>,
    default_cluster_id: i16,
    /// Storage-wide lock exposed through `call_in_lock`. Record operations
    /// take it shared; administrative callers may take it exclusive.
    lock: RwLock<()>,
    closed: AtomicBool,
}

impl LocalStorage {
    /// Opens the storage directory, creating it (with a default cluster
    /// and data segment) on first use.
    pub fn open(dir: impl Into<PathBuf>, name: &str) -> Result<Arc<Self>, StorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        let storage = Arc::new(Self {
            name: name.to_string(),
            dir: dir.clone(),
            clusters: RwLock::new(Vec::new()),
            cluster_ids: DashMap::new(),
            segments: RwLock::new(Vec::new()),
            segment_ids: DashMap::new(),
            default_cluster_id: 0,
            lock: RwLock::new(()),
            closed: AtomicBool::new(false),
        });

        if dir.join(CONFIG_FILE).exists() {
            storage.load_config()?;
        } else {
            storage.add_data_segment("default")?;
            storage.add_cluster("default")?;
        }

        tracing::info!(
            storage = name,
            clusters = storage.clusters(),
            "local storage ready at {}",
            dir.display()
        );

        Ok(storage)
    }

    /// True when a storage directory has already been initialized here.
    pub fn exists(dir: &Path) -> bool {
        dir.join(CONFIG_FILE).exists()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Flushes every cluster and marks the storage closed.
    pub fn close(&self) -> Result<(), StorageError> {
        let _exclusive = self.lock.write();
        for cluster in self.clusters.read().iter().flatten() {
            cluster.lock().flush()?;
        }
        self.closed.store(true, Ordering::Release);
        Ok(())
    }

    /// Drops in-memory registries and reloads them from the config file.
    pub fn reload(&self) -> Result<(), StorageError> {
        let _exclusive = self.lock.write();
        self.clusters.write().clear();
        self.cluster_ids.clear();
        self.segments.write().clear();
        self.segment_ids.clear();
        self.load_config()
    }

    /// Runs `f` under the storage lock, exclusive or shared.
    pub fn call_in_lock<T>(&self, f: impl FnOnce() -> T, exclusive: bool) -> T {
        if exclusive {
            let _guard = self.lock.write();
            f()
        } else {
            let _guard = self.lock.read();
            f()
        }
    }

    // ------------------------------------------------------------------
    // Cluster administration
    // ------------------------------------------------------------------

    pub fn add_cluster(&self, cluster_name: &str) -> Result<i16, StorageError> {
        if self.cluster_ids.contains_key(cluster_name) {
            return Err(StorageError::Local(format!(
                "cluster '{cluster_name}' already exists"
            )));
        }

        let mut clusters = self.clusters.write();
        let id = clusters.len() as i16;
        let cluster = LhpeCluster::open(&self.dir, cluster_name, id)?;
        clusters.push(Some(Arc::new(Mutex::new(cluster))));
        drop(clusters);

        self.cluster_ids.insert(cluster_name.to_string(), id);
        self.save_config()?;

        tracing::info!(storage = %self.name, cluster = cluster_name, id, "cluster added");
        Ok(id)
    }

    pub fn drop_cluster(&self, cluster_name: &str) -> Result<bool, StorageError> {
        let Some((_, id)) = self.cluster_ids.remove(cluster_name) else {
            return Ok(false);
        };

        let slot = self.clusters.write()[id as usize].take();
        if let Some(cluster) = slot {
            let cluster = Arc::try_unwrap(cluster).map_err(|_| {
                StorageError::Local(format!("cluster '{cluster_name}' is still in use"))
            })?;
            cluster.into_inner().delete()?;
        }

        self.save_config()?;
        tracing::info!(storage = %self.name, cluster = cluster_name, "cluster dropped");
        Ok(true)
    }

    pub fn cluster_id_by_name(&self, cluster_name: &str) -> Option<i16> {
        self.cluster_ids.get(cluster_name).map(|entry| *entry.value())
    }

    pub fn cluster_name_by_id(&self, cluster_id: i16) -> Option<String> {
        self.cluster_ids
            .iter()
            .find(|entry| *entry.value() == cluster_id)
            .map(|entry| entry.key().clone())
    }

    pub fn cluster_names(&self) -> Vec<String> {
        self.cluster_ids.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of registered clusters.
    pub fn clusters(&self) -> usize {
        self.cluster_ids.len()
    }

    pub fn default_cluster_id(&self) -> i16 {
        self.default_cluster_id
    }

    pub fn count(&self, cluster_id: i16) -> Result<u64, StorageError> {
        let cluster = self.cluster(cluster_id)?;
        let count = cluster.lock().count();
        Ok(count)
    }

    pub fn count_many(&self, cluster_ids: &[i16]) -> Result<u64, StorageError> {
        let mut total = 0;
        for &cluster_id in cluster_ids {
            total += self.count(cluster_id)?;
        }
        Ok(total)
    }

    pub fn count_records(&self) -> u64 {
        self.clusters
            .read()
            .iter()
            .flatten()
            .map(|cluster| cluster.lock().count())
            .sum()
    }

    /// Linear-hash clusters are the only cluster kind this storage holds.
    pub fn is_lh_clusters_used(&self) -> bool {
        true
    }

    /// Positions in the bucket chain `entry` hashes to, for LH iteration.
    pub fn cluster_positions_for_entry(
        &self,
        cluster_id: i16,
        entry: i64,
    ) -> Result<Vec<i64>, StorageError> {
        let cluster = self.cluster(cluster_id)?;
        let positions = cluster.lock().positions_for_entry(entry)?;
        Ok(positions)
    }

    // ------------------------------------------------------------------
    // Data segments
    // ------------------------------------------------------------------

    pub fn add_data_segment(&self, segment_name: &str) -> Result<i32, StorageError> {
        if self.segment_ids.contains_key(segment_name) {
            return Err(StorageError::Local(format!(
                "data segment '{segment_name}' already exists"
            )));
        }

        let mut segments = self.segments.write();
        let id = segments.len() as i32;
        segments.push(Some(Arc::new(DataSegment::open(&self.dir, segment_name, id)?)));
        drop(segments);

        self.segment_ids.insert(segment_name.to_string(), id);
        self.save_config()?;
        Ok(id)
    }

    pub fn data_segment_id_by_name(&self, segment_name: &str) -> Option<i32> {
        self.segment_ids.get(segment_name).map(|entry| *entry.value())
    }

    // ------------------------------------------------------------------
    // Record operations
    // ------------------------------------------------------------------

    /// Stores a new record. A new RID gets the cluster's next sequential
    /// position; a pre-assigned position (the autosharded path) is kept
    /// and rejected as duplicated if already taken.
    pub fn create_record(
        &self,
        data_segment_id: i32,
        rid: &mut RecordId,
        content: &[u8],
        version: i32,
        record_type: u8,
        mode: OperationMode,
        callback: Option<RecordCallback<PhysicalPosition>>,
    ) -> Result<OperationResult<PhysicalPosition>, StorageError> {
        let _shared = self.lock.read();

        let cluster = self.cluster(rid.cluster_id)?;
        let segment = self.segment(data_segment_id)?;

        let mut cluster = cluster.lock();

        if rid.is_new() {
            rid.cluster_position = cluster.next_position();
        } else if cluster.contains(rid.cluster_position)? {
            return Err(StorageError::RecordDuplicated { rid: *rid });
        }

        let data_segment_pos = segment.append(record_type, version, content)?;
        let physical_position = PhysicalPosition {
            data_segment_id,
            data_segment_pos,
            record_type,
            record_version: version,
        };

        cluster.insert(rid.cluster_position, physical_position)?;
        if mode == OperationMode::Synchronous {
            cluster.flush()?;
        }
        drop(cluster);

        if let Some(callback) = callback {
            callback(rid, &physical_position);
        }

        Ok(OperationResult::local(physical_position))
    }

    pub fn read_record(
        &self,
        rid: &RecordId,
        _fetch_plan: Option<&str>,
        _ignore_cache: bool,
        callback: Option<RecordCallback<RawBuffer>>,
    ) -> Result<OperationResult<RawBuffer>, StorageError> {
        let _shared = self.lock.read();

        let cluster = self.cluster(rid.cluster_id)?;
        let physical_position = cluster
            .lock()
            .get(rid.cluster_position)?
            .ok_or(StorageError::RecordNotFound { rid: *rid })?;

        let segment = self.segment(physical_position.data_segment_id)?;
        let buffer = segment.read(physical_position.data_segment_pos)?;

        if let Some(callback) = callback {
            callback(rid, &buffer);
        }

        Ok(OperationResult::local(buffer))
    }

    /// Replaces a record's payload after an optimistic version check and
    /// returns the bumped version.
    pub fn update_record(
        &self,
        rid: &RecordId,
        content: &[u8],
        version: i32,
        record_type: u8,
        mode: OperationMode,
        callback: Option<RecordCallback<i32>>,
    ) -> Result<OperationResult<i32>, StorageError> {
        let _shared = self.lock.read();

        let cluster = self.cluster(rid.cluster_id)?;
        let mut cluster = cluster.lock();

        let current = cluster
            .get(rid.cluster_position)?
            .ok_or(StorageError::RecordNotFound { rid: *rid })?;
        if current.record_version != version {
            return Err(StorageError::VersionConflict {
                rid: *rid,
                expected: version,
                actual: current.record_version,
            });
        }

        let new_version = version + 1;
        let segment = self.segment(current.data_segment_id)?;
        let data_segment_pos = segment.append(record_type, new_version, content)?;

        cluster.update(
            rid.cluster_position,
            PhysicalPosition {
                data_segment_id: current.data_segment_id,
                data_segment_pos,
                record_type,
                record_version: new_version,
            },
        )?;
        if mode == OperationMode::Synchronous {
            cluster.flush()?;
        }
        drop(cluster);

        if let Some(callback) = callback {
            callback(rid, &new_version);
        }

        Ok(OperationResult::local(new_version))
    }

    /// Removes a record after an optimistic version check. Returns false
    /// when the record does not exist.
    pub fn delete_record(
        &self,
        rid: &RecordId,
        version: i32,
        mode: OperationMode,
        callback: Option<RecordCallback<bool>>,
    ) -> Result<OperationResult<bool>, StorageError> {
        let _shared = self.lock.read();

        let cluster = self.cluster(rid.cluster_id)?;
        let mut cluster = cluster.lock();

        let Some(current) = cluster.get(rid.cluster_position)? else {
            return Ok(OperationResult::local(false));
        };
        if current.record_version != version {
            return Err(StorageError::VersionConflict {
                rid: *rid,
                expected: version,
                actual: current.record_version,
            });
        }

        cluster.remove(rid.cluster_position)?;
        if mode == OperationMode::Synchronous {
            cluster.flush()?;
        }
        drop(cluster);

        if let Some(callback) = callback {
            callback(rid, &true);
        }

        Ok(OperationResult::local(true))
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn cluster(&self, cluster_id: i16) -> Result<Arc<Mutex<LhpeCluster>>, StorageError> {
        self.clusters
            .read()
            .get(cluster_id as usize)
            .and_then(|slot| slot.clone())
            .ok_or_else(|| StorageError::Local(format!("unknown cluster id {cluster_id}")))
    }

    fn segment(&self, segment_id: i32) -> Result<Arc<DataSegment>, StorageError> {
        self.segments
            .read()
            .get(segment_id as usize)
            .and_then(|slot| slot.clone())
            .ok_or_else(|| StorageError::Local(format!("unknown data segment id {segment_id}")))
    }

    fn byte_order_name() -> &'static str {
        // The disk format is fixed little-endian regardless of host order;
        // the config records it so foreign readers need not guess.
        "little-endian"
    }

    fn save_config(&self) -> Result<(), StorageError> {
        let mut clusters: Vec<RegistryEntry16> = self
            .cluster_ids
            .iter()
            .map(|entry| RegistryEntry16 {
                id: *entry.value(),
                name: entry.key().clone(),
            })
            .collect();
        clusters.sort_by_key(|entry| entry.id);

        let mut segments: Vec<RegistryEntry32> = self
            .segment_ids
            .iter()
            .map(|entry| RegistryEntry32 {
                id: *entry.value(),
                name: entry.key().clone(),
            })
            .collect();
        segments.sort_by_key(|entry| entry.id);

        let config = StorageConfigFile {
            name: self.name.clone(),
            byte_order: Self::byte_order_name().to_string(),
            default_cluster_id: self.default_cluster_id,
            clusters,
            segments,
        };

        let body = serde_json::to_vec_pretty(&config)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        std::fs::write(self.dir.join(CONFIG_FILE), body)?;
        Ok(())
    }

    fn load_config(&self) -> Result<(), StorageError> {
        let body = std::fs::read(self.dir.join(CONFIG_FILE))?;
        let config: StorageConfigFile = serde_json::from_slice(&body)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        let mut clusters = self.clusters.write();
        for entry in &config.clusters {
            let cluster = LhpeCluster::open(&self.dir, &entry.name, entry.id)?;
            let index = entry.id as usize;
            if clusters.len() <= index {
                clusters.resize_with(index + 1, || None);
            }
            clusters[index] = Some(Arc::new(Mutex::new(cluster)));
            self.cluster_ids.insert(entry.name.clone(), entry.id);
        }
        drop(clusters);

        let mut segments = self.segments.write();
        for entry in &config.segments {
            let segment = DataSegment::open(&self.dir, &entry.name, entry.id)?;
            let index = entry.id as usize;
            if segments.len() <= index {
                segments.resize_with(index + 1, || None);
            }
            segments[index] = Some(Arc::new(segment));
            self.segment_ids.insert(entry.name.clone(), entry.id);
        }

        Ok(())
    }
}
