//! Linear-hashing extensible cluster.
//!
//! A cluster maps cluster positions to [`PhysicalPosition`]s through a
//! growing table of fixed-size buckets backed by two files: main buckets
//! in `<name>.lhb`, overflow buckets in `<name>.lho`, split state and
//! counters in `<name>.lhm`. Buckets that fill up chain into overflow
//! buckets; when the load factor passes 3/4 the split pointer advances
//! and one chain is rehashed over a freshly appended main bucket.
//!
//! Mutated buckets register themselves with the shared [`StoreList`];
//! `flush` drains the lists and writes the registered buckets back in
//! file order, main file first.

use super::bucket::{Bucket, StoreList, BUCKET_SIZE_IN_BYTES};
use super::convert;
use crate::storage::error::StorageError;
use crate::storage::types::{PhysicalPosition, RecordId};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Main buckets present before the first split.
const INITIAL_BUCKETS: u64 = 2;

/// Split when live records exceed this fraction of main-bucket capacity.
const MAX_LOAD_FACTOR: f64 = 0.75;

const META_SIZE: usize = 44;

/// Location of a bucket: which file it lives in plus its index there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BucketRef {
    Main(u64),
    Overflow(u64),
}

pub struct LhpeCluster {
    name: String,
    id: i16,
    main_file: File,
    overflow_file: File,
    meta_path: PathBuf,
    paths: [PathBuf; 2],
    store_list: Arc<StoreList>,
    main_cache: HashMap<u64, Bucket>,
    overflow_cache: HashMap<u64, Bucket>,
    records: u64,
    level: u32,
    split: u64,
    main_bucket_count: u64,
    overflow_bucket_count: u64,
    position_counter: u64,
    /// Overflow bucket indexes orphaned by splits, reused on allocation.
    /// Rebuilt empty on reopen.
    /// TODO: persist the free list in the meta file so reopened clusters
    /// keep reclaiming pre-restart orphans.
    overflow_free: Vec<u64>,
}

impl LhpeCluster {
    /// Opens the cluster files under `dir`, initializing them on first use.
    pub fn open(dir: &Path, name: &str, id: i16) -> io::Result<Self> {
        let main_path = dir.join(format!("{name}.lhb"));
        let overflow_path = dir.join(format!("{name}.lho"));
        let meta_path = dir.join(format!("{name}.lhm"));

        let existing = meta_path.exists();

        let main_file = Self::open_file(&main_path)?;
        let overflow_file = Self::open_file(&overflow_path)?;

        let mut cluster = Self {
            name: name.to_string(),
            id,
            main_file,
            overflow_file,
            meta_path,
            paths: [main_path, overflow_path],
            store_list: StoreList::new(),
            main_cache: HashMap::new(),
            overflow_cache: HashMap::new(),
            records: 0,
            level: 0,
            split: 0,
            main_bucket_count: INITIAL_BUCKETS,
            overflow_bucket_count: 0,
            position_counter: 0,
            overflow_free: Vec::new(),
        };

        if existing {
            cluster.load_meta()?;
        } else {
            for index in 0..INITIAL_BUCKETS {
                Self::write_bucket_buffer(
                    &mut cluster.main_file,
                    index,
                    &[0u8; BUCKET_SIZE_IN_BYTES],
                )?;
            }
            cluster.save_meta()?;
        }

        Ok(cluster)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> i16 {
        self.id
    }

    /// Number of live records.
    pub fn count(&self) -> u64 {
        self.records
    }

    /// Next locally assigned cluster position. Monotonic across restarts.
    pub fn next_position(&mut self) -> i64 {
        let position = self.position_counter;
        self.position_counter += 1;
        position as i64
    }

    pub fn contains(&mut self, key: i64) -> Result<bool, StorageError> {
        Ok(self.find_slot(key)?.is_some())
    }

    pub fn get(&mut self, key: i64) -> Result<Option<PhysicalPosition>, StorageError> {
        match self.find_slot(key)? {
            Some((location, index)) => {
                let bucket = self.load(location)?;
                Ok(Some(bucket.physical_position(index)))
            }
            None => Ok(None),
        }
    }

    /// Inserts a new record. The key must not already be present.
    pub fn insert(&mut self, key: i64, position: PhysicalPosition) -> Result<(), StorageError> {
        if self.find_slot(key)?.is_some() {
            return Err(StorageError::RecordDuplicated {
                rid: RecordId::with_position(self.id, key),
            });
        }

        self.insert_into_chain(key, position)?;
        self.records += 1;

        self.split_if_overloaded()?;

        Ok(())
    }

    /// Replaces the physical position of an existing record.
    pub fn update(&mut self, key: i64, position: PhysicalPosition) -> Result<bool, StorageError> {
        match self.find_slot(key)? {
            Some((location, index)) => {
                let bucket = self.load(location)?;
                bucket.update_physical_position(index, position);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Removes a record, returning its physical position if it existed.
    pub fn remove(&mut self, key: i64) -> Result<Option<PhysicalPosition>, StorageError> {
        match self.find_slot(key)? {
            Some((location, index)) => {
                let bucket = self.load(location)?;
                let removed = bucket.physical_position(index);
                bucket.remove_physical_position(index);
                self.records -= 1;
                Ok(Some(removed))
            }
            None => Ok(None),
        }
    }

    /// All live cluster positions in the bucket chain `entry` hashes to.
    /// This is the iteration primitive for linear-hash cluster scans.
    pub fn positions_for_entry(&mut self, entry: i64) -> Result<Vec<i64>, StorageError> {
        let mut positions = Vec::new();
        let mut location = BucketRef::Main(self.bucket_index(entry));

        loop {
            let bucket = self.load(location)?;
            for index in 0..bucket.size() as usize {
                positions.push(bucket.key(index));
            }

            let overflow = bucket.overflow_bucket();
            if overflow < 0 {
                break;
            }
            location = BucketRef::Overflow(overflow as u64);
        }

        Ok(positions)
    }

    /// Writes registered buckets back to their files and persists the
    /// split state. Main-store buckets go first, each file in ascending
    /// position order.
    pub fn flush(&mut self) -> io::Result<()> {
        for index in self.store_list.drain_main() {
            if let Some(bucket) = self.main_cache.get_mut(&index) {
                bucket.serialize();
                Self::write_bucket_buffer_slice(&mut self.main_file, index, bucket.buffer())?;
            }
        }

        for index in self.store_list.drain_overflow() {
            if let Some(bucket) = self.overflow_cache.get_mut(&index) {
                bucket.serialize();
                Self::write_bucket_buffer_slice(&mut self.overflow_file, index, bucket.buffer())?;
            }
        }

        self.save_meta()
    }

    /// Drops the in-memory state and deletes the backing files.
    pub fn delete(mut self) -> io::Result<()> {
        self.main_cache.clear();
        self.overflow_cache.clear();
        for path in &self.paths {
            std::fs::remove_file(path)?;
        }
        std::fs::remove_file(&self.meta_path)
    }

    fn bucket_index(&self, key: i64) -> u64 {
        let hash = key as u64;
        let modulus = INITIAL_BUCKETS << self.level;

        let index = hash % modulus;
        if index < self.split {
            hash % (modulus << 1)
        } else {
            index
        }
    }

    fn find_slot(&mut self, key: i64) -> Result<Option<(BucketRef, usize)>, StorageError> {
        let mut location = BucketRef::Main(self.bucket_index(key));

        loop {
            let bucket = self.load(location)?;
            for index in 0..bucket.size() as usize {
                if bucket.key(index) == key {
                    return Ok(Some((location, index)));
                }
            }

            let overflow = bucket.overflow_bucket();
            if overflow < 0 {
                return Ok(None);
            }
            location = BucketRef::Overflow(overflow as u64);
        }
    }

    /// Appends a record to the chain its key hashes to, allocating an
    /// overflow bucket at the tail when the chain is full. Does not check
    /// for duplicates and does not touch the record count.
    fn insert_into_chain(
        &mut self,
        key: i64,
        position: PhysicalPosition,
    ) -> Result<(), StorageError> {
        let mut location = BucketRef::Main(self.bucket_index(key));

        loop {
            let overflow = {
                let bucket = self.load(location)?;
                if !bucket.is_full() {
                    bucket.add_physical_position(key, position);
                    return Ok(());
                }
                bucket.overflow_bucket()
            };

            if overflow >= 0 {
                location = BucketRef::Overflow(overflow as u64);
                continue;
            }

            let allocated = self.allocate_overflow_bucket();
            {
                let bucket = self.load(location)?;
                bucket.set_overflow_bucket(allocated as i64);
            }
            let bucket = self.load(BucketRef::Overflow(allocated))?;
            bucket.add_physical_position(key, position);
            return Ok(());
        }
    }

    fn split_if_overloaded(&mut self) -> Result<(), StorageError> {
        let capacity = (self.main_bucket_count * super::bucket::BUCKET_CAPACITY as u64) as f64;
        if (self.records as f64) / capacity <= MAX_LOAD_FACTOR {
            return Ok(());
        }

        let split_index = self.split;

        let mut entries = Vec::new();
        let mut orphaned_overflow = Vec::new();
        let mut location = BucketRef::Main(split_index);
        loop {
            let bucket = self.load(location)?;
            for index in 0..bucket.size() as usize {
                entries.push((bucket.key(index), bucket.physical_position(index)));
            }

            let overflow = bucket.overflow_bucket();
            if overflow < 0 {
                break;
            }
            orphaned_overflow.push(overflow as u64);
            location = BucketRef::Overflow(overflow as u64);
        }

        self.reset_main_bucket(split_index);
        self.overflow_free.extend(orphaned_overflow);

        let appended = self.main_bucket_count;
        self.reset_main_bucket(appended);
        self.main_bucket_count += 1;

        self.split += 1;
        let modulus = INITIAL_BUCKETS << self.level;
        if self.split == modulus {
            self.level += 1;
            self.split = 0;
        }

        tracing::debug!(
            cluster = %self.name,
            bucket = split_index,
            level = self.level,
            "split rehashed {} records",
            entries.len()
        );

        for (key, position) in entries {
            self.insert_into_chain(key, position)?;
        }

        Ok(())
    }

    /// Replaces a main bucket with a freshly zeroed one and registers it
    /// so the cleared state reaches disk even if nothing lands back in it.
    fn reset_main_bucket(&mut self, index: u64) {
        self.main_cache
            .insert(index, Bucket::new(self.store_list.clone(), index, false));
        self.store_list.register(index, false);
    }

    fn allocate_overflow_bucket(&mut self) -> u64 {
        let index = match self.overflow_free.pop() {
            Some(reused) => reused,
            None => {
                let appended = self.overflow_bucket_count;
                self.overflow_bucket_count += 1;
                appended
            }
        };

        self.overflow_cache
            .insert(index, Bucket::new(self.store_list.clone(), index, true));
        self.store_list.register(index, true);
        index
    }

    fn load(&mut self, location: BucketRef) -> io::Result<&mut Bucket> {
        match location {
            BucketRef::Main(index) => match self.main_cache.entry(index) {
                Entry::Occupied(occupied) => Ok(occupied.into_mut()),
                Entry::Vacant(vacant) => {
                    let buffer = Self::read_bucket_buffer(&mut self.main_file, index)?;
                    Ok(vacant.insert(Bucket::from_buffer(
                        buffer,
                        self.store_list.clone(),
                        index,
                        false,
                    )))
                }
            },
            BucketRef::Overflow(index) => match self.overflow_cache.entry(index) {
                Entry::Occupied(occupied) => Ok(occupied.into_mut()),
                Entry::Vacant(vacant) => {
                    let buffer = Self::read_bucket_buffer(&mut self.overflow_file, index)?;
                    Ok(vacant.insert(Bucket::from_buffer(
                        buffer,
                        self.store_list.clone(),
                        index,
                        true,
                    )))
                }
            },
        }
    }

    fn open_file(path: &Path) -> io::Result<File> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
    }

    fn read_bucket_buffer(file: &mut File, index: u64) -> io::Result<Vec<u8>> {
        let mut buffer = vec![0u8; BUCKET_SIZE_IN_BYTES];
        file.seek(SeekFrom::Start(index * BUCKET_SIZE_IN_BYTES as u64))?;
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn write_bucket_buffer(file: &mut File, index: u64, buffer: &[u8; BUCKET_SIZE_IN_BYTES]) -> io::Result<()> {
        Self::write_bucket_buffer_slice(file, index, buffer)
    }

    fn write_bucket_buffer_slice(file: &mut File, index: u64, buffer: &[u8]) -> io::Result<()> {
        file.seek(SeekFrom::Start(index * BUCKET_SIZE_IN_BYTES as u64))?;
        file.write_all(buffer)
    }

    fn save_meta(&self) -> io::Result<()> {
        let mut buffer = [0u8; META_SIZE];
        convert::put_u64(&mut buffer, 0, self.records);
        convert::put_u32(&mut buffer, 8, self.level);
        convert::put_u64(&mut buffer, 12, self.split);
        convert::put_u64(&mut buffer, 20, self.main_bucket_count);
        convert::put_u64(&mut buffer, 28, self.overflow_bucket_count);
        convert::put_u64(&mut buffer, 36, self.position_counter);

        std::fs::write(&self.meta_path, buffer)
    }

    fn load_meta(&mut self) -> io::Result<()> {
        let buffer = std::fs::read(&self.meta_path)?;
        if buffer.len() != META_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("cluster meta {} has {} bytes", self.meta_path.display(), buffer.len()),
            ));
        }

        self.records = convert::get_u64(&buffer, 0);
        self.level = convert::get_u32(&buffer, 8);
        self.split = convert::get_u64(&buffer, 12);
        self.main_bucket_count = convert::get_u64(&buffer, 20);
        self.overflow_bucket_count = convert::get_u64(&buffer, 28);
        self.position_counter = convert::get_u64(&buffer, 36);
        Ok(())
    }
}
