//! Fixed-size record bucket of a linear-hashing cluster.
//!
//! A bucket holds up to [`BUCKET_CAPACITY`] records: a size byte, a key
//! area (one 192-byte slot per record, the cluster position in the first
//! 8 bytes), a value area (one serialized [`PhysicalPosition`] per
//! record) and a trailing overflow pointer stored biased by +1 so the
//! all-zero buffer means "no overflow".
//!
//! The raw buffer is authoritative for keys and is parsed on access.
//! Positions keep a decoded cache with per-slot dirty flags that
//! `serialize` reconciles into the buffer. Every mutation registers the
//! bucket with the owning cluster's writeback list so flushes can batch
//! sequential disk writes.

use super::convert;
use crate::storage::types::PhysicalPosition;
use parking_lot::Mutex;
use std::cell::Cell;
use std::sync::Arc;

pub const BUCKET_CAPACITY: usize = 64;
pub const KEY_SIZE: usize = 192;
pub const VERSION_SIZE: usize = 4;
pub const VALUE_SIZE: usize = 13 + VERSION_SIZE;

const BUCKET_SIZE_SIZE: usize = 1;
const OVERFLOW_BUCKET_SIZE: usize = 8;

pub const BUCKET_SIZE_IN_BYTES: usize =
    BUCKET_CAPACITY * (KEY_SIZE + VALUE_SIZE) + BUCKET_SIZE_SIZE + OVERFLOW_BUCKET_SIZE;

const OVERFLOW_POS: usize = BUCKET_CAPACITY * (KEY_SIZE + VALUE_SIZE) + BUCKET_SIZE_SIZE;
const FIRST_VALUE_POS: usize = BUCKET_CAPACITY * KEY_SIZE + BUCKET_SIZE_SIZE;

/// Overflow cache value meaning "not decoded yet".
const OVERFLOW_UNSET: i64 = -2;

/// Pending-writeback lists shared between a cluster and its buckets.
/// Buckets register their file position on mutation; the cluster drains
/// the lists at flush time and writes the registered buckets in file
/// order.
pub struct StoreList {
    main: Mutex<Vec<u64>>,
    overflow: Mutex<Vec<u64>>,
}

impl StoreList {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            main: Mutex::new(Vec::new()),
            overflow: Mutex::new(Vec::new()),
        })
    }

    /// Registers a bucket's file position for the next flush. Called by
    /// bucket mutators, and directly by the cluster when it allocates or
    /// resets a bucket that has no mutation of its own to record.
    pub fn register(&self, position: u64, is_overflow: bool) {
        if is_overflow {
            self.overflow.lock().push(position);
        } else {
            self.main.lock().push(position);
        }
    }

    pub fn drain_main(&self) -> Vec<u64> {
        Self::drain(&self.main)
    }

    pub fn drain_overflow(&self) -> Vec<u64> {
        Self::drain(&self.overflow)
    }

    fn drain(list: &Mutex<Vec<u64>>) -> Vec<u64> {
        let mut positions: Vec<u64> = std::mem::take(&mut *list.lock());
        positions.sort_unstable();
        positions.dedup();
        positions
    }
}

pub struct Bucket {
    buffer: Vec<u8>,
    /// Decoded overflow pointer, [`OVERFLOW_UNSET`] until first read.
    /// Only consulted when native acceleration is off.
    overflow_bucket_index: Cell<i64>,
    positions: [Option<PhysicalPosition>; BUCKET_CAPACITY],
    positions_to_update: [bool; BUCKET_CAPACITY],
    overflow_was_changed: bool,
    store_list: Arc<StoreList>,
    position: u64,
    is_overflow_bucket: bool,
}

impl Bucket {
    /// Creates a bucket over a freshly zeroed buffer.
    pub fn new(store_list: Arc<StoreList>, position: u64, is_overflow_bucket: bool) -> Self {
        Self::from_buffer(
            vec![0u8; BUCKET_SIZE_IN_BYTES],
            store_list,
            position,
            is_overflow_bucket,
        )
    }

    /// Creates a bucket over a buffer loaded from disk.
    pub fn from_buffer(
        buffer: Vec<u8>,
        store_list: Arc<StoreList>,
        position: u64,
        is_overflow_bucket: bool,
    ) -> Self {
        assert_eq!(buffer.len(), BUCKET_SIZE_IN_BYTES, "bucket buffer size");
        Self {
            buffer,
            overflow_bucket_index: Cell::new(OVERFLOW_UNSET),
            positions: [None; BUCKET_CAPACITY],
            positions_to_update: [false; BUCKET_CAPACITY],
            overflow_was_changed: false,
            store_list,
            position,
            is_overflow_bucket,
        }
    }

    /// Index of this bucket in its backing file.
    pub fn file_position(&self) -> u64 {
        self.position
    }

    pub fn is_overflow_bucket(&self) -> bool {
        self.is_overflow_bucket
    }

    pub fn size(&self) -> u8 {
        self.buffer[0]
    }

    pub fn is_full(&self) -> bool {
        self.size() as usize == BUCKET_CAPACITY
    }

    /// Index of the chained overflow bucket, -1 when there is none.
    pub fn overflow_bucket(&self) -> i64 {
        if convert::native_acceleration_used() {
            return convert::get_i64(&self.buffer, OVERFLOW_POS) - 1;
        }

        if self.overflow_bucket_index.get() != OVERFLOW_UNSET {
            return self.overflow_bucket_index.get();
        }

        let decoded = convert::get_i64(&self.buffer, OVERFLOW_POS) - 1;
        self.overflow_bucket_index.set(decoded);
        decoded
    }

    pub fn set_overflow_bucket(&mut self, overflow_bucket: i64) {
        if convert::native_acceleration_used() {
            convert::put_i64(&mut self.buffer, OVERFLOW_POS, overflow_bucket + 1);
            self.add_to_store_list();
            return;
        }

        self.overflow_bucket_index.set(overflow_bucket);
        self.overflow_was_changed = true;

        self.add_to_store_list();
    }

    /// Cluster position stored in the key slot at `index`.
    pub fn key(&self, index: usize) -> i64 {
        convert::get_i64(&self.buffer, Self::key_offset(index))
    }

    /// Appends a record at the next free slot. The bucket must not be
    /// full; callers allocate an overflow bucket instead.
    pub fn add_physical_position(&mut self, key: i64, physical_position: PhysicalPosition) {
        let index = self.buffer[0] as usize;
        assert!(index < BUCKET_CAPACITY, "bucket overflow");

        convert::put_i64(&mut self.buffer, Self::key_offset(index), key);

        self.positions[index] = Some(physical_position);
        self.buffer[0] += 1;

        self.positions_to_update[index] = true;

        self.add_to_store_list();
    }

    /// Removes the record at `index` by moving the last live slot into
    /// its place and shrinking the size byte.
    pub fn remove_physical_position(&mut self, index: usize) {
        let size = self.buffer[0] as usize;
        assert!(index < size, "remove index out of live range");

        let last = size - 1;
        if index != last {
            let last_key = self.key(last);
            convert::put_i64(&mut self.buffer, Self::key_offset(index), last_key);

            self.positions[index] = Some(self.physical_position(last));
            self.positions_to_update[index] = true;
        }

        self.positions[last] = None;
        self.positions_to_update[last] = false;
        self.buffer[0] -= 1;

        self.add_to_store_list();
    }

    /// Replaces the value tuple at `index` in place.
    pub fn update_physical_position(&mut self, index: usize, physical_position: PhysicalPosition) {
        assert!(index < self.buffer[0] as usize, "update index out of live range");

        self.positions[index] = Some(physical_position);
        self.positions_to_update[index] = true;

        self.add_to_store_list();
    }

    pub fn physical_position(&self, index: usize) -> PhysicalPosition {
        if let Some(cached) = self.positions[index] {
            return cached;
        }

        let mut position = FIRST_VALUE_POS + VALUE_SIZE * index;

        let data_segment_id = convert::get_i32(&self.buffer, position);
        position += 4;

        let data_segment_pos = convert::get_i64(&self.buffer, position);
        position += 8;

        let record_type = self.buffer[position];
        position += 1;

        let record_version = convert::get_i32(&self.buffer, position);

        PhysicalPosition {
            data_segment_id,
            data_segment_pos,
            record_type,
            record_version,
        }
    }

    /// Reconciles dirty slots into the buffer and clears their flags.
    /// A clean bucket is left untouched.
    pub fn serialize(&mut self) {
        let size = self.buffer[0] as usize;

        let mut position = FIRST_VALUE_POS;
        for i in 0..size {
            if self.positions_to_update[i] {
                let physical_position = self.positions[i]
                    .unwrap_or_else(|| panic!("dirty slot {i} without a cached position"));

                convert::put_i32(&mut self.buffer, position, physical_position.data_segment_id);
                position += 4;

                convert::put_i64(&mut self.buffer, position, physical_position.data_segment_pos);
                position += 8;

                self.buffer[position] = physical_position.record_type;
                position += 1;

                convert::put_i32(&mut self.buffer, position, physical_position.record_version);
                position += VERSION_SIZE;

                self.positions_to_update[i] = false;
            } else {
                position += VALUE_SIZE;
            }
        }

        if self.overflow_was_changed {
            convert::put_i64(
                &mut self.buffer,
                OVERFLOW_POS,
                self.overflow_bucket_index.get() + 1,
            );
            self.overflow_was_changed = false;
        }
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    fn key_offset(index: usize) -> usize {
        BUCKET_SIZE_SIZE + index * KEY_SIZE
    }

    fn add_to_store_list(&self) {
        self.store_list.register(self.position, self.is_overflow_bucket);
    }
}
