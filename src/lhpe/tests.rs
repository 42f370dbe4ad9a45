//! Bucket & Cluster Tests
//!
//! Validates the on-disk bucket format and the linear-hashing cluster
//! built on top of it.
//!
//! ## Test Scopes
//! - **Bucket format**: size byte, overflow sentinel biasing, dirty-flag
//!   reconciliation, slot removal by swap.
//! - **Round-trips**: serialize -> reload -> decode equality.
//! - **Cluster behavior**: chains past capacity, splits, persistence
//!   across reopen.

#[cfg(test)]
mod tests {
    use crate::lhpe::bucket::{Bucket, StoreList, BUCKET_CAPACITY, BUCKET_SIZE_IN_BYTES};
    use crate::lhpe::cluster::LhpeCluster;
    use crate::storage::types::PhysicalPosition;

    fn position(seed: i64) -> PhysicalPosition {
        PhysicalPosition {
            data_segment_id: (seed % 7) as i32,
            data_segment_pos: seed * 31,
            record_type: b'd',
            record_version: (seed % 100) as i32,
        }
    }

    // ============================================================
    // BUCKET FORMAT TESTS
    // ============================================================

    #[test]
    fn fresh_bucket_is_empty_with_no_overflow() {
        let bucket = Bucket::new(StoreList::new(), 0, false);

        assert_eq!(bucket.size(), 0);
        assert_eq!(bucket.overflow_bucket(), -1, "zeroed overflow pointer must decode to none");
    }

    #[test]
    fn overflow_pointer_roundtrips_through_bias() {
        for index in [0i64, 1, 7, 1_000_000] {
            let mut bucket = Bucket::new(StoreList::new(), 0, false);
            bucket.set_overflow_bucket(index);
            bucket.serialize();

            assert_eq!(bucket.overflow_bucket(), index);

            let reloaded = Bucket::from_buffer(bucket.buffer().to_vec(), StoreList::new(), 0, false);
            assert_eq!(reloaded.overflow_bucket(), index);
        }
    }

    #[test]
    fn add_positions_roundtrip_through_buffer() {
        let mut bucket = Bucket::new(StoreList::new(), 3, false);

        for i in 0..BUCKET_CAPACITY as i64 {
            bucket.add_physical_position(1000 + i, position(i));
        }
        assert_eq!(bucket.size() as usize, BUCKET_CAPACITY);

        bucket.serialize();

        let reloaded = Bucket::from_buffer(bucket.buffer().to_vec(), StoreList::new(), 3, false);
        assert_eq!(reloaded.size() as usize, BUCKET_CAPACITY);
        for i in 0..BUCKET_CAPACITY {
            assert_eq!(reloaded.key(i), 1000 + i as i64);
            assert_eq!(reloaded.physical_position(i), position(i as i64));
        }
    }

    #[test]
    fn serialize_is_idempotent_on_clean_bucket() {
        let mut bucket = Bucket::new(StoreList::new(), 0, false);
        bucket.add_physical_position(42, position(1));
        bucket.set_overflow_bucket(9);

        bucket.serialize();
        let first = bucket.buffer().to_vec();

        bucket.serialize();
        assert_eq!(bucket.buffer(), &first[..], "second serialize must not change any byte");
    }

    #[test]
    fn remove_swaps_last_slot_into_hole() {
        let mut bucket = Bucket::new(StoreList::new(), 0, false);
        for i in 0..4 {
            bucket.add_physical_position(i, position(i));
        }

        bucket.remove_physical_position(1);

        assert_eq!(bucket.size(), 3);
        assert_eq!(bucket.key(0), 0);
        assert_eq!(bucket.key(1), 3, "last key must move into the removed slot");
        assert_eq!(bucket.key(2), 2);
        assert_eq!(bucket.physical_position(1), position(3));
    }

    #[test]
    fn remove_last_slot_just_shrinks() {
        let mut bucket = Bucket::new(StoreList::new(), 0, false);
        bucket.add_physical_position(1, position(1));
        bucket.add_physical_position(2, position(2));

        bucket.remove_physical_position(1);

        assert_eq!(bucket.size(), 1);
        assert_eq!(bucket.key(0), 1);
    }

    #[test]
    fn mutators_register_with_store_list() {
        let store_list = StoreList::new();
        let mut main = Bucket::new(store_list.clone(), 5, false);
        let mut overflow = Bucket::new(store_list.clone(), 8, true);

        main.add_physical_position(1, position(1));
        overflow.add_physical_position(2, position(2));
        main.set_overflow_bucket(8);

        assert_eq!(store_list.drain_main(), vec![5]);
        assert_eq!(store_list.drain_overflow(), vec![8]);

        // Drained lists stay empty until the next mutation.
        assert!(store_list.drain_main().is_empty());
    }

    #[test]
    fn filled_bucket_chains_into_overflow() {
        let store_list = StoreList::new();
        let mut main = Bucket::new(store_list.clone(), 0, false);

        for i in 0..BUCKET_CAPACITY as i64 {
            main.add_physical_position(i, position(i));
        }
        assert!(main.is_full());

        let overflow = Bucket::new(store_list.clone(), 17, true);
        main.set_overflow_bucket(17);

        main.serialize();

        let main_reloaded = Bucket::from_buffer(main.buffer().to_vec(), store_list.clone(), 0, false);
        assert_eq!(main_reloaded.size() as usize, BUCKET_CAPACITY);
        assert_eq!(main_reloaded.overflow_bucket(), 17);

        let overflow_reloaded =
            Bucket::from_buffer(overflow.buffer().to_vec(), store_list, 17, true);
        assert_eq!(overflow_reloaded.size(), 0);
        assert_eq!(overflow_reloaded.overflow_bucket(), -1);
    }

    #[test]
    fn bucket_buffer_has_fixed_size() {
        let bucket = Bucket::new(StoreList::new(), 0, false);
        assert_eq!(bucket.buffer().len(), BUCKET_SIZE_IN_BYTES);
    }

    // ============================================================
    // CLUSTER TESTS
    // ============================================================

    #[test]
    fn cluster_insert_get_update_remove() {
        let dir = tempfile::tempdir().unwrap();
        let mut cluster = LhpeCluster::open(dir.path(), "records", 3).unwrap();

        cluster.insert(100, position(1)).unwrap();
        assert_eq!(cluster.get(100).unwrap(), Some(position(1)));
        assert_eq!(cluster.count(), 1);

        assert!(cluster.update(100, position(2)).unwrap());
        assert_eq!(cluster.get(100).unwrap(), Some(position(2)));

        assert_eq!(cluster.remove(100).unwrap(), Some(position(2)));
        assert_eq!(cluster.get(100).unwrap(), None);
        assert_eq!(cluster.count(), 0);
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut cluster = LhpeCluster::open(dir.path(), "records", 3).unwrap();

        cluster.insert(7, position(1)).unwrap();
        let err = cluster.insert(7, position(2)).unwrap_err();
        assert!(err.to_string().contains("already exists"), "got: {err}");
    }

    #[test]
    fn split_preserves_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let mut cluster = LhpeCluster::open(dir.path(), "records", 1).unwrap();

        // Enough records to force several splits past the two initial
        // buckets (load factor 0.75 over 64-slot buckets).
        let keys: Vec<i64> = (0..1000).map(|i| i * 2_654_435_761).collect();
        for &key in &keys {
            cluster.insert(key, position(key % 977)).unwrap();
        }

        assert_eq!(cluster.count(), keys.len() as u64);
        for &key in &keys {
            assert_eq!(
                cluster.get(key).unwrap(),
                Some(position(key % 977)),
                "record {key} lost after splits"
            );
        }
    }

    #[test]
    fn flush_and_reopen_preserves_records() {
        let dir = tempfile::tempdir().unwrap();
        let keys: Vec<i64> = (0..500).map(|i| i * 48_271 + 11).collect();

        {
            let mut cluster = LhpeCluster::open(dir.path(), "records", 1).unwrap();
            for &key in &keys {
                cluster.insert(key, position(key)).unwrap();
            }
            cluster.flush().unwrap();
        }

        let mut reopened = LhpeCluster::open(dir.path(), "records", 1).unwrap();
        assert_eq!(reopened.count(), keys.len() as u64);
        for &key in &keys {
            assert_eq!(reopened.get(key).unwrap(), Some(position(key)));
        }
    }

    #[test]
    fn positions_for_entry_reports_chain_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut cluster = LhpeCluster::open(dir.path(), "records", 1).unwrap();

        // Both initial buckets modulo 2: key 4 and 6 share a chain.
        cluster.insert(4, position(4)).unwrap();
        cluster.insert(6, position(6)).unwrap();
        cluster.insert(5, position(5)).unwrap();

        let mut chain = cluster.positions_for_entry(4).unwrap();
        chain.sort_unstable();
        assert_eq!(chain, vec![4, 6]);
    }

    #[test]
    fn next_position_is_monotonic_across_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let first = {
            let mut cluster = LhpeCluster::open(dir.path(), "records", 1).unwrap();
            let first = cluster.next_position();
            cluster.next_position();
            cluster.flush().unwrap();
            first
        };
        assert_eq!(first, 0);

        let mut reopened = LhpeCluster::open(dir.path(), "records", 1).unwrap();
        assert_eq!(reopened.next_position(), 2);
    }
}
