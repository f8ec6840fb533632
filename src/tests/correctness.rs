#[cfg(test)]
mod reservoir_test {
    use crate::ArrayReservoir;
    use std::sync::{Arc, Barrier, OnceLock};
    use std::thread;

    static_assertions::assert_impl_all!(ArrayReservoir<usize>: Send, Sync);

    #[test]
    fn array_length_rounding() {
        let reservoir: ArrayReservoir<u8> = ArrayReservoir::new();
        assert_eq!(reservoir.get_array(0).len(), 8);
        assert_eq!(reservoir.get_array(1).len(), 8);
        assert_eq!(reservoir.get_array(8).len(), 8);
        assert_eq!(reservoir.get_array(9).len(), 16);
        assert_eq!(reservoir.get_array(1000).len(), 1024);
        assert_eq!(reservoir.get_array(2000).len(), 2048);
    }

    #[test]
    fn donated_array_comes_back_clean() {
        let reservoir: ArrayReservoir<u64> = ArrayReservoir::new();
        let mut array = reservoir.get_array(32);
        for (i, element) in array.iter_mut().enumerate() {
            *element = i as u64 + 1;
        }
        reservoir.donate_array(array);
        let reused = reservoir.get_array(32);
        assert_eq!(reused.len(), 32);
        assert!(reused.iter().all(|e| *e == 0));
    }

    #[test]
    fn odd_donations_are_dropped() {
        let reservoir: ArrayReservoir<u64> = ArrayReservoir::new();
        reservoir.donate_array(Vec::new().into_boxed_slice());
        reservoir.donate_array(vec![0_u64; 3].into_boxed_slice());
        reservoir.donate_array(vec![0_u64; 4096].into_boxed_slice());
    }

    #[test]
    fn nested_donation_reaches_sibling_pool() {
        static SIBLING: OnceLock<ArrayReservoir<u64>> = OnceLock::new();

        struct Chained(Option<Box<[u64]>>);
        impl Default for Chained {
            fn default() -> Self {
                Chained(None)
            }
        }
        impl Drop for Chained {
            fn drop(&mut self) {
                if let Some(array) = self.0.take() {
                    SIBLING.get().unwrap().donate_array(array);
                }
            }
        }

        let sibling = SIBLING.get_or_init(ArrayReservoir::new);
        let reservoir: ArrayReservoir<Chained> = ArrayReservoir::new();

        let inner = sibling.get_array(8);
        let inner_ptr = inner.as_ptr();
        let mut outer = reservoir.get_array(8);
        outer[0] = Chained(Some(inner));

        // Re-defaulting the outer array drops `Chained`, donating the inner array to a pool
        // of the same size class in another reservoir while the outer donation is still in
        // flight; only a nested donation to the very same pool is suppressed.
        reservoir.donate_array(outer);

        let reused = sibling.get_array(8);
        assert_eq!(reused.as_ptr(), inner_ptr);
    }

    #[test]
    fn concurrent_donate_get() {
        let num_threads = 8;
        let reservoir: Arc<ArrayReservoir<usize>> = Arc::new(ArrayReservoir::new());
        let barrier = Arc::new(Barrier::new(num_threads));
        let mut thread_handles = Vec::with_capacity(num_threads);
        for _ in 0..num_threads {
            let reservoir_clone = reservoir.clone();
            let barrier_clone = barrier.clone();
            thread_handles.push(thread::spawn(move || {
                barrier_clone.wait();
                for _ in 0..256 {
                    let mut array = reservoir_clone.get_array(64);
                    assert_eq!(array.len(), 64);
                    assert!(array.iter().all(|e| *e == 0));
                    array[63] = 1;
                    reservoir_clone.donate_array(array);
                }
            }));
        }
        for handle in thread_handles {
            handle.join().unwrap();
        }
    }
}

#[cfg(test)]
mod bucket_test {
    use crate::bucket::UpdateOutcome;
    use crate::{Bucket, BucketReservoir, Guard};
    use proptest::prelude::*;
    use rand::seq::SliceRandom;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering::Relaxed;
    use std::sync::{Arc, Barrier};
    use std::thread;

    static_assertions::assert_impl_all!(Bucket<String>: Send, Sync);
    static_assertions::assert_impl_all!(BucketReservoir<String>: Send, Sync);
    static_assertions::assert_not_impl_all!(Bucket<*const String>: Send, Sync);

    struct R(&'static AtomicUsize);
    impl R {
        fn new(cnt: &'static AtomicUsize) -> R {
            cnt.fetch_add(1, Relaxed);
            R(cnt)
        }
    }
    impl Clone for R {
        fn clone(&self) -> Self {
            self.0.fetch_add(1, Relaxed);
            R(self.0)
        }
    }
    impl Drop for R {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Relaxed);
        }
    }

    fn wait_for_reclamation(cnt: &'static AtomicUsize) {
        // A deep structure reclaims one generation of deferred nodes per epoch, so a large
        // instance may need thousands of epoch advances before every value is dropped.
        for _ in 0..4096 {
            if cnt.load(Relaxed) == 0 {
                return;
            }
            Guard::new().accelerate();
            thread::yield_now();
        }
    }

    #[test]
    fn insert_read_remove() {
        let bucket: Bucket<u32> = Bucket::new();
        assert!(bucket.insert(5, 10).is_ok());
        assert_eq!(bucket.insert(5, 20), Err(20));
        assert_eq!(bucket.get(5), Some(10));
        assert_eq!(bucket.len(), 1);
        assert!(bucket.remove(5));
        assert!(!bucket.remove(5));
        assert_eq!(bucket.get(5), None);
        assert_eq!(bucket.len(), 0);
    }

    #[test]
    fn sparse_indices() {
        let bucket: Bucket<usize> = Bucket::new();
        let indices = [0, 1, 31, 32, 1023, 1024, 32 * 32 * 32, Bucket::<usize>::CAPACITY - 1];
        for &index in &indices {
            assert!(bucket.insert(index, index).is_ok());
        }
        assert_eq!(bucket.len(), indices.len());
        for &index in &indices {
            assert_eq!(bucket.get(index), Some(index));
        }
        let guard = Guard::new();
        let collected: Vec<usize> = bucket.iter(&guard).map(|(i, _)| i).collect();
        assert_eq!(collected, indices.to_vec());
    }

    #[test]
    #[should_panic(expected = "index out of bounds")]
    fn out_of_bounds() {
        let bucket: Bucket<u32> = Bucket::new();
        let _ = bucket.insert(Bucket::<u32>::CAPACITY, 1);
    }

    #[test]
    fn exchange_set_update() {
        let bucket: Bucket<u32> = Bucket::new();
        assert_eq!(bucket.exchange(3, 1), None);
        assert_eq!(bucket.exchange(3, 2), Some(1));
        assert_eq!(bucket.len(), 1);

        assert!(!bucket.set(3, 4));
        assert!(bucket.set(4, 8));
        assert_eq!(bucket.len(), 2);

        assert_eq!(bucket.update(3, |v| v + 1, |_| true), UpdateOutcome::Updated);
        assert_eq!(bucket.get(3), Some(5));
        assert_eq!(bucket.update(3, |v| v + 1, |v| *v == 0), UpdateOutcome::Rejected);
        assert_eq!(bucket.update(100, |v| v + 1, |_| true), UpdateOutcome::Vacant);
        assert_eq!(bucket.len(), 2);
    }

    #[test]
    fn conditional_removal() {
        let bucket: Bucket<u32> = Bucket::new();
        assert!(bucket.insert(9, 17).is_ok());
        assert!(!bucket.remove_if(9, |v| *v % 2 == 0));
        assert_eq!(bucket.len(), 1);
        assert_eq!(bucket.remove_take_if(9, |v| *v % 2 == 1), Some(17));
        assert_eq!(bucket.len(), 0);
        assert_eq!(bucket.remove_take_if(9, |_| true), None);
    }

    #[test]
    fn insert_or_get() {
        let bucket: Bucket<u32> = Bucket::new();
        assert!(bucket.insert_or_get(2, 1).is_ok());
        assert_eq!(bucket.insert_or_get(2, 9), Err((9, Some(1))));
        assert_eq!(bucket.len(), 1);
    }

    #[test]
    fn range_scan() {
        let bucket: Bucket<usize> = Bucket::new();
        for index in (0..2048).step_by(3) {
            assert!(bucket.insert(index, index * 2).is_ok());
        }
        let guard = Guard::new();
        let forward: Vec<usize> = bucket.range(30, 60, &guard).map(|(i, _)| i).collect();
        assert_eq!(forward, vec![30, 33, 36, 39, 42, 45, 48, 51, 54, 57, 60]);
        let backward: Vec<usize> = bucket.range(60, 30, &guard).map(|(i, _)| i).collect();
        assert_eq!(
            backward,
            vec![60, 57, 54, 51, 48, 45, 42, 39, 36, 33, 30]
        );
        for (index, value) in bucket.iter(&guard) {
            assert_eq!(*value, index * 2);
        }
    }

    #[test]
    fn shuffled_insertion_iterates_in_order() {
        let bucket: Bucket<usize> = Bucket::new();
        let mut indices: Vec<usize> = (0..4096).map(|i| i * 7).collect();
        indices.shuffle(&mut rand::rng());
        for &index in &indices {
            assert!(bucket.insert(index, index).is_ok());
        }
        let guard = Guard::new();
        let collected: Vec<usize> = bucket.iter(&guard).map(|(i, _)| i).collect();
        let expected: Vec<usize> = (0..4096).map(|i| i * 7).collect();
        assert_eq!(collected, expected);
    }

    #[test]
    fn shared_reservoir() {
        let reservoir: BucketReservoir<usize> = BucketReservoir::new();
        for _ in 0..16 {
            let bucket: Bucket<usize> = Bucket::with_reservoir(&reservoir);
            for index in 0..1024 {
                assert!(bucket.insert(index, index).is_ok());
            }
            assert_eq!(bucket.len(), 1024);
        }
    }

    #[test]
    fn values_dropped_with_bucket() {
        static INST_CNT: AtomicUsize = AtomicUsize::new(0);

        let bucket: Bucket<R> = Bucket::new();
        let workload_size = 1024;
        for index in 0..workload_size {
            assert!(bucket.insert(index * 31, R::new(&INST_CNT)).is_ok());
        }
        assert_eq!(INST_CNT.load(Relaxed), workload_size);
        drop(bucket);
        wait_for_reclamation(&INST_CNT);
        assert_eq!(INST_CNT.load(Relaxed), 0);
    }

    #[test]
    fn values_dropped_on_removal() {
        static INST_CNT: AtomicUsize = AtomicUsize::new(0);

        let bucket: Bucket<R> = Bucket::new();
        for index in 0..256 {
            assert!(bucket.insert(index, R::new(&INST_CNT)).is_ok());
        }
        for index in 0..256 {
            assert!(bucket.remove(index));
        }
        drop(bucket);
        wait_for_reclamation(&INST_CNT);
        assert_eq!(INST_CNT.load(Relaxed), 0);
    }

    #[test]
    fn slot_exclusivity() {
        let num_threads = 8;
        for _ in 0..64 {
            let bucket: Arc<Bucket<usize>> = Arc::new(Bucket::new());
            let barrier = Arc::new(Barrier::new(num_threads));
            let success_count = Arc::new(AtomicUsize::new(0));
            let mut thread_handles = Vec::with_capacity(num_threads);
            for thread_id in 0..num_threads {
                let bucket_clone = bucket.clone();
                let barrier_clone = barrier.clone();
                let success_count_clone = success_count.clone();
                thread_handles.push(thread::spawn(move || {
                    barrier_clone.wait();
                    if bucket_clone.insert(777, thread_id).is_ok() {
                        success_count_clone.fetch_add(1, Relaxed);
                    }
                }));
            }
            for handle in thread_handles {
                handle.join().unwrap();
            }
            assert_eq!(success_count.load(Relaxed), 1);
            assert_eq!(bucket.len(), 1);
            let winner = bucket.get(777).unwrap();
            assert!(winner < num_threads);
        }
    }

    #[test]
    fn quiescent_len_matches_scan() {
        let num_threads = 4;
        let per_thread = 1024;
        let bucket: Arc<Bucket<usize>> = Arc::new(Bucket::new());
        let barrier = Arc::new(Barrier::new(num_threads));
        let mut thread_handles = Vec::with_capacity(num_threads);
        for thread_id in 0..num_threads {
            let bucket_clone = bucket.clone();
            let barrier_clone = barrier.clone();
            thread_handles.push(thread::spawn(move || {
                barrier_clone.wait();
                let base = thread_id * per_thread;
                for index in base..base + per_thread {
                    assert!(bucket_clone.insert(index * 17, index).is_ok());
                }
                for index in (base..base + per_thread).step_by(2) {
                    assert!(bucket_clone.remove(index * 17));
                }
            }));
        }
        for handle in thread_handles {
            handle.join().unwrap();
        }
        let guard = Guard::new();
        assert_eq!(bucket.iter(&guard).count(), bucket.len());
        assert_eq!(bucket.len(), num_threads * per_thread / 2);
    }

    proptest! {
        #[test]
        fn model(ops in proptest::collection::vec((0_usize..48, 0_u32..256, 0_u8..4), 0..256)) {
            let bucket: Bucket<u32> = Bucket::new();
            let mut model: std::collections::HashMap<usize, u32> = std::collections::HashMap::new();
            for (index, value, op) in ops {
                match op {
                    0 => {
                        let expect_ok = !model.contains_key(&index);
                        prop_assert_eq!(bucket.insert(index, value).is_ok(), expect_ok);
                        if expect_ok {
                            model.insert(index, value);
                        }
                    }
                    1 => {
                        prop_assert_eq!(bucket.remove_take(index), model.remove(&index));
                    }
                    2 => {
                        prop_assert_eq!(bucket.exchange(index, value), model.insert(index, value));
                    }
                    _ => {
                        prop_assert_eq!(bucket.get(index), model.get(&index).copied());
                    }
                }
            }
            prop_assert_eq!(bucket.len(), model.len());
        }
    }
}

#[cfg(test)]
mod fixed_size_bucket_test {
    use crate::{FixedSizeBucket, Guard, UpdateOutcome};
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering::Relaxed;
    use std::sync::{Arc, Barrier};
    use std::thread;

    static_assertions::assert_impl_all!(FixedSizeBucket<String>: Send, Sync);
    static_assertions::assert_not_impl_all!(FixedSizeBucket<*const String>: Send, Sync);

    #[test]
    fn capacity_is_enforced() {
        let bucket: FixedSizeBucket<u32> = FixedSizeBucket::new(8);
        assert_eq!(bucket.capacity(), 8);
        assert!(bucket.insert(7, 49).is_ok());
        assert_eq!(bucket.len(), 1);
    }

    #[test]
    fn capacity_covers_the_backing_array() {
        let bucket: FixedSizeBucket<u32> = FixedSizeBucket::new(100);
        assert_eq!(bucket.capacity(), 128);
        assert!(bucket.insert(100, 1).is_ok());
        assert!(bucket.insert(127, 2).is_ok());
        assert_eq!(bucket.get(127), Some(2));

        let bucket: FixedSizeBucket<u32> = FixedSizeBucket::new(0);
        assert_eq!(bucket.capacity(), 8);
        assert!(bucket.insert(7, 3).is_ok());
    }

    #[test]
    #[should_panic(expected = "index out of bounds")]
    fn out_of_bounds() {
        let bucket: FixedSizeBucket<u32> = FixedSizeBucket::new(8);
        let _ = bucket.insert(9, 81);
    }

    #[test]
    fn slot_operations() {
        let bucket: FixedSizeBucket<u32> = FixedSizeBucket::new(16);
        assert!(bucket.insert(3, 1).is_ok());
        assert_eq!(bucket.insert(3, 2), Err(2));
        assert_eq!(bucket.exchange(3, 3), Some(1));
        assert!(bucket.set(4, 10));
        assert_eq!(bucket.update(3, |v| v * 2, |_| true), UpdateOutcome::Updated);
        assert_eq!(bucket.get(3), Some(6));
        assert_eq!(bucket.remove_take(3), Some(6));
        assert!(bucket.remove_if(4, |v| *v == 10));
        assert!(bucket.is_empty());
    }

    #[test]
    fn iteration_order() {
        let bucket: FixedSizeBucket<usize> = FixedSizeBucket::new(64);
        for index in (0..64).rev() {
            if index % 2 == 0 {
                assert!(bucket.insert(index, index).is_ok());
            }
        }
        let guard = Guard::new();
        let indices: Vec<usize> = bucket.iter(&guard).map(|(i, _)| i).collect();
        assert_eq!(indices, (0..64).step_by(2).collect::<Vec<usize>>());
    }

    #[test]
    fn concurrent_fill() {
        let num_threads = 8;
        let capacity = 1024;
        let bucket: Arc<FixedSizeBucket<usize>> = Arc::new(FixedSizeBucket::new(capacity));
        let barrier = Arc::new(Barrier::new(num_threads));
        let success_count = Arc::new(AtomicUsize::new(0));
        let mut thread_handles = Vec::with_capacity(num_threads);
        for thread_id in 0..num_threads {
            let bucket_clone = bucket.clone();
            let barrier_clone = barrier.clone();
            let success_count_clone = success_count.clone();
            thread_handles.push(thread::spawn(move || {
                barrier_clone.wait();
                for index in 0..capacity {
                    if bucket_clone.insert(index, thread_id).is_ok() {
                        success_count_clone.fetch_add(1, Relaxed);
                    }
                }
            }));
        }
        for handle in thread_handles {
            handle.join().unwrap();
        }
        assert_eq!(success_count.load(Relaxed), capacity);
        assert_eq!(bucket.len(), capacity);
    }
}

#[cfg(test)]
mod hash_map_test {
    use crate::{Guard, HashMap};
    use proptest::prelude::*;
    use std::hash::{BuildHasher, Hasher};
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering::Relaxed;
    use std::sync::{Arc, Barrier};
    use std::thread;

    static_assertions::assert_impl_all!(HashMap<String, String>: Send, Sync);
    static_assertions::assert_not_impl_all!(HashMap<String, *const String>: Send, Sync);

    /// Sends every key to the same home index.
    #[derive(Default)]
    struct Collide;

    struct CollideHasher;

    impl BuildHasher for Collide {
        type Hasher = CollideHasher;
        fn build_hasher(&self) -> CollideHasher {
            CollideHasher
        }
    }

    impl Hasher for CollideHasher {
        fn finish(&self) -> u64 {
            0
        }
        fn write(&mut self, _bytes: &[u8]) {}
    }

    #[test]
    fn insert_read_remove() {
        let map: HashMap<String, u32> = HashMap::new();
        assert!(map.insert("one".to_string(), 1).is_ok());
        assert_eq!(
            map.insert("one".to_string(), 2),
            Err(("one".to_string(), 2))
        );
        assert_eq!(map.get("one"), Some(1));
        assert!(map.contains("one"));
        assert!(!map.contains("two"));
        assert_eq!(map.read("one", |k, v| (k.clone(), *v)), Some(("one".to_string(), 1)));
        assert_eq!(map.remove("one"), Some(("one".to_string(), 1)));
        assert_eq!(map.remove("one"), None);
        assert!(map.is_empty());
    }

    #[test]
    fn collisions_widen_probing() {
        let map: HashMap<u64, u32, Collide> = HashMap::with_hasher(Collide);
        let workload_size = 64;
        for k in 0..workload_size {
            assert!(map.insert(k, k as u32).is_ok());
        }
        assert!(map.probing() >= workload_size as usize);
        for k in 0..workload_size {
            assert_eq!(map.get(&k), Some(k as u32));
        }
        let probing = map.probing();
        for k in 0..workload_size {
            assert_eq!(map.remove(&k), Some((k, k as u32)));
        }
        // The probe window never shrinks.
        assert_eq!(map.probing(), probing);
        assert!(map.insert(1, 1).is_ok());
        assert_eq!(map.get(&1), Some(1));
    }

    #[test]
    fn duplicate_after_collision_chain() {
        let map: HashMap<u64, u32, Collide> = HashMap::with_hasher(Collide);
        for k in 0..16 {
            assert!(map.insert(k, 0).is_ok());
        }
        for k in 0..16 {
            assert_eq!(map.insert(k, 1), Err((k, 1)));
        }
        assert_eq!(map.len(), 16);
    }

    #[test]
    fn update_upsert() {
        let map: HashMap<u64, u32> = HashMap::new();
        assert!(!map.update(&1, |_, v| v + 1));
        map.upsert(1, 10);
        assert_eq!(map.get(&1), Some(10));
        map.upsert(1, 20);
        assert_eq!(map.get(&1), Some(20));
        assert_eq!(map.len(), 1);
        assert!(map.update(&1, |_, v| v + 1));
        assert_eq!(map.get(&1), Some(21));
    }

    #[test]
    fn get_or_insert_with() {
        let map: HashMap<u64, u32> = HashMap::new();
        assert_eq!(map.get_or_insert_with(1, || 7), 7);
        assert_eq!(map.get_or_insert_with(1, || 8), 7);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn retain_clear() {
        let map: HashMap<u64, u32> = HashMap::new();
        for k in 0..100 {
            assert!(map.insert(k, k as u32).is_ok());
        }
        map.retain(|_, v| *v % 2 == 0);
        assert_eq!(map.len(), 50);
        map.for_each(|_, v| assert_eq!(*v % 2, 0));
        map.clear();
        assert!(map.is_empty());
    }

    #[test]
    fn equality() {
        let lhs: HashMap<u64, u32> = HashMap::new();
        let rhs: HashMap<u64, u32> = HashMap::new();
        for k in 0..16 {
            assert!(lhs.insert(k, k as u32).is_ok());
            assert!(rhs.insert(15 - k, (15 - k) as u32).is_ok());
        }
        assert_eq!(lhs, rhs);
        assert!(rhs.remove(&0).is_some());
        assert_ne!(lhs, rhs);
    }

    #[test]
    fn concurrent_duplicate_insert() {
        let num_threads = 2;
        for _ in 0..256 {
            let map: Arc<HashMap<u64, usize>> = Arc::new(HashMap::new());
            let barrier = Arc::new(Barrier::new(num_threads));
            let success_count = Arc::new(AtomicUsize::new(0));
            let mut thread_handles = Vec::with_capacity(num_threads);
            for thread_id in 0..num_threads {
                let map_clone = map.clone();
                let barrier_clone = barrier.clone();
                let success_count_clone = success_count.clone();
                thread_handles.push(thread::spawn(move || {
                    barrier_clone.wait();
                    if map_clone.insert(42, thread_id).is_ok() {
                        success_count_clone.fetch_add(1, Relaxed);
                    }
                }));
            }
            for handle in thread_handles {
                handle.join().unwrap();
            }
            assert_eq!(success_count.load(Relaxed), 1);
            assert_eq!(map.len(), 1);
        }
    }

    #[test]
    fn probing_covers_concurrent_collisions() {
        let num_threads = 8;
        let per_thread = 64;
        let map: Arc<HashMap<u64, usize, Collide>> = Arc::new(HashMap::with_hasher(Collide));
        let barrier = Arc::new(Barrier::new(num_threads));
        let mut thread_handles = Vec::with_capacity(num_threads);
        for thread_id in 0..num_threads {
            let map_clone = map.clone();
            let barrier_clone = barrier.clone();
            thread_handles.push(thread::spawn(move || {
                barrier_clone.wait();
                let base = (thread_id * per_thread) as u64;
                for k in base..base + per_thread as u64 {
                    assert!(map_clone.insert(k, thread_id).is_ok());
                }
            }));
        }
        for handle in thread_handles {
            handle.join().unwrap();
        }
        let total = num_threads * per_thread;
        assert_eq!(map.len(), total);
        // Every entry sits within the probe window of its home index.
        assert!(map.probing() >= total);
        for k in 0..total as u64 {
            assert!(map.contains(&k));
        }
    }

    #[test]
    fn concurrent_insert_read() {
        let num_threads = 8;
        let per_thread = 1024;
        let map: Arc<HashMap<usize, usize>> = Arc::new(HashMap::new());
        let barrier = Arc::new(Barrier::new(num_threads));
        let mut thread_handles = Vec::with_capacity(num_threads);
        for thread_id in 0..num_threads {
            let map_clone = map.clone();
            let barrier_clone = barrier.clone();
            thread_handles.push(thread::spawn(move || {
                barrier_clone.wait();
                let base = thread_id * per_thread;
                for k in base..base + per_thread {
                    assert!(map_clone.insert(k, k * 2).is_ok());
                }
                for k in base..base + per_thread {
                    assert_eq!(map_clone.get(&k), Some(k * 2));
                }
            }));
        }
        for handle in thread_handles {
            handle.join().unwrap();
        }
        assert_eq!(map.len(), num_threads * per_thread);
        let guard = Guard::new();
        assert_eq!(map.iter(&guard).count(), num_threads * per_thread);
    }

    proptest! {
        #[test]
        fn model(ops in proptest::collection::vec((0_u64..24, 0_u32..256, 0_u8..4), 0..256)) {
            let map: HashMap<u64, u32> = HashMap::new();
            let mut model: std::collections::HashMap<u64, u32> = std::collections::HashMap::new();
            for (key, value, op) in ops {
                match op {
                    0 => {
                        let expect_ok = !model.contains_key(&key);
                        prop_assert_eq!(map.insert(key, value).is_ok(), expect_ok);
                        if expect_ok {
                            model.insert(key, value);
                        }
                    }
                    1 => {
                        let removed = map.remove(&key).map(|(_, v)| v);
                        prop_assert_eq!(removed, model.remove(&key));
                    }
                    2 => {
                        map.upsert(key, value);
                        model.insert(key, value);
                    }
                    _ => {
                        prop_assert_eq!(map.get(&key), model.get(&key).copied());
                    }
                }
            }
            prop_assert_eq!(map.len(), model.len());
        }
    }
}

#[cfg(test)]
mod hash_set_test {
    use crate::{Guard, HashSet};
    use std::sync::{Arc, Barrier};
    use std::thread;

    static_assertions::assert_impl_all!(HashSet<String>: Send, Sync);
    static_assertions::assert_not_impl_all!(HashSet<*const String>: Send, Sync);

    #[test]
    fn insert_contains_remove() {
        let set: HashSet<String> = HashSet::new();
        assert!(set.insert("one".to_string()).is_ok());
        assert_eq!(set.insert("one".to_string()), Err("one".to_string()));
        assert!(set.contains("one"));
        assert_eq!(set.remove("one"), Some("one".to_string()));
        assert_eq!(set.remove("one"), None);
        assert!(set.is_empty());
    }

    #[test]
    fn conditional_removal() {
        let set: HashSet<u64> = HashSet::new();
        assert!(set.insert(17).is_ok());
        assert_eq!(set.remove_if(&17, |k| *k % 2 == 0), None);
        assert_eq!(set.remove_if(&17, |k| *k % 2 == 1), Some(17));
    }

    #[test]
    fn retain_for_each() {
        let set: HashSet<u64> = HashSet::new();
        for k in 0..100 {
            assert!(set.insert(k).is_ok());
        }
        set.retain(|k| *k < 50);
        assert_eq!(set.len(), 50);
        let mut max = 0;
        set.for_each(|k| max = max.max(*k));
        assert_eq!(max, 49);
        set.clear();
        assert!(set.is_empty());
    }

    #[test]
    fn concurrent_distinct_inserts() {
        let num_threads = 8;
        let per_thread = 125;
        let set: Arc<HashSet<usize>> = Arc::new(HashSet::new());
        let barrier = Arc::new(Barrier::new(num_threads));
        let mut thread_handles = Vec::with_capacity(num_threads);
        for thread_id in 0..num_threads {
            let set_clone = set.clone();
            let barrier_clone = barrier.clone();
            thread_handles.push(thread::spawn(move || {
                barrier_clone.wait();
                let base = thread_id * per_thread;
                for k in base..base + per_thread {
                    assert!(set_clone.insert(k).is_ok());
                }
            }));
        }
        for handle in thread_handles {
            handle.join().unwrap();
        }
        assert_eq!(set.len(), num_threads * per_thread);
        let guard = Guard::new();
        assert_eq!(set.iter(&guard).count(), num_threads * per_thread);
        for k in 0..num_threads * per_thread {
            assert!(set.contains(&k));
        }
    }
}
