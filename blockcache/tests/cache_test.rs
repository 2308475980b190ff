// Copyright 2026 blockcache Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use blockcache::{
    Cache, CacheBuilder, Charge, ConsumptionTracker, ErrorKind, EvictionCallback, LookupHint, MemoryTracker, MemoryType,
};
use blockcache_memory::test_utils::CountingMetricsRegistry;
use itertools::Itertools;
use parking_lot::Mutex;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use tempfile::TempDir;

const CACHE_SIZE: usize = 14 * 1024 * 1024;
const SHARDS: usize = 8;

#[derive(Debug, Clone, Copy)]
enum Composition {
    MultiShard,
    SingleShard,
}

fn encode(v: u32) -> [u8; 4] {
    v.to_le_bytes()
}

fn decode(v: &[u8]) -> u32 {
    u32::from_le_bytes(v.try_into().unwrap())
}

struct Harness {
    cache: Cache,
    evicted: Arc<Mutex<Vec<(u32, u32)>>>,
    callback: Arc<dyn EvictionCallback>,
    registry: CountingMetricsRegistry,
    _dir: Option<TempDir>,
}

impl Harness {
    fn new(memory_type: MemoryType, composition: Composition, capacity: usize) -> Self {
        let registry = CountingMetricsRegistry::default();
        let mut builder = CacheBuilder::new(capacity)
            .with_name("cache_test")
            .with_memory_type(memory_type)
            .with_metrics_registry(registry.clone());
        builder = match composition {
            Composition::MultiShard => builder.with_shards(SHARDS),
            Composition::SingleShard => builder.with_single_shard(),
        };
        let dir = match memory_type {
            MemoryType::Dram => None,
            MemoryType::Pmem => {
                let dir = tempfile::tempdir().unwrap();
                builder = builder
                    .with_pmem_path(dir.path())
                    .with_pmem_pool_size(capacity.max(1 << 20));
                Some(dir)
            }
        };
        let cache = builder.build().unwrap();

        let evicted: Arc<Mutex<Vec<(u32, u32)>>> = Arc::default();
        let e = evicted.clone();
        let callback: Arc<dyn EvictionCallback> =
            Arc::new(move |key: &[u8], value: &[u8]| e.lock().push((decode(key), decode(value))));

        Self {
            cache,
            evicted,
            callback,
            registry,
            _dir: dir,
        }
    }

    fn insert(&self, key: u32, value: u32, charge: usize) {
        let mut pending = self.cache.allocate(&encode(key), 4, charge).unwrap();
        pending.value_mut().copy_from_slice(&encode(value));
        self.cache.insert_with_callback(pending, self.callback.clone()).release();
    }

    fn lookup(&self, key: u32) -> Option<u32> {
        self.cache
            .lookup(&encode(key), LookupHint::ExpectInCache)
            .map(|entry| decode(&entry))
    }

    fn erase(&self, key: u32) -> bool {
        self.cache.erase(&encode(key))
    }

    fn evicted(&self) -> Vec<(u32, u32)> {
        self.evicted.lock().clone()
    }

    fn op(&self, op: &str) -> i64 {
        self.registry.get("blockcache_op_total", &["cache_test", op])
    }
}

fn for_all(capacity: usize, f: impl Fn(Harness)) {
    for memory_type in [MemoryType::Dram, MemoryType::Pmem] {
        for composition in [Composition::MultiShard, Composition::SingleShard] {
            tracing::info!("run with {memory_type} {composition:?}");
            f(Harness::new(memory_type, composition, capacity));
        }
    }
}

#[test_log::test]
fn test_track_memory() {
    for_all(CACHE_SIZE, |h| {
        let Some(tracker) = h.cache.tracker().cloned() else {
            assert_eq!(h.cache.memory_type(), MemoryType::Pmem);
            return;
        };
        assert_eq!(tracker.id(), "cache_test-sharded_lru_cache");

        h.insert(100, 100, 1);
        assert_eq!(tracker.consumption(), 1);
        assert!(h.erase(100));
        assert_eq!(tracker.consumption(), 0);
        assert_eq!(tracker.peak_consumption(), 1);
    });
}

#[test_log::test]
fn test_hit_and_miss() {
    for_all(CACHE_SIZE, |h| {
        assert_eq!(h.lookup(100), None);

        h.insert(100, 101, 1);
        assert_eq!(h.lookup(100), Some(101));
        assert_eq!(h.lookup(200), None);
        assert_eq!(h.lookup(300), None);

        h.insert(200, 201, 1);
        assert_eq!(h.lookup(100), Some(101));
        assert_eq!(h.lookup(200), Some(201));
        assert_eq!(h.lookup(300), None);

        h.insert(100, 102, 1);
        assert_eq!(h.lookup(100), Some(102));
        assert_eq!(h.lookup(200), Some(201));
        assert_eq!(h.lookup(300), None);

        assert_eq!(h.evicted(), vec![(100, 101)]);

        assert_eq!(h.op("hit"), 5);
        assert_eq!(h.op("hit_expected"), 5);
        assert_eq!(h.op("miss"), 5);
        assert_eq!(h.op("miss_expected"), 5);
        assert_eq!(h.op("insert"), 3);
        assert_eq!(h.op("replace"), 1);
    });
}

#[test_log::test]
fn test_erase() {
    for_all(CACHE_SIZE, |h| {
        assert!(!h.erase(200));
        assert!(h.evicted().is_empty());

        h.insert(100, 101, 1);
        h.insert(200, 201, 1);
        assert!(h.erase(100));
        assert_eq!(h.lookup(100), None);
        assert_eq!(h.lookup(200), Some(201));
        assert_eq!(h.evicted(), vec![(100, 101)]);

        assert!(!h.erase(100));
        assert_eq!(h.lookup(100), None);
        assert_eq!(h.lookup(200), Some(201));
        assert_eq!(h.evicted().len(), 1);
        assert_eq!(h.op("remove"), 1);
    });
}

#[test_log::test]
fn test_entries_are_pinned() {
    for_all(CACHE_SIZE, |h| {
        h.insert(100, 101, 1);
        let h1 = h.cache.lookup(&encode(100), LookupHint::ExpectInCache).unwrap();
        assert_eq!(decode(&h1), 101);

        h.insert(100, 102, 1);
        let h2 = h.cache.lookup(&encode(100), LookupHint::ExpectInCache).unwrap();
        assert_eq!(decode(&h2), 102);
        assert!(h.evicted().is_empty());
        assert!(h1.is_outdated());
        assert!(!h2.is_outdated());

        h1.release();
        assert_eq!(h.evicted(), vec![(100, 101)]);

        assert!(h.erase(100));
        assert_eq!(h.lookup(100), None);
        assert_eq!(h.evicted().len(), 1);
        // Still readable after the erase.
        assert_eq!(decode(&h2), 102);

        h2.release();
        assert_eq!(h.evicted(), vec![(100, 101), (100, 102)]);
        assert_eq!(h.cache.usage(), 0);
    });
}

#[test_log::test]
fn test_eviction_policy() {
    const ELEMS: u32 = 1000;
    let size_per_elem = CACHE_SIZE / ELEMS as usize;

    for_all(CACHE_SIZE, |h| {
        h.insert(100, 101, 1);
        h.insert(200, 201, 1);

        // Frequently accessed entries survive, the others are evicted.
        for i in 0..ELEMS + 1000 {
            h.insert(1000 + i, 2000 + i, size_per_elem);
            assert_eq!(h.lookup(1000 + i), Some(2000 + i));
            assert_eq!(h.lookup(100), Some(101));
        }
        assert_eq!(h.lookup(100), Some(101));
        assert_eq!(h.lookup(200), None);

        assert!(h.cache.usage() <= h.cache.capacity());
        assert!(h.op("evict") > 0);
        assert_eq!(h.op("evict") as usize, h.evicted().len());
    });
}

#[test_log::test]
fn test_heavy_entries() {
    for_all(CACHE_SIZE, |h| {
        let light = CACHE_SIZE / 1000;
        let heavy = CACHE_SIZE / 100;
        let weight = |i: u32| if i & 1 == 1 { light } else { heavy };

        let mut added = 0;
        let mut index = 0;
        while added < 2 * CACHE_SIZE {
            h.insert(index, 1000 + index, weight(index));
            added += weight(index);
            index += 1;
        }

        let mut cached = 0;
        for i in 0..index {
            if let Some(r) = h.lookup(i) {
                cached += weight(i);
                assert_eq!(r, 1000 + i);
            }
        }
        assert!(cached <= CACHE_SIZE + CACHE_SIZE / 10);
    });
}

#[test_log::test]
fn test_shutdown_fires_remaining_callbacks() {
    for_all(CACHE_SIZE, |h| {
        for i in 0..16 {
            h.insert(i, i + 1, 1);
        }
        let Harness { cache, evicted, .. } = h;
        assert!(evicted.lock().is_empty());
        drop(cache);

        let all = evicted.lock().iter().copied().sorted().collect_vec();
        assert_eq!(all, (0..16).map(|i| (i, i + 1)).collect_vec());
    });
}

#[test_log::test]
fn test_auto_charge_uses_footprint() {
    for_all(CACHE_SIZE, |h| {
        let pending = h.cache.allocate(b"block", 4096, Charge::Auto).unwrap();
        assert!(pending.charge() > 5 + 4096);
        let charge = pending.charge();
        drop(h.cache.insert(pending));
        assert_eq!(h.cache.usage(), charge);
    });
}

#[test_log::test]
fn test_pmem_pool_exhaustion() {
    let dir = tempfile::tempdir().unwrap();
    let cache = CacheBuilder::new(1024)
        .with_memory_type(MemoryType::Pmem)
        .with_pmem_path(dir.path())
        .with_pmem_pool_size(4096)
        .with_single_shard()
        .build()
        .unwrap();

    let entry = cache.insert(cache.allocate(b"a", 4096, 1usize).unwrap());
    let err = cache.allocate(b"b", 1, 1usize).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoSpace);
    assert_eq!(cache.entries(), 1);
    assert_eq!(cache.usage(), 1);

    drop(entry);
    assert!(cache.erase(b"a"));
    let pending = cache.allocate(b"b", 4096, 1usize).unwrap();
    assert_eq!(pending.value().len(), 4096);
}

#[test_log::test]
fn test_parent_tracker_aggregates_caches() {
    let root = Arc::new(MemoryTracker::new("root"));
    let caches = (0..2)
        .map(|i| {
            CacheBuilder::new(1024)
                .with_name(format!("cache-{i}"))
                .with_single_shard()
                .with_parent_tracker(root.clone())
                .build()
                .unwrap()
        })
        .collect_vec();

    for (i, cache) in caches.iter().enumerate() {
        let pending = cache.allocate(b"k", 1, 10 * (i + 1)).unwrap();
        cache.insert(pending);
    }
    assert_eq!(root.consumption(), 30);
    drop(caches);
    assert_eq!(root.consumption(), 0);
}

#[test_log::test]
fn test_concurrent_readers_see_stable_values() {
    for_all(1024, |h| {
        let cache = h.cache.clone();
        let stop = Arc::new(AtomicBool::new(false));

        let writer = {
            let cache = cache.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                let mut rng = SmallRng::seed_from_u64(42);
                while !stop.load(Ordering::Relaxed) {
                    let key = rng.random_range(0..256u32);
                    if rng.random_bool(0.8) {
                        let mut pending = cache.allocate(&encode(key), 64, 16usize).unwrap();
                        pending.value_mut().fill(key as u8);
                        cache.insert(pending);
                    } else {
                        cache.erase(&encode(key));
                    }
                }
            })
        };

        let readers = (0..4)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    let mut rng = SmallRng::seed_from_u64(t);
                    let mut held = vec![];
                    for _ in 0..20_000 {
                        let key = rng.random_range(0..256u32);
                        if let Some(entry) = cache.lookup(&encode(key), LookupHint::Normal) {
                            held.push((key, entry));
                        }
                        if held.len() > 8 {
                            held.remove(0);
                        }
                        // Pinned values never change under the reader.
                        for (key, entry) in held.iter() {
                            assert!(entry.iter().all(|b| *b == *key as u8));
                        }
                    }
                })
            })
            .collect_vec();

        for reader in readers {
            reader.join().unwrap();
        }
        stop.store(true, Ordering::Relaxed);
        writer.join().unwrap();

        assert!(cache.usage() <= cache.capacity());
    });
}
