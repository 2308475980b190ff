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

use std::{fmt::Debug, ops::Deref, path::PathBuf, sync::Arc};

use blockcache_common::{
    error::{Error, Result},
    metrics::{model::Metrics, registry::noop::NoopMetricsRegistry, BoxedRegistry, RegistryOps},
    strict_assert_eq,
    tracker::{ConsumptionTracker, MemoryTracker},
};
use serde::{Deserialize, Serialize};

use crate::{
    backend::{dram::DramBackend, pmem::PmemBackend, MemoryType},
    callback::EvictionCallback,
    raw::{Charge, LookupHint, RawCache, RawCacheConfig, RawCacheEntry, RawPendingEntry},
};

/// Default cache name, used as metrics label and as tracker id prefix.
pub const DEFAULT_NAME: &str = "blockcache";

/// Default capacity: 512 MiB worth of charge.
pub const DEFAULT_CAPACITY: usize = 512 * 1024 * 1024;

/// Shard count used when none is configured: available parallelism rounded up to a power of two.
pub fn default_shards() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .next_power_of_two()
}

/// Serializable configuration of a block cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache name.
    pub name: String,
    /// Total capacity in charge units.
    pub capacity: usize,
    /// Explicit shard count. Falls back to [`default_shards`].
    pub shards: Option<usize>,
    /// Use exactly one shard, overriding `shards`.
    pub force_single_shard: bool,
    /// Medium holding the values.
    pub memory_type: MemoryType,
    /// Directory holding the persistent memory pool. Required for [`MemoryType::Pmem`].
    pub pmem_path: Option<PathBuf>,
    /// Size of the persistent memory pool in bytes. Defaults to the capacity.
    pub pmem_pool_size: Option<usize>,
    /// Fraction of a shard's capacity that may be buffered before charge changes reach the tracker.
    pub tracker_approximation_ratio: f64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            capacity: DEFAULT_CAPACITY,
            shards: None,
            force_single_shard: false,
            memory_type: MemoryType::Dram,
            pmem_path: None,
            pmem_pool_size: None,
            tracker_approximation_ratio: 0.0,
        }
    }
}

/// Builder of [`Cache`].
pub struct CacheBuilder {
    config: CacheConfig,
    parent_tracker: Option<Arc<dyn ConsumptionTracker>>,
    registry: BoxedRegistry,
}

impl Debug for CacheBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheBuilder")
            .field("config", &self.config)
            .field("parent_tracker", &self.parent_tracker)
            .field("registry", &self.registry)
            .finish()
    }
}

impl From<CacheConfig> for CacheBuilder {
    fn from(config: CacheConfig) -> Self {
        Self {
            config,
            parent_tracker: None,
            registry: Box::new(NoopMetricsRegistry),
        }
    }
}

impl CacheBuilder {
    /// Create a builder for a cache with the given total capacity in charge units.
    pub fn new(capacity: usize) -> Self {
        CacheConfig {
            capacity,
            ..Default::default()
        }
        .into()
    }

    /// Create a builder from a deserialized configuration.
    pub fn from_config(config: CacheConfig) -> Self {
        config.into()
    }

    /// Set the cache name.
    ///
    /// The name labels the cache metrics and prefixes the id of its consumption tracker.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the shard count. Entries are distributed to shards by key hash, operations on different shards run in
    /// parallel.
    ///
    /// The default value is the available parallelism rounded up to a power of two.
    pub fn with_shards(mut self, shards: usize) -> Self {
        self.config.shards = Some(shards);
        self
    }

    /// Use exactly one shard. Takes precedence over [`CacheBuilder::with_shards`].
    pub fn with_single_shard(mut self) -> Self {
        self.config.force_single_shard = true;
        self
    }

    /// Set the medium holding values.
    ///
    /// The default value is [`MemoryType::Dram`].
    pub fn with_memory_type(mut self, memory_type: MemoryType) -> Self {
        self.config.memory_type = memory_type;
        self
    }

    /// Set the directory of the persistent memory pool.
    pub fn with_pmem_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pmem_path = Some(path.into());
        self
    }

    /// Set the persistent memory pool size in bytes.
    pub fn with_pmem_pool_size(mut self, pool_size: usize) -> Self {
        self.config.pmem_pool_size = Some(pool_size);
        self
    }

    /// Forward the consumption of the cache to `parent`.
    pub fn with_parent_tracker(mut self, parent: Arc<dyn ConsumptionTracker>) -> Self {
        self.parent_tracker = Some(parent);
        self
    }

    /// Set how much of each shard's capacity may be buffered before charge changes are reported.
    ///
    /// Must be within `[0, 1]`. The default value `0.0` reports every change.
    pub fn with_tracker_approximation_ratio(mut self, ratio: f64) -> Self {
        self.config.tracker_approximation_ratio = ratio;
        self
    }

    /// Register the cache metrics on `registry`.
    pub fn with_metrics_registry(mut self, registry: impl RegistryOps) -> Self {
        self.registry = Box::new(registry);
        self
    }

    /// Build the cache.
    ///
    /// Any configuration error is reported here, a cache is only returned fully constructed.
    pub fn build(self) -> Result<Cache> {
        let CacheBuilder {
            config,
            parent_tracker,
            registry,
        } = self;

        let ratio = config.tracker_approximation_ratio;
        if !(0.0..=1.0).contains(&ratio) {
            return Err(Error::config("tracker approximation ratio must be within [0, 1]")
                .with_context("ratio", ratio));
        }

        let shards = match (config.force_single_shard, config.shards) {
            (true, _) => 1,
            (false, Some(shards)) => shards,
            (false, None) => default_shards(),
        };
        if shards == 0 {
            return Err(Error::config("shards must be greater than zero"));
        }

        let metrics = Arc::new(Metrics::new(config.name.clone(), registry.as_ref()));

        let cache = match config.memory_type {
            MemoryType::Dram => {
                let id = format!("{}-sharded_lru_cache", config.name);
                let tracker = match parent_tracker {
                    Some(parent) => MemoryTracker::with_parent(id, parent),
                    None => MemoryTracker::new(id),
                };
                Cache::Dram(RawCache::new(RawCacheConfig {
                    name: config.name,
                    capacity: config.capacity,
                    shards,
                    backend: DramBackend::new(Arc::new(tracker)),
                    tracker_approximation_ratio: ratio,
                    metrics,
                }))
            }
            MemoryType::Pmem => {
                let path = config
                    .pmem_path
                    .ok_or_else(|| Error::config("persistent memory requires a pool path"))?;
                let pool_size = config.pmem_pool_size.unwrap_or(config.capacity);
                let backend = PmemBackend::open(&path, pool_size)?;
                Cache::Pmem(RawCache::new(RawCacheConfig {
                    name: config.name,
                    capacity: config.capacity,
                    shards,
                    backend,
                    tracker_approximation_ratio: ratio,
                    metrics,
                }))
            }
        };

        Ok(cache)
    }
}

/// A block cache over either memory backend.
pub enum Cache {
    /// Values on the heap.
    Dram(RawCache<DramBackend>),
    /// Values in a persistent memory pool.
    Pmem(RawCache<PmemBackend>),
}

impl Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dram(cache) => f.debug_tuple("Cache::Dram").field(cache).finish(),
            Self::Pmem(cache) => f.debug_tuple("Cache::Pmem").field(cache).finish(),
        }
    }
}

impl Clone for Cache {
    fn clone(&self) -> Self {
        match self {
            Self::Dram(cache) => Self::Dram(cache.clone()),
            Self::Pmem(cache) => Self::Pmem(cache.clone()),
        }
    }
}

impl Cache {
    /// Allocate space for an entry of `value_size` bytes.
    ///
    /// The returned entry is invisible to lookups until inserted. Fails without touching the cache if the backend
    /// cannot provide the space.
    pub fn allocate(&self, key: &[u8], value_size: usize, charge: impl Into<Charge>) -> Result<PendingEntry> {
        let charge = charge.into();
        match self {
            Cache::Dram(cache) => cache.allocate(key, value_size, charge).map(PendingEntry::from),
            Cache::Pmem(cache) => cache.allocate(key, value_size, charge).map(PendingEntry::from),
        }
    }

    /// Insert a pending entry, superseding any entry with the same key, and return a handle to it.
    ///
    /// The entry always lands in the cache it was allocated from, even if `self` is another cache. Strict assertions
    /// catch such a mismatch of memory types.
    pub fn insert(&self, pending: PendingEntry) -> CacheEntry {
        strict_assert_eq!(self.memory_type(), pending.memory_type());
        match (self, pending) {
            (Cache::Dram(cache), PendingEntry::Dram(pending)) => cache.insert(pending).into(),
            (Cache::Pmem(cache), PendingEntry::Pmem(pending)) => cache.insert(pending).into(),
            // A pending entry always lands in the cache it was allocated from.
            (_, pending) => pending.commit(None),
        }
    }

    /// Like [`Cache::insert`], `callback` is fired exactly once when the entry is destroyed.
    pub fn insert_with_callback(&self, pending: PendingEntry, callback: Arc<dyn EvictionCallback>) -> CacheEntry {
        strict_assert_eq!(self.memory_type(), pending.memory_type());
        match (self, pending) {
            (Cache::Dram(cache), PendingEntry::Dram(pending)) => cache.insert_with_callback(pending, callback).into(),
            (Cache::Pmem(cache), PendingEntry::Pmem(pending)) => cache.insert_with_callback(pending, callback).into(),
            (_, pending) => pending.commit(Some(callback)),
        }
    }

    /// Look up `key`. A hit pins the entry until the returned handle is released.
    pub fn lookup(&self, key: &[u8], hint: LookupHint) -> Option<CacheEntry> {
        match self {
            Cache::Dram(cache) => cache.lookup(key, hint).map(CacheEntry::from),
            Cache::Pmem(cache) => cache.lookup(key, hint).map(CacheEntry::from),
        }
    }

    /// Remove `key` from the cache. Returns whether it was present.
    pub fn erase(&self, key: &[u8]) -> bool {
        match self {
            Cache::Dram(cache) => cache.erase(key),
            Cache::Pmem(cache) => cache.erase(key),
        }
    }

    /// Cache name.
    pub fn name(&self) -> &str {
        match self {
            Cache::Dram(cache) => cache.name(),
            Cache::Pmem(cache) => cache.name(),
        }
    }

    /// Total capacity in charge units.
    pub fn capacity(&self) -> usize {
        match self {
            Cache::Dram(cache) => cache.capacity(),
            Cache::Pmem(cache) => cache.capacity(),
        }
    }

    /// Summed charge of all indexed entries.
    pub fn usage(&self) -> usize {
        match self {
            Cache::Dram(cache) => cache.usage(),
            Cache::Pmem(cache) => cache.usage(),
        }
    }

    /// Number of indexed entries.
    pub fn entries(&self) -> usize {
        match self {
            Cache::Dram(cache) => cache.entries(),
            Cache::Pmem(cache) => cache.entries(),
        }
    }

    /// Shard count.
    pub fn shards(&self) -> usize {
        match self {
            Cache::Dram(cache) => cache.shards(),
            Cache::Pmem(cache) => cache.shards(),
        }
    }

    /// Medium holding values.
    pub fn memory_type(&self) -> MemoryType {
        match self {
            Cache::Dram(cache) => cache.memory_type(),
            Cache::Pmem(cache) => cache.memory_type(),
        }
    }

    /// Consumption tracker of the cache. Only DRAM caches are tracked.
    pub fn tracker(&self) -> Option<&Arc<dyn ConsumptionTracker>> {
        match self {
            Cache::Dram(cache) => cache.tracker(),
            Cache::Pmem(cache) => cache.tracker(),
        }
    }

    /// Re-register the cache metrics on `registry`.
    pub fn set_metrics(&self, registry: &dyn RegistryOps) {
        let metrics = Arc::new(Metrics::new(self.name().to_string(), registry));
        match self {
            Cache::Dram(cache) => cache.set_metrics(metrics),
            Cache::Pmem(cache) => cache.set_metrics(metrics),
        }
    }
}

/// An allocated entry waiting to be inserted.
#[derive(Debug)]
pub enum PendingEntry {
    /// Pending entry of a DRAM cache.
    Dram(RawPendingEntry<DramBackend>),
    /// Pending entry of a persistent memory cache.
    Pmem(RawPendingEntry<PmemBackend>),
}

impl From<RawPendingEntry<DramBackend>> for PendingEntry {
    fn from(pending: RawPendingEntry<DramBackend>) -> Self {
        Self::Dram(pending)
    }
}

impl From<RawPendingEntry<PmemBackend>> for PendingEntry {
    fn from(pending: RawPendingEntry<PmemBackend>) -> Self {
        Self::Pmem(pending)
    }
}

impl PendingEntry {
    /// Entry key.
    pub fn key(&self) -> &[u8] {
        match self {
            PendingEntry::Dram(pending) => pending.key(),
            PendingEntry::Pmem(pending) => pending.key(),
        }
    }

    /// Entry value.
    pub fn value(&self) -> &[u8] {
        match self {
            PendingEntry::Dram(pending) => pending.value(),
            PendingEntry::Pmem(pending) => pending.value(),
        }
    }

    /// Writable value storage, zeroed on allocation.
    pub fn value_mut(&mut self) -> &mut [u8] {
        match self {
            PendingEntry::Dram(pending) => pending.value_mut(),
            PendingEntry::Pmem(pending) => pending.value_mut(),
        }
    }

    /// Charge accounted for the entry.
    pub fn charge(&self) -> usize {
        match self {
            PendingEntry::Dram(pending) => pending.charge(),
            PendingEntry::Pmem(pending) => pending.charge(),
        }
    }

    /// Medium of the cache the entry was allocated from.
    pub fn memory_type(&self) -> MemoryType {
        match self {
            PendingEntry::Dram(_) => MemoryType::Dram,
            PendingEntry::Pmem(_) => MemoryType::Pmem,
        }
    }

    fn commit(self, callback: Option<Arc<dyn EvictionCallback>>) -> CacheEntry {
        match self {
            PendingEntry::Dram(pending) => pending.commit(callback).into(),
            PendingEntry::Pmem(pending) => pending.commit(callback).into(),
        }
    }
}

/// A handle to a cached entry. The entry stays pinned until every handle is dropped.
#[derive(Debug)]
pub enum CacheEntry {
    /// Handle of a DRAM cache entry.
    Dram(RawCacheEntry<DramBackend>),
    /// Handle of a persistent memory cache entry.
    Pmem(RawCacheEntry<PmemBackend>),
}

impl Clone for CacheEntry {
    fn clone(&self) -> Self {
        match self {
            Self::Dram(entry) => Self::Dram(entry.clone()),
            Self::Pmem(entry) => Self::Pmem(entry.clone()),
        }
    }
}

impl Deref for CacheEntry {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.value()
    }
}

impl From<RawCacheEntry<DramBackend>> for CacheEntry {
    fn from(entry: RawCacheEntry<DramBackend>) -> Self {
        Self::Dram(entry)
    }
}

impl From<RawCacheEntry<PmemBackend>> for CacheEntry {
    fn from(entry: RawCacheEntry<PmemBackend>) -> Self {
        Self::Pmem(entry)
    }
}

impl CacheEntry {
    /// Entry key.
    pub fn key(&self) -> &[u8] {
        match self {
            CacheEntry::Dram(entry) => entry.key(),
            CacheEntry::Pmem(entry) => entry.key(),
        }
    }

    /// Entry value.
    pub fn value(&self) -> &[u8] {
        match self {
            CacheEntry::Dram(entry) => entry.value(),
            CacheEntry::Pmem(entry) => entry.value(),
        }
    }

    /// Charge accounted for the entry.
    pub fn charge(&self) -> usize {
        match self {
            CacheEntry::Dram(entry) => entry.charge(),
            CacheEntry::Pmem(entry) => entry.charge(),
        }
    }

    /// References held on the entry: one per handle, plus one while it is indexed.
    pub fn refs(&self) -> usize {
        match self {
            CacheEntry::Dram(entry) => entry.refs(),
            CacheEntry::Pmem(entry) => entry.refs(),
        }
    }

    /// Whether the entry has left the cache since the handle was obtained.
    pub fn is_outdated(&self) -> bool {
        match self {
            CacheEntry::Dram(entry) => entry.is_outdated(),
            CacheEntry::Pmem(entry) => entry.is_outdated(),
        }
    }

    /// Release the handle. Same as dropping it.
    pub fn release(self) {}
}

#[cfg(test)]
mod tests {
    use blockcache_common::error::ErrorKind;

    use super::*;

    fn is_send_sync_static<T: Send + Sync + 'static>() {}

    #[test]
    fn test_send_sync_static() {
        is_send_sync_static::<Cache>();
        is_send_sync_static::<CacheEntry>();
        is_send_sync_static::<PendingEntry>();
        is_send_sync_static::<CacheBuilder>();
    }

    #[test]
    fn test_build_defaults() {
        let cache = CacheBuilder::new(1024).build().unwrap();
        assert_eq!(cache.name(), DEFAULT_NAME);
        assert_eq!(cache.capacity(), 1024);
        assert_eq!(cache.shards(), default_shards());
        assert!(cache.shards().is_power_of_two());
        assert_eq!(cache.memory_type(), MemoryType::Dram);
        assert_eq!(cache.tracker().unwrap().id(), "blockcache-sharded_lru_cache");
    }

    #[test]
    fn test_single_shard_overrides_shards() {
        let cache = CacheBuilder::new(1024).with_shards(16).with_single_shard().build().unwrap();
        assert_eq!(cache.shards(), 1);
    }

    #[test]
    fn test_parent_tracker() {
        let parent: Arc<dyn ConsumptionTracker> = Arc::new(MemoryTracker::new("root"));
        let cache = CacheBuilder::new(1024)
            .with_name("child")
            .with_single_shard()
            .with_parent_tracker(parent.clone())
            .build()
            .unwrap();
        assert_eq!(cache.tracker().unwrap().id(), "child-sharded_lru_cache");

        let mut pending = cache.allocate(b"k", 4, 10usize).unwrap();
        pending.value_mut().copy_from_slice(b"data");
        let entry = cache.insert(pending);
        assert_eq!(&*entry, b"data");
        assert_eq!(parent.consumption(), 10);

        drop(entry);
        assert!(cache.erase(b"k"));
        assert_eq!(parent.consumption(), 0);
        assert_eq!(parent.peak_consumption(), 10);
    }

    #[test]
    fn test_config_errors() {
        for ratio in [-0.1, 1.5, f64::NAN] {
            let err = CacheBuilder::new(1024)
                .with_tracker_approximation_ratio(ratio)
                .build()
                .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Config);
        }

        let err = CacheBuilder::new(1024).with_shards(0).build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);

        let err = CacheBuilder::new(1024)
            .with_memory_type(MemoryType::Pmem)
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);

        let err = CacheBuilder::new(1024)
            .with_memory_type(MemoryType::Pmem)
            .with_pmem_path("/definitely/not/a/pool/dir")
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_build_pmem() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheBuilder::new(1024)
            .with_memory_type(MemoryType::Pmem)
            .with_pmem_path(dir.path())
            .with_pmem_pool_size(4096)
            .with_shards(2)
            .build()
            .unwrap();
        assert_eq!(cache.memory_type(), MemoryType::Pmem);
        assert!(cache.tracker().is_none());

        let mut pending = cache.allocate(b"k", 3, Charge::Auto).unwrap();
        pending.value_mut().copy_from_slice(b"abc");
        let charge = pending.charge();
        let entry = cache.insert(pending);
        assert_eq!(entry.value(), b"abc");
        assert_eq!(cache.usage(), charge);
        assert_eq!(cache.entries(), 1);
    }

    #[test]
    fn test_config_from_json() {
        let config: CacheConfig = serde_json::from_str(
            r#"{
                "name": "json",
                "capacity": 4096,
                "force_single_shard": true,
                "memory_type": "Dram",
                "tracker_approximation_ratio": 0.5
            }"#,
        )
        .unwrap();
        assert_eq!(config.shards, None);
        assert_eq!(config.pmem_path, None);

        let cache = CacheBuilder::from_config(config).build().unwrap();
        assert_eq!(cache.name(), "json");
        assert_eq!(cache.capacity(), 4096);
        assert_eq!(cache.shards(), 1);

        let config: CacheConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, CacheConfig::default());
    }

    #[test]
    fn test_set_metrics() {
        let cache = CacheBuilder::new(1024).with_name("swap").with_single_shard().build().unwrap();
        let registry = crate::test_utils::CountingMetricsRegistry::default();

        drop(cache.insert(cache.allocate(b"a", 1, 1usize).unwrap()));
        cache.set_metrics(&registry);
        assert_eq!(registry.get("blockcache_usage", &["swap"]), 1);

        assert!(cache.lookup(b"a", LookupHint::Normal).is_some());
        assert_eq!(registry.get("blockcache_op_total", &["swap", "hit"]), 1);
        assert_eq!(registry.get("blockcache_op_total", &["swap", "insert"]), 0);
    }
}
