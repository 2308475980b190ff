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

use std::{fmt::Debug, ops::Deref, sync::Arc};

use arc_swap::ArcSwap;
use blockcache_common::{
    error::{Error, Result},
    hasher::hash_key, metrics::model::Metrics, scope::Scope, strict_assert, strict_assert_eq,
    tracker::ConsumptionTracker,
};
use itertools::Itertools;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    backend::{MemoryBackend, MemoryType},
    callback::EvictionCallback,
    consumption::ConsumptionReporter,
    indexer::Indexer,
    lru::Lru,
    record::Record,
};

/// Capacity weight of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Charge {
    /// Charge the memory footprint of the entry: key, value and the fixed per-entry overhead.
    Auto,
    /// Charge a caller-defined amount. The unit is opaque to the cache.
    Fixed(usize),
}

impl From<usize> for Charge {
    fn from(charge: usize) -> Self {
        Charge::Fixed(charge)
    }
}

impl Charge {
    /// Largest charge a single entry may carry, so charge deltas stay representable for consumption trackers.
    pub const MAX: usize = i64::MAX as usize;

    fn resolve(self, key_len: usize, value_size: usize, overhead: usize) -> Result<usize> {
        let charge = match self {
            Charge::Auto => key_len.checked_add(value_size).and_then(|c| c.checked_add(overhead)),
            Charge::Fixed(charge) => Some(charge),
        };
        match charge {
            Some(charge) if charge <= Self::MAX => Ok(charge),
            _ => Err(Error::config("entry charge exceeds the maximum charge")
                .with_context("key_len", key_len)
                .with_context("value_size", value_size)
                .with_context("charge", format!("{self:?}"))),
        }
    }
}

/// Caller expectation attached to a lookup.
///
/// Only affects metrics, never the result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LookupHint {
    /// No expectation.
    #[default]
    Normal,
    /// The caller expects the key to be cached. Hits and misses are also counted separately.
    ExpectInCache,
}

/// Configuration of [`RawCache`]. Validation is left to the caller.
pub struct RawCacheConfig<B>
where
    B: MemoryBackend,
{
    /// Cache name, for logs.
    pub name: String,
    /// Total capacity in charge units, split evenly across shards.
    pub capacity: usize,
    /// Shard count, must be greater than zero.
    pub shards: usize,
    /// Backend holding values.
    pub backend: B,
    /// See [`crate::CacheBuilder::with_tracker_approximation_ratio`].
    pub tracker_approximation_ratio: f64,
    /// Metrics of the cache.
    pub metrics: Arc<Metrics>,
}

struct RawCacheShard<B>
where
    B: MemoryBackend,
{
    indexer: Indexer<B>,
    lru: Lru<B>,

    usage: usize,
    capacity: usize,

    reporter: ConsumptionReporter,
}

impl<B> RawCacheShard<B>
where
    B: MemoryBackend,
{
    /// Drop one reference. The record is collected into `garbages` if it was the last one.
    fn unref(&mut self, record: &Arc<Record<B>>, garbages: &mut Vec<Arc<Record<B>>>) {
        if record.dec_refs(1) == 0 {
            strict_assert!(!record.is_in_indexer());
            self.reporter.report(-(record.charge() as i64));
            garbages.push(record.clone());
        }
    }

    /// Evict least recently used evictable records until usage fits the capacity or nothing is evictable.
    ///
    /// Zero-charge records are never picked, evicting them would free nothing.
    fn evict(&mut self, garbages: &mut Vec<Arc<Record<B>>>, metrics: &Metrics) {
        while self.usage > self.capacity {
            let evicted = match self.lru.pop_evictable() {
                Some(evicted) => evicted,
                None => break,
            };
            strict_assert_eq!(evicted.refs(), 1);

            let e = self.indexer.remove_record(&evicted);
            strict_assert!(e.is_some());

            self.usage -= evicted.charge();
            metrics.cache_evict.increase(1);
            metrics.cache_usage.decrease(evicted.charge() as _);

            tracing::trace!("[raw]: evict record (hash: {})", evicted.hash());

            self.unref(&evicted, garbages);
        }
    }

    fn emplace(&mut self, record: Arc<Record<B>>, garbages: &mut Vec<Arc<Record<B>>>, metrics: &Metrics) {
        // One reference for the index, one for the returned handle.
        strict_assert_eq!(record.refs(), 0);
        record.inc_refs(2);

        if let Some(old) = self.indexer.insert(record.clone()) {
            metrics.cache_replace.increase(1);

            self.lru.remove(&old);
            self.usage -= old.charge();
            metrics.cache_usage.decrease(old.charge() as _);

            self.unref(&old, garbages);
        }
        metrics.cache_insert.increase(1);

        self.lru.push_pinned(record.clone());
        self.usage += record.charge();
        metrics.cache_usage.increase(record.charge() as _);
        self.reporter.report(record.charge() as i64);

        self.evict(garbages, metrics);
    }

    #[cfg_attr(feature = "tracing", fastrace::trace(name = "blockcache::memory::raw::shard::lookup"))]
    fn lookup(&mut self, hash: u64, key: &[u8], hint: LookupHint, metrics: &Metrics) -> Option<Arc<Record<B>>> {
        let record = match self.indexer.get(hash, key).cloned() {
            Some(record) => {
                metrics.cache_hit.increase(1);
                if hint == LookupHint::ExpectInCache {
                    metrics.cache_hit_expected.increase(1);
                }
                record
            }
            None => {
                metrics.cache_miss.increase(1);
                if hint == LookupHint::ExpectInCache {
                    metrics.cache_miss_expected.increase(1);
                }
                return None;
            }
        };

        record.inc_refs(1);
        if record.is_in_evictable() {
            self.lru.pin(&record);
        }

        Some(record)
    }

    fn release(&mut self, record: &Arc<Record<B>>, garbages: &mut Vec<Arc<Record<B>>>, metrics: &Metrics) {
        metrics.cache_release.increase(1);

        if record.is_in_indexer() {
            // Indexed records keep the cache's own reference, so this is never the last one.
            if record.dec_refs(1) == 1 {
                self.lru.unpin(record);
                // Usage may have overshot the capacity while everything was pinned.
                self.evict(garbages, metrics);
            }
        } else {
            self.unref(record, garbages);
        }
    }

    #[cfg_attr(feature = "tracing", fastrace::trace(name = "blockcache::memory::raw::shard::erase"))]
    fn erase(&mut self, hash: u64, key: &[u8], garbages: &mut Vec<Arc<Record<B>>>, metrics: &Metrics) -> bool {
        let Some(record) = self.indexer.remove(hash, key) else {
            return false;
        };

        self.lru.remove(&record);
        self.usage -= record.charge();
        metrics.cache_remove.increase(1);
        metrics.cache_usage.decrease(record.charge() as _);

        self.unref(&record, garbages);
        true
    }

    fn clear(&mut self, garbages: &mut Vec<Arc<Record<B>>>, metrics: &Metrics) {
        let records = self.indexer.drain().collect_vec();
        strict_assert!(self.indexer.is_empty());
        self.lru.clear();
        strict_assert!(self.lru.is_evictable_empty());

        for record in records {
            strict_assert_eq!(record.refs(), 1);
            self.usage -= record.charge();
            metrics.cache_usage.decrease(record.charge() as _);
            self.unref(&record, garbages);
        }
        strict_assert_eq!(self.usage, 0);
    }
}

struct RawCacheInner<B>
where
    B: MemoryBackend,
{
    name: String,
    capacity: usize,
    shards: Vec<Mutex<RawCacheShard<B>>>,

    backend: B,
    tracker: Option<Arc<dyn ConsumptionTracker>>,

    metrics: ArcSwap<Metrics>,
}

impl<B> RawCacheInner<B>
where
    B: MemoryBackend,
{
    fn shard(&self, hash: u64) -> usize {
        // The low bits drive bucket selection inside the shard's hash table.
        (hash >> 32) as usize % self.shards.len()
    }

    /// Fire callbacks of collected records. Must be called without holding any shard lock.
    fn finalize(garbages: Vec<Arc<Record<B>>>) {
        for record in garbages {
            strict_assert_eq!(record.refs(), 0);
            if let Some(callback) = record.callback() {
                callback.on_evict(record.key(), record.value());
            }
        }
    }

    fn insert(self: &Arc<Self>, mut record: Record<B>, callback: Option<Arc<dyn EvictionCallback>>) -> RawCacheEntry<B> {
        record.set_callback(callback);
        let record = Arc::new(record);

        let mut garbages = vec![];
        let metrics = self.metrics.load();
        self.shards[self.shard(record.hash())]
            .lock()
            .with(|mut shard| shard.emplace(record.clone(), &mut garbages, &metrics));

        // Run callbacks and deallocate data out of the lock critical section.
        Self::finalize(garbages);

        RawCacheEntry {
            inner: self.clone(),
            record,
        }
    }

    fn release(&self, record: &Arc<Record<B>>) {
        let mut garbages = vec![];
        let metrics = self.metrics.load();
        self.shards[self.shard(record.hash())]
            .lock()
            .with(|mut shard| shard.release(record, &mut garbages, &metrics));

        Self::finalize(garbages);
    }
}

impl<B> Drop for RawCacheInner<B>
where
    B: MemoryBackend,
{
    fn drop(&mut self) {
        let mut garbages = vec![];
        let metrics = self.metrics.load();
        for shard in self.shards.iter() {
            shard.lock().clear(&mut garbages, &metrics);
        }
        tracing::debug!(
            "[raw]: cache {} shut down, {} entries destroyed",
            self.name,
            garbages.len()
        );
        Self::finalize(garbages);
    }
}

/// Sharded, handle-based, reference-counted LRU cache over a memory backend.
pub struct RawCache<B>
where
    B: MemoryBackend,
{
    inner: Arc<RawCacheInner<B>>,
}

impl<B> Debug for RawCache<B>
where
    B: MemoryBackend,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawCache")
            .field("name", &self.inner.name)
            .field("capacity", &self.inner.capacity)
            .field("shards", &self.inner.shards.len())
            .field("backend", &self.inner.backend)
            .finish()
    }
}

impl<B> Clone for RawCache<B>
where
    B: MemoryBackend,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B> RawCache<B>
where
    B: MemoryBackend,
{
    /// Create a cache. Panics if `config.shards` is zero.
    pub fn new(config: RawCacheConfig<B>) -> Self {
        assert!(config.shards > 0, "shards must be greater than zero.");

        let tracker = config.backend.tracker().cloned();

        let shards = (0..config.shards)
            .map(|index| Self::shard_capacity_for(config.capacity, config.shards, index))
            .map(|shard_capacity| RawCacheShard {
                indexer: Indexer::default(),
                lru: Lru::default(),
                usage: 0,
                capacity: shard_capacity,
                reporter: ConsumptionReporter::new(tracker.clone(), shard_capacity, config.tracker_approximation_ratio),
            })
            .map(Mutex::new)
            .collect_vec();

        tracing::info!(
            "[raw]: cache {} created, memory type: {}, capacity: {}, shards: {}",
            config.name,
            config.backend.memory_type(),
            config.capacity,
            config.shards
        );

        let inner = RawCacheInner {
            name: config.name,
            capacity: config.capacity,
            shards,
            backend: config.backend,
            tracker,
            metrics: ArcSwap::new(config.metrics),
        };

        Self { inner: Arc::new(inner) }
    }

    /// Allocate an entry that is not visible to lookups yet.
    ///
    /// Only the backend is touched. On failure the cache state is unchanged. A charge above [`Charge::MAX`] is a
    /// [`ErrorKind::Config`](blockcache_common::error::ErrorKind::Config) error.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "blockcache::memory::raw::allocate"))]
    pub fn allocate(&self, key: &[u8], value_size: usize, charge: Charge) -> Result<RawPendingEntry<B>> {
        let charge = charge.resolve(key.len(), value_size, Record::<B>::OVERHEAD)?;
        let value = self.inner.backend.allocate(value_size)?;
        let record = Record::new(key.into(), value, hash_key(key), charge);
        Ok(RawPendingEntry {
            inner: self.inner.clone(),
            record,
        })
    }

    /// Commit a pending entry and return a handle to it.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "blockcache::memory::raw::insert"))]
    pub fn insert(&self, pending: RawPendingEntry<B>) -> RawCacheEntry<B> {
        strict_assert!(Arc::ptr_eq(&self.inner, &pending.inner));
        pending.commit(None)
    }

    /// Commit a pending entry whose end of life is notified to `callback`.
    #[cfg_attr(
        feature = "tracing",
        fastrace::trace(name = "blockcache::memory::raw::insert_with_callback")
    )]
    pub fn insert_with_callback(
        &self,
        pending: RawPendingEntry<B>,
        callback: Arc<dyn EvictionCallback>,
    ) -> RawCacheEntry<B> {
        strict_assert!(Arc::ptr_eq(&self.inner, &pending.inner));
        pending.commit(Some(callback))
    }

    /// Look up `key`. A hit pins the entry and refreshes its recency.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "blockcache::memory::raw::lookup"))]
    pub fn lookup(&self, key: &[u8], hint: LookupHint) -> Option<RawCacheEntry<B>> {
        let hash = hash_key(key);
        let metrics = self.inner.metrics.load();

        let record = self.inner.shards[self.inner.shard(hash)]
            .lock()
            .with(|mut shard| shard.lookup(hash, key, hint, &metrics))?;

        Some(RawCacheEntry {
            inner: self.inner.clone(),
            record,
        })
    }

    /// Remove `key` from the cache. Returns whether it was present.
    ///
    /// The entry is destroyed right away if no handle references it, otherwise when the last handle is released.
    #[cfg_attr(feature = "tracing", fastrace::trace(name = "blockcache::memory::raw::erase"))]
    pub fn erase(&self, key: &[u8]) -> bool {
        let hash = hash_key(key);
        let metrics = self.inner.metrics.load();

        let mut garbages = vec![];
        let erased = self.inner.shards[self.inner.shard(hash)]
            .lock()
            .with(|mut shard| shard.erase(hash, key, &mut garbages, &metrics));

        RawCacheInner::finalize(garbages);

        erased
    }

    /// Cache name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Total capacity in charge units.
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Summed charge of all indexed entries.
    pub fn usage(&self) -> usize {
        self.inner.shards.iter().map(|shard| shard.lock().usage).sum()
    }

    /// Number of indexed entries.
    pub fn entries(&self) -> usize {
        self.inner.shards.iter().map(|shard| shard.lock().indexer.len()).sum()
    }

    /// Shard count.
    pub fn shards(&self) -> usize {
        self.inner.shards.len()
    }

    /// Medium of the backend.
    pub fn memory_type(&self) -> MemoryType {
        self.inner.backend.memory_type()
    }

    /// The memory backend.
    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    /// Consumption tracker fed by the shards, if the backend is tracked.
    pub fn tracker(&self) -> Option<&Arc<dyn ConsumptionTracker>> {
        self.inner.tracker.as_ref()
    }

    /// Current metrics.
    pub fn metrics(&self) -> Arc<Metrics> {
        self.inner.metrics.load_full()
    }

    /// Replace the metrics of a live cache.
    ///
    /// The usage gauge of the new metrics is set after the swap, so changes racing with the swap are not lost.
    pub fn set_metrics(&self, metrics: Arc<Metrics>) {
        self.inner.metrics.store(metrics.clone());
        metrics.cache_usage.absolute(self.usage() as _);
    }

    fn shard_capacity_for(total: usize, shards: usize, index: usize) -> usize {
        let base = total / shards;
        let remainder = total % shards;
        base + usize::from(index < remainder)
    }
}

/// An allocated entry, invisible to lookups until inserted.
///
/// The value is writable only through a pending entry. Dropping it frees the storage without firing any callback.
pub struct RawPendingEntry<B>
where
    B: MemoryBackend,
{
    inner: Arc<RawCacheInner<B>>,
    record: Record<B>,
}

impl<B> Debug for RawPendingEntry<B>
where
    B: MemoryBackend,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawPendingEntry").field("record", &self.record).finish()
    }
}

impl<B> RawPendingEntry<B>
where
    B: MemoryBackend,
{
    /// Entry key.
    pub fn key(&self) -> &[u8] {
        self.record.key()
    }

    /// Entry value.
    pub fn value(&self) -> &[u8] {
        self.record.value()
    }

    /// Entry value, writable until the entry is inserted.
    pub fn value_mut(&mut self) -> &mut [u8] {
        self.record.value_mut()
    }

    /// Resolved charge of the entry.
    pub fn charge(&self) -> usize {
        self.record.charge()
    }

    /// Hash of the key.
    pub fn hash(&self) -> u64 {
        self.record.hash()
    }

    /// Insert into the cache the entry was allocated from.
    pub(crate) fn commit(self, callback: Option<Arc<dyn EvictionCallback>>) -> RawCacheEntry<B> {
        let RawPendingEntry { inner, record } = self;
        inner.insert(record, callback)
    }
}

/// A handle to a committed entry.
///
/// The entry cannot be evicted while a handle references it. Dropping the handle releases the reference.
pub struct RawCacheEntry<B>
where
    B: MemoryBackend,
{
    inner: Arc<RawCacheInner<B>>,
    record: Arc<Record<B>>,
}

impl<B> Debug for RawCacheEntry<B>
where
    B: MemoryBackend,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawCacheEntry").field("record", &self.record).finish()
    }
}

impl<B> Drop for RawCacheEntry<B>
where
    B: MemoryBackend,
{
    fn drop(&mut self) {
        self.inner.release(&self.record);
    }
}

impl<B> Clone for RawCacheEntry<B>
where
    B: MemoryBackend,
{
    fn clone(&self) -> Self {
        // The cloned handle keeps `refs` above zero, no lock needed.
        self.record.inc_refs(1);
        Self {
            inner: self.inner.clone(),
            record: self.record.clone(),
        }
    }
}

impl<B> Deref for RawCacheEntry<B>
where
    B: MemoryBackend,
{
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.value()
    }
}

impl<B> RawCacheEntry<B>
where
    B: MemoryBackend,
{
    /// Hash of the key.
    pub fn hash(&self) -> u64 {
        self.record.hash()
    }

    /// Entry key.
    pub fn key(&self) -> &[u8] {
        self.record.key()
    }

    /// Entry value.
    pub fn value(&self) -> &[u8] {
        self.record.value()
    }

    /// Charge of the entry.
    pub fn charge(&self) -> usize {
        self.record.charge()
    }

    /// References held on the entry, the cache's own included while it is indexed.
    pub fn refs(&self) -> usize {
        self.record.refs()
    }

    /// Whether the entry has been erased, evicted or superseded since the handle was obtained.
    pub fn is_outdated(&self) -> bool {
        !self.record.is_in_indexer()
    }

    /// Release the handle. Same as dropping it.
    pub fn release(self) {}

    #[cfg(test)]
    pub(crate) fn record(&self) -> &Arc<Record<B>> {
        &self.record
    }
}
