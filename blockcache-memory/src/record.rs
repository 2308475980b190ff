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

use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

use bitflags::bitflags;
use intrusive_collections::LinkedListAtomicLink;

use crate::{backend::MemoryBackend, callback::EvictionCallback};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct Flags: u64 {
        const IN_INDEXER = 0b00000001;
        const IN_EVICTABLE = 0b00000010;
        const IN_PINNED = 0b00000100;
    }
}

/// Where an entry is in its life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Allocated but not inserted yet.
    Pending,
    /// Indexed and referenced by at least one handle.
    Pinned,
    /// Indexed and referenced by the cache only.
    Evictable,
    /// No longer indexed, kept alive by outstanding handles.
    Zombie,
}

/// The unit of cached data.
///
/// `refs` counts the cache's own reference while the record is indexed plus one per outstanding handle. Every
/// change of `refs` except handle cloning happens under the lock of the owning shard; cloning needs no lock since
/// the cloned handle already keeps `refs` above zero.
pub struct Record<B>
where
    B: MemoryBackend,
{
    key: Box<[u8]>,
    value: B::Buffer,
    hash: u64,
    charge: usize,
    callback: Option<Arc<dyn EvictionCallback>>,

    refs: AtomicUsize,
    flags: AtomicU64,

    pub(crate) link: LinkedListAtomicLink,
}

impl<B> Debug for Record<B>
where
    B: MemoryBackend,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("hash", &self.hash)
            .field("charge", &self.charge)
            .field("refs", &self.refs())
            .field("state", &self.state())
            .finish()
    }
}

impl<B> Record<B>
where
    B: MemoryBackend,
{
    /// Fixed per-entry overhead accounted by automatic charges.
    pub const OVERHEAD: usize = std::mem::size_of::<Self>();

    /// Create a pending record.
    pub fn new(key: Box<[u8]>, value: B::Buffer, hash: u64, charge: usize) -> Self {
        Self {
            key,
            value,
            hash,
            charge,
            callback: None,
            refs: AtomicUsize::new(0),
            flags: AtomicU64::new(0),
            link: LinkedListAtomicLink::new(),
        }
    }

    /// Get the record key.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Get the record value.
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// Get the mutable record value. Only reachable while the record is exclusively owned, before insertion.
    pub fn value_mut(&mut self) -> &mut [u8] {
        &mut self.value
    }

    /// Get the record hash.
    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Get the record charge.
    pub fn charge(&self) -> usize {
        self.charge
    }

    /// Get the eviction callback of the record.
    pub fn callback(&self) -> Option<&Arc<dyn EvictionCallback>> {
        self.callback.as_ref()
    }

    /// Set the eviction callback of the record.
    pub fn set_callback(&mut self, callback: Option<Arc<dyn EvictionCallback>>) {
        self.callback = callback;
    }

    /// Set in indexer flag.
    pub fn set_in_indexer(&self, val: bool) {
        self.set_flags(Flags::IN_INDEXER, val, Ordering::Release);
    }

    /// Get in indexer flag.
    pub fn is_in_indexer(&self) -> bool {
        self.get_flags(Flags::IN_INDEXER, Ordering::Acquire)
    }

    /// Set in evictable list flag.
    pub fn set_in_evictable(&self, val: bool) {
        self.set_flags(Flags::IN_EVICTABLE, val, Ordering::Release);
    }

    /// Get in evictable list flag.
    pub fn is_in_evictable(&self) -> bool {
        self.get_flags(Flags::IN_EVICTABLE, Ordering::Acquire)
    }

    /// Set in pinned list flag.
    pub fn set_in_pinned(&self, val: bool) {
        self.set_flags(Flags::IN_PINNED, val, Ordering::Release);
    }

    /// Get in pinned list flag.
    pub fn is_in_pinned(&self) -> bool {
        self.get_flags(Flags::IN_PINNED, Ordering::Acquire)
    }

    /// Set the record atomic flags.
    pub fn set_flags(&self, flags: Flags, val: bool, order: Ordering) {
        match val {
            true => self.flags.fetch_or(flags.bits(), order),
            false => self.flags.fetch_and(!flags.bits(), order),
        };
    }

    /// Get the record atomic flags.
    pub fn get_flags(&self, flags: Flags, order: Ordering) -> bool {
        self.flags.load(order) & flags.bits() == flags.bits()
    }

    /// Life cycle state derived from the flags.
    pub fn state(&self) -> EntryState {
        if !self.is_in_indexer() {
            match self.refs() {
                0 => EntryState::Pending,
                _ => EntryState::Zombie,
            }
        } else if self.is_in_evictable() {
            EntryState::Evictable
        } else {
            EntryState::Pinned
        }
    }

    /// Get the atomic reference count.
    pub fn refs(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    /// Increase the atomic reference count.
    ///
    /// This function returns the new reference count after the op.
    pub fn inc_refs(&self, val: usize) -> usize {
        let old = self.refs.fetch_add(val, Ordering::SeqCst);
        tracing::trace!(
            "[record]: inc record (hash: {}) refs: {} => {}",
            self.hash,
            old,
            old + val
        );
        old + val
    }

    /// Decrease the atomic reference count.
    ///
    /// This function returns the new reference count after the op.
    pub fn dec_refs(&self, val: usize) -> usize {
        let old = self.refs.fetch_sub(val, Ordering::SeqCst);
        tracing::trace!(
            "[record]: dec record (hash: {}) refs: {} => {}",
            self.hash,
            old,
            old - val
        );
        old - val
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use blockcache_common::tracker::MemoryTracker;

    use super::*;
    use crate::backend::dram::DramBackend;

    fn is_send_sync_static<T: Send + Sync + 'static>() {}

    #[test]
    fn test_send_sync_static() {
        is_send_sync_static::<Record<DramBackend>>();
    }

    #[test]
    fn test_record_state() {
        let backend = DramBackend::new(Arc::new(MemoryTracker::new("test")));
        let mut record = Record::<DramBackend>::new(
            b"k".to_vec().into_boxed_slice(),
            backend.allocate(1).unwrap(),
            42,
            1,
        );
        record.value_mut()[0] = 7;
        assert_eq!(record.value(), &[7]);
        assert_eq!(record.state(), EntryState::Pending);

        record.inc_refs(2);
        record.set_in_indexer(true);
        record.set_in_pinned(true);
        assert_eq!(record.state(), EntryState::Pinned);

        record.dec_refs(1);
        record.set_in_pinned(false);
        record.set_in_evictable(true);
        assert_eq!(record.state(), EntryState::Evictable);

        record.set_in_evictable(false);
        record.set_in_indexer(false);
        assert_eq!(record.state(), EntryState::Zombie);
        assert_eq!(record.dec_refs(1), 0);
    }
}
