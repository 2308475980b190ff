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

use std::sync::Arc;

use blockcache_common::strict_assert;
use intrusive_collections::{intrusive_adapter, LinkedList, LinkedListAtomicLink};

use crate::{backend::MemoryBackend, record::Record};

intrusive_adapter! { pub Adapter<B> = Arc<Record<B>>: Record<B> { link => LinkedListAtomicLink } where B: MemoryBackend }

/// Recency lists of one shard.
///
/// Every indexed record sits in exactly one list: `pinned` while a handle is outstanding, otherwise `evictable`, or
/// `weightless` if its charge is zero. All lists are ordered from least to most recently used. Only `evictable` is
/// ever popped for eviction, since dropping a zero-charge record frees no capacity.
pub struct Lru<B>
where
    B: MemoryBackend,
{
    evictable: LinkedList<Adapter<B>>,
    weightless: LinkedList<Adapter<B>>,
    pinned: LinkedList<Adapter<B>>,
}

impl<B> Default for Lru<B>
where
    B: MemoryBackend,
{
    fn default() -> Self {
        Self {
            evictable: LinkedList::new(Adapter::new()),
            weightless: LinkedList::new(Adapter::new()),
            pinned: LinkedList::new(Adapter::new()),
        }
    }
}

impl<B> Lru<B>
where
    B: MemoryBackend,
{
    /// The list holding `record` while it is not pinned.
    fn unpinned_list(&mut self, record: &Record<B>) -> &mut LinkedList<Adapter<B>> {
        if record.charge() == 0 {
            &mut self.weightless
        } else {
            &mut self.evictable
        }
    }

    /// Link a newly inserted record at the most recent end of the pinned list.
    pub fn push_pinned(&mut self, record: Arc<Record<B>>) {
        strict_assert!(!record.link.is_linked());
        record.set_in_pinned(true);
        self.pinned.push_back(record);
    }

    /// Move an evictable record to the most recent end of the pinned list.
    pub fn pin(&mut self, record: &Arc<Record<B>>) {
        strict_assert!(record.is_in_evictable());

        // SAFETY: the `IN_EVICTABLE` flag and the charge tell which unpinned list the record is linked in.
        let r = unsafe { self.unpinned_list(record).cursor_mut_from_ptr(Arc::as_ptr(record)).remove() };
        strict_assert!(r.is_some());
        record.set_in_evictable(false);

        if let Some(r) = r {
            r.set_in_pinned(true);
            self.pinned.push_back(r);
        }
    }

    /// Move a pinned record to the most recent end of its unpinned list.
    pub fn unpin(&mut self, record: &Arc<Record<B>>) {
        strict_assert!(record.is_in_pinned());

        // SAFETY: the `IN_PINNED` flag guarantees the record is linked in `pinned`.
        let r = unsafe { self.pinned.cursor_mut_from_ptr(Arc::as_ptr(record)).remove() };
        strict_assert!(r.is_some());
        record.set_in_pinned(false);

        if let Some(r) = r {
            r.set_in_evictable(true);
            self.unpinned_list(record).push_back(r);
        }
    }

    /// Unlink a record from whichever list holds it.
    pub fn remove(&mut self, record: &Arc<Record<B>>) {
        let list = match (record.is_in_evictable(), record.is_in_pinned()) {
            (true, false) => self.unpinned_list(record),
            (false, true) => &mut self.pinned,
            (false, false) => return,
            (true, true) => unreachable!("record linked in both recency lists"),
        };

        // SAFETY: the flags tell which list the record is linked in.
        let r = unsafe { list.cursor_mut_from_ptr(Arc::as_ptr(record)).remove() };
        strict_assert!(r.is_some());

        record.set_in_evictable(false);
        record.set_in_pinned(false);
    }

    /// Unlink and return the least recently used evictable record.
    pub fn pop_evictable(&mut self) -> Option<Arc<Record<B>>> {
        let record = self.evictable.pop_front()?;
        strict_assert!(!record.link.is_linked());
        record.set_in_evictable(false);
        Some(record)
    }

    /// Unlink every record, unpinned ones first.
    pub fn clear(&mut self) -> Vec<Arc<Record<B>>> {
        let mut records = vec![];
        while let Some(record) = self.pop_evictable() {
            records.push(record);
        }
        while let Some(record) = self.weightless.pop_front() {
            record.set_in_evictable(false);
            records.push(record);
        }
        while let Some(record) = self.pinned.pop_front() {
            record.set_in_pinned(false);
            records.push(record);
        }
        records
    }

    /// Number of unpinned records.
    #[cfg(test)]
    pub fn evictable_len(&self) -> usize {
        self.evictable.iter().count() + self.weightless.iter().count()
    }

    /// Whether no unpinned record is linked.
    pub fn is_evictable_empty(&self) -> bool {
        self.evictable.is_empty() && self.weightless.is_empty()
    }

    /// Number of pinned records.
    #[cfg(test)]
    pub fn pinned_len(&self) -> usize {
        self.pinned.iter().count()
    }

    #[cfg(test)]
    fn dump(&self) -> (Vec<Vec<u8>>, Vec<Vec<u8>>) {
        let evictable = self.evictable.iter().map(|r| r.key().to_vec()).collect();
        let pinned = self.pinned.iter().map(|r| r.key().to_vec()).collect();
        (evictable, pinned)
    }
}
