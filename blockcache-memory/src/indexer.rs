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
use hashbrown::hash_table::{Entry as HashTableEntry, HashTable};

use crate::{backend::MemoryBackend, record::Record};

/// Hash index of one shard.
///
/// Keeps the `IN_INDEXER` flag of every record in sync with its membership.
pub struct Indexer<B>
where
    B: MemoryBackend,
{
    table: HashTable<Arc<Record<B>>>,
}

impl<B> Default for Indexer<B>
where
    B: MemoryBackend,
{
    fn default() -> Self {
        Self {
            table: HashTable::new(),
        }
    }
}

impl<B> Indexer<B>
where
    B: MemoryBackend,
{
    /// Index `record`, returning the record it supersedes, if any.
    pub fn insert(&mut self, mut record: Arc<Record<B>>) -> Option<Arc<Record<B>>> {
        strict_assert!(!record.is_in_indexer());
        record.set_in_indexer(true);

        match self
            .table
            .entry(record.hash(), |r| r.key() == record.key(), |r| r.hash())
        {
            HashTableEntry::Occupied(mut o) => {
                std::mem::swap(o.get_mut(), &mut record);
                strict_assert!(record.is_in_indexer());
                record.set_in_indexer(false);
                Some(record)
            }
            HashTableEntry::Vacant(v) => {
                v.insert(record);
                None
            }
        }
    }

    /// Get the record indexed under `key`.
    pub fn get(&self, hash: u64, key: &[u8]) -> Option<&Arc<Record<B>>> {
        self.table.find(hash, |r| r.key() == key).inspect(|r| {
            strict_assert!(r.is_in_indexer());
        })
    }

    /// Remove the record indexed under `key`.
    pub fn remove(&mut self, hash: u64, key: &[u8]) -> Option<Arc<Record<B>>> {
        match self.table.find_entry(hash, |r| r.key() == key) {
            Ok(o) => {
                let (r, _) = o.remove();
                strict_assert!(r.is_in_indexer());
                r.set_in_indexer(false);
                Some(r)
            }
            Err(_) => None,
        }
    }

    /// Remove exactly `record`, which must be indexed.
    pub fn remove_record(&mut self, record: &Arc<Record<B>>) -> Option<Arc<Record<B>>> {
        match self.table.find_entry(record.hash(), |r| Arc::ptr_eq(r, record)) {
            Ok(o) => {
                let (r, _) = o.remove();
                r.set_in_indexer(false);
                Some(r)
            }
            Err(_) => None,
        }
    }

    /// Remove all records.
    pub fn drain(&mut self) -> impl Iterator<Item = Arc<Record<B>>> + '_ {
        self.table.drain().inspect(|r| {
            strict_assert!(r.is_in_indexer());
            r.set_in_indexer(false);
        })
    }

    /// Number of indexed records.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use blockcache_common::{hasher::hash_key, tracker::MemoryTracker};

    use super::*;
    use crate::backend::dram::DramBackend;

    fn record(backend: &DramBackend, key: &[u8], value: u8) -> Arc<Record<DramBackend>> {
        let mut buf = backend.allocate(1).unwrap();
        buf[0] = value;
        Arc::new(Record::new(key.to_vec().into_boxed_slice(), buf, hash_key(key), 1))
    }

    #[test]
    fn test_indexer_supersede() {
        let backend = DramBackend::new(Arc::new(MemoryTracker::new("test")));
        let mut indexer = Indexer::default();

        let a1 = record(&backend, b"a", 1);
        let a2 = record(&backend, b"a", 2);
        let b = record(&backend, b"b", 3);

        assert!(indexer.insert(a1.clone()).is_none());
        assert!(indexer.insert(b.clone()).is_none());
        let old = indexer.insert(a2.clone()).unwrap();
        assert!(Arc::ptr_eq(&old, &a1));
        assert!(!a1.is_in_indexer());
        assert!(a2.is_in_indexer());
        assert_eq!(indexer.len(), 2);

        assert_eq!(indexer.get(hash_key(b"a"), b"a").unwrap().value(), &[2]);
        assert!(indexer.get(hash_key(b"c"), b"c").is_none());

        // The superseded record is no longer reachable by pointer either.
        assert!(indexer.remove_record(&a1).is_none());
        assert!(indexer.remove_record(&a2).is_some());
        assert!(!a2.is_in_indexer());

        assert!(Arc::ptr_eq(&indexer.remove(hash_key(b"b"), b"b").unwrap(), &b));
        assert!(indexer.remove(hash_key(b"b"), b"b").is_none());
        assert!(indexer.is_empty());
    }

    #[test]
    fn test_indexer_drain() {
        let backend = DramBackend::new(Arc::new(MemoryTracker::new("test")));
        let mut indexer = Indexer::default();
        let rs = (0..16u8).map(|i| record(&backend, &[i], i)).collect::<Vec<_>>();
        for r in rs.iter() {
            indexer.insert(r.clone());
        }
        assert_eq!(indexer.drain().count(), 16);
        assert!(rs.iter().all(|r| !r.is_in_indexer()));
    }
}
