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
    collections::BTreeMap,
    fmt::Debug,
    ops::{Deref, DerefMut},
    path::{Path, PathBuf},
    ptr::NonNull,
    sync::Arc,
};

use blockcache_common::{
    error::{Error, Result},
    scope::Scope,
    strict_assert, strict_assert_eq,
    tracker::ConsumptionTracker,
};
use memmap2::MmapMut;
use parking_lot::Mutex;

use super::{MemoryBackend, MemoryType};

/// Alignment of every allocation inside the pool.
pub const PMEM_ALIGN: usize = 8;

/// First-fit allocator over the offset range of the pool.
#[derive(Debug)]
struct FreeList {
    /// offset => len, never overlapping, never adjacent.
    free: BTreeMap<usize, usize>,
    allocated: usize,
}

impl FreeList {
    fn new(capacity: usize) -> Self {
        let mut free = BTreeMap::new();
        if capacity > 0 {
            free.insert(0, capacity);
        }
        Self { free, allocated: 0 }
    }

    fn allocate(&mut self, len: usize) -> Option<usize> {
        let (offset, hole) = self.free.iter().find(|(_, hole)| **hole >= len).map(|(o, h)| (*o, *h))?;
        self.free.remove(&offset);
        if hole > len {
            self.free.insert(offset + len, hole - len);
        }
        self.allocated += len;
        Some(offset)
    }

    fn free(&mut self, mut offset: usize, mut len: usize) {
        strict_assert!(self.allocated >= len);
        self.allocated -= len;

        // Merge with the preceding hole.
        if let Some((&prev, &prev_len)) = self.free.range(..offset).next_back() {
            strict_assert!(prev + prev_len <= offset);
            if prev + prev_len == offset {
                self.free.remove(&prev);
                offset = prev;
                len += prev_len;
            }
        }
        // Merge with the following hole.
        if let Some(next_len) = self.free.remove(&(offset + len)) {
            len += next_len;
        }

        self.free.insert(offset, len);
    }
}

struct PmemPool {
    path: PathBuf,
    capacity: usize,
    base: NonNull<u8>,
    freelist: Mutex<FreeList>,
    // Keeps the mapping, and therefore `base`, alive.
    _mmap: MmapMut,
}

impl Debug for PmemPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PmemPool")
            .field("path", &self.path)
            .field("capacity", &self.capacity)
            .field("allocated", &self.freelist.lock().allocated)
            .finish()
    }
}

// SAFETY: `base` points into the mapping owned by the pool. Disjoint ranges of it are handed out to at most one
// `PmemBuffer` each, and the free list is guarded by its own lock.
unsafe impl Send for PmemPool {}
unsafe impl Sync for PmemPool {}

impl PmemPool {
    fn open(dir: &Path, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::config("persistent memory pool size must be greater than zero"));
        }
        if !dir.is_dir() {
            return Err(Error::config("persistent memory path is not a directory").with_context("path", dir.display()));
        }

        // The pool file is unlinked right away. Nothing in it survives the process.
        let file = tempfile::tempfile_in(dir).map_err(|e| {
            Error::config("create persistent memory pool failed")
                .with_context("path", dir.display())
                .with_source(e)
        })?;
        file.set_len(capacity as u64)?;

        // SAFETY: the file is anonymous and private to this process, nobody else can resize or modify it.
        let mut mmap = unsafe { MmapMut::map_mut(&file) }?;
        let base = NonNull::new(mmap.as_mut_ptr())
            .ok_or_else(|| Error::config("map persistent memory pool failed").with_context("path", dir.display()))?;

        tracing::info!("[pmem]: persistent memory pool of {capacity} bytes mapped under {}", dir.display());

        Ok(Self {
            path: dir.to_path_buf(),
            capacity,
            base,
            freelist: Mutex::new(FreeList::new(capacity)),
            _mmap: mmap,
        })
    }
}

/// A value buffer carved out of the persistent memory pool.
///
/// Dropping the buffer returns its range to the pool.
pub struct PmemBuffer {
    pool: Arc<PmemPool>,
    offset: usize,
    len: usize,
    reserved: usize,
}

impl Debug for PmemBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PmemBuffer")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}

impl Deref for PmemBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        // SAFETY: `offset + len` is within the mapping and the range is owned by this buffer only.
        unsafe { std::slice::from_raw_parts(self.pool.base.as_ptr().add(self.offset), self.len) }
    }
}

impl DerefMut for PmemBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: see `deref`; `&mut self` guarantees exclusive access.
        unsafe { std::slice::from_raw_parts_mut(self.pool.base.as_ptr().add(self.offset), self.len) }
    }
}

impl Drop for PmemBuffer {
    fn drop(&mut self) {
        if self.reserved > 0 {
            self.pool.freelist.lock().free(self.offset, self.reserved);
        }
    }
}

/// Values allocated from a pre-mapped persistent memory pool.
///
/// The pool is shared by every shard of the cache and is not reported to any consumption tracker, it is bounded
/// by its own size.
#[derive(Debug, Clone)]
pub struct PmemBackend {
    pool: Arc<PmemPool>,
}

impl PmemBackend {
    /// Map a pool of `pool_size` bytes inside the directory `dir`.
    ///
    /// Fails with a config error if `dir` is not an existing directory or the pool cannot be created there.
    pub fn open(dir: impl AsRef<Path>, pool_size: usize) -> Result<Self> {
        let pool = PmemPool::open(dir.as_ref(), pool_size)?;
        Ok(Self { pool: Arc::new(pool) })
    }

    /// Size of the pool in bytes.
    pub fn capacity(&self) -> usize {
        self.pool.capacity
    }

    /// Bytes currently handed out, alignment padding included.
    pub fn allocated(&self) -> usize {
        self.pool.freelist.lock().allocated
    }

    /// Directory holding the pool.
    pub fn path(&self) -> &Path {
        &self.pool.path
    }
}

impl MemoryBackend for PmemBackend {
    type Buffer = PmemBuffer;

    fn allocate(&self, size: usize) -> Result<Self::Buffer> {
        if size == 0 {
            return Ok(PmemBuffer {
                pool: self.pool.clone(),
                offset: 0,
                len: 0,
                reserved: 0,
            });
        }

        let reserved = size
            .checked_next_multiple_of(PMEM_ALIGN)
            .ok_or_else(|| Error::no_space(self.pool.capacity, self.allocated(), size))?;
        let offset = self.pool.freelist.lock().with(|mut freelist| {
            freelist
                .allocate(reserved)
                .ok_or_else(|| Error::no_space(self.pool.capacity, freelist.allocated, reserved))
        });
        let offset = offset.inspect_err(|e| tracing::warn!("[pmem]: allocate {size} bytes failed: {e}"))?;
        strict_assert_eq!(offset % PMEM_ALIGN, 0);

        let mut buffer = PmemBuffer {
            pool: self.pool.clone(),
            offset,
            len: size,
            reserved,
        };
        // The range may have been used by an earlier value.
        buffer.fill(0);
        Ok(buffer)
    }

    fn memory_type(&self) -> MemoryType {
        MemoryType::Pmem
    }

    fn tracker(&self) -> Option<&Arc<dyn ConsumptionTracker>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use blockcache_common::error::ErrorKind;
    use itertools::Itertools;

    use super::*;

    #[test]
    fn test_freelist_coalesce() {
        let mut fl = FreeList::new(64);
        let a = fl.allocate(16).unwrap();
        let b = fl.allocate(16).unwrap();
        let c = fl.allocate(16).unwrap();
        assert_eq!((a, b, c), (0, 16, 32));
        assert_eq!(fl.allocated, 48);

        fl.free(b, 16);
        // The hole of 16 bytes is too small for 32.
        assert_eq!(fl.allocate(32), None);
        fl.free(a, 16);
        assert_eq!(fl.free.iter().map(|(o, l)| (*o, *l)).collect_vec(), vec![(0, 32), (48, 16)]);
        fl.free(c, 16);
        assert_eq!(fl.free.iter().map(|(o, l)| (*o, *l)).collect_vec(), vec![(0, 64)]);
        assert_eq!(fl.allocated, 0);
    }

    #[test_log::test]
    fn test_pmem_allocate_and_exhaust() {
        let dir = tempfile::tempdir().unwrap();
        let backend = PmemBackend::open(dir.path(), 64).unwrap();
        assert_eq!(backend.memory_type(), MemoryType::Pmem);
        assert!(backend.tracker().is_none());

        let mut a = backend.allocate(30).unwrap();
        assert_eq!(a.len(), 30);
        assert!(a.iter().all(|b| *b == 0));
        a.copy_from_slice(&[1; 30]);
        assert_eq!(backend.allocated(), 32);

        let b = backend.allocate(32).unwrap();
        assert_eq!(backend.allocated(), 64);
        assert_eq!(&a[..], &[1; 30]);

        let err = backend.allocate(1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoSpace);

        // Zero-sized values take no room even when the pool is full.
        assert!(backend.allocate(0).unwrap().is_empty());

        drop(a);
        let c = backend.allocate(8).unwrap();
        assert!(c.iter().all(|b| *b == 0));
        drop(b);
        drop(c);
        assert_eq!(backend.allocated(), 0);
    }

    #[test]
    fn test_pmem_invalid_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let err = PmemBackend::open(&missing, 4096).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);

        let err = PmemBackend::open(dir.path(), 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn test_pmem_concurrent_allocate() {
        let dir = tempfile::tempdir().unwrap();
        let backend = PmemBackend::open(dir.path(), 8 * 1024).unwrap();

        let handles = (0..4u8)
            .map(|i| {
                let backend = backend.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let mut buf = backend.allocate(24).unwrap();
                        buf.fill(i);
                        assert!(buf.iter().all(|b| *b == i));
                    }
                })
            })
            .collect_vec();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(backend.allocated(), 0);
    }
}
