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

//! A sharded LRU block cache of byte-string keys and values.
//!
//! Entries are allocated from a memory backend (heap or a persistent memory pool), filled in place and then
//! inserted. Every lookup hands out a reference-counted handle that pins the entry: pinned entries are never
//! evicted, and an entry superseded or erased while pinned stays readable until its last handle is released.
//!
//! ```
//! use blockcache_memory::{CacheBuilder, LookupHint};
//!
//! let cache = CacheBuilder::new(1024).build().unwrap();
//!
//! let mut pending = cache.allocate(b"block-1", 5, 5usize).unwrap();
//! pending.value_mut().copy_from_slice(b"hello");
//! let entry = cache.insert(pending);
//! assert_eq!(&*entry, b"hello");
//!
//! let hit = cache.lookup(b"block-1", LookupHint::Normal).unwrap();
//! assert_eq!(hit.value(), b"hello");
//! ```

pub mod backend;
mod cache;
mod callback;
mod consumption;
mod indexer;
mod lru;
mod raw;
mod record;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

/// Commonly used types.
pub mod prelude;
pub use prelude::*;
