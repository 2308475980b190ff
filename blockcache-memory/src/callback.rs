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

/// Notification fired exactly once per committed entry, when its last reference is dropped.
///
/// End of life covers explicit erase, capacity eviction, supersession by an insert of the same key, and the cache
/// shutting down. The callback runs after the owning shard's bookkeeping is consistent and without any shard lock
/// held, so it may call back into the cache.
pub trait EvictionCallback: Send + Sync + 'static {
    /// Called with the original key and value bytes of the entry.
    fn on_evict(&self, key: &[u8], value: &[u8]);
}

impl<F> EvictionCallback for F
where
    F: Fn(&[u8], &[u8]) + Send + Sync + 'static,
{
    fn on_evict(&self, key: &[u8], value: &[u8]) {
        self(key, value)
    }
}
