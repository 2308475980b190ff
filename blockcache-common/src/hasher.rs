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

use twox_hash::XxHash64;

/// Seed of the key hash. Changing it remaps every key to a different shard.
pub const KEY_HASH_SEED: u64 = 0;

/// Stable 64-bit hash of a cache key.
///
/// The hash is deterministic across processes and runs, so the key to shard mapping is fixed for the lifetime of
/// a cache and reproducible in tests.
pub fn hash_key(key: &[u8]) -> u64 {
    XxHash64::oneshot(KEY_HASH_SEED, key)
}
