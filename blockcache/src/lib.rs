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

#![cfg_attr(docsrs, feature(doc_cfg))]

//! blockcache - a sharded, handle-based LRU block cache.
//!
//! See [`CacheBuilder`] to build a cache over heap memory or a persistent memory pool.

use blockcache_common as common;
use blockcache_memory as memory;

/// Commonly used types.
pub mod prelude;
pub use prelude::*;
