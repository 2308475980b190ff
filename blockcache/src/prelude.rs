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

#[cfg(feature = "prometheus")]
pub use crate::common::metrics::registry::prometheus::PrometheusMetricsRegistry;
pub use crate::common::{
    error::{Error, ErrorKind, Result},
    metrics::{model::Metrics, registry::noop::NoopMetricsRegistry, RegistryOps},
    tracker::{ConsumptionTracker, MemoryTracker},
};
#[cfg(feature = "test_utils")]
pub use crate::memory::CountingMetricsRegistry;
pub use crate::memory::{
    default_shards, Cache, CacheBuilder, CacheConfig, CacheEntry, Charge, EvictionCallback, LookupHint, MemoryType,
    PendingEntry, DEFAULT_CAPACITY, DEFAULT_NAME,
};
