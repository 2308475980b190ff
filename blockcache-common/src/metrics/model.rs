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

use std::borrow::Cow;

use super::{BoxedCounter, BoxedGauge, RegistryOps};

/// Metrics of one block cache instance.
///
/// Every metric carries the cache name as its `name` label, so several caches can share one registry.
#[derive(Debug)]
pub struct Metrics {
    /// Entries committed by `insert`.
    pub cache_insert: BoxedCounter,
    /// Inserts that superseded a live entry with the same key.
    pub cache_replace: BoxedCounter,
    /// Lookups that found the key.
    pub cache_hit: BoxedCounter,
    /// Lookups that missed the key.
    pub cache_miss: BoxedCounter,
    /// Hits of lookups issued with the expect-in-cache hint.
    pub cache_hit_expected: BoxedCounter,
    /// Misses of lookups issued with the expect-in-cache hint.
    pub cache_miss_expected: BoxedCounter,
    /// Entries removed by `erase`.
    pub cache_remove: BoxedCounter,
    /// Entries evicted under capacity pressure.
    pub cache_evict: BoxedCounter,
    /// Handles released.
    pub cache_release: BoxedCounter,

    /// Summed charge of all indexed entries.
    pub cache_usage: BoxedGauge,
}

impl Metrics {
    /// Create metrics for the cache called `name` on the given registry.
    pub fn new(name: impl Into<Cow<'static, str>>, registry: &dyn RegistryOps) -> Self {
        let name: Cow<'static, str> = name.into();

        let blockcache_op_total = registry.register_counter_vec(
            "blockcache_op_total".into(),
            "block cache operations".into(),
            &["name", "op"],
        );
        let blockcache_usage =
            registry.register_gauge_vec("blockcache_usage".into(), "block cache usage".into(), &["name"]);

        let counter = |op: &'static str| blockcache_op_total.counter(&[name.clone(), op.into()]);

        Self {
            cache_insert: counter("insert"),
            cache_replace: counter("replace"),
            cache_hit: counter("hit"),
            cache_miss: counter("miss"),
            cache_hit_expected: counter("hit_expected"),
            cache_miss_expected: counter("miss_expected"),
            cache_remove: counter("remove"),
            cache_evict: counter("evict"),
            cache_release: counter("release"),
            cache_usage: blockcache_usage.gauge(&[name.clone()]),
        }
    }

    /// Build noop metrics.
    #[doc(hidden)]
    pub fn noop() -> Self {
        use super::registry::noop::NoopMetricsRegistry;

        Self::new("noop", &NoopMetricsRegistry)
    }
}
