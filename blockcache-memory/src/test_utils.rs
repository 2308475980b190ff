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

//! Utilities for testing.

use std::{
    borrow::Cow,
    collections::HashMap,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
};

use blockcache_common::metrics::{
    BoxedCounter, BoxedCounterVec, BoxedGauge, BoxedGaugeVec, CounterOps, CounterVecOps, GaugeOps, GaugeVecOps,
    RegistryOps,
};
use itertools::Itertools;
use parking_lot::Mutex;

type Values = Arc<Mutex<HashMap<String, Arc<AtomicI64>>>>;

fn series(name: &str, labels: impl IntoIterator<Item = impl AsRef<str>>) -> String {
    format!("{name}{{{}}}", labels.into_iter().map(|l| l.as_ref().to_string()).join(","))
}

/// A metrics registry that keeps every value in memory, readable by metric name and label values.
#[derive(Debug, Clone, Default)]
pub struct CountingMetricsRegistry {
    values: Values,
}

impl CountingMetricsRegistry {
    /// Current value of the series, `0` if it was never touched.
    pub fn get(&self, name: &str, labels: &[&str]) -> i64 {
        self.values
            .lock()
            .get(&series(name, labels))
            .map(|v| v.load(Ordering::Relaxed))
            .unwrap_or_default()
    }
}

#[derive(Debug)]
struct CountingVec {
    name: Cow<'static, str>,
    values: Values,
}

impl CountingVec {
    fn value(&self, labels: &[Cow<'static, str>]) -> CountingValue {
        let value = self
            .values
            .lock()
            .entry(series(&self.name, labels))
            .or_default()
            .clone();
        CountingValue { value }
    }
}

#[derive(Debug)]
struct CountingValue {
    value: Arc<AtomicI64>,
}

impl CounterOps for CountingValue {
    fn increase(&self, val: u64) {
        self.value.fetch_add(val as i64, Ordering::Relaxed);
    }
}

impl GaugeOps for CountingValue {
    fn increase(&self, val: u64) {
        self.value.fetch_add(val as i64, Ordering::Relaxed);
    }

    fn decrease(&self, val: u64) {
        self.value.fetch_sub(val as i64, Ordering::Relaxed);
    }

    fn absolute(&self, val: u64) {
        self.value.store(val as i64, Ordering::Relaxed);
    }
}

impl CounterVecOps for CountingVec {
    fn counter(&self, labels: &[Cow<'static, str>]) -> BoxedCounter {
        Box::new(self.value(labels))
    }
}

impl GaugeVecOps for CountingVec {
    fn gauge(&self, labels: &[Cow<'static, str>]) -> BoxedGauge {
        Box::new(self.value(labels))
    }
}

impl RegistryOps for CountingMetricsRegistry {
    fn register_counter_vec(
        &self,
        name: Cow<'static, str>,
        _: Cow<'static, str>,
        _: &'static [&'static str],
    ) -> BoxedCounterVec {
        Box::new(CountingVec {
            name,
            values: self.values.clone(),
        })
    }

    fn register_gauge_vec(
        &self,
        name: Cow<'static, str>,
        _: Cow<'static, str>,
        _: &'static [&'static str],
    ) -> BoxedGaugeVec {
        Box::new(CountingVec {
            name,
            values: self.values.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use blockcache_common::metrics::model::Metrics;

    use super::*;

    #[test]
    fn test_counting_registry_shares_series() {
        let registry = CountingMetricsRegistry::default();
        let m1 = Metrics::new("a", &registry);
        let m2 = Metrics::new("a", &registry);
        let m3 = Metrics::new("b", &registry);

        m1.cache_hit.increase(1);
        m2.cache_hit.increase(2);
        m3.cache_hit.increase(5);
        m1.cache_usage.increase(10);
        m1.cache_usage.decrease(4);

        assert_eq!(registry.get("blockcache_op_total", &["a", "hit"]), 3);
        assert_eq!(registry.get("blockcache_op_total", &["b", "hit"]), 5);
        assert_eq!(registry.get("blockcache_usage", &["a"]), 6);
        assert_eq!(registry.get("blockcache_op_total", &["a", "miss"]), 0);
        assert_eq!(registry.get("unknown", &[]), 0);
    }
}
