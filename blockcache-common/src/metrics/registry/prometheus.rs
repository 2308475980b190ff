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
    borrow::Cow,
    collections::HashMap,
    hash::{Hash, Hasher},
    sync::{Arc, LazyLock},
};

use itertools::Itertools;
use parking_lot::Mutex;
use prometheus::{
    register_int_counter_vec_with_registry, register_int_gauge_vec_with_registry, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec, Registry,
};

use crate::{
    metrics::{
        BoxedCounter, BoxedCounterVec, BoxedGauge, BoxedGaugeVec, Boxer, CounterOps, CounterVecOps, GaugeOps,
        GaugeVecOps, RegistryOps,
    },
    scope::Scope,
};

// Prometheus refuses to register the same metric twice on one registry, while several caches may share a registry.
// Registered vectors are memorized per registry and handed out again.
static METRICS: LazyLock<Mutex<HashMap<PrometheusMetricsRegistry, HashMap<Metadata, MetricVec>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

fn get_or_register(registry: &PrometheusMetricsRegistry, metadata: Metadata) -> MetricVec {
    METRICS.lock().with(|mut metrics| {
        metrics
            .entry(registry.clone())
            .or_default()
            .entry(metadata.clone())
            .or_insert_with(|| match metadata.kind {
                MetricKind::Counter => MetricVec::Counter(
                    register_int_counter_vec_with_registry! {
                        metadata.name, metadata.desc, metadata.label_names, registry.registry
                    }
                    .expect("counter vec must be registrable"),
                ),
                MetricKind::Gauge => MetricVec::Gauge(
                    register_int_gauge_vec_with_registry! {
                        metadata.name, metadata.desc, metadata.label_names, registry.registry
                    }
                    .expect("gauge vec must be registrable"),
                ),
            })
            .clone()
    })
}

#[derive(Debug, Clone)]
enum MetricVec {
    Counter(IntCounterVec),
    Gauge(IntGaugeVec),
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
enum MetricKind {
    Counter,
    Gauge,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct Metadata {
    kind: MetricKind,
    name: Cow<'static, str>,
    desc: Cow<'static, str>,
    label_names: &'static [&'static str],
}

impl CounterOps for IntCounter {
    fn increase(&self, val: u64) {
        self.inc_by(val);
    }
}

impl CounterVecOps for IntCounterVec {
    fn counter(&self, labels: &[Cow<'static, str>]) -> BoxedCounter {
        let labels = labels.iter().map(Cow::as_ref).collect_vec();
        self.with_label_values(&labels).boxed()
    }
}

impl GaugeOps for IntGauge {
    fn increase(&self, val: u64) {
        self.add(val as _);
    }

    fn decrease(&self, val: u64) {
        self.sub(val as _);
    }

    fn absolute(&self, val: u64) {
        self.set(val as _);
    }
}

impl GaugeVecOps for IntGaugeVec {
    fn gauge(&self, labels: &[Cow<'static, str>]) -> BoxedGauge {
        let labels = labels.iter().map(Cow::as_ref).collect_vec();
        self.with_label_values(&labels).boxed()
    }
}

/// Prometheus metrics registry.
#[derive(Debug, Clone)]
pub struct PrometheusMetricsRegistry {
    registry: Arc<Registry>,
}

impl PartialEq for PrometheusMetricsRegistry {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.registry, &other.registry)
    }
}

impl Eq for PrometheusMetricsRegistry {}

impl Hash for PrometheusMetricsRegistry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.registry).hash(state);
    }
}

impl PrometheusMetricsRegistry {
    /// Create a Prometheus metrics registry.
    ///
    /// Clone the returned registry to share it between caches. Wrapping the same [`Registry`] twice registers the
    /// metrics twice and panics.
    pub fn new(registry: Registry) -> Self {
        Self {
            registry: Arc::new(registry),
        }
    }

    /// Get the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl RegistryOps for PrometheusMetricsRegistry {
    fn register_counter_vec(
        &self,
        name: Cow<'static, str>,
        desc: Cow<'static, str>,
        label_names: &'static [&'static str],
    ) -> BoxedCounterVec {
        let metadata = Metadata {
            kind: MetricKind::Counter,
            name,
            desc,
            label_names,
        };
        match get_or_register(self, metadata) {
            MetricVec::Counter(v) => v.boxed(),
            MetricVec::Gauge(_) => unreachable!(),
        }
    }

    fn register_gauge_vec(
        &self,
        name: Cow<'static, str>,
        desc: Cow<'static, str>,
        label_names: &'static [&'static str],
    ) -> BoxedGaugeVec {
        let metadata = Metadata {
            kind: MetricKind::Gauge,
            name,
            desc,
            label_names,
        };
        match get_or_register(self, metadata) {
            MetricVec::Gauge(v) => v.boxed(),
            MetricVec::Counter(_) => unreachable!(),
        }
    }
}
