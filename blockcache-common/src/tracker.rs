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
    fmt::Debug,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
};

/// External accounting sink for the net charge held by a cache.
///
/// The cache only reports deltas. How they are aggregated, and whether they propagate further, is up to the
/// implementation.
pub trait ConsumptionTracker: Send + Sync + 'static + Debug {
    /// Identifier of the tracker.
    fn id(&self) -> &str;

    /// Record a consumption change. Negative values release previously consumed charge.
    fn consume(&self, delta: i64);

    /// Current consumption.
    fn consumption(&self) -> i64;

    /// Maximum consumption ever observed.
    fn peak_consumption(&self) -> i64;
}

/// Exact atomic tracker, optionally forwarding every change to a parent tracker.
#[derive(Debug)]
pub struct MemoryTracker {
    id: String,
    consumption: AtomicI64,
    peak: AtomicI64,
    parent: Option<Arc<dyn ConsumptionTracker>>,
}

impl MemoryTracker {
    /// Create a root tracker.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            consumption: AtomicI64::new(0),
            peak: AtomicI64::new(0),
            parent: None,
        }
    }

    /// Create a tracker whose changes are also applied to `parent`.
    pub fn with_parent(id: impl Into<String>, parent: Arc<dyn ConsumptionTracker>) -> Self {
        Self {
            parent: Some(parent),
            ..Self::new(id)
        }
    }

    /// Get the parent tracker, if any.
    pub fn parent(&self) -> Option<&Arc<dyn ConsumptionTracker>> {
        self.parent.as_ref()
    }
}

impl ConsumptionTracker for MemoryTracker {
    fn id(&self) -> &str {
        &self.id
    }

    fn consume(&self, delta: i64) {
        let now = self.consumption.fetch_add(delta, Ordering::AcqRel) + delta;
        self.peak.fetch_max(now, Ordering::AcqRel);
        tracing::trace!("[tracker]: {} consume {delta}, now {now}", self.id);
        if let Some(parent) = self.parent.as_ref() {
            parent.consume(delta);
        }
    }

    fn consumption(&self) -> i64 {
        self.consumption.load(Ordering::Acquire)
    }

    fn peak_consumption(&self) -> i64 {
        self.peak.load(Ordering::Acquire)
    }
}
