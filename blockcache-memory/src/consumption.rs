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

use std::sync::Arc;

use blockcache_common::tracker::ConsumptionTracker;

/// Per-shard buffer of charge changes in front of a shared [`ConsumptionTracker`].
///
/// Changes are accumulated until their absolute sum exceeds `max_deferred`, then forwarded at once. With
/// `max_deferred == 0` every non-zero change is forwarded synchronously. Whatever is still buffered is flushed when
/// the reporter is dropped.
#[derive(Debug)]
pub struct ConsumptionReporter {
    tracker: Option<Arc<dyn ConsumptionTracker>>,
    deferred: i64,
    max_deferred: i64,
}

impl ConsumptionReporter {
    /// Create a reporter for a shard of `shard_capacity` with the given approximation `ratio` in `[0, 1]`.
    pub fn new(tracker: Option<Arc<dyn ConsumptionTracker>>, shard_capacity: usize, ratio: f64) -> Self {
        let max_deferred = (shard_capacity as f64 * ratio) as i64;
        Self {
            tracker,
            deferred: 0,
            max_deferred,
        }
    }

    /// Report a charge change.
    pub fn report(&mut self, delta: i64) {
        let Some(tracker) = self.tracker.as_ref() else {
            return;
        };
        self.deferred += delta;
        if self.deferred.abs() > self.max_deferred {
            tracker.consume(self.deferred);
            self.deferred = 0;
        }
    }

    /// Forward everything still buffered.
    pub fn flush(&mut self) {
        if let Some(tracker) = self.tracker.as_ref() {
            if self.deferred != 0 {
                tracker.consume(self.deferred);
                self.deferred = 0;
            }
        }
    }

    /// Changes not forwarded yet.
    #[cfg(test)]
    pub fn deferred(&self) -> i64 {
        self.deferred
    }
}

impl Drop for ConsumptionReporter {
    fn drop(&mut self) {
        self.flush();
    }
}
