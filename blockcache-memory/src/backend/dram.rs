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

use blockcache_common::{
    error::{Error, ErrorKind, Result},
    tracker::ConsumptionTracker,
};

use super::{MemoryBackend, MemoryType};

/// Heap backed values.
#[derive(Debug, Clone)]
pub struct DramBackend {
    tracker: Arc<dyn ConsumptionTracker>,
}

impl DramBackend {
    /// Create a heap backend whose entries are accounted to `tracker`.
    pub fn new(tracker: Arc<dyn ConsumptionTracker>) -> Self {
        Self { tracker }
    }
}

impl MemoryBackend for DramBackend {
    type Buffer = Box<[u8]>;

    fn allocate(&self, size: usize) -> Result<Self::Buffer> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(size).map_err(|e| {
            tracing::warn!("[dram]: allocate {size} bytes failed: {e}");
            Error::new(ErrorKind::NoSpace, "heap allocation failed")
                .with_context("required", size)
                .with_source(e)
        })?;
        buf.resize(size, 0);
        Ok(buf.into_boxed_slice())
    }

    fn memory_type(&self) -> MemoryType {
        MemoryType::Dram
    }

    fn tracker(&self) -> Option<&Arc<dyn ConsumptionTracker>> {
        Some(&self.tracker)
    }
}
