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
    fmt::{Debug, Display},
    ops::{Deref, DerefMut},
    str::FromStr,
    sync::Arc,
};

use blockcache_common::{
    error::{Error, ErrorKind, Result},
    tracker::ConsumptionTracker,
};
use serde::{Deserialize, Serialize};

/// Ordinary heap memory.
pub mod dram;
/// File-backed persistent memory pool.
pub mod pmem;

/// The medium holding entry values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryType {
    /// Volatile heap memory.
    #[default]
    Dram,
    /// Byte-addressable persistent memory.
    #[serde(alias = "Nvm")]
    Pmem,
}

impl Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryType::Dram => write!(f, "DRAM"),
            MemoryType::Pmem => write!(f, "NVM"),
        }
    }
}

impl FromStr for MemoryType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dram" => Ok(MemoryType::Dram),
            "nvm" | "pmem" => Ok(MemoryType::Pmem),
            _ => Err(Error::new(ErrorKind::Parse, "unknown memory type").with_context("input", s)),
        }
    }
}

/// Allocation strategy for entry values.
///
/// Shards never look behind this trait, so switching the medium never changes the concurrency contract of the
/// cache. Implementations must be safe for concurrent `allocate` calls and for buffers dropped on any thread.
pub trait MemoryBackend: Send + Sync + 'static + Debug {
    /// Storage of one value. Dropping it returns the storage to the backend.
    type Buffer: Deref<Target = [u8]> + DerefMut + Send + Sync + 'static;

    /// Allocate a zeroed buffer of exactly `size` bytes.
    ///
    /// Fails with [`ErrorKind::NoSpace`] if the backend cannot satisfy the request.
    fn allocate(&self, size: usize) -> Result<Self::Buffer>;

    /// The medium of the backend.
    fn memory_type(&self) -> MemoryType;

    /// Tracker receiving the charge held by entries allocated from this backend, if the backend is tracked.
    fn tracker(&self) -> Option<&Arc<dyn ConsumptionTracker>>;
}
