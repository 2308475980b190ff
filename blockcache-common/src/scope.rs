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

/// Run a closure over an owned value, usually a lock guard, so the guard lives exactly as long as the closure.
///
/// ```rust
/// # use blockcache_common::scope::Scope;
/// # use parking_lot::Mutex;
/// let usage = Mutex::new(0usize);
/// let now = usage.lock().with(|mut usage| {
///     *usage += 42;
///     *usage
/// });
/// assert_eq!(now, 42);
/// ```
pub trait Scope {
    /// Scoped with ownership.
    fn with<F, R>(self, f: F) -> R
    where
        Self: Sized,
        F: FnOnce(Self) -> R,
    {
        f(self)
    }
}

impl<T> Scope for T {}
