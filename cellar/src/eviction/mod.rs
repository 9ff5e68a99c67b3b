// Copyright 2025 cellar Project Authors
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

use std::fmt::Debug;

use crate::{
    arena::{Arena, EntryHandle},
    error::Result,
};

pub mod fifo;
mod list;
pub mod lru;

/// A replacement policy over entries in one segment.
///
/// A policy keeps its ordering state in the entry's two policy-opaque
/// replacement slots (plus whatever side storage it owns); the core stores
/// and returns those slots but never interprets them. All calls are
/// serialized by the owning segment's lock, and every handle passed in is a
/// live entry of that segment.
pub trait Eviction: Send + Sync + 'static {
    /// The policy configuration.
    type Config: Send + Sync + Clone + Debug + 'static;

    /// Create a policy instance for one segment.
    fn new(config: &Self::Config) -> Self
    where
        Self: Sized;

    /// Track a newly inserted entry.
    fn push(&mut self, arena: &Arena, handle: EntryHandle) -> Result<()>;

    /// Select and untrack the eviction victim, `NULL` when nothing is
    /// tracked.
    fn pop(&mut self, arena: &Arena) -> Result<EntryHandle>;

    /// Record an access to a tracked entry.
    fn access(&mut self, arena: &Arena, handle: EntryHandle) -> Result<()>;

    /// Untrack an entry that is being removed from the segment.
    fn remove(&mut self, arena: &Arena, handle: EntryHandle) -> Result<()>;

    /// Up to `n` tracked entries, hottest first, without mutating the order.
    fn hottest(&self, arena: &Arena, n: usize) -> Result<Vec<EntryHandle>>;
}
