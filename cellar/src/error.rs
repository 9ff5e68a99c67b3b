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

use crate::arena::EntryHandle;

/// Off-heap cache error.
///
/// `Corrupted` and `StaleHandle` indicate that entry memory can no longer be
/// trusted and the current operation must be aborted. `SelfLink` rejects a
/// chain mutation that would cycle an entry onto itself. `SinkOverflow` is
/// returned when a stored value does not fit the declared limit of a sink,
/// distinct from a plain miss.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Entry memory failed a layout sanity check.
    #[error("corrupted entry memory: {reason}")]
    Corrupted {
        /// Which check failed.
        reason: &'static str,
    },
    /// The handle refers to a block that has already been reclaimed.
    #[error("stale entry handle: {handle:?}")]
    StaleHandle {
        /// The offending handle.
        handle: EntryHandle,
    },
    /// A chain link setter was called with the entry's own handle.
    #[error("chain link must not reference the entry itself: {handle:?}")]
    SelfLink {
        /// The offending handle.
        handle: EntryHandle,
    },
    /// The stored value length exceeds what the sink can declare.
    #[error("value length {len} exceeds the sink limit {limit}")]
    SinkOverflow {
        /// Stored value length.
        len: usize,
        /// Maximum length the sink accepts.
        limit: usize,
    },
    /// Config error.
    #[error("config error: {0}")]
    Config(String),
}

/// Off-heap cache result.
pub type Result<T> = std::result::Result<T, Error>;
