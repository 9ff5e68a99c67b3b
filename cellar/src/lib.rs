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

//! cellar is an off-heap key/value cache core.
//!
//! Cache entries live in manually managed memory blocks accounted in raw
//! bytes. Each block carries a self-describing header, hash, payload
//! lengths, chain links, policy slots, and a reference count, accessed with
//! acquire/release atomics so that entries can be shared and reclaimed
//! safely across threads without a collector. Payloads move in and out of
//! entry memory through zero-copy byte sources and sinks.
//!
//! The facade operates on precomputed hashes and raw bytes only:
//!
//! ```
//! use cellar::{hash_key, CacheBuilder, PutOutcome, VecSink};
//!
//! let cache = CacheBuilder::new(64 * 1024 * 1024).build();
//!
//! let key = b"alpha".as_slice();
//! let hash = hash_key(key);
//!
//! assert_eq!(
//!     cache.put(hash, &key, &b"1".as_slice()).unwrap(),
//!     PutOutcome::Inserted,
//! );
//!
//! let mut sink = VecSink::default();
//! assert!(cache.get(hash, &key, &mut sink).unwrap());
//! assert_eq!(sink.as_bytes(), b"1");
//! ```

/// Entry block arena and handles.
pub mod arena;
/// Byte source/sink abstraction.
pub mod bytes;
/// Cache facade, builder, and hot-key sampling.
pub mod cache;
/// Entry memory layout and accessors.
mod entry;
/// Error types.
pub mod error;
/// Replacement policies.
pub mod eviction;
/// Default key hashing.
mod hash;
/// Operation counters.
pub mod metrics;
mod table;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use arena::{Arena, EntryHandle};
pub use bytes::{BytesSink, BytesSource, LimitedSink, VecSink};
pub use cache::{Cache, CacheBuilder, EvictionConfig, HotKeys, PutOutcome, RawCache, RawCacheConfig, RawHotKeys};
pub use entry::{entry_size, ENTRY_OVERHEAD};
pub use error::{Error, Result};
pub use eviction::{
    fifo::{Fifo, FifoConfig},
    lru::{Lru, LruConfig},
    Eviction,
};
pub use hash::hash_key;
pub use metrics::{Metrics, MetricsSnapshot};
