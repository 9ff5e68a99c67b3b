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

use cellar_common::{bits::assert_pow2, strict_assert_eq};

use crate::{
    arena::{Arena, EntryHandle},
    bytes::BytesSource,
    error::Result,
    eviction::Eviction,
};

/// Grow the bucket array when entries exceed 3/4 of the bucket count.
const REHASH_NUM: usize = 3;
const REHASH_DEN: usize = 4;

/// One lock's worth of the hash table: a power-of-two bucket array of chain
/// heads, the chains threaded through the entries' own `next`/`previous`
/// fields, plus the segment's replacement policy and byte accounting.
///
/// Structural mutation is serialized by the segment lock owned by the cache;
/// the entry accessors alone only make individual fields safely visible.
pub(crate) struct Segment<E>
where
    E: Eviction,
{
    buckets: Vec<EntryHandle>,
    len: usize,

    pub(crate) usage: usize,
    pub(crate) capacity: usize,

    pub(crate) eviction: E,
}

impl<E> Segment<E>
where
    E: Eviction,
{
    pub(crate) fn new(buckets: usize, capacity: usize, eviction: E) -> Self {
        assert_pow2(buckets);
        Self {
            buckets: vec![EntryHandle::NULL; buckets],
            len: 0,
            usage: 0,
            capacity,
            eviction,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    fn bucket_index(&self, hash: u64) -> usize {
        hash as usize & (self.buckets.len() - 1)
    }

    /// Walk the bucket chain for an entry matching `hash` and `key` exactly.
    ///
    /// Lengths are matched before the byte comparison so `compare_key` only
    /// ever runs on length-equal candidates.
    pub(crate) fn find(&self, arena: &Arena, hash: u64, key: &dyn BytesSource) -> Result<EntryHandle> {
        let key_len = key.size();
        let mut handle = self.buckets[self.bucket_index(hash)];
        while !handle.is_null() {
            if arena.hash(handle)? == hash
                && arena.key_len(handle)? == key_len
                && arena.compare_key(handle, key, key_len)?
            {
                return Ok(handle);
            }
            handle = arena.next(handle)?;
        }
        Ok(EntryHandle::NULL)
    }

    /// Link an initialized entry at the head of its bucket chain.
    ///
    /// This is the publication point: the handle becomes reachable by other
    /// threads here, so the header must already be fully initialized.
    pub(crate) fn link(&mut self, arena: &Arena, handle: EntryHandle) -> Result<()> {
        if self.len + 1 > self.buckets.len() / REHASH_DEN * REHASH_NUM {
            self.rehash(arena)?;
        }

        let index = self.bucket_index(arena.hash(handle)?);
        let head = self.buckets[index];
        arena.set_next(handle, head)?;
        arena.set_previous(handle, EntryHandle::NULL)?;
        arena.set_previous(head, handle)?;
        self.buckets[index] = handle;
        self.len += 1;
        Ok(())
    }

    /// Unlink an entry from its bucket chain.
    pub(crate) fn unlink(&mut self, arena: &Arena, handle: EntryHandle) -> Result<()> {
        let next = arena.next(handle)?;
        let previous = arena.previous(handle)?;

        if previous.is_null() {
            let index = self.bucket_index(arena.hash(handle)?);
            strict_assert_eq!(self.buckets[index], handle);
            self.buckets[index] = next;
        } else {
            arena.set_next(previous, next)?;
        }
        arena.set_previous(next, previous)?;

        arena.set_next(handle, EntryHandle::NULL)?;
        arena.set_previous(handle, EntryHandle::NULL)?;
        self.len -= 1;
        Ok(())
    }

    fn rehash(&mut self, arena: &Arena) -> Result<()> {
        let new_len = self.buckets.len() * 2;
        let old = std::mem::replace(&mut self.buckets, vec![EntryHandle::NULL; new_len]);
        tracing::debug!(
            "[table]: rehash {} entries from {} to {} buckets",
            self.len,
            old.len(),
            self.buckets.len()
        );

        for head in old {
            let mut handle = head;
            while !handle.is_null() {
                let next = arena.next(handle)?;

                let index = self.bucket_index(arena.hash(handle)?);
                let new_head = self.buckets[index];
                arena.set_next(handle, new_head)?;
                arena.set_previous(handle, EntryHandle::NULL)?;
                arena.set_previous(new_head, handle)?;
                self.buckets[index] = handle;

                handle = next;
            }
        }
        Ok(())
    }
}
