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

use cellar_common::{bits::align8, strict_assert};
use parking_lot::RwLock;

use crate::{
    entry::EntryBlock,
    error::{Error, Result},
};

/// A stable, copyable reference to an entry block in the [`Arena`].
///
/// A handle packs the slot index and the slot's generation at allocation time.
/// The generation is bumped whenever the slot is freed, so dereferencing a
/// handle that outlived its block is caught as [`Error::StaleHandle`] instead
/// of touching reused memory.
///
/// [`EntryHandle::NULL`] is the "no entry" sentinel and never refers to a live
/// block. The raw bits round-trip through [`EntryHandle::bits`] and
/// [`EntryHandle::from_bits`] so a handle can be stored in an entry's atomic
/// link fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryHandle(u64);

impl EntryHandle {
    /// The "no entry" sentinel.
    pub const NULL: Self = Self(0);

    fn new(slot: u32, generation: u32) -> Self {
        strict_assert!(generation > 0);
        Self((generation as u64) << 32 | slot as u64)
    }

    /// Whether this handle is the "no entry" sentinel.
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// The raw bits of the handle.
    pub fn bits(&self) -> u64 {
        self.0
    }

    /// Rebuild a handle from bits previously obtained via [`EntryHandle::bits`].
    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    fn slot(&self) -> usize {
        (self.0 & u32::MAX as u64) as usize
    }

    fn generation(&self) -> u32 {
        (self.0 >> 32) as u32
    }
}

struct Slot {
    generation: u32,
    block: Option<Box<EntryBlock>>,
}

#[derive(Default)]
struct SlotTable {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

/// Arena of manually managed entry blocks.
///
/// The arena only allocates and frees; it never reclaims a block on its own.
/// Reclamation is driven by the reference-count protocol: the caller that
/// observes the zero transition in [`Arena::dereference`](crate::arena::Arena)
/// is the one that must call [`Arena::free`], exactly once.
#[derive(Default)]
pub struct Arena {
    table: RwLock<SlotTable>,
}

impl Arena {
    /// Create an empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a block sized for a key/value pair, both 8-byte aligned.
    ///
    /// The block header is not yet initialized; the returned handle must go
    /// through `initialize` before it is published anywhere.
    pub fn allocate(&self, key_len: usize, value_len: usize) -> EntryHandle {
        let data_len = align8(key_len) + align8(value_len);
        let block = Box::new(EntryBlock::uninitialized(data_len));

        let mut table = self.table.write();
        match table.free.pop() {
            Some(slot) => {
                let entry = &mut table.slots[slot as usize];
                strict_assert!(entry.block.is_none());
                entry.block = Some(block);
                EntryHandle::new(slot, entry.generation)
            }
            None => {
                let slot = u32::try_from(table.slots.len()).expect("arena slot index overflow");
                table.slots.push(Slot {
                    generation: 1,
                    block: Some(block),
                });
                EntryHandle::new(slot, 1)
            }
        }
    }

    /// Return a block to the arena and invalidate every handle to it.
    ///
    /// Returns the number of bytes reclaimed.
    pub fn free(&self, handle: EntryHandle) -> Result<usize> {
        let mut table = self.table.write();
        let slot = table
            .slots
            .get_mut(handle.slot())
            .filter(|slot| slot.generation == handle.generation())
            .ok_or(Error::StaleHandle { handle })?;
        let block = slot.block.take().ok_or(Error::StaleHandle { handle })?;
        // The wrap keeps freeing sound after u32::MAX reuses of one slot; skip
        // generation 0 so no live handle ever equals NULL.
        slot.generation = slot.generation.checked_add(1).unwrap_or(1);
        table.free.push(handle.slot() as u32);
        Ok(block.alloc_len_relaxed())
    }

    /// The number of live blocks.
    pub fn len(&self) -> usize {
        let table = self.table.read();
        table.slots.len() - table.free.len()
    }

    /// Whether the arena holds no live blocks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` against the block behind `handle`.
    ///
    /// Fails with [`Error::StaleHandle`] if the block was freed or the handle
    /// never referred to a live block.
    pub(crate) fn with<R>(&self, handle: EntryHandle, f: impl FnOnce(&EntryBlock) -> Result<R>) -> Result<R> {
        let table = self.table.read();
        let block = table
            .slots
            .get(handle.slot())
            .filter(|slot| slot.generation == handle.generation())
            .and_then(|slot| slot.block.as_deref())
            .ok_or(Error::StaleHandle { handle })?;
        f(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_bits_roundtrip() {
        let handle = EntryHandle::new(42, 7);
        assert_eq!(EntryHandle::from_bits(handle.bits()), handle);
        assert!(!handle.is_null());
        assert!(EntryHandle::NULL.is_null());
        assert_eq!(EntryHandle::from_bits(0), EntryHandle::NULL);
    }

    #[test]
    fn test_allocate_free() {
        let arena = Arena::new();
        let handle = arena.allocate(5, 3);
        assert_eq!(arena.len(), 1);

        let reclaimed = arena.free(handle).unwrap();
        assert_eq!(reclaimed, crate::entry::entry_size(5, 3));
        assert!(arena.is_empty());
    }

    #[test]
    fn test_stale_handle_is_checked() {
        let arena = Arena::new();
        let handle = arena.allocate(8, 8);
        arena.free(handle).unwrap();

        assert!(matches!(arena.free(handle), Err(Error::StaleHandle { .. })));
        assert!(matches!(
            arena.with(handle, |_| Ok(())),
            Err(Error::StaleHandle { .. })
        ));

        // The slot is reused with a new generation; the old handle stays dead.
        let reused = arena.allocate(8, 8);
        assert_ne!(reused, handle);
        assert!(matches!(
            arena.with(handle, |_| Ok(())),
            Err(Error::StaleHandle { .. })
        ));
    }
}
