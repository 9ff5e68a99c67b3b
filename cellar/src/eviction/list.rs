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

use cellar_common::strict_assert_eq;

use crate::{
    arena::{Arena, EntryHandle},
    error::Result,
};

/// A doubly-linked list threaded through the entries' replacement slots:
/// `replacement0` points at the older neighbor (toward the tail),
/// `replacement1` at the newer one (toward the head).
#[derive(Debug)]
pub(crate) struct SlotList {
    head: EntryHandle,
    tail: EntryHandle,
    len: usize,
}

impl SlotList {
    pub fn new() -> Self {
        Self {
            head: EntryHandle::NULL,
            tail: EntryHandle::NULL,
            len: 0,
        }
    }

    pub fn head(&self) -> EntryHandle {
        self.head
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn push_head(&mut self, arena: &Arena, handle: EntryHandle) -> Result<()> {
        arena.set_replacement0(handle, self.head.bits())?;
        arena.set_replacement1(handle, EntryHandle::NULL.bits())?;
        if self.head.is_null() {
            self.tail = handle;
        } else {
            arena.set_replacement1(self.head, handle.bits())?;
        }
        self.head = handle;
        self.len += 1;
        Ok(())
    }

    pub fn unlink(&mut self, arena: &Arena, handle: EntryHandle) -> Result<()> {
        let older = EntryHandle::from_bits(arena.replacement0(handle)?);
        let newer = EntryHandle::from_bits(arena.replacement1(handle)?);

        if newer.is_null() {
            strict_assert_eq!(self.head, handle);
            self.head = older;
        } else {
            arena.set_replacement0(newer, older.bits())?;
        }
        if older.is_null() {
            strict_assert_eq!(self.tail, handle);
            self.tail = newer;
        } else {
            arena.set_replacement1(older, newer.bits())?;
        }

        arena.set_replacement0(handle, EntryHandle::NULL.bits())?;
        arena.set_replacement1(handle, EntryHandle::NULL.bits())?;
        self.len -= 1;
        Ok(())
    }

    pub fn pop_tail(&mut self, arena: &Arena) -> Result<EntryHandle> {
        let tail = self.tail;
        if !tail.is_null() {
            self.unlink(arena, tail)?;
        }
        Ok(tail)
    }

    /// Up to `n` entries from the head, newest first. Read-only.
    pub fn take_from_head(&self, arena: &Arena, n: usize) -> Result<Vec<EntryHandle>> {
        let mut handles = Vec::with_capacity(n.min(self.len));
        let mut handle = self.head;
        while !handle.is_null() && handles.len() < n {
            handles.push(handle);
            handle = EntryHandle::from_bits(arena.replacement0(handle)?);
        }
        Ok(handles)
    }
}
