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

use serde::{Deserialize, Serialize};

use super::{list::SlotList, Eviction};
use crate::{
    arena::{Arena, EntryHandle},
    error::Result,
};

/// Lru eviction algorithm config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LruConfig {}

/// Least-recently-used replacement.
///
/// The recency list is a doubly-linked list threaded through the entries' two
/// replacement slots; accessing an entry moves it to the head, victims are
/// taken from the tail.
pub struct Lru {
    list: SlotList,
}

impl Eviction for Lru {
    type Config = LruConfig;

    fn new(_: &Self::Config) -> Self {
        Self { list: SlotList::new() }
    }

    fn push(&mut self, arena: &Arena, handle: EntryHandle) -> Result<()> {
        self.list.push_head(arena, handle)
    }

    fn pop(&mut self, arena: &Arena) -> Result<EntryHandle> {
        self.list.pop_tail(arena)
    }

    fn access(&mut self, arena: &Arena, handle: EntryHandle) -> Result<()> {
        if self.list.head() == handle {
            return Ok(());
        }
        self.list.unlink(arena, handle)?;
        self.list.push_head(arena, handle)
    }

    fn remove(&mut self, arena: &Arena, handle: EntryHandle) -> Result<()> {
        self.list.unlink(arena, handle)
    }

    fn hottest(&self, arena: &Arena, n: usize) -> Result<Vec<EntryHandle>> {
        self.list.take_from_head(arena, n)
    }
}
