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

//! Test utilities.

use crate::{
    bytes::{BytesSink, BytesSource},
    error::Result,
};

/// A byte source that hides its backing buffer, forcing the byte-at-a-time
/// copy and comparison paths.
#[derive(Debug)]
pub struct OpaqueSource {
    bytes: Vec<u8>,
}

impl OpaqueSource {
    /// Wrap `bytes` in an opaque source.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl BytesSource for OpaqueSource {
    fn size(&self) -> usize {
        self.bytes.len()
    }

    fn byte_at(&self, offset: usize) -> u8 {
        self.bytes[offset]
    }
}

/// A byte sink that hides its backing buffer, forcing the byte-at-a-time
/// copy path.
#[derive(Debug, Default)]
pub struct OpaqueSink {
    bytes: Vec<u8>,
}

impl OpaqueSink {
    /// The bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl BytesSink for OpaqueSink {
    fn set_size(&mut self, size: usize) -> Result<()> {
        self.bytes.clear();
        self.bytes.resize(size, 0);
        Ok(())
    }

    fn put_byte(&mut self, offset: usize, byte: u8) {
        self.bytes[offset] = byte;
    }
}
