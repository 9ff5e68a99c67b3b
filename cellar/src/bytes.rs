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

use cellar_common::strict_assert;

use crate::error::{Error, Result};

/// A read-only view of a key or value payload.
///
/// A source either exposes a contiguous backing buffer via [`BytesSource::as_slice`],
/// enabling a single bulk copy, or only random byte access, forcing the
/// byte-at-a-time path. The entry layer must behave identically on both, the
/// opaque variant only loses performance.
pub trait BytesSource {
    /// Total payload size in bytes.
    fn size(&self) -> usize;

    /// The byte at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `offset >= size()`.
    fn byte_at(&self, offset: usize) -> u8;

    /// The contiguous backing buffer, if the source has one.
    fn as_slice(&self) -> Option<&[u8]> {
        None
    }
}

/// A write-only view consuming a key or value payload.
///
/// The payload length must be declared with [`BytesSink::set_size`] before any
/// write. Writing past the declared size is a contract violation.
pub trait BytesSink {
    /// Declare the payload length.
    ///
    /// A bounded sink rejects a length beyond its limit with
    /// [`Error::SinkOverflow`].
    fn set_size(&mut self, size: usize) -> Result<()>;

    /// Write the byte at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is at or past the declared size.
    fn put_byte(&mut self, offset: usize, byte: u8);

    /// The contiguous backing buffer of the declared size, if the sink has one.
    fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        None
    }
}

impl BytesSource for &[u8] {
    fn size(&self) -> usize {
        self.len()
    }

    fn byte_at(&self, offset: usize) -> u8 {
        self[offset]
    }

    fn as_slice(&self) -> Option<&[u8]> {
        Some(self)
    }
}

impl BytesSource for Vec<u8> {
    fn size(&self) -> usize {
        self.len()
    }

    fn byte_at(&self, offset: usize) -> u8 {
        self[offset]
    }

    fn as_slice(&self) -> Option<&[u8]> {
        Some(self.as_ref())
    }
}

/// An unbounded buffer-backed sink.
#[derive(Debug, Default)]
pub struct VecSink {
    buf: Vec<u8>,
}

impl VecSink {
    /// The bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Consume the sink and return its buffer.
    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

impl BytesSink for VecSink {
    fn set_size(&mut self, size: usize) -> Result<()> {
        self.buf.clear();
        self.buf.resize(size, 0);
        Ok(())
    }

    fn put_byte(&mut self, offset: usize, byte: u8) {
        self.buf[offset] = byte;
    }

    fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        Some(&mut self.buf)
    }
}

/// A buffer-backed sink that rejects payloads beyond a fixed limit.
#[derive(Debug)]
pub struct LimitedSink {
    buf: Vec<u8>,
    limit: usize,
}

impl LimitedSink {
    /// Create a sink accepting at most `limit` bytes.
    pub fn new(limit: usize) -> Self {
        Self { buf: vec![], limit }
    }

    /// The bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}

impl BytesSink for LimitedSink {
    fn set_size(&mut self, size: usize) -> Result<()> {
        if size > self.limit {
            return Err(Error::SinkOverflow {
                len: size,
                limit: self.limit,
            });
        }
        self.buf.clear();
        self.buf.resize(size, 0);
        Ok(())
    }

    fn put_byte(&mut self, offset: usize, byte: u8) {
        strict_assert!(offset < self.buf.len());
        self.buf[offset] = byte;
    }

    fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        Some(&mut self.buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_source() {
        let source = b"hello".as_slice();
        assert_eq!(source.size(), 5);
        assert_eq!(source.byte_at(1), b'e');
        assert_eq!(source.as_slice(), Some(b"hello".as_slice()));
    }

    #[test]
    fn test_vec_sink() {
        let mut sink = VecSink::default();
        sink.set_size(3).unwrap();
        sink.put_byte(0, b'a');
        sink.put_byte(2, b'c');
        sink.as_mut_slice().unwrap()[1] = b'b';
        assert_eq!(sink.as_bytes(), b"abc");
    }

    #[test]
    fn test_limited_sink_overflow() {
        let mut sink = LimitedSink::new(4);
        sink.set_size(4).unwrap();
        assert!(matches!(
            sink.set_size(5),
            Err(Error::SinkOverflow { len: 5, limit: 4 })
        ));
    }
}
