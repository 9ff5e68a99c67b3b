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

use std::{
    cell::UnsafeCell,
    sync::atomic::{AtomicI64, AtomicU64, Ordering},
};

use cellar_common::bits::align8;

use crate::{
    arena::{Arena, EntryHandle},
    bytes::{BytesSink, BytesSource},
    error::{Error, Result},
};

/// Header bytes charged per entry on top of the aligned key/value payload.
pub const ENTRY_OVERHEAD: usize = std::mem::size_of::<EntryBlock>();

/// Total bytes accounted for an entry with the given payload lengths.
pub fn entry_size(key_len: usize, value_len: usize) -> usize {
    ENTRY_OVERHEAD + align8(key_len) + align8(value_len)
}

/// One cache entry's memory block: a header of independently atomic fields
/// followed by the payload, key bytes first, value bytes at the next 8-byte
/// boundary.
///
/// Every header field is read and written with acquire/release atomics so
/// that a thread observing a published handle observes a fully initialized
/// header. `refs` is the only field mutated concurrently by many holders;
/// `next`/`prev` and the replacement slots are serialized by the owning
/// segment's lock; hash and lengths are written once by `initialize`.
pub(crate) struct EntryBlock {
    hash: AtomicU64,
    key_len: AtomicU64,
    value_len: AtomicU64,
    alloc_len: AtomicU64,
    refs: AtomicI64,
    next: AtomicU64,
    prev: AtomicU64,
    replacement0: AtomicU64,
    replacement1: AtomicU64,
    data: UnsafeCell<Box<[u8]>>,
}

// The payload buffer behind `UnsafeCell` is written only by the allocating
// thread before the handle is published; afterwards it is read-only.
unsafe impl Send for EntryBlock {}
unsafe impl Sync for EntryBlock {}

impl EntryBlock {
    /// A block with an uninitialized header and a zeroed payload buffer of
    /// `data_len` bytes.
    pub(crate) fn uninitialized(data_len: usize) -> Self {
        Self {
            hash: AtomicU64::new(0),
            key_len: AtomicU64::new(0),
            value_len: AtomicU64::new(0),
            alloc_len: AtomicU64::new((ENTRY_OVERHEAD + data_len) as u64),
            refs: AtomicI64::new(0),
            next: AtomicU64::new(EntryHandle::NULL.bits()),
            prev: AtomicU64::new(EntryHandle::NULL.bits()),
            replacement0: AtomicU64::new(EntryHandle::NULL.bits()),
            replacement1: AtomicU64::new(EntryHandle::NULL.bits()),
            data: UnsafeCell::new(vec![0; data_len].into_boxed_slice()),
        }
    }

    pub(crate) fn alloc_len_relaxed(&self) -> usize {
        self.alloc_len.load(Ordering::Relaxed) as usize
    }

    /// # Safety
    ///
    /// The payload is write-once: only the allocating thread may call this,
    /// and only before the entry is published.
    #[expect(clippy::mut_from_ref)]
    unsafe fn data_mut(&self) -> &mut [u8] {
        &mut *self.data.get()
    }

    fn data(&self) -> &[u8] {
        // Safety: the payload is never written after publication.
        unsafe { &*self.data.get() }
    }

    fn payload_len(&self, field: &AtomicU64, reason: &'static str) -> Result<usize> {
        let len = field.load(Ordering::Acquire);
        // Compare before narrowing so a corrupt length cannot wrap on 32-bit
        // targets.
        if len > self.data().len() as u64 {
            return Err(Error::Corrupted { reason });
        }
        Ok(len as usize)
    }
}

impl Arena {
    /// Write the entry header: hash, payload lengths, cleared links, and a
    /// reference count of 1 for the owner about to publish the entry.
    ///
    /// Must be called exactly once per freshly allocated block, before the
    /// handle is made visible to any other thread.
    pub fn initialize(&self, handle: EntryHandle, hash: u64, key_len: usize, value_len: usize) -> Result<()> {
        self.with(handle, |block| {
            block.hash.store(hash, Ordering::Release);
            block.next.store(EntryHandle::NULL.bits(), Ordering::Release);
            block.prev.store(EntryHandle::NULL.bits(), Ordering::Release);
            block.replacement0.store(EntryHandle::NULL.bits(), Ordering::Release);
            block.replacement1.store(EntryHandle::NULL.bits(), Ordering::Release);
            block.key_len.store(key_len as u64, Ordering::Release);
            block.value_len.store(value_len as u64, Ordering::Release);
            block.refs.store(1, Ordering::Release);
            Ok(())
        })
    }

    /// The entry's key hash.
    pub fn hash(&self, handle: EntryHandle) -> Result<u64> {
        self.with(handle, |block| Ok(block.hash.load(Ordering::Acquire)))
    }

    /// The stored key length in bytes.
    pub fn key_len(&self, handle: EntryHandle) -> Result<usize> {
        self.with(handle, |block| block.payload_len(&block.key_len, "key length exceeds block"))
    }

    /// The stored value length in bytes.
    pub fn value_len(&self, handle: EntryHandle) -> Result<usize> {
        self.with(handle, |block| {
            block.payload_len(&block.value_len, "value length exceeds block")
        })
    }

    /// Total bytes allocated for the entry, header overhead included.
    pub fn alloc_len(&self, handle: EntryHandle) -> Result<usize> {
        self.with(handle, |block| Ok(block.alloc_len.load(Ordering::Acquire) as usize))
    }

    /// The next entry in the bucket chain, or `NULL` for `NULL`.
    pub fn next(&self, handle: EntryHandle) -> Result<EntryHandle> {
        if handle.is_null() {
            return Ok(EntryHandle::NULL);
        }
        self.with(handle, |block| {
            Ok(EntryHandle::from_bits(block.next.load(Ordering::Acquire)))
        })
    }

    /// Set the next entry in the bucket chain. No-op for `NULL`.
    pub fn set_next(&self, handle: EntryHandle, next: EntryHandle) -> Result<()> {
        if handle == next {
            return Err(Error::SelfLink { handle });
        }
        if handle.is_null() {
            return Ok(());
        }
        self.with(handle, |block| {
            block.next.store(next.bits(), Ordering::Release);
            Ok(())
        })
    }

    /// The previous entry in the bucket chain, or `NULL` for `NULL`.
    pub fn previous(&self, handle: EntryHandle) -> Result<EntryHandle> {
        if handle.is_null() {
            return Ok(EntryHandle::NULL);
        }
        self.with(handle, |block| {
            Ok(EntryHandle::from_bits(block.prev.load(Ordering::Acquire)))
        })
    }

    /// Set the previous entry in the bucket chain. No-op for `NULL`.
    pub fn set_previous(&self, handle: EntryHandle, previous: EntryHandle) -> Result<()> {
        if handle == previous {
            return Err(Error::SelfLink { handle });
        }
        if handle.is_null() {
            return Ok(());
        }
        self.with(handle, |block| {
            block.prev.store(previous.bits(), Ordering::Release);
            Ok(())
        })
    }

    /// The first replacement-policy slot. The core never interprets it.
    pub fn replacement0(&self, handle: EntryHandle) -> Result<u64> {
        if handle.is_null() {
            return Ok(EntryHandle::NULL.bits());
        }
        self.with(handle, |block| Ok(block.replacement0.load(Ordering::Acquire)))
    }

    /// Set the first replacement-policy slot.
    pub fn set_replacement0(&self, handle: EntryHandle, value: u64) -> Result<()> {
        if handle.is_null() {
            return Ok(());
        }
        self.with(handle, |block| {
            block.replacement0.store(value, Ordering::Release);
            Ok(())
        })
    }

    /// The second replacement-policy slot. The core never interprets it.
    pub fn replacement1(&self, handle: EntryHandle) -> Result<u64> {
        if handle.is_null() {
            return Ok(EntryHandle::NULL.bits());
        }
        self.with(handle, |block| Ok(block.replacement1.load(Ordering::Acquire)))
    }

    /// Set the second replacement-policy slot.
    pub fn set_replacement1(&self, handle: EntryHandle, value: u64) -> Result<()> {
        if handle.is_null() {
            return Ok(());
        }
        self.with(handle, |block| {
            block.replacement1.store(value, Ordering::Release);
            Ok(())
        })
    }

    /// The current reference count.
    pub fn refs(&self, handle: EntryHandle) -> Result<i64> {
        self.with(handle, |block| Ok(block.refs.load(Ordering::Acquire)))
    }

    /// Register an additional holder of the entry.
    ///
    /// Legal only while the entry is live (count >= 1): a holder may only
    /// hand out references to an entry it already holds.
    pub fn reference(&self, handle: EntryHandle) -> Result<()> {
        self.with(handle, |block| {
            let old = block.refs.fetch_add(1, Ordering::SeqCst);
            tracing::trace!("[entry]: inc refs of {:?}: {} => {}", handle, old, old + 1);
            if old < 1 {
                return Err(Error::Corrupted {
                    reason: "referenced an entry that was not live",
                });
            }
            Ok(())
        })
    }

    /// Release one holder of the entry.
    ///
    /// Returns `true` iff this call brought the count to zero; that caller,
    /// and only that caller, must hand the block back via [`Arena::free`].
    pub fn dereference(&self, handle: EntryHandle) -> Result<bool> {
        self.with(handle, |block| {
            let old = block.refs.fetch_sub(1, Ordering::SeqCst);
            tracing::trace!("[entry]: dec refs of {:?}: {} => {}", handle, old, old - 1);
            if old < 1 {
                return Err(Error::Corrupted {
                    reason: "reference count underflow",
                });
            }
            Ok(old == 1)
        })
    }

    /// Copy a payload into the block starting at `offset` (0 for the key,
    /// `align8(key_len)` for the value).
    ///
    /// Takes a single bulk copy when the source exposes a contiguous buffer
    /// and falls back to a byte-at-a-time loop otherwise.
    ///
    /// Must only be called by the allocating thread before the entry is
    /// published.
    pub fn copy_payload_in(&self, handle: EntryHandle, source: &dyn BytesSource, offset: usize) -> Result<()> {
        self.with(handle, |block| {
            let len = source.size();
            // Safety: pre-publication write by the allocating thread.
            let data = unsafe { block.data_mut() };
            if offset.checked_add(len).is_none_or(|end| end > data.len()) {
                return Err(Error::Corrupted {
                    reason: "payload write exceeds block",
                });
            }
            match source.as_slice() {
                Some(slice) => data[offset..offset + len].copy_from_slice(slice),
                None => {
                    for p in 0..len {
                        data[offset + p] = source.byte_at(p);
                    }
                }
            }
            Ok(())
        })
    }

    /// Copy the stored value into `sink`.
    ///
    /// Declares the stored value length on the sink first; a sink that cannot
    /// represent it fails the call with [`Error::SinkOverflow`], which is
    /// distinct from "not found". Corrupted stored lengths fail fatally.
    pub fn copy_value_out(&self, handle: EntryHandle, sink: &mut dyn BytesSink) -> Result<()> {
        if handle.is_null() {
            return Ok(());
        }
        self.with(handle, |block| {
            let key_len = block.payload_len(&block.key_len, "key length exceeds block")?;
            let value_len = block.payload_len(&block.value_len, "value length exceeds block")?;
            let data = block.data();
            let offset = align8(key_len);
            if offset + value_len > data.len() {
                return Err(Error::Corrupted {
                    reason: "value extends past block",
                });
            }
            copy_out(&data[offset..offset + value_len], sink)
        })
    }

    /// Copy the stored key into `sink`. Feeds hot-key sampling.
    pub fn copy_key_out(&self, handle: EntryHandle, sink: &mut dyn BytesSink) -> Result<()> {
        if handle.is_null() {
            return Ok(());
        }
        self.with(handle, |block| {
            let key_len = block.payload_len(&block.key_len, "key length exceeds block")?;
            copy_out(&block.data()[..key_len], sink)
        })
    }

    /// Byte-exact comparison of the stored key against a candidate of the
    /// same length.
    ///
    /// The caller must already have matched lengths; `key_len` is the agreed
    /// serialized length. `NULL` compares false. When the candidate exposes a
    /// contiguous buffer the comparison runs over 8-byte words first, then
    /// finishes the remainder; otherwise it is byte-at-a-time throughout.
    pub fn compare_key(&self, handle: EntryHandle, key: &dyn BytesSource, key_len: usize) -> Result<bool> {
        if handle.is_null() {
            return Ok(false);
        }
        self.with(handle, |block| {
            let data = block.data();
            if key_len > data.len() {
                return Err(Error::Corrupted {
                    reason: "key length exceeds block",
                });
            }
            let stored = &data[..key_len];

            let mut p = 0;
            if let Some(candidate) = key.as_slice() {
                while p + 8 <= key_len {
                    let s = u64::from_ne_bytes(stored[p..p + 8].try_into().unwrap());
                    let c = u64::from_ne_bytes(candidate[p..p + 8].try_into().unwrap());
                    if s != c {
                        return Ok(false);
                    }
                    p += 8;
                }
                return Ok(stored[p..] == candidate[p..key_len]);
            }

            for q in p..key_len {
                if stored[q] != key.byte_at(q) {
                    return Ok(false);
                }
            }
            Ok(true)
        })
    }
}

fn copy_out(stored: &[u8], sink: &mut dyn BytesSink) -> Result<()> {
    sink.set_size(stored.len())?;
    match sink.as_mut_slice() {
        Some(buf) => buf[..stored.len()].copy_from_slice(stored),
        None => {
            for (p, byte) in stored.iter().enumerate() {
                sink.put_byte(p, *byte);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytes::{LimitedSink, VecSink},
        test_utils::{OpaqueSink, OpaqueSource},
    };

    fn entry(arena: &Arena, hash: u64, key: &[u8], value: &[u8]) -> EntryHandle {
        let handle = arena.allocate(key.len(), value.len());
        arena.initialize(handle, hash, key.len(), value.len()).unwrap();
        arena.copy_payload_in(handle, &key, 0).unwrap();
        arena.copy_payload_in(handle, &value, align8(key.len())).unwrap();
        handle
    }

    #[test]
    fn test_initialize_header() {
        let arena = Arena::new();
        let handle = entry(&arena, 42, b"alpha", b"1");

        assert_eq!(arena.hash(handle).unwrap(), 42);
        assert_eq!(arena.key_len(handle).unwrap(), 5);
        assert_eq!(arena.value_len(handle).unwrap(), 1);
        assert_eq!(arena.alloc_len(handle).unwrap(), entry_size(5, 1));
        assert_eq!(arena.refs(handle).unwrap(), 1);
        assert!(arena.next(handle).unwrap().is_null());
        assert!(arena.previous(handle).unwrap().is_null());
    }

    #[test]
    fn test_value_roundtrip_buffered_and_opaque() {
        let arena = Arena::new();
        let buffered = entry(&arena, 1, b"key", b"payload");

        let mut sink = VecSink::default();
        arena.copy_value_out(buffered, &mut sink).unwrap();
        assert_eq!(sink.as_bytes(), b"payload");

        // The opaque source forces the byte-at-a-time write path; the opaque
        // sink forces the byte-at-a-time read path. Same bytes either way.
        let opaque = arena.allocate(3, 7);
        arena.initialize(opaque, 1, 3, 7).unwrap();
        arena
            .copy_payload_in(opaque, &OpaqueSource::new(b"key".to_vec()), 0)
            .unwrap();
        arena
            .copy_payload_in(opaque, &OpaqueSource::new(b"payload".to_vec()), align8(3))
            .unwrap();

        let mut sink = OpaqueSink::default();
        arena.copy_value_out(opaque, &mut sink).unwrap();
        assert_eq!(sink.as_bytes(), b"payload");
    }

    #[test]
    fn test_compare_key() {
        let arena = Arena::new();
        // Longer than one word, not a multiple of 8, to cover the word path
        // plus remainder.
        let key = b"0123456789abc";
        let handle = entry(&arena, 7, key, b"v");

        assert!(arena.compare_key(handle, &key.as_slice(), key.len()).unwrap());
        assert!(arena
            .compare_key(handle, &OpaqueSource::new(key.to_vec()), key.len())
            .unwrap());

        // A single differing byte at any position yields false on both paths.
        for p in 0..key.len() {
            let mut other = key.to_vec();
            other[p] ^= 0xff;
            assert!(!arena.compare_key(handle, &other.as_slice(), key.len()).unwrap());
            assert!(!arena
                .compare_key(handle, &OpaqueSource::new(other), key.len())
                .unwrap());
        }

        // Truncated candidate compares false against the truncated prefix
        // length agreed by the caller only if bytes differ; the caller is
        // responsible for length short-circuiting, so equal prefixes match.
        assert!(arena.compare_key(handle, &key[..4].as_ref(), 4).unwrap());

        // NULL is "no entry".
        assert!(!arena
            .compare_key(EntryHandle::NULL, &key.as_slice(), key.len())
            .unwrap());
    }

    #[test]
    fn test_self_link_rejected_without_mutation() {
        let arena = Arena::new();
        let a = entry(&arena, 1, b"a", b"1");
        let b = entry(&arena, 2, b"b", b"2");

        arena.set_next(a, b).unwrap();
        assert!(matches!(arena.set_next(a, a), Err(Error::SelfLink { .. })));
        assert_eq!(arena.next(a).unwrap(), b);

        arena.set_previous(b, a).unwrap();
        assert!(matches!(arena.set_previous(b, b), Err(Error::SelfLink { .. })));
        assert_eq!(arena.previous(b).unwrap(), a);
    }

    #[test]
    fn test_null_sentinel_accessors() {
        let arena = Arena::new();
        assert!(arena.next(EntryHandle::NULL).unwrap().is_null());
        assert!(arena.previous(EntryHandle::NULL).unwrap().is_null());
        arena.set_next(EntryHandle::NULL, EntryHandle::from_bits(99)).unwrap();
        arena
            .set_previous(EntryHandle::NULL, EntryHandle::from_bits(99))
            .unwrap();
    }

    #[test]
    fn test_replacement_slots_are_opaque() {
        let arena = Arena::new();
        let handle = entry(&arena, 1, b"k", b"v");

        arena.set_replacement0(handle, 0xdead_beef).unwrap();
        arena.set_replacement1(handle, u64::MAX).unwrap();
        assert_eq!(arena.replacement0(handle).unwrap(), 0xdead_beef);
        assert_eq!(arena.replacement1(handle).unwrap(), u64::MAX);
    }

    #[test]
    fn test_reference_dereference_zero_once() {
        let arena = Arena::new();
        let handle = entry(&arena, 1, b"k", b"v");

        for _ in 0..9 {
            arena.reference(handle).unwrap();
        }
        let mut zeroes = 0;
        for _ in 0..10 {
            if arena.dereference(handle).unwrap() {
                zeroes += 1;
            }
        }
        assert_eq!(zeroes, 1);
    }

    #[test]
    fn test_sink_overflow_is_not_a_miss() {
        let arena = Arena::new();
        let handle = entry(&arena, 1, b"k", b"0123456789");

        let mut sink = LimitedSink::new(4);
        assert!(matches!(
            arena.copy_value_out(handle, &mut sink),
            Err(Error::SinkOverflow { len: 10, limit: 4 })
        ));
        // Nothing was written.
        assert!(sink.as_bytes().is_empty());
    }

    #[test]
    fn test_concurrent_refcount() {
        use std::sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        };

        let arena = Arc::new(Arena::new());
        let handle = entry(&arena, 1, b"k", b"v");

        const THREADS: usize = 8;
        const ROUNDS: usize = 1000;

        // Every thread references then dereferences; the initial owner
        // reference is dropped last by the main thread.
        let zeroes = Arc::new(AtomicUsize::new(0));
        let threads = (0..THREADS)
            .map(|_| {
                let arena = arena.clone();
                let zeroes = zeroes.clone();
                std::thread::spawn(move || {
                    for _ in 0..ROUNDS {
                        arena.reference(handle).unwrap();
                    }
                    for _ in 0..ROUNDS {
                        if arena.dereference(handle).unwrap() {
                            zeroes.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                })
            })
            .collect::<Vec<_>>();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(zeroes.load(Ordering::Relaxed), 0);
        assert!(arena.dereference(handle).unwrap());
    }
}
