// Copyright (c) 2013-2015 Sandstorm Development Group, Inc. and contributors
// Licensed under the MIT License: see LICENSE file at the crate root.

//! Segment & arena (spec.md §4.B). A [`Arena`] owns an ordered set of
//! [`Segment`]s plus an address-keyed index used to answer "which segment
//! contains this address?" in O(log S) when the mutation path discovers the
//! target of a `setp` and must decide same-segment vs. cross-segment.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;

use smallvec::SmallVec;

use crate::private::units::BYTES_PER_WORD;
use crate::{Error, Result};

/// Reserved segment id for the copy-tracking tree's bookkeeping arena
/// (spec.md §3: "One reserved id, `LOCAL`"). No on-wire segment is ever
/// assigned this id; segment ids are handed out sequentially starting at 0.
pub const LOCAL: u32 = u32::MAX;

/// An object that allocates memory for a message as it is being built.
/// Mirrors `message::Allocator` in the full `capnp` crate. Implementations
/// must return a zeroed, 8-byte-aligned (or `unaligned`-feature-tolerant),
/// word-multiple-sized buffer that does not move until it is dropped.
pub trait Allocator {
    /// Allocates zeroed memory for a new segment, at least `minimum_size`
    /// words long.
    fn allocate_segment(&mut self, minimum_size_words: u32) -> Box<[u8]>;
}

#[derive(Clone, Copy, Debug)]
pub enum AllocationStrategy {
    /// Allocates the same number of words for each segment. Mostly useful
    /// for exercising cross-segment (far) pointers in tests.
    FixedSize,
    /// Doubles (roughly) the previous segment's size for each new one, so
    /// total allocation stays linear in message size (spec.md §4.B).
    GrowHeuristically,
}

/// Default heap-backed allocator (spec.md §4.B: "The default heap allocator
/// doubles the previous segment size (minimum 8 KiB)").
pub struct HeapAllocator {
    next_size_words: u32,
    strategy: AllocationStrategy,
    max_segment_words: u32,
}

pub const SUGGESTED_FIRST_SEGMENT_WORDS: u32 = 1024; // 8 KiB
pub const SUGGESTED_ALLOCATION_STRATEGY: AllocationStrategy = AllocationStrategy::GrowHeuristically;

impl Default for HeapAllocator {
    fn default() -> Self {
        Self {
            next_size_words: SUGGESTED_FIRST_SEGMENT_WORDS,
            strategy: SUGGESTED_ALLOCATION_STRATEGY,
            max_segment_words: 1 << 29,
        }
    }
}

impl HeapAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn first_segment_words(mut self, value: u32) -> Self {
        assert!(value <= self.max_segment_words);
        self.next_size_words = value;
        self
    }

    pub fn allocation_strategy(mut self, value: AllocationStrategy) -> Self {
        self.strategy = value;
        self
    }

    pub fn max_segment_words(mut self, value: u32) -> Self {
        assert!(self.next_size_words <= value);
        self.max_segment_words = value;
        self
    }
}

impl Allocator for HeapAllocator {
    fn allocate_segment(&mut self, minimum_size_words: u32) -> Box<[u8]> {
        let size = core::cmp::max(minimum_size_words, self.next_size_words);
        let buf = alloc::vec![0u8; size as usize * BYTES_PER_WORD].into_boxed_slice();
        match self.strategy {
            AllocationStrategy::GrowHeuristically => {
                if size < self.max_segment_words - self.next_size_words {
                    self.next_size_words += size;
                } else {
                    self.next_size_words = self.max_segment_words;
                }
            }
            AllocationStrategy::FixedSize => {}
        }
        buf
    }
}

/// A contiguous, 8-byte-aligned (modulo the `unaligned` feature), word-sized
/// byte buffer holding part of one message (spec.md §3 "Segment").
pub struct Segment {
    bytes: Box<[u8]>,
    /// Number of words currently allocated out of `bytes`.
    len_words: u32,
    id: u32,
}

impl Segment {
    fn new(id: u32, bytes: Box<[u8]>) -> Self {
        debug_assert_eq!(bytes.len() % BYTES_PER_WORD, 0);
        Segment {
            bytes,
            len_words: 0,
            id,
        }
    }

    /// Wraps an already-populated, externally-owned segment (used when
    /// reading an existing message: its whole capacity is already "used").
    fn from_existing(id: u32, bytes: Box<[u8]>) -> Self {
        let words = (bytes.len() / BYTES_PER_WORD) as u32;
        Segment {
            bytes,
            len_words: words,
            id,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn cap_words(&self) -> u32 {
        (self.bytes.len() / BYTES_PER_WORD) as u32
    }

    pub fn len_words(&self) -> u32 {
        self.len_words
    }

    pub fn base_addr(&self) -> usize {
        self.bytes.as_ptr() as usize
    }

    pub fn data(&self) -> &[u8] {
        &self.bytes[..(self.len_words as usize) * BYTES_PER_WORD]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        let end = (self.len_words as usize) * BYTES_PER_WORD;
        &mut self.bytes[..end]
    }

    /// The full allocated capacity, including words not yet bumped into
    /// `len_words`. Reads through a resolved pointer use this (rather than
    /// `data()`) because bounds-checking has already confirmed the access
    /// falls within `cap_words`, which is what the wire format's pointer
    /// offsets are relative to.
    pub fn data_full(&self) -> &[u8] {
        &self.bytes
    }

    pub fn data_full_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn contains_address(&self, addr: usize) -> bool {
        let base = self.base_addr();
        addr >= base && addr < base + self.bytes.len()
    }

    /// Bump-allocates `n_bytes` (a multiple of 8) within this segment.
    /// Returns the byte offset of the allocation, or `None` if there is not
    /// enough room (the caller must then ask for a fresh segment).
    pub fn try_allocate(&mut self, n_bytes: u32) -> Option<u32> {
        debug_assert_eq!(n_bytes % BYTES_PER_WORD as u32, 0);
        let n_words = n_bytes / BYTES_PER_WORD as u32;
        if self.len_words + n_words > self.cap_words() {
            return None;
        }
        let offset_words = self.len_words;
        self.len_words += n_words;
        Some(offset_words * BYTES_PER_WORD as u32)
    }
}

/// Owns every segment belonging to one message, plus the address-keyed index
/// used to resolve "which segment owns this address?" (spec.md "Segment"
/// invariant: "a node in a red-black tree keyed by base address"). A
/// `BTreeMap` is the idiomatic-Rust analog of that red-black tree: same
/// O(log S) lookup, no unsafe intrusive-tree bookkeeping.
pub struct Arena<A: Allocator> {
    // The overwhelming majority of messages fit in one segment; inlining the
    // first slot avoids a heap allocation for that common case.
    segments: SmallVec<[Segment; 1]>,
    by_base_address: BTreeMap<usize, u32>,
    allocator: A,
}

impl<A: Allocator> Arena<A> {
    pub fn new(allocator: A) -> Self {
        Arena {
            segments: SmallVec::new(),
            by_base_address: BTreeMap::new(),
            allocator,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn segment(&self, id: u32) -> Option<&Segment> {
        self.segments.get(id as usize)
    }

    pub fn segment_mut(&mut self, id: u32) -> Option<&mut Segment> {
        self.segments.get_mut(id as usize)
    }

    /// Lookup-by-address (spec.md §4.B): finds the segment whose
    /// `data..data+cap` range contains `addr`.
    pub fn segment_containing(&self, addr: usize) -> Option<&Segment> {
        let (_, &id) = self.by_base_address.range(..=addr).next_back()?;
        let seg = &self.segments[id as usize];
        if seg.contains_address(addr) {
            Some(seg)
        } else {
            None
        }
    }

    pub fn segment_id_containing(&self, addr: usize) -> Option<u32> {
        self.segment_containing(addr).map(|s| s.id())
    }

    /// Registers a freshly-allocated segment, assigning it the next
    /// sequential id (spec.md §4.B: "Segment ids are assigned sequentially").
    fn register(&mut self, bytes: Box<[u8]>, used_words: u32) -> u32 {
        let id = self.segments.len() as u32;
        let mut seg = if used_words == 0 {
            Segment::new(id, bytes)
        } else {
            Segment::from_existing(id, bytes)
        };
        seg.len_words = used_words;
        self.by_base_address.insert(seg.base_addr(), id);
        self.segments.push(seg);
        id
    }

    /// Wraps an already-fully-populated, read-only-in-practice buffer (e.g.
    /// bytes just decoded off the wire) as a new segment, entirely "used".
    pub fn adopt_existing_segment(&mut self, bytes: Box<[u8]>) -> u32 {
        let words = (bytes.len() / BYTES_PER_WORD) as u32;
        self.register(bytes, words)
    }

    /// Allocate(n bytes within segment) from spec.md §4.B: tries `seg_id`
    /// first; on failure, creates a new segment via the allocator and
    /// allocates from that instead. Returns `(segment_id, byte_offset)`.
    pub fn allocate(&mut self, seg_id: u32, n_bytes: u32) -> Result<(u32, u32)> {
        if let Some(seg) = self.segments.get_mut(seg_id as usize) {
            if let Some(off) = seg.try_allocate(n_bytes) {
                return Ok((seg_id, off));
            }
        }
        let words_needed = n_bytes / BYTES_PER_WORD as u32;
        let bytes = self.allocator.allocate_segment(words_needed);
        if bytes.len() < n_bytes as usize {
            return Err(Error::allocation_failed());
        }
        let new_id = self.register(bytes, 0);
        let seg = &mut self.segments[new_id as usize];
        let off = seg
            .try_allocate(n_bytes)
            .expect("freshly allocated segment must fit the request");
        Ok((new_id, off))
    }

    /// Allocates a brand-new segment, forcing growth even if the current
    /// last segment has room (used by `message::Builder::init_root` when the
    /// arena is empty).
    pub fn allocate_new_segment(&mut self, minimum_words: u32) -> u32 {
        let bytes = self.allocator.allocate_segment(minimum_words);
        self.register(bytes, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bump_allocate_within_capacity() {
        let mut arena = Arena::new(HeapAllocator::new().first_segment_words(2));
        let (seg0, off0) = arena.allocate(0, 8).unwrap();
        assert_eq!(seg0, 0);
        assert_eq!(off0, 0);
        let (seg1, off1) = arena.allocate(0, 8).unwrap();
        assert_eq!(seg1, 0);
        assert_eq!(off1, 8);
    }

    #[test]
    fn overflow_creates_new_segment() {
        let mut arena = Arena::new(HeapAllocator::new().first_segment_words(1));
        let (seg0, _) = arena.allocate(0, 8).unwrap();
        assert_eq!(seg0, 0);
        // First segment (1 word) is now full; this must land in segment 1.
        let (seg1, off1) = arena.allocate(0, 8).unwrap();
        assert_eq!(seg1, 1);
        assert_eq!(off1, 0);
    }

    #[test]
    fn lookup_by_address_finds_owning_segment() {
        let mut arena = Arena::new(HeapAllocator::new().first_segment_words(4));
        arena.allocate(0, 8).unwrap();
        let addr = arena.segment(0).unwrap().base_addr();
        assert_eq!(arena.segment_id_containing(addr), Some(0));
        assert_eq!(arena.segment_id_containing(addr + 1000000), None);
    }
}
