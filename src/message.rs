// Copyright (c) 2013-2015 Sandstorm Development Group, Inc. and contributors
// Licensed under the MIT License:
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN
// THE SOFTWARE.

//! Message lifecycle (spec.md §3 "Message (arena)", §6 "message lifecycle").
//!
//! A [`Message`] owns every [`crate::private::arena::Segment`] that makes up
//! one serializable object graph, plus the options governing how
//! aggressively reads are bounded (traversal limit, nesting limit). All
//! [`crate::ptr::Ptr`] handles borrow their data from a `Message` by cloning
//! a reference-counted handle to it; a `Ptr` becomes meaningless once the
//! owning `Message` is dropped (spec.md §3 "Lifecycle").

use core::cell::{Cell, RefCell};

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;

use crate::private::arena;
pub use crate::private::arena::{AllocationStrategy, Allocator, HeapAllocator};
use crate::ptr::{Ptr, PtrRepr, PtrType};
use crate::{Error, ErrorKind, Result};

/// Concrete arena type used throughout the crate: segments plus an
/// address-keyed index, parameterized over a boxed [`Allocator`] so that
/// `Message`/`Ptr` do not need to carry an allocator type parameter around
/// (the only allocator this crate ships is [`HeapAllocator`]; spec.md §1
/// calls "allocator policy beyond a default heap-backed strategy" out of
/// scope, so a trait object is enough).
pub type Arena = arena::Arena<Box<dyn Allocator>>;

/// Options controlling how defensively reads are bounded (spec.md's
/// expanded ambient stack, SPEC_FULL.md §3).
#[derive(Clone, Copy, Debug)]
pub struct ReaderOptions {
    /// Limits how many total words of data may be traversed while
    /// navigating the message. `None` means unbounded.
    pub traversal_limit_in_words: Option<usize>,
    /// Limits how deeply nested pointers may be chased (struct-in-struct,
    /// list-of-structs-with-pointers, ...), guarding against cyclic or
    /// maliciously deep graphs causing unbounded recursion.
    pub nesting_limit: i32,
}

pub const DEFAULT_READER_OPTIONS: ReaderOptions = ReaderOptions {
    traversal_limit_in_words: Some(8 * 1024 * 1024),
    nesting_limit: 64,
};

impl Default for ReaderOptions {
    fn default() -> Self {
        DEFAULT_READER_OPTIONS
    }
}

impl ReaderOptions {
    pub fn new() -> Self {
        DEFAULT_READER_OPTIONS
    }

    pub fn nesting_limit(mut self, value: i32) -> Self {
        self.nesting_limit = value;
        self
    }

    pub fn traversal_limit_in_words(mut self, value: Option<usize>) -> Self {
        self.traversal_limit_in_words = value;
        self
    }
}

#[cfg(feature = "sync_reader")]
type TraversalCounter = core::sync::atomic::AtomicUsize;
#[cfg(not(feature = "sync_reader"))]
type TraversalCounter = Cell<usize>;

#[cfg(feature = "sync_reader")]
fn load(c: &TraversalCounter) -> usize {
    c.load(core::sync::atomic::Ordering::Relaxed)
}
#[cfg(not(feature = "sync_reader"))]
fn load(c: &TraversalCounter) -> usize {
    c.get()
}

#[cfg(feature = "sync_reader")]
fn store(c: &TraversalCounter, v: usize) {
    c.store(v, core::sync::atomic::Ordering::Relaxed)
}
#[cfg(not(feature = "sync_reader"))]
fn store(c: &TraversalCounter, v: usize) {
    c.set(v)
}

/// The copy-tracking tree from spec.md §4.F, scoped to the lifetime of one
/// `setp` deep-copy. Lives for one operation and is dropped with it; it
/// never touches an on-wire segment (spec.md §3: "allocated through the
/// `create` callback with id `LOCAL`"). See `private::copy` for the walk
/// that uses it.
pub(crate) type CopyTree = alloc::collections::BTreeMap<(u32, u32), PtrRepr>;

/// Owns the segments and bookkeeping for one Cap'n Proto message graph
/// (spec.md §3 "Message (arena)").
pub struct Message {
    pub(crate) arena: RefCell<Arena>,
    words_remaining: TraversalCounter,
    pub(crate) nesting_limit: i32,
}

impl Message {
    /// `init_malloc` (spec.md §6): a brand-new, empty, heap-backed message.
    pub fn init_malloc() -> Rc<Message> {
        Self::with_allocator(HeapAllocator::new(), ReaderOptions::default())
    }

    pub fn with_allocator<A: Allocator + 'static>(
        allocator: A,
        options: ReaderOptions,
    ) -> Rc<Message> {
        Rc::new(Message {
            arena: RefCell::new(Arena::new(Box::new(allocator))),
            words_remaining: TraversalCounter::new(
                options.traversal_limit_in_words.unwrap_or(usize::MAX),
            ),
            nesting_limit: options.nesting_limit,
        })
    }

    /// `init_mem` (spec.md §6): wraps already-populated segments (e.g. bytes
    /// read off the wire by [`crate::serialize`]) as the initial contents of
    /// a message. Building/mutating afterwards allocates *new* segments
    /// through the heap allocator; the wrapped segments themselves are
    /// treated as already fully used.
    pub fn init_mem(segments: Vec<Box<[u8]>>, options: ReaderOptions) -> Result<Rc<Message>> {
        if segments.is_empty() {
            return Err(Error {
                kind: ErrorKind::Failed,
                #[cfg(feature = "alloc")]
                reason: "a message must have at least one segment".into(),
                #[cfg(not(feature = "alloc"))]
                reason: "a message must have at least one segment",
            });
        }
        let msg = Self::with_allocator(HeapAllocator::new(), options);
        {
            let mut arena = msg.arena.borrow_mut();
            for seg in segments {
                arena.adopt_existing_segment(seg);
            }
        }
        Ok(msg)
    }

    pub(crate) fn charge_traversal(&self, words: usize) -> bool {
        let remaining = load(&self.words_remaining);
        if words > remaining {
            store(&self.words_remaining, 0);
            false
        } else {
            store(&self.words_remaining, remaining - words);
            true
        }
    }

    /// `get_root` (spec.md §6): the root pointer is the first word of
    /// segment 0. Returns a null [`Ptr`] if the message has no segments yet
    /// or the root pointer is malformed.
    pub fn get_root(self: &Rc<Self>) -> Ptr {
        let is_empty = self.arena.borrow().is_empty();
        if is_empty {
            return Ptr::null(self.clone());
        }
        Ptr::from_root(self.clone())
    }

    /// `new_root` (spec.md §6): initializes the root as a struct with the
    /// given data/pointer section sizes, allocating segment 0 if necessary.
    pub fn new_root(self: &Rc<Self>, data_words: u16, ptr_words: u16) -> Result<Ptr> {
        {
            let mut arena = self.arena.borrow_mut();
            if arena.is_empty() {
                arena.allocate_new_segment(1);
            }
        }
        Ptr::new_root_struct(self.clone(), data_words, ptr_words)
    }

    pub fn get_segments_for_output(&self) -> crate::OutputSegments<'_> {
        let arena = self.arena.borrow();
        let segs: Vec<&[u8]> = (0..arena.len())
            .map(|i| {
                let s = arena.segment(i as u32).unwrap();
                // Sound: segment buffers are heap-allocated once and never
                // move or shrink for the life of the `Message`; only the
                // arena's own segment spine may reallocate, and we do not
                // hold a reference into that spine past this closure.
                unsafe { core::slice::from_raw_parts(s.data().as_ptr(), s.data().len()) }
            })
            .collect();
        if segs.len() == 1 {
            crate::OutputSegments::SingleSegment([segs[0]])
        } else {
            crate::OutputSegments::MultiSegment(segs)
        }
    }
}

impl core::fmt::Debug for Message {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Message")
            .field("segments", &self.arena.borrow().len())
            .finish()
    }
}
