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

//! # Cap'n Proto runtime core
//!
//! This crate is the zero-copy message core for the Cap'n Proto wire format:
//! a segment arena, the wire pointer codec (struct/list/far/double-far), a
//! navigable [`ptr::Ptr`] handle, and a streaming packed-format codec.
//!
//! Unlike the full `capnp` crate, there is no schema-driven code generation
//! here: callers navigate messages directly through [`ptr::Ptr`], the same
//! way the reference C implementation's `capn_ptr` works. Reading a field is
//! a pointer dereference; writing one is a bounded in-place store or a
//! cross-segment deep copy.

#![cfg_attr(not(feature = "std"), no_std)]

#[cfg(feature = "alloc")]
extern crate alloc;
#[cfg(not(feature = "alloc"))]
mod alloc {
    // Without the `alloc` feature, the crate can still build, but every
    // operation that needs to grow a segment or allocate the copy-tracking
    // tree becomes unavailable at the type level: `Message` requires `alloc`.
}

#[cfg(any(feature = "quickcheck", test))]
extern crate quickcheck;

pub mod data;
pub mod message;
pub mod primitive_list;
pub mod ptr;
pub mod serialize;
pub mod serialize_packed;
pub mod text;
pub mod traits;

pub(crate) mod private;

#[cfg(feature = "alloc")]
use alloc::string::String;
#[cfg(feature = "alloc")]
use alloc::vec::Vec;

/// Eight bytes of memory with opaque interior.
///
/// This type is used to ensure that the data of a message is properly aligned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct Word(u64);

impl Word {
    /// Does this, but faster:
    /// `::std::iter::repeat(Word(0)).take(length).collect()`
    #[cfg(feature = "alloc")]
    pub fn allocate_zeroed_vec(length: usize) -> Vec<Word> {
        let mut result: Vec<Word> = Vec::with_capacity(length);
        unsafe {
            result.set_len(length);
            let p: *mut u8 = result.as_mut_ptr() as *mut u8;
            core::ptr::write_bytes(p, 0u8, length * core::mem::size_of::<Word>());
        }
        result
    }

    pub fn bytes_to_words(bytes: &[u8]) -> &[Word] {
        assert_eq!(bytes.len() % 8, 0);
        unsafe { core::slice::from_raw_parts(bytes.as_ptr() as *const Word, bytes.len() / 8) }
    }

    pub fn bytes_to_words_mut(bytes: &mut [u8]) -> &mut [Word] {
        assert_eq!(bytes.len() % 8, 0);
        unsafe {
            core::slice::from_raw_parts_mut(bytes.as_mut_ptr() as *mut Word, bytes.len() / 8)
        }
    }

    pub fn words_to_bytes(words: &[Word]) -> &[u8] {
        unsafe { core::slice::from_raw_parts(words.as_ptr() as *const u8, words.len() * 8) }
    }

    pub fn words_to_bytes_mut(words: &mut [Word]) -> &mut [u8] {
        unsafe { core::slice::from_raw_parts_mut(words.as_mut_ptr() as *mut u8, words.len() * 8) }
    }

    #[cfg(test)]
    pub fn from(n: u64) -> Word {
        Word(n)
    }
}

#[cfg(any(feature = "quickcheck", test))]
impl quickcheck::Arbitrary for Word {
    fn arbitrary(g: &mut quickcheck::Gen) -> Word {
        Word(u64::arbitrary(g))
    }
}

/// Because messages are only validated as they are traversed, the return type of
/// any method that reads a pointer field must be wrapped in a Result.
pub type Result<T> = core::result::Result<T, Error>;

/// Describes an arbitrary error that prevented an operation from completing.
#[derive(Debug, Clone)]
pub struct Error {
    /// The type of the error. The purpose of this enum is not to describe the error itself, but
    /// rather to describe how the caller might want to respond to it.
    pub kind: ErrorKind,

    /// Human-readable failure description.
    #[cfg(feature = "alloc")]
    pub reason: String,
    #[cfg(not(feature = "alloc"))]
    pub reason: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A pointer, offset, or size was outside the bounds the wire format allows
    /// (segment capacity, struct data/pointer section, list element count, ...).
    Bounds,

    /// The segment allocator (or the `create` callback of a user-provided
    /// [`message::Allocator`]) returned failure.
    Allocation,

    /// A `setp` target was not encodable: e.g. the destination message has no
    /// way to copy data from a different message, or a pointer was malformed.
    Encoding,

    /// The message violated a structural wire-level invariant (misaligned
    /// pointer, pointer tag `11` used where unsupported, nesting/traversal
    /// limit exceeded, ...).
    Failed,
}

impl Error {
    #[cfg(feature = "alloc")]
    pub fn failed(reason: String) -> Error {
        Error {
            kind: ErrorKind::Failed,
            reason,
        }
    }

    #[cfg(feature = "alloc")]
    pub fn bounds(reason: String) -> Error {
        Error {
            kind: ErrorKind::Bounds,
            reason,
        }
    }

    #[cfg(feature = "alloc")]
    pub fn allocation_failed() -> Error {
        Error {
            kind: ErrorKind::Allocation,
            reason: "segment allocator returned null".into(),
        }
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(fmt, "{:?}: {}", self.kind, self.reason)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

#[cfg(feature = "std")]
impl core::convert::From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        Error {
            reason: alloc::format!("{err}"),
            kind: ErrorKind::Failed,
        }
    }
}

/// Helper struct that allows `message::Builder::get_segments_for_output()` to avoid heap
/// allocations in the single-segment case.
pub enum OutputSegments<'a> {
    #[doc(hidden)]
    SingleSegment([&'a [u8]; 1]),

    #[doc(hidden)]
    MultiSegment(Vec<&'a [u8]>),
}

impl<'a> core::ops::Deref for OutputSegments<'a> {
    type Target = [&'a [u8]];
    fn deref(&self) -> &[&'a [u8]] {
        match self {
            OutputSegments::SingleSegment(s) => s,
            OutputSegments::MultiSegment(v) => v,
        }
    }
}
