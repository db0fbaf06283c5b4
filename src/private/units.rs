// Copyright (c) 2013-2015 Sandstorm Development Group, Inc. and contributors
// Licensed under the MIT License: see LICENSE file at the crate root.

//! Basic size constants shared by the arena, pointer codec, and accessors.

/// Number of bytes in one word. Every segment's `len`/`cap` and every struct's
/// data/pointer section size are word counts; this is the conversion factor.
pub const BYTES_PER_WORD: usize = 8;

pub const BITS_PER_BYTE: usize = 8;
pub const BITS_PER_WORD: usize = BYTES_PER_WORD * BITS_PER_BYTE;

/// Largest data-section or pointer-section size (in words) that a struct
/// pointer can encode: a 16-bit field, but conventionally treated as the
/// spec's `2^19 - 1` *byte* bound once converted (we store sizes in words
/// internally, so the binding check happens at the byte/word boundary in
/// `private::layout`).
pub const MAX_STRUCT_SECTION_WORDS: u32 = 0xffff;

#[inline]
pub const fn bytes_to_words(bytes: u32) -> u32 {
    bytes / BYTES_PER_WORD as u32
}

#[inline]
pub const fn words_to_bytes(words: u32) -> u32 {
    words * BYTES_PER_WORD as u32
}

#[inline]
pub const fn round_bytes_up_to_words(bytes: u32) -> u32 {
    (bytes + BYTES_PER_WORD as u32 - 1) / BYTES_PER_WORD as u32
}

#[inline]
pub const fn round_bits_up_to_bytes(bits: u64) -> usize {
    ((bits + BITS_PER_BYTE as u64 - 1) / BITS_PER_BYTE as u64) as usize
}

#[inline]
pub const fn round_bits_up_to_words(bits: u64) -> u32 {
    ((bits + BITS_PER_WORD as u64 - 1) / BITS_PER_WORD as u64) as u32
}
