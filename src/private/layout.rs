// Copyright (c) 2013-2015 Sandstorm Development Group, Inc. and contributors
// Licensed under the MIT License: see LICENSE file at the crate root.

//! Wire pointer codec (spec.md §4.C) and the struct/list section math that
//! sits underneath [`crate::ptr::Ptr`] (spec.md §4.D/E).
//!
//! This module knows how to decode and encode the four on-wire pointer
//! kinds, how to chase far/double-far indirection, and how to read/write
//! bit- and byte-indexed fields within a struct's data section or a list's
//! element array. It does not know about [`crate::ptr::Ptr`] itself or about
//! cross-message copying (spec.md §4.F, in `private::copy`); it is the pure
//! wire-format layer that both of those build on.

use crate::message::Arena;
use crate::private::element_size::{self, ElementSize};
use crate::private::endian;
use crate::private::units::BYTES_PER_WORD;
use crate::{Error, ErrorKind, Result};

/// Decoded form of a 64-bit wire pointer word (spec.md §4.C).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WirePointer {
    Null,
    Struct {
        /// Signed word offset from the word *after* the pointer to the
        /// struct's data section.
        offset: i32,
        data_words: u16,
        ptr_words: u16,
    },
    List {
        offset: i32,
        element_size: ElementSize,
        /// Element count, or (for `InlineComposite`) the total word count of
        /// the payload that follows the tag word.
        element_count_or_words: u32,
    },
    Far {
        double: bool,
        /// Word offset of the landing pad within the target segment.
        landing_offset: u32,
        target_segment: u32,
    },
    /// Tag `11`: interface/capability pointers. Unsupported by this core;
    /// dereferencing one always yields a null reference (spec.md §4.C).
    Other,
}

const TAG_MASK: u64 = 0x3;
const TAG_STRUCT: u64 = 0;
const TAG_LIST: u64 = 1;
const TAG_FAR: u64 = 2;
const TAG_OTHER: u64 = 3;

pub fn decode_pointer(word: u64) -> WirePointer {
    if word == 0 {
        return WirePointer::Null;
    }
    match word & TAG_MASK {
        TAG_STRUCT => {
            let offset = sign_extend_30(word);
            let data_words = ((word >> 32) & 0xffff) as u16;
            let ptr_words = ((word >> 48) & 0xffff) as u16;
            WirePointer::Struct {
                offset,
                data_words,
                ptr_words,
            }
        }
        TAG_LIST => {
            let offset = sign_extend_30(word);
            let size_code = ((word >> 32) & 0x7) as u8;
            let count = ((word >> 35) & 0x1fff_ffff) as u32;
            WirePointer::List {
                offset,
                element_size: element_size::ElementSize::from_code(size_code)
                    .unwrap_or(ElementSize::Void),
                element_count_or_words: count,
            }
        }
        TAG_FAR => {
            let double = (word >> 2) & 1 != 0;
            let landing_offset = ((word >> 3) & 0x1fff_ffff) as u32;
            let target_segment = (word >> 32) as u32;
            WirePointer::Far {
                double,
                landing_offset,
                target_segment,
            }
        }
        _ => WirePointer::Other,
    }
}

fn sign_extend_30(word: u64) -> i32 {
    // bits [2..31] inclusive: a 30-bit signed field.
    let raw = ((word >> 2) & 0x3fff_ffff) as u32;
    if raw & 0x2000_0000 != 0 {
        (raw | 0xc000_0000) as i32
    } else {
        raw as i32
    }
}

pub fn encode_struct_pointer(offset_words: i32, data_words: u16, ptr_words: u16) -> u64 {
    let offset_bits = (offset_words as u32) & 0x3fff_ffff;
    TAG_STRUCT | ((offset_bits as u64) << 2) | ((data_words as u64) << 32) | ((ptr_words as u64) << 48)
}

pub fn encode_list_pointer(offset_words: i32, element_size: ElementSize, count_or_words: u32) -> u64 {
    let offset_bits = (offset_words as u32) & 0x3fff_ffff;
    TAG_LIST
        | ((offset_bits as u64) << 2)
        | ((element_size.code() as u64) << 32)
        | ((count_or_words as u64 & 0x1fff_ffff) << 35)
}

pub fn encode_far_pointer(double: bool, landing_offset: u32, target_segment: u32) -> u64 {
    TAG_FAR
        | ((double as u64) << 2)
        | (((landing_offset & 0x1fff_ffff) as u64) << 3)
        | ((target_segment as u64) << 32)
}

/// A fully-resolved object: the far/double-far chasing in spec.md §4.C step
/// 1-2 has already happened, and `seg_id`/`data_offset` point directly at
/// the real data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolved {
    pub seg_id: u32,
    /// Byte offset of the data section (structs) or element array (lists).
    pub data_offset: u32,
    pub data_words: u16,
    pub ptr_words: u16,
    pub element_size: ElementSize,
    pub element_count: u32,
    pub is_composite: bool,
    pub is_struct: bool,
    pub is_null: bool,
}

impl Resolved {
    pub fn null() -> Self {
        Resolved {
            seg_id: 0,
            data_offset: 0,
            data_words: 0,
            ptr_words: 0,
            element_size: ElementSize::Void,
            element_count: 0,
            is_composite: false,
            is_struct: false,
            is_null: true,
        }
    }
}

/// Checks that `[offset, offset+len)` lies wholly within `0..cap_bytes` and
/// that `offset` is 8-byte aligned (spec.md §4.C step 3). The `unaligned`
/// feature relaxes the alignment check.
fn region_in_bounds(offset: u32, len: u32, cap_bytes: u32) -> bool {
    #[cfg(not(feature = "unaligned"))]
    if offset % BYTES_PER_WORD as u32 != 0 {
        return false;
    }
    match offset.checked_add(len) {
        Some(end) => end <= cap_bytes,
        None => false,
    }
}

/// Decodes the pointer word at `(seg_id, word_byte_offset)`, chasing
/// far/double-far indirection (spec.md §4.C). Every malformed-but-not-
/// resource-exhausting situation (out-of-bounds landing pad, unsupported
/// `other` tag, pointer into a segment that does not exist) resolves to a
/// null reference rather than an error, per spec.md §7's policy that reads
/// are safe on malformed input.
pub fn resolve(arena: &Arena, seg_id: u32, word_byte_offset: u32) -> Result<Resolved> {
    resolve_impl(arena, seg_id, word_byte_offset, 0)
}

fn resolve_impl(arena: &Arena, seg_id: u32, word_byte_offset: u32, far_hops: u32) -> Result<Resolved> {
    if far_hops > 2 {
        // A double-far landing pad pointing at another far pointer is
        // already malformed; cap the chase instead of looping forever.
        return Ok(Resolved::null());
    }
    let Some(seg) = arena.segment(seg_id) else {
        return Ok(Resolved::null());
    };
    let cap = seg.cap_words() * BYTES_PER_WORD as u32;
    if !region_in_bounds(word_byte_offset, BYTES_PER_WORD as u32, cap) {
        return Ok(Resolved::null());
    }
    let word = endian::read_u64(seg.data_full(), word_byte_offset as usize);
    match decode_pointer(word) {
        WirePointer::Null => Ok(Resolved::null()),
        WirePointer::Other => Ok(Resolved::null()),
        WirePointer::Struct {
            offset,
            data_words,
            ptr_words,
        } => {
            let Some(data_offset) = apply_offset(word_byte_offset, offset) else {
                return Ok(Resolved::null());
            };
            let total = (data_words as u32 + ptr_words as u32) * BYTES_PER_WORD as u32;
            if !region_in_bounds(data_offset, total, cap) {
                return Ok(Resolved::null());
            }
            Ok(Resolved {
                seg_id,
                data_offset,
                data_words,
                ptr_words,
                element_size: ElementSize::Void,
                element_count: 1,
                is_composite: false,
                is_struct: true,
                is_null: false,
            })
        }
        WirePointer::List {
            offset,
            element_size,
            element_count_or_words,
        } => {
            let Some(tag_or_data_offset) = apply_offset(word_byte_offset, offset) else {
                return Ok(Resolved::null());
            };
            if element_size == ElementSize::InlineComposite {
                // A tag word in struct-pointer shape precedes the payload.
                if !region_in_bounds(tag_or_data_offset, BYTES_PER_WORD as u32, cap) {
                    return Ok(Resolved::null());
                }
                let tag_word = endian::read_u64(seg.data_full(), tag_or_data_offset as usize);
                let (count, data_words, ptr_words) = match decode_pointer(tag_word) {
                    WirePointer::Struct {
                        offset: count,
                        data_words,
                        ptr_words,
                    } => (count as u32, data_words, ptr_words),
                    _ => return Ok(Resolved::null()),
                };
                let element_words = data_words as u32 + ptr_words as u32;
                let total_words = element_count_or_words; // payload word count per spec.md §4.C
                if count.checked_mul(element_words) != Some(total_words) {
                    return Ok(Resolved::null());
                }
                let payload_offset = tag_or_data_offset + BYTES_PER_WORD as u32;
                let total_bytes = total_words * BYTES_PER_WORD as u32;
                if !region_in_bounds(payload_offset, total_bytes, cap) {
                    return Ok(Resolved::null());
                }
                Ok(Resolved {
                    seg_id,
                    data_offset: payload_offset,
                    data_words,
                    ptr_words,
                    element_size,
                    element_count: count,
                    is_composite: true,
                    is_struct: false,
                    is_null: false,
                })
            } else {
                let bits = element_size::data_bits_per_element(element_size) as u64
                    * element_count_or_words as u64;
                let total_bytes = crate::private::units::round_bits_up_to_bytes(bits) as u32;
                if !region_in_bounds(tag_or_data_offset, total_bytes, cap) {
                    return Ok(Resolved::null());
                }
                Ok(Resolved {
                    seg_id,
                    data_offset: tag_or_data_offset,
                    data_words: 0,
                    ptr_words: 0,
                    element_size,
                    element_count: element_count_or_words,
                    is_composite: false,
                    is_struct: false,
                    is_null: false,
                })
            }
        }
        WirePointer::Far {
            double,
            landing_offset,
            target_segment,
        } => {
            let Some(target) = arena.segment(target_segment) else {
                return Ok(Resolved::null());
            };
            let target_cap = target.cap_words() * BYTES_PER_WORD as u32;
            let landing_byte_offset = landing_offset * BYTES_PER_WORD as u32;
            if !double {
                if !region_in_bounds(landing_byte_offset, BYTES_PER_WORD as u32, target_cap) {
                    return Ok(Resolved::null());
                }
                resolve_impl(arena, target_segment, landing_byte_offset, far_hops + 1)
            } else {
                // Double-far: two words at (target, landing_offset). The
                // first is a far-single pointer to the real data; the
                // second is the original struct/list pointer giving shape.
                if !region_in_bounds(landing_byte_offset, 2 * BYTES_PER_WORD as u32, target_cap) {
                    return Ok(Resolved::null());
                }
                let first = endian::read_u64(target.data_full(), landing_byte_offset as usize);
                let second = endian::read_u64(
                    target.data_full(),
                    (landing_byte_offset + BYTES_PER_WORD as u32) as usize,
                );
                let WirePointer::Far {
                    double: false,
                    landing_offset: data_offset_words,
                    target_segment: data_segment,
                } = decode_pointer(first)
                else {
                    return Ok(Resolved::null());
                };
                let data_byte_offset = data_offset_words * BYTES_PER_WORD as u32;
                let Some(data_seg) = arena.segment(data_segment) else {
                    return Ok(Resolved::null());
                };
                let data_cap = data_seg.cap_words() * BYTES_PER_WORD as u32;
                match decode_pointer(second) {
                    WirePointer::Struct {
                        data_words,
                        ptr_words,
                        ..
                    } => {
                        let total = (data_words as u32 + ptr_words as u32) * BYTES_PER_WORD as u32;
                        if !region_in_bounds(data_byte_offset, total, data_cap) {
                            return Ok(Resolved::null());
                        }
                        Ok(Resolved {
                            seg_id: data_segment,
                            data_offset: data_byte_offset,
                            data_words,
                            ptr_words,
                            element_size: ElementSize::Void,
                            element_count: 1,
                            is_composite: false,
                            is_struct: true,
                            is_null: false,
                        })
                    }
                    WirePointer::List {
                        element_size,
                        element_count_or_words,
                        ..
                    } if element_size != ElementSize::InlineComposite => {
                        let bits = element_size::data_bits_per_element(element_size) as u64
                            * element_count_or_words as u64;
                        let total_bytes =
                            crate::private::units::round_bits_up_to_bytes(bits) as u32;
                        if !region_in_bounds(data_byte_offset, total_bytes, data_cap) {
                            return Ok(Resolved::null());
                        }
                        Ok(Resolved {
                            seg_id: data_segment,
                            data_offset: data_byte_offset,
                            data_words: 0,
                            ptr_words: 0,
                            element_size,
                            element_count: element_count_or_words,
                            is_composite: false,
                            is_struct: false,
                            is_null: false,
                        })
                    }
                    // Composite lists and other shapes are not valid second
                    // words of a double-far landing pad in this core.
                    _ => Ok(Resolved::null()),
                }
            }
        }
    }
}

/// `word_byte_offset` is the address *of* the pointer word; the struct/list
/// offset is relative to the word immediately after it.
fn apply_offset(word_byte_offset: u32, offset_words: i32) -> Option<u32> {
    let base = word_byte_offset.checked_add(BYTES_PER_WORD as u32)?;
    if offset_words >= 0 {
        base.checked_add(offset_words as u32 * BYTES_PER_WORD as u32)
    } else {
        base.checked_sub((-(offset_words as i64)) as u32 * BYTES_PER_WORD as u32)
    }
}

/// Encodes a pointer at `word_byte_offset` in `seg_id` that refers to a
/// struct/list object living at `(target_seg, target_offset)` *within the
/// same segment*, i.e. a plain near pointer (no far indirection needed).
pub fn near_offset_words(word_byte_offset: u32, target_offset: u32) -> i32 {
    let base = word_byte_offset as i64 + BYTES_PER_WORD as i64;
    ((target_offset as i64 - base) / BYTES_PER_WORD as i64) as i32
}

/// Reads a little-endian field of `width_bytes` (1, 2, 4, or 8) at
/// `byte_offset` within a struct's data section of size `datasz_bytes`.
/// Returns `0` if the field lies beyond the data section (spec.md §4.E,
/// §8 item 4: "Bounds saturation").
pub fn read_struct_field_u64(data: &[u8], byte_offset: u32, width_bytes: u32, datasz_bytes: u32) -> u64 {
    match byte_offset.checked_add(width_bytes) {
        Some(end) if end <= datasz_bytes => {}
        _ => return 0,
    }
    let off = byte_offset as usize;
    match width_bytes {
        1 => endian::read_u8(data, off) as u64,
        2 => endian::read_u16(data, off) as u64,
        4 => endian::read_u32(data, off) as u64,
        8 => endian::read_u64(data, off),
        _ => unreachable!("width_bytes must be 1, 2, 4, or 8"),
    }
}

/// Writes a little-endian field. Returns `Err` if the field lies beyond the
/// data section (spec.md §4.E: `write8..write64` return `-1`).
pub fn write_struct_field_u64(
    data: &mut [u8],
    byte_offset: u32,
    width_bytes: u32,
    datasz_bytes: u32,
    value: u64,
) -> Result<()> {
    let in_bounds = matches!(byte_offset.checked_add(width_bytes), Some(end) if end <= datasz_bytes);
    if !in_bounds {
        return Err(Error {
            kind: ErrorKind::Bounds,
            #[cfg(feature = "alloc")]
            reason: alloc::format!(
                "field at byte {byte_offset} (width {width_bytes}) is outside the {datasz_bytes}-byte data section"
            ),
            #[cfg(not(feature = "alloc"))]
            reason: "field outside struct data section",
        });
    }
    let off = byte_offset as usize;
    match width_bytes {
        1 => endian::write_u8(data, off, value as u8),
        2 => endian::write_u16(data, off, value as u16),
        4 => endian::write_u32(data, off, value as u32),
        8 => endian::write_u64(data, off, value),
        _ => unreachable!("width_bytes must be 1, 2, 4, or 8"),
    }
    Ok(())
}

/// Encodes the composite-list tag word: `(element_count, data_words, ptr_words)`
/// in struct-pointer shape (spec.md §4.C, S4).
pub fn encode_composite_tag(element_count: u32, data_words: u16, ptr_words: u16) -> u64 {
    encode_struct_pointer(element_count as i32, data_words, ptr_words)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn struct_pointer_roundtrip() {
        let word = encode_struct_pointer(0, 1, 0);
        match decode_pointer(word) {
            WirePointer::Struct {
                offset,
                data_words,
                ptr_words,
            } => {
                assert_eq!(offset, 0);
                assert_eq!(data_words, 1);
                assert_eq!(ptr_words, 0);
            }
            other => panic!("expected struct pointer, got {other:?}"),
        }
    }

    #[test]
    fn struct_pointer_s1_bytes() {
        // Root pointer for a struct with data=1 word, ptrs=0 at offset 0:
        // tag+offset occupy the low 32 bits (both zero here), data_words=1
        // sits at bits 32..48, ptr_words=0 at bits 48..64.
        let word = encode_struct_pointer(0, 1, 0);
        assert_eq!(
            word.to_le_bytes(),
            [0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn negative_offset_sign_extends() {
        let word = encode_struct_pointer(-1, 0, 0);
        match decode_pointer(word) {
            WirePointer::Struct { offset, .. } => assert_eq!(offset, -1),
            other => panic!("expected struct pointer, got {other:?}"),
        }
    }

    #[test]
    fn far_pointer_roundtrip() {
        let word = encode_far_pointer(false, 5, 3);
        match decode_pointer(word) {
            WirePointer::Far {
                double,
                landing_offset,
                target_segment,
            } => {
                assert!(!double);
                assert_eq!(landing_offset, 5);
                assert_eq!(target_segment, 3);
            }
            other => panic!("expected far pointer, got {other:?}"),
        }
    }

    #[test]
    fn list_pointer_roundtrip() {
        let word = encode_list_pointer(2, ElementSize::EightBytes, 10);
        match decode_pointer(word) {
            WirePointer::List {
                offset,
                element_size,
                element_count_or_words,
            } => {
                assert_eq!(offset, 2);
                assert_eq!(element_size, ElementSize::EightBytes);
                assert_eq!(element_count_or_words, 10);
            }
            other => panic!("expected list pointer, got {other:?}"),
        }
    }
}
