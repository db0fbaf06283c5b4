// Copyright (c) 2013-2015 Sandstorm Development Group, Inc. and contributors
// Licensed under the MIT License: see LICENSE file at the crate root.

//! The element-size code carried in bits [32..34] of a list pointer (spec.md
//! §4.C), and the bit widths it implies.

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum ElementSize {
    Void = 0,
    Bit = 1,
    Byte = 2,
    TwoBytes = 3,
    FourBytes = 4,
    EightBytes = 5,
    Pointer = 6,
    /// A composite (struct) list: the payload is prefixed by a tag word in
    /// struct-pointer shape giving the per-element data/pointer sizes.
    InlineComposite = 7,
}

impl ElementSize {
    pub fn from_code(code: u8) -> Option<ElementSize> {
        use ElementSize::*;
        Some(match code {
            0 => Void,
            1 => Bit,
            2 => Byte,
            3 => TwoBytes,
            4 => FourBytes,
            5 => EightBytes,
            6 => Pointer,
            7 => InlineComposite,
            _ => return None,
        })
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Number of data bits occupied by one element of this size. Zero for `Void`
/// and for `InlineComposite` (composite elements have no uniform bit width;
/// callers must use the per-element tag-derived size instead).
pub fn data_bits_per_element(size: ElementSize) -> u32 {
    match size {
        ElementSize::Void => 0,
        ElementSize::Bit => 1,
        ElementSize::Byte => 8,
        ElementSize::TwoBytes => 16,
        ElementSize::FourBytes => 32,
        ElementSize::EightBytes => 64,
        ElementSize::Pointer => 64,
        ElementSize::InlineComposite => 0,
    }
}

/// Number of pointer-section words occupied by one element of this size.
pub fn pointers_per_element(size: ElementSize) -> u32 {
    match size {
        ElementSize::Pointer => 1,
        _ => 0,
    }
}
