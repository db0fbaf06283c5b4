// Copyright (c) 2013-2015 Sandstorm Development Group, Inc. and contributors
// Licensed under the MIT License: see LICENSE file at the crate root.

//! A typed, `Vec`-like view over a [`crate::ptr::Ptr`] list of scalar
//! elements. [`Ptr`] already exposes the raw `get8..get64`/`set8..set64`
//! accessors this wraps (spec.md §4.E); `List<T>` exists purely for
//! ergonomics, the same role `PrimitiveList<T>` plays in the full `capnp`
//! crate, minus the schema-driven `Owned<T>` type-family machinery that
//! exists there to let generated code name a list's element type at the
//! type level.

use core::marker::PhantomData;

use crate::private::element_size::ElementSize;
use crate::ptr::Ptr;
use crate::traits::{IndexMove, ListIter};
use crate::Result;

/// Implemented by the scalar types `List<T>` can hold. Not meant to be
/// implemented outside this crate.
pub trait Element: Copy {
    const ELEMENT_SIZE: ElementSize;
    fn get(ptr: &Ptr, index: u32) -> Self;
    fn set(ptr: &Ptr, index: u32, value: Self);
}

impl Element for bool {
    const ELEMENT_SIZE: ElementSize = ElementSize::Bit;
    fn get(ptr: &Ptr, index: u32) -> Self {
        ptr.get1(index)
    }
    fn set(ptr: &Ptr, index: u32, value: Self) {
        ptr.set1(index, value)
    }
}

macro_rules! impl_element {
    ($ty:ty, $size:expr, $get:ident, $set:ident) => {
        impl Element for $ty {
            const ELEMENT_SIZE: ElementSize = $size;
            fn get(ptr: &Ptr, index: u32) -> Self {
                ptr.$get(index) as $ty
            }
            fn set(ptr: &Ptr, index: u32, value: Self) {
                ptr.$set(index, value as _)
            }
        }
    };
}

impl_element!(u8, ElementSize::Byte, get8, set8);
impl_element!(i8, ElementSize::Byte, get8, set8);
impl_element!(u16, ElementSize::TwoBytes, get16, set16);
impl_element!(i16, ElementSize::TwoBytes, get16, set16);
impl_element!(u32, ElementSize::FourBytes, get32, set32);
impl_element!(i32, ElementSize::FourBytes, get32, set32);
impl_element!(u64, ElementSize::EightBytes, get64, set64);
impl_element!(i64, ElementSize::EightBytes, get64, set64);

impl Element for f32 {
    const ELEMENT_SIZE: ElementSize = ElementSize::FourBytes;
    fn get(ptr: &Ptr, index: u32) -> Self {
        f32::from_bits(ptr.get32(index))
    }
    fn set(ptr: &Ptr, index: u32, value: Self) {
        ptr.set32(index, value.to_bits())
    }
}

impl Element for f64 {
    const ELEMENT_SIZE: ElementSize = ElementSize::EightBytes;
    fn get(ptr: &Ptr, index: u32) -> Self {
        f64::from_bits(ptr.get64(index))
    }
    fn set(ptr: &Ptr, index: u32, value: Self) {
        ptr.set64(index, value.to_bits())
    }
}

/// A list of `T`, backed by a [`Ptr`] of the matching element size.
#[derive(Clone)]
pub struct List<T> {
    ptr: Ptr,
    _marker: PhantomData<T>,
}

impl<T: Element> List<T> {
    pub(crate) fn from_ptr(ptr: Ptr) -> List<T> {
        List {
            ptr,
            _marker: PhantomData,
        }
    }

    pub fn new(msg: &alloc::rc::Rc<crate::message::Message>, len: u32) -> Result<List<T>> {
        let ptr = if matches!(T::ELEMENT_SIZE, ElementSize::Bit) {
            Ptr::new_bit_list(msg, len)?
        } else {
            Ptr::new_list(msg, T::ELEMENT_SIZE, len)?
        };
        Ok(List::from_ptr(ptr))
    }

    pub fn len(&self) -> u32 {
        self.ptr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ptr.is_empty()
    }

    pub fn get(&self, index: u32) -> T {
        T::get(&self.ptr, index)
    }

    pub fn set(&self, index: u32, value: T) {
        T::set(&self.ptr, index, value)
    }

    pub fn iter(&self) -> ListIter<List<T>, T> {
        ListIter::new(self.clone(), self.len())
    }
}

impl<T: Element> IndexMove<u32, T> for List<T> {
    fn index_move(&self, index: u32) -> T {
        self.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn u32_list_roundtrip() {
        let msg = Message::init_malloc();
        let list: List<u32> = List::new(&msg, 4).unwrap();
        for i in 0..4 {
            list.set(i, i * 10);
        }
        let collected: alloc::vec::Vec<u32> = list.iter().collect();
        assert_eq!(collected, alloc::vec![0, 10, 20, 30]);
    }

    #[test]
    fn bool_list_roundtrip() {
        let msg = Message::init_malloc();
        let list: List<bool> = List::new(&msg, 3).unwrap();
        list.set(0, true);
        list.set(1, false);
        list.set(2, true);
        assert_eq!(list.get(0), true);
        assert_eq!(list.get(1), false);
        assert_eq!(list.get(2), true);
    }
}
