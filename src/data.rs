// Copyright (c) 2013-2015 Sandstorm Development Group, Inc. and contributors
// Licensed under the MIT License: see LICENSE file at the crate root.

//! Data: a plain (non-NUL-terminated) byte list (spec.md §3 "Text/Data").

use alloc::vec::Vec;

use crate::ptr::Ptr;

pub struct Reader {
    ptr: Ptr,
}

impl Reader {
    pub(crate) fn from_ptr(ptr: Ptr) -> Reader {
        Reader { ptr }
    }

    pub fn len(&self) -> u32 {
        self.ptr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let n = self.len();
        let mut buf = alloc::vec![0u8; n as usize];
        self.ptr.getv8(0, &mut buf);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn roundtrip() {
        let msg = Message::init_malloc();
        let root = msg.new_root(0, 1).unwrap();
        root.set_data(0, &[1, 2, 3, 4]).unwrap();
        let d = root.get_data(0);
        assert_eq!(d.to_vec(), alloc::vec![1, 2, 3, 4]);
    }
}
