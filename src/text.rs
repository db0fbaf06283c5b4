// Copyright (c) 2013-2015 Sandstorm Development Group, Inc. and contributors
// Licensed under the MIT License: see LICENSE file at the crate root.

//! Text: a NUL-terminated byte list (spec.md §3 "Text/Data"). `len()`
//! excludes the trailing NUL the wire format always carries.

use alloc::string::String;
use alloc::vec::Vec;

use crate::ptr::Ptr;

/// A text value, either backed by a byte list living in some message or
/// (when a caller asked for a field that was absent) a caller-supplied
/// default with no backing allocation.
pub enum Reader {
    Borrowed(Ptr),
    Owned(String),
}

impl Reader {
    pub(crate) fn from_ptr(ptr: Ptr) -> Reader {
        Reader::Borrowed(ptr)
    }

    pub(crate) fn from_default(s: &str) -> Reader {
        Reader::Owned(String::from(s))
    }

    /// Length in bytes, excluding the trailing NUL.
    pub fn len(&self) -> u32 {
        match self {
            Reader::Borrowed(p) => p.len().saturating_sub(1),
            Reader::Owned(s) => s.len() as u32,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw bytes, excluding the trailing NUL.
    pub fn as_bytes(&self) -> Vec<u8> {
        match self {
            Reader::Borrowed(p) => {
                let n = self.len();
                let mut buf = alloc::vec![0u8; n as usize];
                p.getv8(0, &mut buf);
                buf
            }
            Reader::Owned(s) => s.as_bytes().to_vec(),
        }
    }

    /// Fails if the bytes are not valid UTF-8 (spec.md leaves text encoding
    /// unvalidated on the wire; this is where that gets checked).
    pub fn as_str(&self) -> crate::Result<String> {
        match self {
            Reader::Owned(s) => Ok(s.clone()),
            Reader::Borrowed(_) => core::str::from_utf8(&self.as_bytes())
                .map(String::from)
                .map_err(|_| crate::Error {
                    kind: crate::ErrorKind::Encoding,
                    #[cfg(feature = "alloc")]
                    reason: "text field is not valid UTF-8".into(),
                    #[cfg(not(feature = "alloc"))]
                    reason: "text field is not valid UTF-8",
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn default_text_has_no_backing_ptr() {
        let msg = Message::init_malloc();
        let root = msg.new_root(0, 1).unwrap();
        let t = root.get_text(0, Some("fallback"));
        assert_eq!(t.as_str().unwrap(), "fallback");
    }
}
