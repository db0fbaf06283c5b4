// Copyright (c) 2013-2015 Sandstorm Development Group, Inc. and contributors
// Licensed under the MIT License: see LICENSE file at the crate root.

//! The unpacked stream wire format (spec.md §6 "Serialization (unpacked)"):
//! a segment table (segment count minus one, then each segment's word
//! count, word-padded) followed by the raw segment bytes back to back.
//!
//! Two I/O backends are provided behind feature flags, same split as the
//! rest of the crate: [`std`] when the `std` feature is on, and
//! [`no_std_io`] (built on `embedded-io`) otherwise.

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;

use crate::message::{Message, ReaderOptions};
use crate::{Error, ErrorKind, Result};

/// Segment counts above this are rejected outright while reading (spec.md's
/// expanded ambient stack: a malicious segment table should not be able to
/// make the reader allocate an unbounded `Vec` of segment sizes before a
/// single byte of real data has been validated).
pub const MAX_SEGMENTS: usize = 1 << 20;

fn encode_segment_table(segment_lens_words: &[u32]) -> Vec<u8> {
    let n = segment_lens_words.len();
    let mut out = Vec::with_capacity(4 * (n + 1) + 4);
    out.extend_from_slice(&((n as u32) - 1).to_le_bytes());
    for &words in segment_lens_words {
        out.extend_from_slice(&words.to_le_bytes());
    }
    if (n + 1) % 2 != 0 {
        out.extend_from_slice(&[0u8; 4]);
    }
    out
}

fn decode_segment_count(header: [u8; 4]) -> Result<usize> {
    let count = u32::from_le_bytes(header) as usize + 1;
    if count == 0 || count > MAX_SEGMENTS {
        return Err(Error {
            kind: ErrorKind::Bounds,
            #[cfg(feature = "alloc")]
            reason: alloc::format!("segment count {count} is out of range"),
            #[cfg(not(feature = "alloc"))]
            reason: "segment count is out of range",
        });
    }
    Ok(count)
}

#[cfg(feature = "std")]
mod std_io {
    use super::*;
    use std::io::{Read, Write};

    /// Reads a message from the unpacked stream format (spec.md §6).
    pub fn read_message<R: Read>(reader: &mut R, options: ReaderOptions) -> Result<Rc<Message>> {
        let mut header = [0u8; 4];
        reader.read_exact(&mut header)?;
        let seg_count = decode_segment_count(header)?;

        let mut seg_words = Vec::with_capacity(seg_count);
        for _ in 0..seg_count {
            reader.read_exact(&mut header)?;
            seg_words.push(u32::from_le_bytes(header));
        }
        if (seg_count + 1) % 2 != 0 {
            reader.read_exact(&mut header)?;
        }

        let mut segments = Vec::with_capacity(seg_count);
        for words in seg_words {
            let mut buf = alloc::vec![0u8; words as usize * 8].into_boxed_slice();
            reader.read_exact(&mut buf)?;
            segments.push(buf);
        }
        Message::init_mem(segments, options)
    }

    /// Writes `message` in the unpacked stream format (spec.md §6).
    pub fn write_message<W: Write>(writer: &mut W, message: &Message) -> Result<()> {
        let segments = message.get_segments_for_output();
        let lens: Vec<u32> = segments.iter().map(|s| (s.len() / 8) as u32).collect();
        writer.write_all(&encode_segment_table(&lens))?;
        for seg in segments.iter() {
            writer.write_all(seg)?;
        }
        Ok(())
    }
}

#[cfg(feature = "std")]
pub use std_io::{read_message, write_message};

#[cfg(all(feature = "alloc", not(feature = "std")))]
mod no_std_io {
    use super::*;
    use embedded_io::{Read, Write};

    pub fn read_message<R: Read>(reader: &mut R, options: ReaderOptions) -> Result<Rc<Message>> {
        let mut header = [0u8; 4];
        read_exact(reader, &mut header)?;
        let seg_count = decode_segment_count(header)?;

        let mut seg_words = Vec::with_capacity(seg_count);
        for _ in 0..seg_count {
            read_exact(reader, &mut header)?;
            seg_words.push(u32::from_le_bytes(header));
        }
        if (seg_count + 1) % 2 != 0 {
            read_exact(reader, &mut header)?;
        }

        let mut segments = Vec::with_capacity(seg_count);
        for words in seg_words {
            let mut buf = alloc::vec![0u8; words as usize * 8].into_boxed_slice();
            read_exact(reader, &mut buf)?;
            segments.push(buf);
        }
        Message::init_mem(segments, options)
    }

    pub fn write_message<W: Write>(writer: &mut W, message: &Message) -> Result<()> {
        let segments = message.get_segments_for_output();
        let lens: Vec<u32> = segments.iter().map(|s| (s.len() / 8) as u32).collect();
        write_all(writer, &encode_segment_table(&lens))?;
        for seg in segments.iter() {
            write_all(writer, seg)?;
        }
        Ok(())
    }

    fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<()> {
        reader.read_exact(buf).map_err(|_| Error::failed("short read".into()))
    }

    fn write_all<W: Write>(writer: &mut W, buf: &[u8]) -> Result<()> {
        writer.write_all(buf).map_err(|_| Error::failed("short write".into()))
    }
}

#[cfg(all(feature = "alloc", not(feature = "std")))]
pub use no_std_io::{read_message, write_message};

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::message::Message;

    #[test]
    fn roundtrip_single_segment() {
        let msg = Message::init_malloc();
        let root = msg.new_root(8, 0).unwrap();
        root.write64(0, 0xdead_beef_cafe_babe).unwrap();

        let mut bytes = Vec::new();
        write_message(&mut bytes, &msg).unwrap();

        let read_back = read_message(&mut &bytes[..], ReaderOptions::default()).unwrap();
        let root2 = read_back.get_root();
        assert_eq!(root2.read64(0), 0xdead_beef_cafe_babe);
    }

    #[test]
    fn segment_table_padding_matches_parity() {
        let msg = Message::init_malloc();
        let _ = msg.new_root(8, 0).unwrap();
        let mut bytes = Vec::new();
        write_message(&mut bytes, &msg).unwrap();
        // one segment: header is (count-1) + 1 length word = 2 words -> even, no padding.
        assert_eq!(bytes.len() % 8, 0);
    }
}
