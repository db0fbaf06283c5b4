// Copyright (c) 2013-2015 Sandstorm Development Group, Inc. and contributors
// Licensed under the MIT License: see LICENSE file at the crate root.

//! The packed stream codec (spec.md §4.G "Packed encoding"). Cap'n Proto
//! messages are mostly zero bytes (unset fields, padding), so the packed
//! format collapses each 8-byte word to either:
//!
//! - a `0x00` tag plus a following byte giving how many *additional*
//!   all-zero words follow (so a long run of zero words costs 2 bytes total),
//! - a `0xff` tag plus the word's 8 bytes verbatim, plus a following byte
//!   giving how many additional "incompressible" words follow raw (so
//!   non-zero data costs 1 byte of overhead per up-to-2048-byte run), or
//!   otherwise
//! - a tag byte whose bit *i* is set iff byte *i* of the word is non-zero,
//!   followed by only the non-zero bytes.
//!
//! [`pack`]/[`unpack`] operate on a fully-materialized `&[u8]` and are handy
//! for tests and one-shot conversions. The actual stream codec (spec.md
//! §4.G "Streaming interface") is [`PackedRead`]/[`PackedWrite`]: adapters
//! over `std::io::Read`/`Write` that carry the tag-decode state (the
//! reference C API's `zeros`/`raw` run counters) across calls, so a message
//! larger than memory can be packed/unpacked without materializing the
//! unpacked form all at once. `read_packed_message`/`write_packed_message`
//! are built on these adapters, not on [`pack`]/[`unpack`].

use alloc::vec::Vec;

use crate::message::{Message, ReaderOptions};
use crate::{Error, ErrorKind, Result};
use alloc::rc::Rc;

/// Packs `input` (which must be a whole number of 8-byte words) per
/// spec.md §4.G.
pub fn pack(input: &[u8]) -> Vec<u8> {
    debug_assert_eq!(input.len() % 8, 0);
    let mut out = Vec::with_capacity(input.len());
    let words: Vec<&[u8]> = input.chunks_exact(8).collect();
    let mut i = 0;
    while i < words.len() {
        let word = words[i];
        if word.iter().all(|&b| b == 0) {
            let mut run = 0u8;
            let mut j = i + 1;
            while j < words.len() && run < 255 && words[j].iter().all(|&b| b == 0) {
                run += 1;
                j += 1;
            }
            out.push(0u8);
            out.push(run);
            i = j;
        } else if word.iter().all(|&b| b != 0) {
            out.push(0xffu8);
            out.extend_from_slice(word);
            let mut run = 0u8;
            let mut j = i + 1;
            while j < words.len() && run < 255 && words[j].iter().all(|&b| b != 0) {
                out.extend_from_slice(words[j]);
                run += 1;
                j += 1;
            }
            out.push(run);
            i = j;
        } else {
            let mut tag = 0u8;
            for (bit, &b) in word.iter().enumerate() {
                if b != 0 {
                    tag |= 1 << bit;
                }
            }
            out.push(tag);
            for &b in word {
                if b != 0 {
                    out.push(b);
                }
            }
            i += 1;
        }
    }
    out
}

/// Unpacks a packed byte stream back into whole words. Returns
/// [`ErrorKind::Encoding`] on a truncated or malformed stream (the packed
/// equivalent of the reference C API's `CAPN_NEED_MORE`).
pub fn unpack(input: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len() * 2);
    let mut i = 0;
    while i < input.len() {
        let tag = input[i];
        i += 1;
        match tag {
            0x00 => {
                let run = *input.get(i).ok_or_else(truncated)? as usize;
                i += 1;
                out.extend(core::iter::repeat(0u8).take(8));
                out.extend(core::iter::repeat(0u8).take(8 * run));
            }
            0xff => {
                if i + 8 > input.len() {
                    return Err(truncated());
                }
                out.extend_from_slice(&input[i..i + 8]);
                i += 8;
                let run = *input.get(i).ok_or_else(truncated)? as usize;
                i += 1;
                if i + 8 * run > input.len() {
                    return Err(truncated());
                }
                out.extend_from_slice(&input[i..i + 8 * run]);
                i += 8 * run;
            }
            tag => {
                for bit in 0..8 {
                    if tag & (1 << bit) != 0 {
                        let b = *input.get(i).ok_or_else(truncated)?;
                        out.push(b);
                        i += 1;
                    } else {
                        out.push(0);
                    }
                }
            }
        }
    }
    Ok(out)
}

fn truncated() -> Error {
    Error {
        kind: ErrorKind::Encoding,
        #[cfg(feature = "alloc")]
        reason: "packed stream ended mid-word".into(),
        #[cfg(not(feature = "alloc"))]
        reason: "packed stream ended mid-word",
    }
}

#[cfg(feature = "std")]
mod std_io {
    use super::*;
    use std::io::{self, Read, Write};

    fn misaligned_io_error() -> io::Error {
        io::Error::new(io::ErrorKind::UnexpectedEof, "packed stream ended mid-word")
    }

    /// Reads `buf.len()` bytes from `r`, one `read()` call at a time, mapping
    /// a clean EOF that arrives before the first byte to `Ok(0)` and any EOF
    /// that arrives mid-buffer to [`misaligned_io_error`] (spec.md §7
    /// "Stream"). Plain `read_exact` conflates both cases.
    fn read_some(r: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match r.read(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        Ok(filled)
    }

    fn read_exact_mid_stream(r: &mut impl Read, buf: &mut [u8]) -> io::Result<()> {
        if read_some(r, buf)? == buf.len() {
            Ok(())
        } else {
            Err(misaligned_io_error())
        }
    }

    /// Streaming packed-format decoder (spec.md §4.G "Streaming interface").
    /// Wraps any `Read` and presents the *unpacked* byte stream through the
    /// `Read` impl below, decoding one tag group (a zero-run, a raw-run, or a
    /// single sparse word) at a time into an internal carry buffer bounded
    /// by the largest possible run (at most 256 words). This is the
    /// idiomatic-Rust shape of the reference implementation's stream
    /// descriptor: the carry buffer *is* the `zeros`/`raw` run state,
    /// persisted across `read()` calls exactly as the descriptor's counters
    /// are persisted across `inflate()` calls.
    pub struct PackedRead<R> {
        pub inner: R,
        carry: Vec<u8>,
        carry_pos: usize,
    }

    impl<R: Read> PackedRead<R> {
        pub fn new(inner: R) -> Self {
            PackedRead {
                inner,
                carry: Vec::new(),
                carry_pos: 0,
            }
        }

        /// Decodes exactly one tag group into `self.carry`, or leaves it
        /// empty on a clean end-of-stream (a tag byte at a word boundary).
        fn fill(&mut self) -> io::Result<()> {
            debug_assert_eq!(self.carry_pos, self.carry.len());
            self.carry.clear();
            self.carry_pos = 0;
            let mut one = [0u8; 1];
            if read_some(&mut self.inner, &mut one)? == 0 {
                return Ok(()); // clean EOF
            }
            match one[0] {
                0x00 => {
                    read_exact_mid_stream(&mut self.inner, &mut one)?;
                    let run = one[0] as usize;
                    self.carry.resize(8 * (1 + run), 0);
                }
                0xff => {
                    let mut word = [0u8; 8];
                    read_exact_mid_stream(&mut self.inner, &mut word)?;
                    self.carry.extend_from_slice(&word);
                    read_exact_mid_stream(&mut self.inner, &mut one)?;
                    let run = one[0] as usize;
                    if run > 0 {
                        let base = self.carry.len();
                        self.carry.resize(base + 8 * run, 0);
                        read_exact_mid_stream(&mut self.inner, &mut self.carry[base..])?;
                    }
                }
                tag => {
                    for bit in 0..8 {
                        if tag & (1 << bit) != 0 {
                            let mut b = [0u8; 1];
                            read_exact_mid_stream(&mut self.inner, &mut b)?;
                            self.carry.push(b[0]);
                        } else {
                            self.carry.push(0);
                        }
                    }
                }
            }
            Ok(())
        }
    }

    impl<R: Read> Read for PackedRead<R> {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            if self.carry_pos == self.carry.len() {
                self.fill()?;
                if self.carry.is_empty() {
                    return Ok(0);
                }
            }
            let n = core::cmp::min(out.len(), self.carry.len() - self.carry_pos);
            out[..n].copy_from_slice(&self.carry[self.carry_pos..self.carry_pos + n]);
            self.carry_pos += n;
            Ok(n)
        }
    }

    /// Streaming packed-format encoder (spec.md §4.G). Accumulates whatever
    /// tail of the last `write()` call did not complete a whole word, so
    /// callers may feed it arbitrarily-sized chunks (as
    /// [`crate::serialize::write_message`] does: 4-byte segment-table
    /// entries, then whole segments) and it still only ever packs complete
    /// words. `flush` reports a misaligned stream if bytes are left over.
    pub struct PackedWrite<W> {
        pub inner: W,
        pending: Vec<u8>,
    }

    impl<W: Write> PackedWrite<W> {
        pub fn new(inner: W) -> Self {
            PackedWrite {
                inner,
                pending: Vec::new(),
            }
        }
    }

    impl<W: Write> Write for PackedWrite<W> {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.pending.extend_from_slice(data);
            let whole = (self.pending.len() / 8) * 8;
            if whole > 0 {
                let packed = pack(&self.pending[..whole]);
                self.inner.write_all(&packed)?;
                self.pending.drain(..whole);
            }
            Ok(data.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            if !self.pending.is_empty() {
                return Err(misaligned_io_error());
            }
            self.inner.flush()
        }
    }

    pub fn write_packed_message<W: Write>(writer: &mut W, message: &Message) -> Result<()> {
        let mut packed = PackedWrite::new(writer);
        crate::serialize::write_message(&mut packed, message)?;
        packed.flush()?;
        Ok(())
    }

    pub fn read_packed_message<R: Read>(reader: &mut R, options: ReaderOptions) -> Result<Rc<Message>> {
        let mut packed = PackedRead::new(reader);
        crate::serialize::read_message(&mut packed, options)
    }
}

#[cfg(feature = "std")]
pub use std_io::{read_packed_message, write_packed_message, PackedRead, PackedWrite};

#[cfg(all(feature = "alloc", not(feature = "std")))]
mod no_std_io {
    use super::*;
    use embedded_io::{Read, Write};

    pub fn write_packed_message<W: Write>(writer: &mut W, message: &Message) -> Result<()> {
        let mut plain = Vec::new();
        crate::serialize::write_message(&mut plain, message)?;
        writer
            .write_all(&pack(&plain))
            .map_err(|_| Error::failed("short write".into()))
    }

    pub fn read_packed_message<R: Read>(reader: &mut R, options: ReaderOptions) -> Result<Rc<Message>> {
        let mut packed = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => packed.extend_from_slice(&buf[..n]),
                Err(_) => return Err(Error::failed("read error".into())),
            }
        }
        let plain = unpack(&packed)?;
        crate::serialize::read_message(&mut &plain[..], options)
    }
}

#[cfg(all(feature = "alloc", not(feature = "std")))]
pub use no_std_io::{read_packed_message, write_packed_message};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_word_run() {
        let input = [0u8; 24]; // three all-zero words
        let packed = pack(&input);
        assert_eq!(packed, alloc::vec![0x00, 2]);
        assert_eq!(unpack(&packed).unwrap(), input);
    }

    #[test]
    fn sparse_word_roundtrip() {
        let mut input = [0u8; 8];
        input[0] = 1;
        input[5] = 2;
        let packed = pack(&input);
        assert_eq!(packed[0], 0b0010_0001);
        assert_eq!(&packed[1..], &[1, 2]);
        assert_eq!(unpack(&packed).unwrap(), input);
    }

    #[test]
    fn dense_word_run() {
        let input = [0xabu8; 24]; // three fully non-zero words back to back
        let packed = pack(&input);
        assert_eq!(packed[0], 0xff);
        assert_eq!(unpack(&packed).unwrap(), input);
    }

    #[cfg(feature = "std")]
    #[test]
    fn full_message_roundtrip() {
        use crate::message::Message;
        let msg = Message::init_malloc();
        let root = msg.new_root(8, 0).unwrap();
        root.write64(0, 0x1122_3344_5566_7788).unwrap();

        let mut bytes = Vec::new();
        write_packed_message(&mut bytes, &msg).unwrap();
        let read_back = read_packed_message(&mut &bytes[..], ReaderOptions::default()).unwrap();
        assert_eq!(read_back.get_root().read64(0), 0x1122_3344_5566_7788);
    }

    #[cfg(feature = "std")]
    #[test]
    fn s3_packed_scenario_bytes() {
        // spec.md S3: one zero word followed by one fully-nonzero word.
        let mut input = alloc::vec![0u8; 16];
        input[8..16].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let packed = pack(&input);
        assert_eq!(
            packed,
            alloc::vec![0x00, 0x00, 0xff, 1, 2, 3, 4, 5, 6, 7, 8, 0x00]
        );
    }

    /// `PackedRead` must decode correctly regardless of how the caller
    /// chops up its `read()` calls: one byte at a time is the worst case for
    /// a carry-buffer implementation and the case most likely to expose an
    /// off-by-one in the run-length bookkeeping.
    #[cfg(feature = "std")]
    #[test]
    fn packed_read_byte_at_a_time() {
        use std::io::Read;
        let mut input = alloc::vec![0u8; 32];
        for (i, b) in input.iter_mut().enumerate() {
            *b = (i * 3 + 1) as u8;
        }
        input[16..24].copy_from_slice(&[0u8; 8]);
        let packed = pack(&input);

        let mut reader = PackedRead::new(&packed[..]);
        let mut out = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match reader.read(&mut byte).unwrap() {
                0 => break,
                _ => out.push(byte[0]),
            }
        }
        assert_eq!(out, input);
    }

    #[cfg(feature = "std")]
    #[test]
    fn packed_write_byte_at_a_time() {
        use std::io::Write;
        let mut input = alloc::vec![0u8; 24];
        input[0] = 1;
        input[9] = 2;
        let mut packed_out = Vec::new();
        {
            let mut w = PackedWrite::new(&mut packed_out);
            for &b in &input {
                w.write_all(&[b]).unwrap();
            }
            w.flush().unwrap();
        }
        assert_eq!(unpack(&packed_out).unwrap(), input);
    }

    #[cfg(feature = "std")]
    #[test]
    fn packed_write_flush_rejects_misaligned_tail() {
        use std::io::Write;
        let mut packed_out = Vec::new();
        let mut w = PackedWrite::new(&mut packed_out);
        w.write_all(&[1, 2, 3]).unwrap();
        assert!(w.flush().is_err());
    }
}
