//! End-to-end byte-level scenarios (S1-S6), each covering one facet of the
//! wire format through the public API only: a message is built, round
//! tripped through the unpacked and/or packed stream formats, and checked
//! either against an exact expected byte sequence or against the value it
//! must read back as.

use capnp::message::{AllocationStrategy, HeapAllocator, Message, ReaderOptions};
use capnp::ptr::Ptr;
use capnp::{serialize, serialize_packed};

/// S1: the smallest possible message - a single-segment root struct with one
/// data word and no pointers - has an exact, fully-determined byte layout:
/// a one-segment table, then the root pointer word, then the data word.
#[test]
fn s1_minimal_struct_message_bytes() {
    let msg = Message::init_malloc();
    let root = msg.new_root(1, 0).unwrap();
    root.write64(0, 0x0123_4567_89ab_cdef).unwrap();

    let mut bytes = Vec::new();
    serialize::write_message(&mut bytes, &msg).unwrap();

    assert_eq!(
        bytes,
        vec![
            0x00, 0x00, 0x00, 0x00, // segment count - 1 == 0
            0x02, 0x00, 0x00, 0x00, // segment 0 length: 2 words
            0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, // root pointer: near, offset 0, data=1, ptrs=0
            0xef, 0xcd, 0xab, 0x89, 0x67, 0x45, 0x23, 0x01, // the data word itself
        ]
    );
}

/// S2: when the root struct's body does not fit in the same segment as the
/// root pointer (forced here with a deliberately tiny first segment), the
/// root pointer must be encoded as a *single* far pointer -- spec.md §8 S2
/// requires low bits `10` and segment-id field `1` -- and still resolve
/// correctly both in-process and after a round trip through the wire
/// format. The first segment is sized to hold only the root pointer word,
/// while growth leaves the second segment room for both the struct body and
/// the landing pad, so the single-far path is exercised rather than the
/// double-far fallback.
#[test]
fn s2_cross_segment_root_pointer_roundtrip() {
    let allocator = HeapAllocator::new()
        .first_segment_words(1)
        .allocation_strategy(AllocationStrategy::GrowHeuristically);
    let msg = Message::with_allocator(allocator, ReaderOptions::default());
    let root = msg.new_root(1, 0).unwrap();
    root.write64(0, 0xfeed_face_dead_beef).unwrap();

    // The 1-word first segment holds only the root pointer; the struct body
    // landed in a second segment.
    let segments = msg.get_segments_for_output();
    assert!(segments.len() >= 2);

    let root_word = u64::from_le_bytes(segments[0][0..8].try_into().unwrap());
    assert_eq!(root_word & 0x3, 0b10, "root pointer must be a far pointer");
    assert_eq!(root_word & 0x4, 0, "root pointer must be a single far pointer, not double-far");
    assert_eq!(root_word >> 32, 1, "far pointer must target segment 1");

    // Re-resolving the root from scratch must chase the far pointer.
    assert_eq!(msg.get_root().read64(0), 0xfeed_face_dead_beef);

    let mut bytes = Vec::new();
    serialize::write_message(&mut bytes, &msg).unwrap();
    let read_back = serialize::read_message(&mut &bytes[..], ReaderOptions::default()).unwrap();
    assert_eq!(read_back.get_root().read64(0), 0xfeed_face_dead_beef);
}

/// S3: the packed codec's worst and best cases - an all-zero word followed
/// by a fully-nonzero word - produce an exact, minimal byte sequence, and a
/// whole message survives a write_packed_message/read_packed_message round
/// trip unchanged.
#[test]
fn s3_packed_message_roundtrip() {
    let msg = Message::init_malloc();
    let root = msg.new_root(8, 0).unwrap();
    // First data word left zero, second set to a fully-nonzero pattern:
    // exactly the S3 byte scenario once on the wire (zero word, then a
    // dense word), just embedded in a real message instead of a raw buffer.
    root.write64(8, 0x0101_0101_0101_0101).unwrap();

    let mut packed = Vec::new();
    serialize_packed::write_packed_message(&mut packed, &msg).unwrap();

    let mut unpacked = Vec::new();
    serialize::write_message(&mut unpacked, &msg).unwrap();
    assert!(
        packed.len() < unpacked.len(),
        "packed form must be smaller than the unpacked form for a mostly-zero message"
    );

    let read_back =
        serialize_packed::read_packed_message(&mut &packed[..], ReaderOptions::default()).unwrap();
    let root2 = read_back.get_root();
    assert_eq!(root2.read64(0), 0);
    assert_eq!(root2.read64(8), 0x0101_0101_0101_0101);
}

/// S4: a composite (struct) list carries one tag word describing the
/// per-element shape, followed by `count * (data_words + ptr_words)` words
/// of payload; each element is independently readable/writable and the
/// whole list survives a wire round trip.
#[test]
fn s4_composite_list_tag_and_payload() {
    let msg = Message::init_malloc();
    let root = msg.new_root(0, 1).unwrap();
    let list = Ptr::new_struct_list(&msg, 1, 0, 3).unwrap();
    for i in 0..3u64 {
        let elem = list.getp(i as u32);
        elem.write64(0, (i + 1) * 11).unwrap();
    }
    root.setp(0, &list).unwrap();

    assert_eq!(root.getp(0).len(), 3);

    let mut bytes = Vec::new();
    serialize::write_message(&mut bytes, &msg).unwrap();
    let read_back = serialize::read_message(&mut &bytes[..], ReaderOptions::default()).unwrap();
    let list2 = read_back.get_root().getp(0);
    assert_eq!(list2.len(), 3);
    for i in 0..3u64 {
        assert_eq!(list2.getp(i as u32).read64(0), (i + 1) * 11);
    }
}

/// S5: text is a NUL-terminated byte list; `len()` excludes the terminator,
/// and the value survives both an in-process read and a wire round trip.
#[test]
fn s5_text_roundtrip_across_serialization() {
    let msg = Message::init_malloc();
    let root = msg.new_root(0, 1).unwrap();
    root.set_text(0, "hello, capnp").unwrap();

    let t = root.get_text(0, None);
    assert_eq!(t.len(), 12);
    assert_eq!(t.as_str().unwrap(), "hello, capnp");

    let mut bytes = Vec::new();
    serialize::write_message(&mut bytes, &msg).unwrap();
    let read_back = serialize::read_message(&mut &bytes[..], ReaderOptions::default()).unwrap();
    let t2 = read_back.get_root().get_text(0, None);
    assert_eq!(t2.as_str().unwrap(), "hello, capnp");
}

/// S6: reading a field beyond a struct's data section (as happens when an
/// old message, written with fewer fields, is read by code expecting more)
/// saturates to zero rather than reading garbage or panicking; writing
/// beyond the data section is rejected outright.
#[test]
fn s6_read_beyond_datasz_saturates() {
    let msg = Message::init_malloc();
    let root = msg.new_root(1, 0).unwrap(); // only one 8-byte data word
    root.write64(0, 0x1111_1111_1111_1111).unwrap();

    // The second data word was never allocated.
    assert_eq!(root.read64(8), 0);
    assert_eq!(root.read32(12), 0);
    assert!(root.write64(8, 1).is_err());

    // The same struct, read back fresh off the wire, saturates identically.
    let mut bytes = Vec::new();
    serialize::write_message(&mut bytes, &msg).unwrap();
    let read_back = serialize::read_message(&mut &bytes[..], ReaderOptions::default()).unwrap();
    let root2 = read_back.get_root();
    assert_eq!(root2.read64(0), 0x1111_1111_1111_1111);
    assert_eq!(root2.read64(8), 0);
}
