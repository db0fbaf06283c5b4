#![no_main]

use libfuzzer_sys::fuzz_target;

// `unpack` must never panic on arbitrary input, and whatever it does accept
// must round-trip back through `pack` to bytes that decode identically
// (spec.md §4.G). Malformed/truncated streams are expected to surface as
// `Err`, never as a panic.
fuzz_target!(|data: &[u8]| {
    if let Ok(unpacked) = capnp::serialize_packed::unpack(data) {
        let repacked = capnp::serialize_packed::pack(&unpacked);
        let reunpacked = capnp::serialize_packed::unpack(&repacked)
            .expect("re-unpacking our own pack() output must always succeed");
        assert_eq!(unpacked, reunpacked);
    }
});
