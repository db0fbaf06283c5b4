#![no_main]

use capnp::message::ReaderOptions;
use capnp::ptr::{Ptr, PtrType};
use libfuzzer_sys::fuzz_target;

// Every byte sequence is either rejected by `read_message`'s framing checks
// or decoded into a message whose pointers can be walked to exhaustion
// without panicking: malformed/cyclic/out-of-bounds pointers must resolve to
// null rather than corrupt memory or recurse forever (spec.md §7).
fuzz_target!(|data: &[u8]| {
    let Ok(message) = capnp::serialize::read_message(&mut &data[..], ReaderOptions::default()) else {
        return;
    };
    let root = message.get_root();
    walk(&root, 64);
});

fn walk(ptr: &Ptr, budget: u32) {
    if budget == 0 || ptr.is_null() {
        return;
    }
    match ptr.ptr_type() {
        PtrType::Struct => {
            let ptr_words = ptr.pointer_count();
            for i in 0..ptr_words {
                walk(&ptr.getp(i), budget - 1);
            }
        }
        PtrType::PtrList => {
            let len = ptr.len();
            for i in 0..len {
                walk(&ptr.getp(i), budget - 1);
            }
        }
        PtrType::List => {
            let len = ptr.len();
            for i in 0..len {
                walk(&ptr.getp(i), budget - 1);
            }
        }
        PtrType::BitList => {
            let _ = ptr.len();
        }
        PtrType::Null => {}
    }
}
