#![no_main]

use control_protocol::codec::decode_message;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Any byte string from a peer must decode or be rejected, never panic
    let _ = decode_message(data);
});
