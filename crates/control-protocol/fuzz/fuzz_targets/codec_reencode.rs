#![no_main]

use control_protocol::codec::{decode_message, encode_message};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(message) = decode_message(data) {
        // Anything we accept we must be able to forward unchanged
        let encoded = encode_message(&message).expect("accepted message re-encodes");
        let decoded = decode_message(&encoded).expect("re-encoded message decodes");
        assert_eq!(message, decoded);
    }
});
