//! Fuzz target for inbound frame parsing
//!
//! Arbitrary bytes from the network must either parse or yield a
//! MalformedFrame error; the parser must never panic.

#![no_main]

use citylink_core::core::{Frame, LinkError};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    match Frame::parse(text) {
        Ok(Frame::Liveness(frame)) => {
            // Liveness frames survive a re-encode
            let again = Frame::parse(&frame.to_text());
            assert_eq!(again, Ok(Frame::Liveness(frame)));
        }
        Ok(Frame::Data(frame)) => {
            assert!(frame.payload.is_object(), "data payload must be an object");
        }
        Err(LinkError::MalformedFrame { .. }) => {}
        Err(other) => panic!("unexpected error kind: {:?}", other),
    }
});
