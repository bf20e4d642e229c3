//! Decodes arbitrary text as a response line. Malformed envelopes must
//! come back as errors, never as panics.

#![no_main]

use libfuzzer_sys::fuzz_target;
use lumen_proto::Response;

fuzz_target!(|line: &str| {
    if let Ok(response) = Response::from_line(line) {
        let _ = response.is_successful();
        let _ = response.exception_message();
    }
});
