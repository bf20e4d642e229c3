//! Feeds arbitrary byte chunks through the incremental frame decoder.
//! The decoder must never panic and must tolerate any chunk boundary.

#![no_main]

use libfuzzer_sys::fuzz_target;
use lumen_proto::FrameDecoder;

fuzz_target!(|data: &[u8]| {
    let mut decoder = FrameDecoder::new();
    // Split the input at a data-derived point so boundaries vary.
    let split = data.first().copied().unwrap_or(0) as usize % (data.len() + 1);
    for frame in decoder.feed(&data[..split]) {
        let _ = frame;
    }
    for frame in decoder.feed(&data[split..]) {
        let _ = frame;
    }
});
