#![no_main]

use libfuzzer_sys::fuzz_target;
use testhost_pipe::FrameDecoder;

fuzz_target!(|data: &[u8]| {
    // Split the input at a data-dependent point to exercise partial reads
    let split = data.first().map(|b| *b as usize % (data.len() + 1)).unwrap_or(0);
    let mut decoder = FrameDecoder::new();
    decoder.push(&data[..split]);
    while let Ok(Some(_)) = decoder.next_frame() {}
    decoder.push(&data[split..]);
    while let Ok(Some(_)) = decoder.next_frame() {}
});
