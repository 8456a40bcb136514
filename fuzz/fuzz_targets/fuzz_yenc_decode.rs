#![no_main]
use libfuzzer_sys::fuzz_target;
use nzb_stream::yenc::{sniff, YencDecoder};
use std::io::{BufReader, Read};

fuzz_target!(|data: &[u8]| {
    // Raw input, as if straight from the transport
    if let Ok(mut decoder) = YencDecoder::new(data) {
        let mut out = Vec::new();
        let _ = decoder.read_to_end(&mut out);
    }

    // Through format detection, as the segment stream does
    if let Ok((true, stream)) = sniff(data) {
        if let Ok(mut decoder) = YencDecoder::new(BufReader::new(stream)) {
            let mut buf = [0u8; 7];
            while let Ok(n) = decoder.read(&mut buf) {
                if n == 0 {
                    break;
                }
            }
        }
    }
});
