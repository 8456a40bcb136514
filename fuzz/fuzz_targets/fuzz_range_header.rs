#![no_main]
use libfuzzer_sys::fuzz_target;
use nzb_stream::range::{ByteRange, ServedRange};

fuzz_target!(|data: &[u8]| {
    if data.len() < 8 {
        return;
    }
    let file_size = u64::from_le_bytes(data[..8].try_into().unwrap());
    let Ok(header) = std::str::from_utf8(&data[8..]) else {
        return;
    };

    if let Ok(range) = ByteRange::parse(header) {
        let served = ServedRange::resolve(Some(range), file_size);
        if let Some(end) = served.end() {
            assert!(served.start() <= end);
            assert!(end < file_size);
            assert_eq!(served.len(), end - served.start() + 1);
        } else {
            assert_eq!(served.len(), 0);
        }
    }
});
