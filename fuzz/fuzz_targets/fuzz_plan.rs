#![no_main]
use libfuzzer_sys::fuzz_target;
use nzb_stream::planner::{plan, PhysicalSegment};

fuzz_target!(|data: &[u8]| {
    if data.len() < 4 {
        return;
    }

    // First four bytes pick the window, the rest describe segments
    let start = u64::from(u16::from_le_bytes([data[0], data[1]]));
    let span = u64::from(u16::from_le_bytes([data[2], data[3]]));
    let end = start + span;

    let segments: Vec<PhysicalSegment> = data[4..]
        .chunks(2)
        .enumerate()
        .map(|(i, c)| {
            let size = u64::from(c[0]) + 1;
            let offset = u64::from(*c.get(1).unwrap_or(&0)) % size;
            PhysicalSegment::new(format!("<{i}@fuzz>"), offset, size)
        })
        .collect();

    let range = plan(start, end, &segments, None);
    let mut covered = 0u64;
    for seg in range.segments() {
        assert!(seg.start <= seg.end);
        assert!(seg.end < seg.segment_size);
        covered += seg.len();
    }
    assert!(covered <= span + 1);
});
