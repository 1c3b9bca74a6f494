//! Fuzz testing for varint and gap-buffer decoding.
//!
//! Feeds raw bytes to the varint decoder and the gap-set scanner. Both
//! sit at the front of every snapshot and delta stream, so they must
//! reject malformed input with an error, and anything they accept must
//! survive a re-encode unchanged.

#![no_main]

use libfuzzer_sys::fuzz_target;

use stratadb::encoding::{decode_varint, put_varint, varint_len};
use stratadb::OrdinalGapSet;

fuzz_target!(|data: &[u8]| {
    if let Ok((value, used)) = decode_varint(data) {
        let mut canonical = Vec::new();
        put_varint(value, &mut canonical);
        assert_eq!(canonical.len(), varint_len(value));
        // Oversized encodings of small values decode, so `used` can
        // exceed the canonical length but never undercut it.
        assert!(used >= canonical.len());

        let (round, round_used) = decode_varint(&canonical).unwrap();
        assert_eq!(round, value);
        assert_eq!(round_used, canonical.len());
    }

    if let Ok(set) = OrdinalGapSet::from_gap_buffer(data.to_vec()) {
        let ordinals: Vec<i32> = set.iter().collect();
        assert_eq!(ordinals.len(), set.count());
        for pair in ordinals.windows(2) {
            assert!(pair[0] < pair[1]);
        }

        let mut encoded = Vec::new();
        set.encode_into(&mut encoded);
        let (len, used) = decode_varint(&encoded).unwrap();
        assert_eq!(len as usize, data.len());
        assert_eq!(&encoded[used..], data);
    }
});
