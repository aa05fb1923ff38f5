//! Fuzz testing for the position-list decoder.
//!
//! Feeds arbitrary byte sequences to the decoder and the count fast
//! path to ensure malformed input is rejected gracefully without
//! panicking, and that well-formed input re-encodes to the same list.

#![no_main]

use libfuzzer_sys::fuzz_target;

use chert::encoding::positions::{decode_positions, encode_positions, position_count};

fuzz_target!(|data: &[u8]| {
    // Cap the declared sizes the decoder may allocate for.
    if data.len() > 1 << 16 {
        return;
    }
    if let Ok(count) = position_count(data) {
        if count > 1 << 20 {
            return;
        }
    }

    match decode_positions(data) {
        Err(_) => {
            // Rejected input must also be rejected by the count path or
            // at least not panic there.
            let _ = position_count(data);
        }
        Ok(positions) => {
            assert!(!positions.is_empty());
            assert!(positions.windows(2).all(|w| w[0] < w[1]));
            if let Ok(count) = position_count(data) {
                assert_eq!(count as usize, positions.len());
            }
            // Re-encoding a decoded list must round-trip.
            let encoded = encode_positions(&positions);
            assert_eq!(decode_positions(&encoded).unwrap(), positions);
        }
    }
});
