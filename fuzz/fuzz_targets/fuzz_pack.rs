//! Fuzz testing for the packed-uint decoders.
//!
//! Arbitrary bytes must never panic the compact or sort-preserving
//! decoders, and anything they accept must re-encode identically.

#![no_main]

use libfuzzer_sys::fuzz_target;

use chert::encoding::pack::{
    pack_string_preserving_sort, pack_uint, unpack_string_preserving_sort, unpack_uint,
    unpack_uint_preserving_sort,
};

fuzz_target!(|data: &[u8]| {
    if let Ok((value, used)) = unpack_uint(data) {
        let mut buf = Vec::new();
        pack_uint(&mut buf, value);
        // Canonical encodings round-trip byte-for-byte.
        if buf.len() == used {
            assert_eq!(&buf[..], &data[..used]);
        }
    }

    let _ = unpack_uint_preserving_sort(data);

    if let Ok((s, used)) = unpack_string_preserving_sort(data) {
        let mut buf = Vec::new();
        pack_string_preserving_sort(&mut buf, &s);
        assert_eq!(&buf[..], &data[..used]);
    }
});
