//! # Packed Unsigned Integers and Sort-Preserving Keys
//!
//! Two integer encodings with different goals share this module:
//!
//! ## Compact form (`pack_uint` / `unpack_uint`)
//!
//! Seven value bits per byte, least-significant group first, bit 7 set on
//! every byte except the last:
//!
//! ```text
//! 0        -> 00
//! 127      -> 7F
//! 128      -> 80 01
//! 16384    -> 80 80 01
//! ```
//!
//! Used for value payloads (posting headers, termlist entries, stats) and
//! for the changeset file format. Not byte-comparable.
//!
//! ## Sort-preserving form (`pack_uint_preserving_sort`)
//!
//! One length byte holding the number of significant bytes, followed by
//! the value big-endian with no leading zeros:
//!
//! ```text
//! 0        -> 00
//! 1        -> 01 01
//! 256      -> 02 01 00
//! ```
//!
//! Lexicographic comparison of encodings equals numeric comparison of the
//! values, so these can form B-tree key components.
//!
//! ## Sort-preserving strings (`pack_string_preserving_sort`)
//!
//! Every `0x00` in the input becomes `0x00 0xFF`, and the encoding ends
//! with the terminator `0x00 0x00`. The terminator sorts below any
//! escaped zero and below every other byte, so packed strings compare in
//! string order even when one is a prefix of another, and a packed string
//! can be followed by further key components without ambiguity. The
//! metadata key prefix `0x00 0xC0` can never collide with a packed
//! string: a packed string only ever contains `0x00` immediately before
//! `0xFF` or another `0x00`.

use eyre::{bail, ensure, Result};

/// Appends `value` in compact form.
pub fn pack_uint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Decodes a compact uint from the front of `buf`, returning the value
/// and the number of bytes consumed.
pub fn unpack_uint(buf: &[u8]) -> Result<(u64, usize)> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    for (i, &b) in buf.iter().enumerate() {
        ensure!(shift < 64, "packed uint too wide");
        let chunk = (b & 0x7f) as u64;
        ensure!(
            shift != 63 || chunk <= 1,
            "packed uint overflows 64 bits"
        );
        value |= chunk << shift;
        if b & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        shift += 7;
    }
    bail!("truncated packed uint")
}

/// Appends `value` in byte-comparable form.
pub fn pack_uint_preserving_sort(buf: &mut Vec<u8>, value: u32) {
    let bytes = value.to_be_bytes();
    let skip = (value.leading_zeros() / 8) as usize;
    buf.push((4 - skip) as u8);
    buf.extend_from_slice(&bytes[skip..]);
}

/// Decodes a byte-comparable uint from the front of `buf`, returning the
/// value and the number of bytes consumed.
pub fn unpack_uint_preserving_sort(buf: &[u8]) -> Result<(u32, usize)> {
    ensure!(!buf.is_empty(), "truncated sortable uint");
    let len = buf[0] as usize;
    ensure!(len <= 4, "invalid sortable uint length {}", len);
    ensure!(buf.len() > len, "truncated sortable uint body");
    let mut value: u32 = 0;
    for &b in &buf[1..=len] {
        value = (value << 8) | b as u32;
    }
    Ok((value, len + 1))
}

/// Appends `s` in byte-comparable form with a `0x00 0x00` terminator.
pub fn pack_string_preserving_sort(buf: &mut Vec<u8>, s: &[u8]) {
    for &b in s {
        buf.push(b);
        if b == 0 {
            buf.push(0xff);
        }
    }
    buf.push(0);
    buf.push(0);
}

/// Decodes a sort-packed string from the front of `buf`, returning the
/// string and the number of bytes consumed.
pub fn unpack_string_preserving_sort(buf: &[u8]) -> Result<(Vec<u8>, usize)> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < buf.len() {
        let b = buf[i];
        if b != 0 {
            out.push(b);
            i += 1;
            continue;
        }
        ensure!(i + 1 < buf.len(), "truncated sort-packed string");
        match buf[i + 1] {
            0x00 => return Ok((out, i + 2)),
            0xff => {
                out.push(0);
                i += 2;
            }
            other => bail!("invalid escape 0x00 0x{:02x} in sort-packed string", other),
        }
    }
    bail!("unterminated sort-packed string")
}
