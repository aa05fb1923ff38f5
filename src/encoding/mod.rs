//! # Wire and Key Encodings
//!
//! Byte-level codecs shared by every table and by the changeset format.
//! All functions operate on byte slices, allocate nothing beyond the
//! output buffer they are given, and return `eyre::Result` with
//! descriptive messages on truncated or malformed input.
//!
//! ## Module Organization
//!
//! - [`pack`]: variable-length unsigned integers (compact and
//!   sort-preserving variants) and sort-preserving string packing.
//! - [`bitstream`]: bit-granular writer/reader with economical binary
//!   codes and interpolative coding of sorted sequences.
//! - [`positions`]: the position-list codec built on both of the above.

pub mod bitstream;
pub mod pack;
pub mod positions;

pub use bitstream::{BitReader, BitWriter};
pub use pack::{
    pack_string_preserving_sort, pack_uint, pack_uint_preserving_sort, unpack_uint,
};
pub use positions::{decode_positions, encode_positions, position_count};
