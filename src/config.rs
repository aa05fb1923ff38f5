//! # Engine Configuration Constants
//!
//! Centralized constants for the storage engine. Interdependent values are
//! co-located and their relationships documented so they cannot drift apart.
//!
//! ## Dependency Graph
//!
//! ```text
//! BLOCK_SIZE (8192 bytes)
//!       │
//!       ├─> BLOCK_HEADER_SIZE (12 bytes, fixed)
//!       │
//!       ├─> MAX_KEY_LENGTH (252)
//!       │     A leaf cell must fit several keys per block; 252 matches the
//!       │     key-length byte budget of the cell format.
//!       │
//!       └─> MAX_SAFE_TERM_LENGTH (derived: 252 - 2 - 1 - 4 = 245)
//!             A postlist key is the sort-packed term (2-byte terminator)
//!             plus a length byte plus up to 4 bytes of docid. Terms
//!             containing zero bytes lose one more byte per zero to the
//!             escape sequence.
//! ```
//!
//! ## Environment Overrides
//!
//! Two variables are honored, read once when a writer is constructed:
//!
//! - `XAPIAN_MAX_CHANGESETS`: when parsed > 0, changeset files are written
//!   on every commit. The value is kept as a retention hint; old changeset
//!   files are never deleted by the engine.
//! - `XAPIAN_FLUSH_THRESHOLD`: overrides [`DEFAULT_FLUSH_THRESHOLD`] for
//!   the posting buffer's auto-flush trigger.

/// Size of one B-tree block on disk.
pub const BLOCK_SIZE: usize = 8192;

/// Bytes reserved at the start of every block for the block header.
pub const BLOCK_HEADER_SIZE: usize = 12;

/// Hard cap on B-tree key length.
pub const MAX_KEY_LENGTH: usize = 252;

/// Longest term that can be indexed. Derived from [`MAX_KEY_LENGTH`]:
/// 252 - 2 (terminator) - 1 (length byte) - 4 (docid) = 245. Terms with
/// embedded zero bytes lose one further byte per zero.
pub const MAX_SAFE_TERM_LENGTH: usize = 245;

/// Document-level changes buffered before the posting buffer flushes
/// itself, unless `XAPIAN_FLUSH_THRESHOLD` overrides it.
pub const DEFAULT_FLUSH_THRESHOLD: usize = 10_000;

/// Attempts made to open every table at the record table's revision
/// before giving up with a Modified error. Count-based on purpose; a
/// time-based bound would change the observable error taxonomy.
pub const CONSISTENT_OPEN_RETRIES: usize = 100;

/// Whole-database copies allowed in one replication conversation. Bounds
/// the conversation under rapid revision churn.
pub const MAX_DB_COPIES_PER_CONVERSATION: usize = 5;

/// Magic string opening every changeset file.
pub const CHANGES_MAGIC: &[u8] = b"chert-revision-changes\n";

/// Changeset format version. Mismatches fail open.
pub const CHANGES_VERSION: u32 = 1;

/// Name of the format-marker file in the database directory.
pub const VERSION_FILE_NAME: &str = "iamchert";

/// Name of the writer's exclusive lock file. Kept stable so two engine
/// builds pointed at one directory contend on the same lock.
pub const LOCK_FILE_NAME: &str = "flintlock";

/// The six tables, in no particular order. Commit and changeset streaming
/// orders are fixed by the coordinator, not by this list.
pub const TABLE_NAMES: [&str; 6] = [
    "postlist", "position", "termlist", "record", "spelling", "synonym",
];

/// Reads `XAPIAN_FLUSH_THRESHOLD`, falling back to the default on absence
/// or garbage.
pub fn flush_threshold_from_env() -> usize {
    match std::env::var("XAPIAN_FLUSH_THRESHOLD") {
        Ok(v) => match v.trim().parse::<usize>() {
            Ok(n) if n > 0 => n,
            _ => DEFAULT_FLUSH_THRESHOLD,
        },
        Err(_) => DEFAULT_FLUSH_THRESHOLD,
    }
}

/// Reads `XAPIAN_MAX_CHANGESETS`. Zero means changeset generation is off.
pub fn max_changesets_from_env() -> u32 {
    match std::env::var("XAPIAN_MAX_CHANGESETS") {
        Ok(v) => v.trim().parse::<u32>().unwrap_or(0),
        Err(_) => 0,
    }
}

const _: () = assert!(MAX_SAFE_TERM_LENGTH == MAX_KEY_LENGTH - 2 - 1 - 4);
const _: () = assert!(BLOCK_HEADER_SIZE < BLOCK_SIZE);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_length_cap_matches_key_budget() {
        assert_eq!(MAX_SAFE_TERM_LENGTH, 245);
    }

    #[test]
    fn flush_threshold_default_without_env() {
        std::env::remove_var("XAPIAN_FLUSH_THRESHOLD");
        assert_eq!(flush_threshold_from_env(), DEFAULT_FLUSH_THRESHOLD);
    }
}
