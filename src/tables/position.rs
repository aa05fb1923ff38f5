//! # Position Table
//!
//! Stores one entry per (document, term) pair that carries positional
//! information, encoded with the interpolative position codec. Keys are
//! the sort-packed docid followed by the sort-packed term, so cursor
//! order groups every term of a document together.
//!
//! Empty position lists are never stored; deleting the entry is the
//! representation of "no positions".

use std::ops::{Deref, DerefMut};
use std::path::Path;

use eyre::Result;

use crate::btree::Table;
use crate::encoding::pack::{pack_string_preserving_sort, pack_uint_preserving_sort};
use crate::encoding::positions::{decode_positions, encode_positions, position_count};

#[derive(Debug)]
pub struct PositionTable {
    table: Table,
}

impl Deref for PositionTable {
    type Target = Table;
    fn deref(&self) -> &Table {
        &self.table
    }
}

impl DerefMut for PositionTable {
    fn deref_mut(&mut self) -> &mut Table {
        &mut self.table
    }
}

/// Injective key for a (document, term) pair, ordered by document.
pub fn make_key(did: u32, term: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(term.len() + 7);
    pack_uint_preserving_sort(&mut key, did);
    pack_string_preserving_sort(&mut key, term);
    key
}

impl PositionTable {
    pub fn new(db_dir: &Path, readonly: bool) -> Self {
        PositionTable {
            table: Table::new(db_dir, "position", readonly),
        }
    }

    /// Stores `positions` (strictly ascending, non-empty) for the pair.
    pub fn set_positionlist(&mut self, did: u32, term: &[u8], positions: &[u32]) -> Result<()> {
        debug_assert!(!positions.is_empty());
        self.table.add(&make_key(did, term), &encode_positions(positions))
    }

    pub fn delete_positionlist(&mut self, did: u32, term: &[u8]) -> Result<()> {
        self.table.del(&make_key(did, term))
    }

    /// The stored positions; empty when no entry exists.
    pub fn positionlist(&self, did: u32, term: &[u8]) -> Result<Vec<u32>> {
        match self.table.get_exact_entry(&make_key(did, term))? {
            Some(data) => decode_positions(&data),
            None => Ok(Vec::new()),
        }
    }

    /// Entry count without decoding the interior of the list.
    pub fn positionlist_count(&self, did: u32, term: &[u8]) -> Result<u32> {
        match self.table.get_exact_entry(&make_key(did, term))? {
            Some(data) => position_count(&data),
            None => Ok(0),
        }
    }

    pub fn has_positions(&self) -> bool {
        self.table.entry_count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BLOCK_SIZE;
    use tempfile::tempdir;

    #[test]
    fn set_read_count_delete() {
        let dir = tempdir().unwrap();
        let mut table = PositionTable::new(dir.path(), false);
        table.create_and_open(BLOCK_SIZE).unwrap();

        table.set_positionlist(1, b"cat", &[3, 7]).unwrap();
        table.set_positionlist(1, b"dog", &[5]).unwrap();
        table.commit(1, None, None).unwrap();

        assert!(table.has_positions());
        assert_eq!(table.positionlist(1, b"cat").unwrap(), vec![3, 7]);
        assert_eq!(table.positionlist_count(1, b"cat").unwrap(), 2);
        assert_eq!(table.positionlist(1, b"dog").unwrap(), vec![5]);
        assert_eq!(table.positionlist(2, b"cat").unwrap(), Vec::<u32>::new());
        assert_eq!(table.positionlist_count(2, b"cat").unwrap(), 0);

        table.delete_positionlist(1, b"cat").unwrap();
        table.commit(2, None, None).unwrap();
        assert_eq!(table.positionlist(1, b"cat").unwrap(), Vec::<u32>::new());
        assert_eq!(table.positionlist(1, b"dog").unwrap(), vec![5]);
    }

    #[test]
    fn keys_group_by_document() {
        // Same term, different docs: the docid component dominates.
        assert!(make_key(1, b"zebra") < make_key(2, b"apple"));
        // Same doc, terms order lexicographically.
        assert!(make_key(2, b"apple") < make_key(2, b"zebra"));
        // Injective even for adversarial term bytes.
        assert_ne!(make_key(1, b"a\x00b"), make_key(1, b"a"));
    }
}
