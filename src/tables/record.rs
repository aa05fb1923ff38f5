//! # Record Table
//!
//! Stores each document's opaque data bytes keyed by docid. Two extra
//! duties fall on it: its entry count is the database's document count,
//! and, because the coordinator commits it last, its committed
//! revision is the anchor every reader opens against.

use std::ops::{Deref, DerefMut};
use std::path::Path;

use eyre::Result;

use crate::btree::Table;
use crate::encoding::pack::pack_uint_preserving_sort;
use crate::error::DbError;

#[derive(Debug)]
pub struct RecordTable {
    table: Table,
}

impl Deref for RecordTable {
    type Target = Table;
    fn deref(&self) -> &Table {
        &self.table
    }
}

impl DerefMut for RecordTable {
    fn deref_mut(&mut self) -> &mut Table {
        &mut self.table
    }
}

fn record_key(did: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(5);
    pack_uint_preserving_sort(&mut key, did);
    key
}

impl RecordTable {
    pub fn new(db_dir: &Path, readonly: bool) -> Self {
        RecordTable {
            table: Table::new(db_dir, "record", readonly),
        }
    }

    pub fn replace_record(&mut self, data: &[u8], did: u32) -> Result<()> {
        self.table.add(&record_key(did), data)
    }

    /// Fails with the DocNotFound kind when the document is absent.
    pub fn delete_record(&mut self, did: u32) -> Result<()> {
        if self.table.get_exact_entry(&record_key(did))?.is_none() {
            return Err(DbError::DocNotFound(did).into());
        }
        self.table.del(&record_key(did))
    }

    pub fn get_record(&self, did: u32) -> Result<Vec<u8>> {
        self.table
            .get_exact_entry(&record_key(did))?
            .ok_or_else(|| DbError::DocNotFound(did).into())
    }

    pub fn get_doccount(&self) -> u32 {
        self.table.entry_count() as u32
    }
}
