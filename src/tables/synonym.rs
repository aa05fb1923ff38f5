//! # Synonym Table
//!
//! Maps a term to its synonym set. Mutations stage whole per-term sets
//! in memory; merging rewrites the affected entries. The value is the
//! sorted synonym list, each entry length-prefixed.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::{Deref, DerefMut};
use std::path::Path;

use eyre::Result;

use crate::btree::Table;
use crate::encoding::pack::{pack_uint, unpack_uint};
use crate::error::DbError;

#[derive(Debug)]
pub struct SynonymTable {
    table: Table,
    staged: BTreeMap<Vec<u8>, BTreeSet<Vec<u8>>>,
}

impl Deref for SynonymTable {
    type Target = Table;
    fn deref(&self) -> &Table {
        &self.table
    }
}

impl DerefMut for SynonymTable {
    fn deref_mut(&mut self) -> &mut Table {
        &mut self.table
    }
}

fn corrupt_synonym() -> eyre::Report {
    DbError::Corrupt("synonym data corrupt".into()).into()
}

fn encode_set(synonyms: &BTreeSet<Vec<u8>>) -> Vec<u8> {
    let mut out = Vec::new();
    for synonym in synonyms {
        pack_uint(&mut out, synonym.len() as u64);
        out.extend_from_slice(synonym);
    }
    out
}

fn decode_set(data: &[u8]) -> Result<BTreeSet<Vec<u8>>> {
    let mut set = BTreeSet::new();
    let mut at = 0;
    while at < data.len() {
        let (len, used) = unpack_uint(&data[at..]).map_err(|_| corrupt_synonym())?;
        at += used;
        let len = len as usize;
        if at + len > data.len() {
            return Err(corrupt_synonym());
        }
        set.insert(data[at..at + len].to_vec());
        at += len;
    }
    Ok(set)
}

impl SynonymTable {
    pub fn new(db_dir: &Path, readonly: bool) -> Self {
        SynonymTable {
            table: Table::new(db_dir, "synonym", readonly),
            staged: BTreeMap::new(),
        }
    }

    fn current_set(&self, term: &[u8]) -> Result<BTreeSet<Vec<u8>>> {
        if let Some(set) = self.staged.get(term) {
            return Ok(set.clone());
        }
        match self.table.get_exact_entry(term)? {
            Some(data) => decode_set(&data),
            None => Ok(BTreeSet::new()),
        }
    }

    pub fn add_synonym(&mut self, term: &[u8], synonym: &[u8]) -> Result<()> {
        let mut set = self.current_set(term)?;
        set.insert(synonym.to_vec());
        self.staged.insert(term.to_vec(), set);
        Ok(())
    }

    pub fn remove_synonym(&mut self, term: &[u8], synonym: &[u8]) -> Result<()> {
        let mut set = self.current_set(term)?;
        set.remove(synonym);
        self.staged.insert(term.to_vec(), set);
        Ok(())
    }

    pub fn clear_synonyms(&mut self, term: &[u8]) {
        self.staged.insert(term.to_vec(), BTreeSet::new());
    }

    pub fn get_synonyms(&self, term: &[u8]) -> Result<Vec<Vec<u8>>> {
        Ok(self.current_set(term)?.into_iter().collect())
    }

    /// Folds staged sets into the table's staged state.
    pub fn merge_changes(&mut self) -> Result<()> {
        if self.staged.is_empty() {
            return Ok(());
        }
        let staged = std::mem::take(&mut self.staged);
        for (term, set) in staged {
            if set.is_empty() {
                self.table.del(&term)?;
            } else {
                self.table.add(&term, &encode_set(&set))?;
            }
        }
        Ok(())
    }

    /// Terms that have synonyms, in order. Merges first.
    pub fn key_list(&mut self) -> Result<Vec<Vec<u8>>> {
        self.merge_changes()?;
        let mut cursor = self.table.cursor_get()?;
        let mut keys = Vec::new();
        while let Some((key, _)) = cursor.next_entry()? {
            keys.push(key);
        }
        Ok(keys)
    }

    pub fn has_buffered_changes(&self) -> bool {
        !self.staged.is_empty()
    }

    pub fn discard_buffered_changes(&mut self) {
        self.staged.clear();
    }
}
