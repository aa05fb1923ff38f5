//! # Spelling Table
//!
//! Word frequencies backing spelling correction. Mutations accumulate
//! as signed deltas in memory and fold into the table when the writer
//! merges (before flush) or when a word list is requested.

use std::ops::{Deref, DerefMut};
use std::path::Path;

use eyre::Result;
use hashbrown::HashMap;

use crate::btree::Table;
use crate::encoding::pack::{pack_uint, unpack_uint};
use crate::error::DbError;

#[derive(Debug)]
pub struct SpellingTable {
    table: Table,
    deltas: HashMap<Vec<u8>, i64>,
}

impl Deref for SpellingTable {
    type Target = Table;
    fn deref(&self) -> &Table {
        &self.table
    }
}

impl DerefMut for SpellingTable {
    fn deref_mut(&mut self) -> &mut Table {
        &mut self.table
    }
}

fn corrupt_spelling() -> eyre::Report {
    DbError::Corrupt("spelling data corrupt".into()).into()
}

impl SpellingTable {
    pub fn new(db_dir: &Path, readonly: bool) -> Self {
        SpellingTable {
            table: Table::new(db_dir, "spelling", readonly),
            deltas: HashMap::new(),
        }
    }

    pub fn add_word(&mut self, word: &[u8], freqinc: u32) {
        *self.deltas.entry(word.to_vec()).or_insert(0) += i64::from(freqinc);
    }

    pub fn remove_word(&mut self, word: &[u8], freqdec: u32) {
        *self.deltas.entry(word.to_vec()).or_insert(0) -= i64::from(freqdec);
    }

    pub fn get_word_frequency(&self, word: &[u8]) -> Result<u32> {
        let committed = match self.table.get_exact_entry(word)? {
            Some(data) => unpack_uint(&data).map_err(|_| corrupt_spelling())?.0 as i64,
            None => 0,
        };
        let delta = self.deltas.get(word).copied().unwrap_or(0);
        Ok((committed + delta).max(0) as u32)
    }

    /// Folds buffered deltas into the table's staged state.
    pub fn merge_changes(&mut self) -> Result<()> {
        if self.deltas.is_empty() {
            return Ok(());
        }
        let deltas = std::mem::take(&mut self.deltas);
        for (word, delta) in deltas {
            let committed = match self.table.get_exact_entry(&word)? {
                Some(data) => unpack_uint(&data).map_err(|_| corrupt_spelling())?.0 as i64,
                None => 0,
            };
            let freq = (committed + delta).max(0);
            if freq == 0 {
                self.table.del(&word)?;
            } else {
                let mut value = Vec::with_capacity(5);
                pack_uint(&mut value, freq as u64);
                self.table.add(&word, &value)?;
            }
        }
        Ok(())
    }

    /// All words with a positive frequency, in order. Merges first so
    /// buffered deltas are visible.
    pub fn word_list(&mut self) -> Result<Vec<(Vec<u8>, u32)>> {
        self.merge_changes()?;
        let mut cursor = self.table.cursor_get()?;
        let mut words = Vec::new();
        while let Some((word, data)) = cursor.next_entry()? {
            let freq = unpack_uint(&data).map_err(|_| corrupt_spelling())?.0 as u32;
            words.push((word, freq));
        }
        Ok(words)
    }

    pub fn has_buffered_changes(&self) -> bool {
        !self.deltas.is_empty()
    }

    pub fn discard_buffered_changes(&mut self) {
        self.deltas.clear();
    }
}
