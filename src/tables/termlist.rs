//! # Termlist Table
//!
//! Maps a docid to the document's term vector: the stored doclen plus
//! every (term, wdf) pair in term order. Document deletion and
//! replacement walk this table to find which postings to retract; a
//! database without it cannot delete or modify documents.
//!
//! ## Value Layout
//!
//! ```text
//! pack_uint(doclen) pack_uint(n)
//! then n times: pack_uint(wdf) pack_uint(term_len) term bytes
//! ```

use std::ops::{Deref, DerefMut};
use std::path::Path;

use eyre::Result;

use crate::btree::Table;
use crate::document::Document;
use crate::encoding::pack::{pack_uint, pack_uint_preserving_sort, unpack_uint};
use crate::error::DbError;

#[derive(Debug)]
pub struct TermlistTable {
    table: Table,
}

impl Deref for TermlistTable {
    type Target = Table;
    fn deref(&self) -> &Table {
        &self.table
    }
}

impl DerefMut for TermlistTable {
    fn deref_mut(&mut self) -> &mut Table {
        &mut self.table
    }
}

/// A decoded termlist entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermList {
    pub doclen: u32,
    pub terms: Vec<(Vec<u8>, u32)>,
}

fn termlist_key(did: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(5);
    pack_uint_preserving_sort(&mut key, did);
    key
}

fn corrupt_termlist() -> eyre::Report {
    DbError::Corrupt("termlist data corrupt".into()).into()
}

impl TermlistTable {
    pub fn new(db_dir: &Path, readonly: bool) -> Self {
        TermlistTable {
            table: Table::new(db_dir, "termlist", readonly),
        }
    }

    pub fn set_termlist(&mut self, did: u32, document: &Document, doclen: u32) -> Result<()> {
        let mut value = Vec::new();
        pack_uint(&mut value, u64::from(doclen));
        pack_uint(&mut value, document.term_count() as u64);
        for (term, data) in document.terms() {
            pack_uint(&mut value, u64::from(data.wdf));
            pack_uint(&mut value, term.len() as u64);
            value.extend_from_slice(term);
        }
        self.table.add(&termlist_key(did), &value)
    }

    pub fn delete_termlist(&mut self, did: u32) -> Result<()> {
        self.table.del(&termlist_key(did))
    }

    pub fn get_termlist(&self, did: u32) -> Result<Option<TermList>> {
        let data = match self.table.get_exact_entry(&termlist_key(did))? {
            Some(data) => data,
            None => return Ok(None),
        };

        let (doclen, mut at) = unpack_uint(&data).map_err(|_| corrupt_termlist())?;
        let (count, used) = unpack_uint(&data[at..]).map_err(|_| corrupt_termlist())?;
        at += used;

        let mut terms = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let (wdf, used) = unpack_uint(&data[at..]).map_err(|_| corrupt_termlist())?;
            at += used;
            let (term_len, used) = unpack_uint(&data[at..]).map_err(|_| corrupt_termlist())?;
            at += used;
            let term_len = term_len as usize;
            if at + term_len > data.len() {
                return Err(corrupt_termlist());
            }
            terms.push((data[at..at + term_len].to_vec(), wdf as u32));
            at += term_len;
        }
        Ok(Some(TermList {
            doclen: doclen as u32,
            terms,
        }))
    }
}
