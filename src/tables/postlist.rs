//! # Postlist Table
//!
//! The busiest of the six tables. Its key space is partitioned into
//! pairwise prefix-disjoint regions:
//!
//! ```text
//! ""                               aggregate statistics entry
//! 0x00 0xC0 <user-key>             user metadata
//! 0x00 0xD0 <did>                  document length
//! 0x00 0xE0 <slot>                 value-slot statistics
//! 0x00 0xE8 <slot> <did>           per-document value chunk
//! 0x00 0xF0 <did>                  slots used by a document
//! sort-packed term                 posting list
//! ```
//!
//! A sort-packed term never produces a bare `0x00` followed by anything
//! but `0x00` or `0xFF`, so term keys cannot collide with the reserved
//! prefixes even for terms that begin with a zero byte.
//!
//! ## Posting-List Value
//!
//! ```text
//! pack_uint(df) pack_uint(cf) pack_uint(last_did)
//! then per posting, ascending: pack_uint(did_delta) pack_uint(wdf)
//! ```
//!
//! The header makes term frequency and collection frequency readable
//! without touching the postings.
//!
//! ## Merging Buffered Changes
//!
//! `merge_changes` folds the posting buffer's staged maps into this
//! table: doclen rewrites (with the deleted sentinel turning into a
//! delete), then per term the committed list is decoded, the 'A'/'M'/'D'
//! ops applied, frequencies adjusted by the buffered deltas, and the
//! list re-encoded, or removed outright when no postings remain.

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::path::Path;

use eyre::{ensure, Result};
use hashbrown::HashMap;
use tracing::debug;

use crate::btree::{Cursor, Table};
use crate::encoding::pack::{
    pack_string_preserving_sort, pack_uint, pack_uint_preserving_sort, unpack_string_preserving_sort,
    unpack_uint,
};
use crate::error::DbError;

use super::stats::DOCLEN_DELETED;

/// Reserved key prefix for user metadata.
pub const METADATA_PREFIX: [u8; 2] = [0x00, 0xc0];
const DOCLEN_PREFIX: [u8; 2] = [0x00, 0xd0];
const VALUE_STATS_PREFIX: [u8; 2] = [0x00, 0xe0];
const VALUE_CHUNK_PREFIX: [u8; 2] = [0x00, 0xe8];
const DOC_SLOTS_PREFIX: [u8; 2] = [0x00, 0xf0];

/// How a buffered posting edit reconciles against committed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostingOp {
    /// Fresh posting; the pair was absent at the last flush.
    Add,
    /// The pair existed, was marked deleted, and was re-added.
    Modify,
    /// The pair is gone.
    Delete,
}

/// term -> did -> (op, wdf)
pub type ModPostlists = HashMap<Vec<u8>, HashMap<u32, (PostingOp, u32)>>;
/// term -> (document-frequency delta, collection-frequency delta)
pub type FreqDeltas = HashMap<Vec<u8>, (i32, i64)>;
/// did -> new doclen, or [`DOCLEN_DELETED`]
pub type DocLenChanges = HashMap<u32, u32>;

#[derive(Debug)]
pub struct PostlistTable {
    table: Table,
}

impl Deref for PostlistTable {
    type Target = Table;
    fn deref(&self) -> &Table {
        &self.table
    }
}

impl DerefMut for PostlistTable {
    fn deref_mut(&mut self) -> &mut Table {
        &mut self.table
    }
}

pub fn term_key(term: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(term.len() + 2);
    pack_string_preserving_sort(&mut key, term);
    key
}

fn doclen_key(did: u32) -> Vec<u8> {
    let mut key = DOCLEN_PREFIX.to_vec();
    pack_uint_preserving_sort(&mut key, did);
    key
}

pub fn value_stats_key(slot: u32) -> Vec<u8> {
    let mut key = VALUE_STATS_PREFIX.to_vec();
    pack_uint_preserving_sort(&mut key, slot);
    key
}

pub fn value_chunk_key(slot: u32, did: u32) -> Vec<u8> {
    let mut key = VALUE_CHUNK_PREFIX.to_vec();
    pack_uint_preserving_sort(&mut key, slot);
    pack_uint_preserving_sort(&mut key, did);
    key
}

pub fn doc_slots_key(did: u32) -> Vec<u8> {
    let mut key = DOC_SLOTS_PREFIX.to_vec();
    pack_uint_preserving_sort(&mut key, did);
    key
}

fn encode_posting_list(df: u32, cf: u64, postings: &BTreeMap<u32, u32>) -> Vec<u8> {
    let last_did = postings.keys().next_back().copied().unwrap_or(0);
    let mut out = Vec::with_capacity(12 + postings.len() * 3);
    pack_uint(&mut out, u64::from(df));
    pack_uint(&mut out, cf);
    pack_uint(&mut out, u64::from(last_did));
    let mut prev = 0u32;
    for (&did, &wdf) in postings {
        pack_uint(&mut out, u64::from(did - prev));
        pack_uint(&mut out, u64::from(wdf));
        prev = did;
    }
    out
}

fn corrupt_postlist() -> eyre::Report {
    DbError::Corrupt("posting list data corrupt".into()).into()
}

fn decode_posting_header(data: &[u8]) -> Result<(u32, u64, usize)> {
    let (df, a) = unpack_uint(data).map_err(|_| corrupt_postlist())?;
    let (cf, b) = unpack_uint(&data[a..]).map_err(|_| corrupt_postlist())?;
    let (_last, c) = unpack_uint(&data[a + b..]).map_err(|_| corrupt_postlist())?;
    Ok((df as u32, cf, a + b + c))
}

fn decode_posting_list(data: &[u8]) -> Result<(u32, u64, BTreeMap<u32, u32>)> {
    let (df, cf, mut at) = decode_posting_header(data)?;
    let mut postings = BTreeMap::new();
    let mut prev = 0u32;
    while at < data.len() {
        let (delta, a) = unpack_uint(&data[at..]).map_err(|_| corrupt_postlist())?;
        at += a;
        let (wdf, b) = unpack_uint(&data[at..]).map_err(|_| corrupt_postlist())?;
        at += b;
        let did = prev
            .checked_add(delta as u32)
            .ok_or_else(corrupt_postlist)?;
        postings.insert(did, wdf as u32);
        prev = did;
    }
    Ok((df, cf, postings))
}

impl PostlistTable {
    pub fn new(db_dir: &Path, readonly: bool) -> Self {
        PostlistTable {
            table: Table::new(db_dir, "postlist", readonly),
        }
    }

    // ---- aggregate stats entry ----

    pub fn get_stats_entry(&self) -> Result<Option<Vec<u8>>> {
        self.table.get_exact_entry(b"")
    }

    pub fn set_stats_entry(&mut self, data: &[u8]) -> Result<()> {
        self.table.add(b"", data)
    }

    // ---- term postings ----

    pub fn get_termfreq(&self, term: &[u8]) -> Result<u32> {
        match self.table.get_exact_entry(&term_key(term))? {
            Some(data) => Ok(decode_posting_header(&data)?.0),
            None => Ok(0),
        }
    }

    pub fn get_collection_freq(&self, term: &[u8]) -> Result<u64> {
        match self.table.get_exact_entry(&term_key(term))? {
            Some(data) => Ok(decode_posting_header(&data)?.1),
            None => Ok(0),
        }
    }

    pub fn term_exists(&self, term: &[u8]) -> Result<bool> {
        Ok(self.table.get_exact_entry(&term_key(term))?.is_some())
    }

    /// Decoded posting list, ascending by docid.
    pub fn postings(&self, term: &[u8]) -> Result<Vec<(u32, u32)>> {
        match self.table.get_exact_entry(&term_key(term))? {
            Some(data) => {
                let (_, _, postings) = decode_posting_list(&data)?;
                Ok(postings.into_iter().collect())
            }
            None => Ok(Vec::new()),
        }
    }

    // ---- document lengths ----

    pub fn get_doclength(&self, did: u32) -> Result<Option<u32>> {
        match self.table.get_exact_entry(&doclen_key(did))? {
            Some(data) => {
                let (len, _) = unpack_uint(&data).map_err(|_| corrupt_postlist())?;
                Ok(Some(len as u32))
            }
            None => Ok(None),
        }
    }

    pub fn document_exists(&self, did: u32) -> Result<bool> {
        Ok(self.table.get_exact_entry(&doclen_key(did))?.is_some())
    }

    // ---- user metadata ----

    pub fn get_metadata(&self, key: &[u8]) -> Result<Vec<u8>> {
        let mut btree_key = METADATA_PREFIX.to_vec();
        btree_key.extend_from_slice(key);
        Ok(self.table.get_exact_entry(&btree_key)?.unwrap_or_default())
    }

    /// An empty value deletes the key.
    pub fn set_metadata(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut btree_key = METADATA_PREFIX.to_vec();
        btree_key.extend_from_slice(key);
        if value.is_empty() {
            self.table.del(&btree_key)
        } else {
            self.table.add(&btree_key, value)
        }
    }

    /// Metadata keys in order, with the reserved prefix stripped.
    pub fn metadata_keys(&self) -> Result<Vec<Vec<u8>>> {
        let mut cursor = self.table.cursor_get()?;
        let mut keys = Vec::new();
        while let Some((key, _)) = cursor.next_entry()? {
            if key.starts_with(&METADATA_PREFIX) {
                keys.push(key[METADATA_PREFIX.len()..].to_vec());
            }
        }
        Ok(keys)
    }

    // ---- merge ----

    /// Folds buffered posting changes into the table's staged state.
    pub fn merge_changes(
        &mut self,
        mod_plists: &ModPostlists,
        doclens: &DocLenChanges,
        freq_deltas: &FreqDeltas,
    ) -> Result<()> {
        for (&did, &len) in doclens {
            let key = doclen_key(did);
            if len == DOCLEN_DELETED {
                self.table.del(&key)?;
            } else {
                let mut value = Vec::with_capacity(5);
                pack_uint(&mut value, u64::from(len));
                self.table.add(&key, &value)?;
            }
        }

        for (term, ops) in mod_plists {
            let key = term_key(term);
            let (mut df, mut cf, mut postings) = match self.table.get_exact_entry(&key)? {
                Some(data) => decode_posting_list(&data)?,
                None => (0, 0, BTreeMap::new()),
            };

            let (df_delta, cf_delta) = freq_deltas.get(term).copied().unwrap_or((0, 0));
            df = (i64::from(df) + i64::from(df_delta)).max(0) as u32;
            cf = (cf as i64 + cf_delta).max(0) as u64;

            for (&did, &(op, wdf)) in ops {
                ensure!(did != 0, "posting for reserved docid 0");
                match op {
                    PostingOp::Delete => {
                        postings.remove(&did);
                    }
                    PostingOp::Add | PostingOp::Modify => {
                        postings.insert(did, wdf);
                    }
                }
            }

            if postings.is_empty() {
                self.table.del(&key)?;
            } else {
                self.table.add(&key, &encode_posting_list(df, cf, &postings))?;
            }
        }
        debug!(
            terms = mod_plists.len(),
            doclens = doclens.len(),
            "merged posting changes"
        );
        Ok(())
    }

    /// Ordered iteration over every indexed term.
    pub fn term_iter(&self) -> Result<TermIter<'_>> {
        Ok(TermIter {
            cursor: self.table.cursor_get()?,
        })
    }
}

/// Iterates (term, df, cf) over the postlist table's term region.
pub struct TermIter<'a> {
    cursor: Cursor<'a>,
}

impl<'a> TermIter<'a> {
    pub fn next_term(&mut self) -> Result<Option<(Vec<u8>, u32, u64)>> {
        while let Some((key, value)) = self.cursor.next_entry()? {
            if key.is_empty() {
                continue;
            }
            // Reserved prefixes are 0x00 followed by a non-0xFF byte; a
            // sort-packed term starting with 0x00 escapes it as 0x00 0xFF.
            if key[0] == 0 && key.get(1) != Some(&0xff) {
                continue;
            }
            let (term, _) = unpack_string_preserving_sort(&key)?;
            let (df, cf, _) = decode_posting_header(&value)?;
            return Ok(Some((term, df, cf)));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BLOCK_SIZE;
    use tempfile::tempdir;

    fn fresh(dir: &Path) -> PostlistTable {
        let mut table = PostlistTable::new(dir, false);
        table.create_and_open(BLOCK_SIZE).unwrap();
        table
    }

    fn plist(entries: &[(u32, u32)]) -> HashMap<u32, (PostingOp, u32)> {
        entries
            .iter()
            .map(|&(did, wdf)| (did, (PostingOp::Add, wdf)))
            .collect()
    }

    #[test]
    fn merge_then_read_frequencies_and_postings() {
        let dir = tempdir().unwrap();
        let mut table = fresh(dir.path());

        let mut mods = ModPostlists::new();
        mods.insert(b"cat".to_vec(), plist(&[(1, 2), (3, 5)]));
        let mut freqs = FreqDeltas::new();
        freqs.insert(b"cat".to_vec(), (2, 7));
        let mut doclens = DocLenChanges::new();
        doclens.insert(1, 2);
        doclens.insert(3, 5);

        table.merge_changes(&mods, &doclens, &freqs).unwrap();
        table.commit(1, None, None).unwrap();

        assert_eq!(table.get_termfreq(b"cat").unwrap(), 2);
        assert_eq!(table.get_collection_freq(b"cat").unwrap(), 7);
        assert_eq!(table.postings(b"cat").unwrap(), vec![(1, 2), (3, 5)]);
        assert_eq!(table.get_doclength(1).unwrap(), Some(2));
        assert_eq!(table.get_doclength(2).unwrap(), None);
        assert_eq!(table.get_termfreq(b"dog").unwrap(), 0);
    }

    #[test]
    fn delete_ops_remove_postings_and_empty_lists() {
        let dir = tempdir().unwrap();
        let mut table = fresh(dir.path());

        let mut mods = ModPostlists::new();
        mods.insert(b"cat".to_vec(), plist(&[(1, 2)]));
        let mut freqs = FreqDeltas::new();
        freqs.insert(b"cat".to_vec(), (1, 2));
        table
            .merge_changes(&mods, &DocLenChanges::new(), &freqs)
            .unwrap();
        table.commit(1, None, None).unwrap();

        let mut mods = ModPostlists::new();
        let mut ops = HashMap::new();
        ops.insert(1u32, (PostingOp::Delete, 0u32));
        mods.insert(b"cat".to_vec(), ops);
        let mut freqs = FreqDeltas::new();
        freqs.insert(b"cat".to_vec(), (-1, -2));
        let mut doclens = DocLenChanges::new();
        doclens.insert(1, DOCLEN_DELETED);
        table.merge_changes(&mods, &doclens, &freqs).unwrap();
        table.commit(2, None, None).unwrap();

        assert_eq!(table.get_termfreq(b"cat").unwrap(), 0);
        assert!(!table.term_exists(b"cat").unwrap());
        assert_eq!(table.get_doclength(1).unwrap(), None);
    }

    #[test]
    fn metadata_lives_under_reserved_prefix() {
        let dir = tempdir().unwrap();
        let mut table = fresh(dir.path());
        table.set_metadata(b"note", b"hello").unwrap();

        let mut mods = ModPostlists::new();
        mods.insert(b"note".to_vec(), plist(&[(1, 1)]));
        let mut freqs = FreqDeltas::new();
        freqs.insert(b"note".to_vec(), (1, 1));
        table
            .merge_changes(&mods, &DocLenChanges::new(), &freqs)
            .unwrap();
        table.commit(1, None, None).unwrap();

        // The metadata key and the identically named term coexist.
        assert_eq!(table.get_metadata(b"note").unwrap(), b"hello");
        assert_eq!(table.get_termfreq(b"note").unwrap(), 1);

        table.set_metadata(b"note", b"").unwrap();
        table.commit(2, None, None).unwrap();
        assert_eq!(table.get_metadata(b"note").unwrap(), b"");
        assert_eq!(table.metadata_keys().unwrap().len(), 0);
    }

    #[test]
    fn term_iter_skips_reserved_regions() {
        let dir = tempdir().unwrap();
        let mut table = fresh(dir.path());
        table.set_metadata(b"m", b"x").unwrap();
        table.set_stats_entry(b"\x01\x02\x00\x00\x00").unwrap();

        let mut mods = ModPostlists::new();
        mods.insert(b"apple".to_vec(), plist(&[(1, 1)]));
        mods.insert(b"\x00weird".to_vec(), plist(&[(2, 3)]));
        let mut freqs = FreqDeltas::new();
        freqs.insert(b"apple".to_vec(), (1, 1));
        freqs.insert(b"\x00weird".to_vec(), (1, 3));
        let mut doclens = DocLenChanges::new();
        doclens.insert(1, 1);
        doclens.insert(2, 3);
        table.merge_changes(&mods, &doclens, &freqs).unwrap();
        table.commit(1, None, None).unwrap();

        let mut terms = Vec::new();
        let mut iter = table.term_iter().unwrap();
        while let Some((term, df, cf)) = iter.next_term().unwrap() {
            terms.push((term, df, cf));
        }
        assert_eq!(
            terms,
            vec![
                (b"\x00weird".to_vec(), 1, 3),
                (b"apple".to_vec(), 1, 1),
            ]
        );
    }
}
