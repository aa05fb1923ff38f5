//! # Value Manager
//!
//! Document value slots and their per-slot statistics. The stored
//! pieces all live in the postlist table (chunk, used-slot and stats
//! key spaces); this module owns their encodings and the in-memory
//! staging that rides along with the posting buffer.
//!
//! ## Staged State
//!
//! - chunk edits: (slot, did) -> value or delete
//! - used-slot sets: did -> slots or delete
//! - slot statistics: slot -> (freq, lower bound, upper bound)
//!
//! Statistics are loaded from the table the first time a slot is
//! touched, adjusted in memory, and written back at merge. Bounds only
//! widen on delete (recomputing them would need a full slot scan), which
//! keeps them conservative but correct.

use std::collections::BTreeMap;

use eyre::Result;
use hashbrown::HashMap;

use crate::document::Document;
use crate::encoding::pack::{pack_uint, unpack_uint};
use crate::error::DbError;

use super::postlist::{doc_slots_key, value_chunk_key, value_stats_key, PostlistTable};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueStats {
    pub freq: u32,
    pub lower_bound: Vec<u8>,
    pub upper_bound: Vec<u8>,
}

fn corrupt_values() -> eyre::Report {
    DbError::Corrupt("value data corrupt".into()).into()
}

fn encode_stats(stats: &ValueStats) -> Vec<u8> {
    let mut out = Vec::new();
    pack_uint(&mut out, u64::from(stats.freq));
    pack_uint(&mut out, stats.lower_bound.len() as u64);
    out.extend_from_slice(&stats.lower_bound);
    pack_uint(&mut out, stats.upper_bound.len() as u64);
    out.extend_from_slice(&stats.upper_bound);
    out
}

fn decode_stats(data: &[u8]) -> Result<ValueStats> {
    let (freq, mut at) = unpack_uint(data).map_err(|_| corrupt_values())?;
    let (lb_len, used) = unpack_uint(&data[at..]).map_err(|_| corrupt_values())?;
    at += used;
    let lb_len = lb_len as usize;
    if at + lb_len > data.len() {
        return Err(corrupt_values());
    }
    let lower_bound = data[at..at + lb_len].to_vec();
    at += lb_len;
    let (ub_len, used) = unpack_uint(&data[at..]).map_err(|_| corrupt_values())?;
    at += used;
    let ub_len = ub_len as usize;
    if at + ub_len > data.len() {
        return Err(corrupt_values());
    }
    let upper_bound = data[at..at + ub_len].to_vec();
    Ok(ValueStats {
        freq: freq as u32,
        lower_bound,
        upper_bound,
    })
}

fn encode_slots(slots: &[u32]) -> Vec<u8> {
    let mut out = Vec::new();
    pack_uint(&mut out, slots.len() as u64);
    for &slot in slots {
        pack_uint(&mut out, u64::from(slot));
    }
    out
}

fn decode_slots(data: &[u8]) -> Result<Vec<u32>> {
    let (count, mut at) = unpack_uint(data).map_err(|_| corrupt_values())?;
    let mut slots = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (slot, used) = unpack_uint(&data[at..]).map_err(|_| corrupt_values())?;
        at += used;
        slots.push(slot as u32);
    }
    Ok(slots)
}

#[derive(Debug, Default)]
pub struct ValueManager {
    chunks: HashMap<(u32, u32), Option<Vec<u8>>>,
    doc_slots: HashMap<u32, Option<Vec<u32>>>,
    stats: HashMap<u32, ValueStats>,
}

impl ValueManager {
    pub fn new() -> ValueManager {
        ValueManager::default()
    }

    pub fn is_modified(&self) -> bool {
        !self.chunks.is_empty() || !self.doc_slots.is_empty() || !self.stats.is_empty()
    }

    /// Drops staged state (reopen or cancel).
    pub fn reset(&mut self) {
        self.chunks.clear();
        self.doc_slots.clear();
        self.stats.clear();
    }

    fn load_stats(&mut self, postlist: &PostlistTable, slot: u32) -> Result<&mut ValueStats> {
        if !self.stats.contains_key(&slot) {
            let stats = match postlist.get_exact_entry(&value_stats_key(slot))? {
                Some(data) => decode_stats(&data)?,
                None => ValueStats::default(),
            };
            self.stats.insert(slot, stats);
        }
        Ok(self.stats.get_mut(&slot).unwrap()) // INVARIANT: inserted above
    }

    fn slots_of(&self, postlist: &PostlistTable, did: u32) -> Result<Vec<u32>> {
        if let Some(staged) = self.doc_slots.get(&did) {
            return Ok(staged.clone().unwrap_or_default());
        }
        match postlist.get_exact_entry(&doc_slots_key(did))? {
            Some(data) => decode_slots(&data),
            None => Ok(Vec::new()),
        }
    }

    pub fn add_document(
        &mut self,
        postlist: &PostlistTable,
        did: u32,
        document: &Document,
    ) -> Result<()> {
        let mut slots = Vec::new();
        for (slot, value) in document.values() {
            let stats = self.load_stats(postlist, slot)?;
            stats.freq += 1;
            if stats.freq == 1 {
                stats.lower_bound = value.to_vec();
                stats.upper_bound = value.to_vec();
            } else {
                if value < stats.lower_bound.as_slice() {
                    stats.lower_bound = value.to_vec();
                }
                if value > stats.upper_bound.as_slice() {
                    stats.upper_bound = value.to_vec();
                }
            }
            self.chunks.insert((slot, did), Some(value.to_vec()));
            slots.push(slot);
        }
        self.doc_slots
            .insert(did, if slots.is_empty() { None } else { Some(slots) });
        Ok(())
    }

    pub fn delete_document(&mut self, postlist: &PostlistTable, did: u32) -> Result<()> {
        for slot in self.slots_of(postlist, did)? {
            let stats = self.load_stats(postlist, slot)?;
            stats.freq = stats.freq.saturating_sub(1);
            self.chunks.insert((slot, did), None);
        }
        self.doc_slots.insert(did, None);
        Ok(())
    }

    pub fn replace_document(
        &mut self,
        postlist: &PostlistTable,
        did: u32,
        document: &Document,
    ) -> Result<()> {
        self.delete_document(postlist, did)?;
        self.add_document(postlist, did, document)
    }

    /// A document's value in `slot`, staged changes included.
    pub fn get_value(&self, postlist: &PostlistTable, did: u32, slot: u32) -> Result<Option<Vec<u8>>> {
        if let Some(staged) = self.chunks.get(&(slot, did)) {
            return Ok(staged.clone());
        }
        postlist.get_exact_entry(&value_chunk_key(slot, did))
    }

    pub fn get_value_stats(&self, postlist: &PostlistTable, slot: u32) -> Result<ValueStats> {
        if let Some(staged) = self.stats.get(&slot) {
            return Ok(staged.clone());
        }
        match postlist.get_exact_entry(&value_stats_key(slot))? {
            Some(data) => decode_stats(&data),
            None => Ok(ValueStats::default()),
        }
    }

    /// All values of one document, staged changes included.
    pub fn document_values(
        &self,
        postlist: &PostlistTable,
        did: u32,
    ) -> Result<BTreeMap<u32, Vec<u8>>> {
        let mut values = BTreeMap::new();
        for slot in self.slots_of(postlist, did)? {
            if let Some(value) = self.get_value(postlist, did, slot)? {
                values.insert(slot, value);
            }
        }
        Ok(values)
    }

    /// Writes staged chunks, slot sets and statistics into the postlist
    /// table's staged state, then clears.
    pub fn merge_changes(&mut self, postlist: &mut PostlistTable) -> Result<()> {
        for ((slot, did), value) in self.chunks.drain() {
            let key = value_chunk_key(slot, did);
            match value {
                Some(value) => postlist.add(&key, &value)?,
                None => postlist.del(&key)?,
            }
        }
        for (did, slots) in self.doc_slots.drain() {
            let key = doc_slots_key(did);
            match slots {
                Some(slots) => postlist.add(&key, &encode_slots(&slots))?,
                None => postlist.del(&key)?,
            }
        }
        for (slot, stats) in self.stats.drain() {
            let key = value_stats_key(slot);
            if stats.freq == 0 {
                postlist.del(&key)?;
            } else {
                postlist.add(&key, &encode_stats(&stats))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BLOCK_SIZE;
    use tempfile::tempdir;

    fn fresh(dir: &std::path::Path) -> PostlistTable {
        let mut table = PostlistTable::new(dir, false);
        table.create_and_open(BLOCK_SIZE).unwrap();
        table
    }

    #[test]
    fn add_merge_read_back() {
        let dir = tempdir().unwrap();
        let mut postlist = fresh(dir.path());
        let mut manager = ValueManager::new();

        let mut doc = Document::new();
        doc.set_value(0, b"apple".to_vec());
        doc.set_value(3, b"zebra".to_vec());
        manager.add_document(&postlist, 1, &doc).unwrap();
        assert!(manager.is_modified());

        // Staged values visible before merge.
        assert_eq!(
            manager.get_value(&postlist, 1, 0).unwrap().unwrap(),
            b"apple"
        );

        manager.merge_changes(&mut postlist).unwrap();
        postlist.commit(1, None, None).unwrap();
        assert!(!manager.is_modified());

        assert_eq!(
            manager.get_value(&postlist, 1, 3).unwrap().unwrap(),
            b"zebra"
        );
        let stats = manager.get_value_stats(&postlist, 0).unwrap();
        assert_eq!(stats.freq, 1);
        assert_eq!(stats.lower_bound, b"apple");
        assert_eq!(stats.upper_bound, b"apple");
    }

    #[test]
    fn bounds_widen_across_documents() {
        let dir = tempdir().unwrap();
        let mut postlist = fresh(dir.path());
        let mut manager = ValueManager::new();

        for (did, value) in [(1u32, b"m".as_slice()), (2, b"a"), (3, b"z")] {
            let mut doc = Document::new();
            doc.set_value(0, value.to_vec());
            manager.add_document(&postlist, did, &doc).unwrap();
        }
        manager.merge_changes(&mut postlist).unwrap();
        postlist.commit(1, None, None).unwrap();

        let stats = manager.get_value_stats(&postlist, 0).unwrap();
        assert_eq!(stats.freq, 3);
        assert_eq!(stats.lower_bound, b"a");
        assert_eq!(stats.upper_bound, b"z");
    }

    #[test]
    fn delete_document_drops_chunks_and_freq() {
        let dir = tempdir().unwrap();
        let mut postlist = fresh(dir.path());
        let mut manager = ValueManager::new();

        let mut doc = Document::new();
        doc.set_value(2, b"v".to_vec());
        manager.add_document(&postlist, 1, &doc).unwrap();
        manager.merge_changes(&mut postlist).unwrap();
        postlist.commit(1, None, None).unwrap();

        manager.delete_document(&postlist, 1).unwrap();
        manager.merge_changes(&mut postlist).unwrap();
        postlist.commit(2, None, None).unwrap();

        assert_eq!(manager.get_value(&postlist, 1, 2).unwrap(), None);
        assert_eq!(manager.get_value_stats(&postlist, 2).unwrap().freq, 0);
        assert!(manager
            .document_values(&postlist, 1)
            .unwrap()
            .is_empty());
    }
}
