//! # Posting Buffer
//!
//! In-memory staging between document mutations and the postlist table.
//! Three maps accumulate until a flush folds them into the table in one
//! merge:
//!
//! - `freq_deltas`: per-term signed (df, cf) adjustments
//! - `mod_plists`: per-(term, did) posting edits with an op tag
//! - `doclens`: new document lengths, with a sentinel for deletion
//!
//! ## Posting Op State Machine
//!
//! ```text
//!   absent ──stage_add──────────────> Add(wdf)
//!   absent ──stage_delete───────────> Delete
//!   Add/Modify(wdf) ──stage_delete──> Delete
//!   Delete ──stage_add──────────────> Modify(wdf)
//! ```
//!
//! The Delete -> Modify transition matters: it tells the merger "this
//! pair existed at the last flush and its wdf changed", as opposed to a
//! fresh Add, so reconciliation against committed state stays exact.

use hashbrown::HashMap;

use crate::tables::postlist::{DocLenChanges, FreqDeltas, ModPostlists, PostingOp};
use crate::tables::DOCLEN_DELETED;

#[derive(Debug, Default)]
pub struct PostingBuffer {
    pub freq_deltas: FreqDeltas,
    pub mod_plists: ModPostlists,
    pub doclens: DocLenChanges,
    change_count: usize,
}

impl PostingBuffer {
    pub fn new() -> PostingBuffer {
        PostingBuffer::default()
    }

    /// Document-level changes staged since the last flush.
    pub fn change_count(&self) -> usize {
        self.change_count
    }

    /// Counts one document-level change, returning the running total.
    pub fn bump_change_count(&mut self) -> usize {
        self.change_count += 1;
        self.change_count
    }

    pub fn is_empty(&self) -> bool {
        self.freq_deltas.is_empty() && self.mod_plists.is_empty() && self.doclens.is_empty()
    }

    pub fn clear(&mut self) {
        self.freq_deltas.clear();
        self.mod_plists.clear();
        self.doclens.clear();
        self.change_count = 0;
    }

    /// Stages "term gained a posting in `did` with this wdf".
    pub fn stage_add(&mut self, term: &[u8], did: u32, wdf: u32) {
        let (df, cf) = self.freq_deltas.entry(term.to_vec()).or_insert((0, 0));
        *df += 1;
        *cf += i64::from(wdf);

        let plist = self.mod_plists.entry(term.to_vec()).or_default();
        let op = match plist.get(&did) {
            Some((PostingOp::Delete, _)) => PostingOp::Modify,
            Some((existing, _)) => *existing,
            None => PostingOp::Add,
        };
        plist.insert(did, (op, wdf));
    }

    /// Stages "term lost its posting in `did`", retracting `wdf`.
    pub fn stage_delete(&mut self, term: &[u8], did: u32, wdf: u32) {
        let (df, cf) = self.freq_deltas.entry(term.to_vec()).or_insert((0, 0));
        *df -= 1;
        *cf -= i64::from(wdf);

        self.mod_plists
            .entry(term.to_vec())
            .or_default()
            .insert(did, (PostingOp::Delete, 0));
    }

    pub fn set_doclen(&mut self, did: u32, doclen: u32) {
        self.doclens.insert(did, doclen);
    }

    pub fn mark_deleted(&mut self, did: u32) {
        self.doclens.insert(did, DOCLEN_DELETED);
    }

    /// Buffered doclen for `did`: `Some(None)` means staged-deleted.
    pub fn doclen_overlay(&self, did: u32) -> Option<Option<u32>> {
        self.doclens.get(&did).map(|&len| {
            if len == DOCLEN_DELETED {
                None
            } else {
                Some(len)
            }
        })
    }

    pub fn termfreq_delta(&self, term: &[u8]) -> i32 {
        self.freq_deltas.get(term).map(|d| d.0).unwrap_or(0)
    }

    pub fn collfreq_delta(&self, term: &[u8]) -> i64 {
        self.freq_deltas.get(term).map(|d| d.1).unwrap_or(0)
    }

    /// The buffered ops for one term's posting list, if any.
    pub fn plist_overlay(&self, term: &[u8]) -> Option<&HashMap<u32, (PostingOp, u32)>> {
        self.mod_plists.get(term)
    }
}
