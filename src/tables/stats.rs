//! # Aggregate Statistics
//!
//! The per-database counters ranking needs: highest docid ever
//! allocated, total document length, and the doclen/wdf bounds. They
//! live in the postlist table under the empty key and are rewritten on
//! every posting-buffer flush. Document count is not here; it is the
//! record table's entry count.

use eyre::Result;

use crate::encoding::pack::{pack_uint, unpack_uint};

use super::postlist::PostlistTable;

/// Sentinel in the buffered doclen map meaning "document deleted".
pub const DOCLEN_DELETED: u32 = u32::MAX;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseStats {
    last_did: u32,
    total_doclen: u64,
    doclen_lbound: u32,
    doclen_ubound: u32,
    wdf_ubound: u32,
}

impl DatabaseStats {
    pub fn zero(&mut self) {
        *self = DatabaseStats::default();
    }

    pub fn last_did(&self) -> u32 {
        self.last_did
    }

    pub fn set_last_did(&mut self, did: u32) {
        self.last_did = did;
    }

    /// Allocates the next docid.
    pub fn next_did(&mut self) -> u32 {
        self.last_did += 1;
        self.last_did
    }

    pub fn total_doclen(&self) -> u64 {
        self.total_doclen
    }

    pub fn doclen_lower_bound(&self) -> u32 {
        self.doclen_lbound
    }

    pub fn doclen_upper_bound(&self) -> u32 {
        self.doclen_ubound
    }

    pub fn wdf_upper_bound(&self) -> u32 {
        self.wdf_ubound
    }

    pub fn add_document(&mut self, doclen: u32) {
        if self.total_doclen == 0 || doclen < self.doclen_lbound {
            self.doclen_lbound = doclen;
        }
        if doclen > self.doclen_ubound {
            self.doclen_ubound = doclen;
        }
        self.total_doclen += u64::from(doclen);
    }

    pub fn delete_document(&mut self, doclen: u32) {
        self.total_doclen = self.total_doclen.saturating_sub(u64::from(doclen));
    }

    pub fn check_wdf(&mut self, wdf: u32) {
        if wdf > self.wdf_ubound {
            self.wdf_ubound = wdf;
        }
    }

    /// Loads the stats entry; a missing entry means a fresh database.
    pub fn read(&mut self, postlist: &PostlistTable) -> Result<()> {
        match postlist.get_stats_entry()? {
            None => {
                self.zero();
                Ok(())
            }
            Some(data) => {
                let mut at = 0;
                let mut next = || -> Result<u64> {
                    let (v, used) = unpack_uint(&data[at..])?;
                    at += used;
                    Ok(v)
                };
                self.last_did = next()? as u32;
                self.total_doclen = next()?;
                self.doclen_lbound = next()? as u32;
                self.doclen_ubound = next()? as u32;
                self.wdf_ubound = next()? as u32;
                Ok(())
            }
        }
    }

    /// Stages the stats entry into the postlist table.
    pub fn write(&self, postlist: &mut PostlistTable) -> Result<()> {
        let mut buf = Vec::with_capacity(24);
        pack_uint(&mut buf, u64::from(self.last_did));
        pack_uint(&mut buf, self.total_doclen);
        pack_uint(&mut buf, u64::from(self.doclen_lbound));
        pack_uint(&mut buf, u64::from(self.doclen_ubound));
        pack_uint(&mut buf, u64::from(self.wdf_ubound));
        postlist.set_stats_entry(&buf)
    }
}
