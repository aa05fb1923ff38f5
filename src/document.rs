//! # Document Model
//!
//! A [`Document`] is what callers index: opaque data bytes, a termlist
//! (term -> within-document frequency plus optional positions), and
//! numbered value slots.
//!
//! ## Origin Tracking
//!
//! A document loaded from a database remembers where it came from
//! (database UUID + docid) and tracks which of its three categories has
//! been touched since loading. `replace_document` uses this to skip
//! rewriting untouched categories when a document is stored back into
//! the database it was read from.

use std::collections::BTreeMap;

use smallvec::SmallVec;

/// Per-term payload: wdf plus the sorted position list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TermData {
    pub wdf: u32,
    pub positions: SmallVec<[u32; 4]>,
}

/// Identity of the database copy a document was loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocOrigin {
    pub db_uuid: String,
    pub did: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Document {
    data: Vec<u8>,
    terms: BTreeMap<Vec<u8>, TermData>,
    values: BTreeMap<u32, Vec<u8>>,
    origin: Option<DocOrigin>,
    terms_modified: bool,
    data_modified: bool,
    values_modified: bool,
}

impl Document {
    pub fn new() -> Document {
        Document::default()
    }

    /// Reconstructs a document as loaded from a database. All dirty
    /// bits start clear.
    pub(crate) fn from_db(
        db_uuid: String,
        did: u32,
        data: Vec<u8>,
        terms: BTreeMap<Vec<u8>, TermData>,
        values: BTreeMap<u32, Vec<u8>>,
    ) -> Document {
        Document {
            data,
            terms,
            values,
            origin: Some(DocOrigin { db_uuid, did }),
            terms_modified: false,
            data_modified: false,
            values_modified: false,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn set_data(&mut self, data: impl Into<Vec<u8>>) {
        self.data = data.into();
        self.data_modified = true;
    }

    /// Raises a term's wdf by `wdf_inc`, creating the term if needed.
    pub fn add_term(&mut self, term: impl AsRef<[u8]>, wdf_inc: u32) {
        let entry = self.terms.entry(term.as_ref().to_vec()).or_default();
        entry.wdf += wdf_inc;
        self.terms_modified = true;
    }

    /// Adds one position occurrence, raising wdf by one.
    pub fn add_posting(&mut self, term: impl AsRef<[u8]>, position: u32) {
        let entry = self.terms.entry(term.as_ref().to_vec()).or_default();
        entry.wdf += 1;
        match entry.positions.binary_search(&position) {
            Ok(_) => {}
            Err(idx) => entry.positions.insert(idx, position),
        }
        self.terms_modified = true;
    }

    pub fn remove_term(&mut self, term: impl AsRef<[u8]>) -> bool {
        let removed = self.terms.remove(term.as_ref()).is_some();
        if removed {
            self.terms_modified = true;
        }
        removed
    }

    pub fn terms(&self) -> impl Iterator<Item = (&[u8], &TermData)> {
        self.terms.iter().map(|(k, v)| (k.as_slice(), v))
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    /// Sets a value slot; an empty value clears the slot.
    pub fn set_value(&mut self, slot: u32, value: impl Into<Vec<u8>>) {
        let value = value.into();
        if value.is_empty() {
            self.values.remove(&slot);
        } else {
            self.values.insert(slot, value);
        }
        self.values_modified = true;
    }

    pub fn value(&self, slot: u32) -> Option<&[u8]> {
        self.values.get(&slot).map(|v| v.as_slice())
    }

    pub fn values(&self) -> impl Iterator<Item = (u32, &[u8])> {
        self.values.iter().map(|(k, v)| (*k, v.as_slice()))
    }

    pub fn origin(&self) -> Option<&DocOrigin> {
        self.origin.as_ref()
    }

    pub fn terms_modified(&self) -> bool {
        self.terms_modified
    }

    pub fn data_modified(&self) -> bool {
        self.data_modified
    }

    pub fn values_modified(&self) -> bool {
        self.values_modified
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postings_accumulate_wdf_and_sort_positions() {
        let mut doc = Document::new();
        doc.add_posting("cat", 7);
        doc.add_posting("cat", 3);
        doc.add_term("cat", 1);

        let (term, data) = doc.terms().next().unwrap();
        assert_eq!(term, b"cat");
        assert_eq!(data.wdf, 3);
        assert_eq!(data.positions.as_slice(), &[3, 7]);
    }

    #[test]
    fn duplicate_position_counts_wdf_once_per_call() {
        let mut doc = Document::new();
        doc.add_posting("dog", 5);
        doc.add_posting("dog", 5);
        let (_, data) = doc.terms().next().unwrap();
        assert_eq!(data.wdf, 2);
        assert_eq!(data.positions.as_slice(), &[5]);
    }

    #[test]
    fn loaded_document_starts_clean() {
        let doc = Document::from_db(
            "uuid".into(),
            3,
            b"payload".to_vec(),
            BTreeMap::new(),
            BTreeMap::new(),
        );
        assert!(!doc.terms_modified());
        assert!(!doc.data_modified());
        assert!(!doc.values_modified());
        assert_eq!(doc.origin().unwrap().did, 3);
    }

    #[test]
    fn setters_flip_dirty_bits() {
        let mut doc = Document::from_db(
            "uuid".into(),
            3,
            Vec::new(),
            BTreeMap::new(),
            BTreeMap::new(),
        );
        doc.set_data(b"new".to_vec());
        assert!(doc.data_modified());
        assert!(!doc.terms_modified());
        doc.set_value(0, b"v".to_vec());
        assert!(doc.values_modified());
        doc.add_term("t", 1);
        assert!(doc.terms_modified());
    }

    #[test]
    fn empty_value_clears_slot() {
        let mut doc = Document::new();
        doc.set_value(2, b"x".to_vec());
        doc.set_value(2, Vec::new());
        assert_eq!(doc.value(2), None);
    }
}
