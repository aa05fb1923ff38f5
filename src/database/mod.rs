//! # Database Coordinator
//!
//! The coordinator opens the six tables at one mutually consistent
//! revision and exposes the read surface over them. Writers layer the
//! mutation pipeline on top in [`writable`].
//!
//! ## Consistent Open
//!
//! There is no global lock between readers and the writer. Instead the
//! protocol leans on commit order: the record table is always committed
//! last, so any revision its superblock exposes has already been
//! committed by every other table. A reader:
//!
//! 1. validates the version file,
//! 2. opens `record` at its newest revision R,
//! 3. opens the other five tables at exactly R,
//! 4. on any miss, re-reads `record`; a changed revision means a commit
//!    landed mid-open; retry with the new number; an unchanged one
//!    means the tables are genuinely inconsistent (Corrupt).
//!
//! The retry loop runs a fixed 100 times before giving up with the
//! Modified kind ("changing too fast").
//!
//! ## Module Organization
//!
//! - [`buffer`]: the posting buffer staging writer mutations
//! - [`writable`]: the single-writer mutation and commit pipeline

pub mod buffer;
pub mod writable;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use eyre::Result;
use tracing::debug;

use crate::config::CONSISTENT_OPEN_RETRIES;
use crate::document::{Document, TermData};
use crate::error::DbError;
use crate::storage::VersionFile;
use crate::tables::{
    DatabaseStats, PositionTable, PostlistTable, RecordTable, SpellingTable, SynonymTable,
    TermlistTable, ValueManager, ValueStats,
};

/// A read-only handle onto one database revision. Also the chassis the
/// writer builds on.
#[derive(Debug)]
pub struct Database {
    db_dir: PathBuf,
    readonly: bool,
    version_file: VersionFile,
    pub(crate) postlist: PostlistTable,
    pub(crate) position: PositionTable,
    pub(crate) termlist: TermlistTable,
    pub(crate) record: RecordTable,
    pub(crate) spelling: SpellingTable,
    pub(crate) synonym: SynonymTable,
    pub(crate) value_manager: ValueManager,
    pub(crate) stats: DatabaseStats,
}

impl Database {
    pub(crate) fn construct(db_dir: &Path, readonly: bool) -> Database {
        Database {
            db_dir: db_dir.to_owned(),
            readonly,
            version_file: VersionFile::new(db_dir),
            postlist: PostlistTable::new(db_dir, readonly),
            position: PositionTable::new(db_dir, readonly),
            termlist: TermlistTable::new(db_dir, readonly),
            record: RecordTable::new(db_dir, readonly),
            spelling: SpellingTable::new(db_dir, readonly),
            synonym: SynonymTable::new(db_dir, readonly),
            value_manager: ValueManager::new(),
            stats: DatabaseStats::default(),
        }
    }

    /// Opens an existing database read-only at its newest consistent
    /// revision.
    pub fn open(db_dir: impl AsRef<Path>) -> Result<Database> {
        let db_dir = db_dir.as_ref();
        let mut db = Database::construct(db_dir, true);
        if !db.database_exists() {
            return Err(DbError::Opening(format!(
                "no database found at '{}'",
                db_dir.display()
            ))
            .into());
        }
        db.open_tables_consistent()?;
        Ok(db)
    }

    /// A database exists once its postlist and record tables do.
    pub fn database_exists(&self) -> bool {
        self.record.exists() && self.postlist.exists()
    }

    pub fn db_dir(&self) -> &Path {
        &self.db_dir
    }

    pub(crate) fn open_tables_consistent(&mut self) -> Result<()> {
        // Remember where this handle was before: if record's revision is
        // unchanged, a reopen has nothing to do.
        let cur_rev = self.record.get_open_revision_number();
        if cur_rev == 0 {
            self.version_file.read_and_check()?;
        }

        self.record.open_at(None)?;
        let mut revision = self.record.get_open_revision_number();
        if cur_rev != 0 && cur_rev == revision {
            return Ok(());
        }

        // Optional tables may not exist yet; they inherit record's
        // geometry for the day they are created.
        let block_size = self.record.block_size();
        self.position.set_block_size(block_size);
        self.termlist.set_block_size(block_size);
        self.synonym.set_block_size(block_size);
        self.spelling.set_block_size(block_size);

        self.value_manager.reset();

        let mut fully_opened = false;
        for _ in 0..CONSISTENT_OPEN_RETRIES {
            if self.spelling.open_at(Some(revision))?
                && self.synonym.open_at(Some(revision))?
                && self.termlist.open_at(Some(revision))?
                && self.position.open_at(Some(revision))?
                && self.postlist.open_at(Some(revision))?
            {
                fully_opened = true;
                break;
            }
            // A commit completed and another began since we read the
            // record table. Re-anchor on record: a new revision there
            // means we should chase it; the same revision means the
            // tables cannot be opened together at all.
            self.record.open_at(None)?;
            let new_revision = self.record.get_open_revision_number();
            if revision == new_revision {
                return Err(DbError::Corrupt(
                    "cannot open tables at consistent revisions".into(),
                )
                .into());
            }
            debug!(stale = revision, current = new_revision, "consistent open retry");
            revision = new_revision;
        }

        if !fully_opened {
            return Err(DbError::Modified(
                "cannot open tables at stable revision - changing too fast".into(),
            )
            .into());
        }

        self.stats.read(&self.postlist)?;
        Ok(())
    }

    /// Opens every table at exactly `revision` (rollback path).
    pub(crate) fn open_tables_at(&mut self, revision: u32) -> Result<()> {
        self.version_file.read_and_check()?;
        let opened = self.record.open_at(Some(revision))?
            && self.spelling.open_at(Some(revision))?
            && self.synonym.open_at(Some(revision))?
            && self.termlist.open_at(Some(revision))?
            && self.position.open_at(Some(revision))?
            && self.postlist.open_at(Some(revision))?;
        if !opened {
            return Err(DbError::Corrupt(format!(
                "revision {} is no longer available in every table",
                revision
            ))
            .into());
        }
        self.value_manager.reset();
        self.stats.read(&self.postlist)?;
        Ok(())
    }

    /// Re-runs the consistent open to chase the newest revision. Only
    /// meaningful on read-only handles.
    pub fn reopen(&mut self) -> Result<()> {
        if self.readonly {
            self.open_tables_consistent()?;
        }
        Ok(())
    }

    pub fn close(&mut self) {
        self.postlist.close();
        self.position.close();
        self.termlist.close();
        self.synonym.close();
        self.spelling.close();
        self.record.close();
    }

    // ---- revision identity ----

    /// The open revision. Any table would do; postlist is the busiest.
    pub fn get_revision_number(&self) -> u32 {
        self.postlist.get_open_revision_number()
    }

    /// The next revision a commit would install. Postlist is committed
    /// first, so its latest revision upper-bounds every table's.
    pub fn get_next_revision_number(&self) -> u32 {
        self.postlist.get_latest_revision_number() + 1
    }

    pub fn get_uuid(&self) -> String {
        self.version_file.uuid_string()
    }

    pub(crate) fn version_file_mut(&mut self) -> &mut VersionFile {
        &mut self.version_file
    }

    // ---- statistics ----

    pub fn get_doccount(&self) -> u32 {
        self.record.get_doccount()
    }

    pub fn get_lastdocid(&self) -> u32 {
        self.stats.last_did()
    }

    pub fn get_total_length(&self) -> u64 {
        self.stats.total_doclen()
    }

    pub fn get_avlength(&self) -> f64 {
        let doccount = self.get_doccount();
        if doccount == 0 {
            return 0.0;
        }
        self.stats.total_doclen() as f64 / f64::from(doccount)
    }

    pub fn get_doclength_lower_bound(&self) -> u32 {
        self.stats.doclen_lower_bound()
    }

    pub fn get_doclength_upper_bound(&self) -> u32 {
        self.stats.doclen_upper_bound()
    }

    pub fn get_wdf_upper_bound(&self, term: &[u8]) -> Result<u32> {
        let cf = self.get_collection_freq(term)?;
        Ok(cf.min(u64::from(self.stats.wdf_upper_bound())) as u32)
    }

    pub fn get_doclength(&self, did: u32) -> Result<u32> {
        ensure_valid_did(did)?;
        self.postlist
            .get_doclength(did)?
            .ok_or_else(|| DbError::DocNotFound(did).into())
    }

    pub fn get_termfreq(&self, term: &[u8]) -> Result<u32> {
        ensure_nonempty_term(term)?;
        self.postlist.get_termfreq(term)
    }

    pub fn get_collection_freq(&self, term: &[u8]) -> Result<u64> {
        ensure_nonempty_term(term)?;
        self.postlist.get_collection_freq(term)
    }

    pub fn term_exists(&self, term: &[u8]) -> Result<bool> {
        ensure_nonempty_term(term)?;
        self.postlist.term_exists(term)
    }

    pub fn has_positions(&self) -> bool {
        self.position.has_positions()
    }

    // ---- values ----

    pub fn get_value(&self, did: u32, slot: u32) -> Result<Option<Vec<u8>>> {
        self.value_manager.get_value(&self.postlist, did, slot)
    }

    pub fn get_value_freq(&self, slot: u32) -> Result<u32> {
        Ok(self.value_manager.get_value_stats(&self.postlist, slot)?.freq)
    }

    pub fn get_value_lower_bound(&self, slot: u32) -> Result<Vec<u8>> {
        Ok(self
            .value_manager
            .get_value_stats(&self.postlist, slot)?
            .lower_bound)
    }

    pub fn get_value_upper_bound(&self, slot: u32) -> Result<Vec<u8>> {
        Ok(self
            .value_manager
            .get_value_stats(&self.postlist, slot)?
            .upper_bound)
    }

    pub fn get_value_stats(&self, slot: u32) -> Result<ValueStats> {
        self.value_manager.get_value_stats(&self.postlist, slot)
    }

    // ---- documents ----

    pub fn open_position_list(&self, did: u32, term: &[u8]) -> Result<Vec<u32>> {
        ensure_valid_did(did)?;
        self.position.positionlist(did, term)
    }

    pub fn positionlist_count(&self, did: u32, term: &[u8]) -> Result<u32> {
        ensure_valid_did(did)?;
        self.position.positionlist_count(did, term)
    }

    /// The stored termlist of a document.
    pub fn open_term_list(&self, did: u32) -> Result<crate::tables::TermList> {
        ensure_valid_did(did)?;
        if !self.termlist.is_open() {
            return Err(DbError::FeatureUnavailable("database has no termlist".into()).into());
        }
        self.termlist
            .get_termlist(did)?
            .ok_or_else(|| DbError::DocNotFound(did).into())
    }

    /// Loads a full document, origin-tagged for the modify shortcut.
    pub fn open_document(&self, did: u32) -> Result<Document> {
        ensure_valid_did(did)?;
        let data = self.record.get_record(did)?;

        let mut terms = BTreeMap::new();
        if self.termlist.is_open() {
            if let Some(termlist) = self.termlist.get_termlist(did)? {
                for (term, wdf) in termlist.terms {
                    let positions = self.position.positionlist(did, &term)?;
                    terms.insert(
                        term,
                        TermData {
                            wdf,
                            positions: positions.into_iter().collect(),
                        },
                    );
                }
            }
        }

        let values = self.value_manager.document_values(&self.postlist, did)?;
        Ok(Document::from_db(self.get_uuid(), did, data, terms, values))
    }

    // ---- auxiliary surfaces ----

    pub fn get_metadata(&self, key: &[u8]) -> Result<Vec<u8>> {
        self.postlist.get_metadata(key)
    }

    pub fn metadata_keys(&self) -> Result<Vec<Vec<u8>>> {
        self.postlist.metadata_keys()
    }

    /// Every indexed term with its df and cf, in term order.
    pub fn all_terms(&self) -> Result<Vec<(Vec<u8>, u32, u64)>> {
        let mut iter = self.postlist.term_iter()?;
        let mut terms = Vec::new();
        while let Some(entry) = iter.next_term()? {
            terms.push(entry);
        }
        Ok(terms)
    }

    pub fn get_spelling_frequency(&self, word: &[u8]) -> Result<u32> {
        self.spelling.get_word_frequency(word)
    }

    pub fn get_synonyms(&self, term: &[u8]) -> Result<Vec<Vec<u8>>> {
        self.synonym.get_synonyms(term)
    }
}

pub(crate) fn ensure_valid_did(did: u32) -> Result<()> {
    if did == 0 {
        return Err(DbError::InvalidArgument("docid 0 is reserved".into()).into());
    }
    Ok(())
}

pub(crate) fn ensure_nonempty_term(term: &[u8]) -> Result<()> {
    if term.is_empty() {
        return Err(DbError::InvalidArgument("empty term".into()).into());
    }
    Ok(())
}
