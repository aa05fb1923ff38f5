//! # Writable Database
//!
//! The single writer over a database directory. Holds the exclusive
//! lock for its whole lifetime, stages document mutations in the
//! posting buffer, and drives the commit pipeline:
//!
//! ```text
//! add/replace/delete ─> PostingBuffer ─┬─ auto-flush at threshold ─┐
//!                                      │                           v
//! commit() ──> flush_postlist_changes ─┴──> postlist merge ──> apply()
//!                                                               │
//!                     set_revision_number(R+1):                 v
//!                       merge values / spelling / synonyms
//!                       flush every table
//!                       open changes<R>, stream changed blocks
//!                       commit postlist -> position -> termlist
//!                              -> synonym -> spelling -> record (last)
//!                       append changeset tail
//! ```
//!
//! ## Failure Discipline
//!
//! Any error while staging a mutation wipes the buffer (`cancel`) before
//! propagating, so no partial document can ever reach disk. A failed
//! commit rolls back: buffers dropped, tables reopened at the old
//! revision, and the revision counter pushed past the failed number so
//! it is never reused. If even that fails the handle closes itself and
//! reports the Database kind.

use std::fs::File;
use std::io::Write;
use std::ops::Deref;
use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};
use tracing::{debug, warn};

use crate::config::{
    flush_threshold_from_env, max_changesets_from_env, BLOCK_SIZE, CHANGES_MAGIC, CHANGES_VERSION,
    MAX_SAFE_TERM_LENGTH,
};
use crate::document::Document;
use crate::encoding::pack::pack_uint;
use crate::error::{db_error_kind, is_doc_not_found, DbError, LockReason};
use crate::storage::WriteLock;
use crate::tables::postlist::PostingOp;

use super::buffer::PostingBuffer;
use super::{ensure_valid_did, Database};

fn ensure_term_ok(term: &[u8]) -> Result<()> {
    if term.is_empty() {
        return Err(DbError::InvalidArgument("empty term in document".into()).into());
    }
    if term.len() > MAX_SAFE_TERM_LENGTH {
        return Err(DbError::InvalidArgument(format!(
            "term too long (> {}): {}",
            MAX_SAFE_TERM_LENGTH,
            String::from_utf8_lossy(term)
        ))
        .into());
    }
    Ok(())
}

#[derive(Debug)]
pub struct WritableDatabase {
    db: Database,
    lock: Option<WriteLock>,
    buffer: PostingBuffer,
    flush_threshold: usize,
    max_changesets: u32,
    transaction_active: bool,
    modify_shortcut_docid: u32,
}

impl Deref for WritableDatabase {
    type Target = Database;
    fn deref(&self) -> &Database {
        &self.db
    }
}

impl WritableDatabase {
    fn assemble(db: Database, lock: WriteLock) -> WritableDatabase {
        WritableDatabase {
            db,
            lock: Some(lock),
            buffer: PostingBuffer::new(),
            flush_threshold: flush_threshold_from_env(),
            max_changesets: max_changesets_from_env(),
            transaction_active: false,
            modify_shortcut_docid: 0,
        }
    }

    fn acquire_lock(db: &Database, creating: bool) -> Result<WriteLock> {
        match WriteLock::acquire(db.db_dir()) {
            Ok(lock) => Ok(lock),
            Err(err) => {
                // A lock failure with no database behind it is really an
                // open failure.
                if !creating && !db.database_exists() {
                    if let Some(DbError::Lock {
                        reason: LockReason::Unknown,
                        ..
                    }) = db_error_kind(&err)
                    {
                        return Err(DbError::Opening(format!(
                            "no database found at '{}'",
                            db.db_dir().display()
                        ))
                        .into());
                    }
                }
                Err(err)
            }
        }
    }

    /// Opens an existing database for writing, healing a torn commit if
    /// one is found.
    pub fn open(db_dir: impl AsRef<Path>) -> Result<WritableDatabase> {
        let db_dir = db_dir.as_ref();
        let db = Database::construct(db_dir, false);
        if !db.database_exists() {
            return Err(DbError::Opening(format!(
                "no database found at '{}'",
                db_dir.display()
            ))
            .into());
        }
        let lock = Self::acquire_lock(&db, false)?;
        let mut wdb = Self::assemble(db, lock);
        wdb.db.open_tables_consistent()?;

        // A crash between the postlist and record commits leaves newer
        // tables than the revision record anchors. Re-commit everything
        // at a fresh number to restore full consistency.
        if wdb.db.record.get_open_revision_number()
            != wdb.db.postlist.get_latest_revision_number()
        {
            let next = wdb.db.get_next_revision_number();
            warn!(revision = next, "recovering from interrupted commit");
            wdb.set_revision_number(next)?;
        }
        Ok(wdb)
    }

    /// Creates a new database, failing if one already exists.
    pub fn create(db_dir: impl AsRef<Path>) -> Result<WritableDatabase> {
        let db_dir = db_dir.as_ref();
        if db_dir.exists() && !db_dir.is_dir() {
            return Err(DbError::Create(format!(
                "cannot create directory '{}'",
                db_dir.display()
            ))
            .into());
        }
        let db = Database::construct(db_dir, false);
        if db.database_exists() {
            return Err(DbError::Create(format!(
                "a database already exists at '{}' and I was told not to overwrite it",
                db_dir.display()
            ))
            .into());
        }
        if !db_dir.exists() {
            std::fs::create_dir_all(db_dir).map_err(|e| {
                DbError::Create(format!(
                    "cannot create directory '{}': {}",
                    db_dir.display(),
                    e
                ))
            })?;
        }
        let lock = Self::acquire_lock(&db, true)?;
        let mut wdb = Self::assemble(db, lock);
        wdb.create_and_open_tables()?;
        Ok(wdb)
    }

    /// Opens the database if present, creates it otherwise.
    pub fn create_or_open(db_dir: impl AsRef<Path>) -> Result<WritableDatabase> {
        let db_dir = db_dir.as_ref();
        let probe = Database::construct(db_dir, false);
        if probe.database_exists() {
            WritableDatabase::open(db_dir)
        } else {
            WritableDatabase::create(db_dir)
        }
    }

    /// Creates fresh tables under the lock, discarding any existing
    /// database in the directory.
    pub fn create_or_overwrite(db_dir: impl AsRef<Path>) -> Result<WritableDatabase> {
        let db_dir = db_dir.as_ref();
        if db_dir.exists() && !db_dir.is_dir() {
            return Err(DbError::Create(format!(
                "cannot create directory '{}'",
                db_dir.display()
            ))
            .into());
        }
        if !db_dir.exists() {
            std::fs::create_dir_all(db_dir).map_err(|e| {
                DbError::Create(format!(
                    "cannot create directory '{}': {}",
                    db_dir.display(),
                    e
                ))
            })?;
        }
        let db = Database::construct(db_dir, false);
        let creating = !db.database_exists();
        let lock = Self::acquire_lock(&db, creating)?;
        let mut wdb = Self::assemble(db, lock);
        wdb.create_and_open_tables()?;
        Ok(wdb)
    }

    fn create_and_open_tables(&mut self) -> Result<()> {
        // Postlist first and record last: the record table's existence
        // is what makes the database exist.
        self.db.version_file_mut().create()?;
        self.db.postlist.create_and_open(BLOCK_SIZE)?;
        self.db.position.create_and_open(BLOCK_SIZE)?;
        self.db.termlist.create_and_open(BLOCK_SIZE)?;
        self.db.synonym.create_and_open(BLOCK_SIZE)?;
        self.db.spelling.create_and_open(BLOCK_SIZE)?;
        self.db.record.create_and_open(BLOCK_SIZE)?;

        if self.db.record.get_open_revision_number()
            != self.db.postlist.get_open_revision_number()
        {
            return Err(DbError::Create(
                "newly created tables are not in consistent state".into(),
            )
            .into());
        }
        self.db.stats.zero();
        Ok(())
    }

    pub fn close(&mut self) {
        self.db.close();
        self.lock = None;
    }

    // ---- document mutation ----

    /// Indexes a new document under the next free docid.
    pub fn add_document(&mut self, document: &Document) -> Result<u32> {
        if self.db.stats.last_did() == u32::MAX {
            return Err(DbError::Database(
                "run out of document ids - compact the database to reuse the gaps".into(),
            )
            .into());
        }
        let did = self.db.stats.next_did();
        self.add_document_with_id(did, document)?;
        Ok(did)
    }

    fn add_document_with_id(&mut self, did: u32, document: &Document) -> Result<()> {
        debug_assert!(did != 0);
        if let Err(err) = self.stage_new_document(did, document) {
            // Partial staging must never survive in memory.
            self.cancel()?;
            return Err(err);
        }
        self.note_change()
    }

    fn stage_new_document(&mut self, did: u32, document: &Document) -> Result<()> {
        self.db.record.replace_record(document.data(), did)?;
        {
            let Database {
                value_manager,
                postlist,
                ..
            } = &mut self.db;
            value_manager.add_document(postlist, did, document)?;
        }

        let mut new_doclen: u32 = 0;
        for (term, data) in document.terms() {
            ensure_term_ok(term)?;
            let wdf = data.wdf;
            new_doclen = new_doclen.saturating_add(wdf);
            self.db.stats.check_wdf(wdf);
            self.buffer.stage_add(term, did, wdf);
            if !data.positions.is_empty() {
                self.db.position.set_positionlist(did, term, &data.positions)?;
            }
        }

        if self.db.termlist.is_open() {
            self.db.termlist.set_termlist(did, document, new_doclen)?;
        }
        self.buffer.set_doclen(did, new_doclen);
        self.db.stats.add_document(new_doclen);
        Ok(())
    }

    /// Removes a document. The second removal of the same docid fails
    /// with DocNotFound and changes nothing.
    pub fn delete_document(&mut self, did: u32) -> Result<()> {
        ensure_valid_did(did)?;
        if !self.db.termlist.is_open() {
            return Err(
                DbError::FeatureUnavailable("database has no termlist".into()).into(),
            );
        }
        if self.modify_shortcut_docid == did {
            // The document can no longer back a modification shortcut.
            self.modify_shortcut_docid = 0;
        }

        // Nothing is staged yet, so a missing record propagates cleanly.
        self.db.record.delete_record(did)?;

        if let Err(err) = self.stage_delete_document(did) {
            self.cancel()?;
            return Err(err);
        }
        self.note_change()
    }

    fn stage_delete_document(&mut self, did: u32) -> Result<()> {
        {
            let Database {
                value_manager,
                postlist,
                ..
            } = &mut self.db;
            value_manager.delete_document(postlist, did)?;
        }

        let termlist = self
            .db
            .termlist
            .get_termlist(did)?
            .ok_or(DbError::DocNotFound(did))?;
        self.db.stats.delete_document(termlist.doclen);
        for (term, wdf) in &termlist.terms {
            self.db.position.delete_positionlist(did, term)?;
            self.buffer.stage_delete(term, did, *wdf);
        }
        self.db.termlist.delete_termlist(did)?;
        self.buffer.mark_deleted(did);
        Ok(())
    }

    /// Stores `document` under `did`, replacing whatever was there.
    ///
    /// A document loaded from this database and stored back under its
    /// own docid skips every category its dirty bits say is untouched.
    pub fn replace_document(&mut self, did: u32, document: &Document) -> Result<()> {
        ensure_valid_did(did)?;
        match self.stage_replace_document(did, document) {
            Ok(()) => self.note_change(),
            Err(err) if is_doc_not_found(&err) => {
                // The docid is below the high-water mark but unused.
                self.add_document_with_id(did, document)
            }
            Err(err) => {
                self.cancel()?;
                Err(err)
            }
        }
    }

    fn stage_replace_document(&mut self, did: u32, document: &Document) -> Result<()> {
        if did > self.db.stats.last_did() {
            // Above the high-water mark: cannot be replacing anything.
            self.db.stats.set_last_did(did);
            return self.stage_new_document(did, document);
        }

        if !self.db.termlist.is_open() {
            // An unused docid at or below the mark can still be added.
            let in_use = match self.buffer.doclen_overlay(did) {
                Some(existing) => existing.is_some(),
                None => self.db.postlist.document_exists(did)?,
            };
            if !in_use {
                return self.stage_new_document(did, document);
            }
            return Err(
                DbError::FeatureUnavailable("database has no termlist".into()).into(),
            );
        }

        let modifying = if self.modify_shortcut_docid == did {
            match document.origin() {
                Some(origin) if origin.did == did && origin.db_uuid == self.db.get_uuid() => {
                    debug!(did, "modification shortcut engaged");
                    true
                }
                _ => {
                    // Some other document is about to overwrite the
                    // cached one; the shortcut no longer holds.
                    self.modify_shortcut_docid = 0;
                    false
                }
            }
        } else {
            false
        };

        if !modifying || document.terms_modified() {
            // Retract the committed termlist. A missing entry surfaces
            // as DocNotFound before anything is staged, so the caller
            // can fall back to a plain add.
            let termlist = self
                .db
                .termlist
                .get_termlist(did)?
                .ok_or(DbError::DocNotFound(did))?;
            for (term, wdf) in &termlist.terms {
                self.buffer.stage_delete(term, did, *wdf);
            }
            self.db.stats.delete_document(termlist.doclen);

            let mut new_doclen: u32 = 0;
            for (term, data) in document.terms() {
                ensure_term_ok(term)?;
                let wdf = data.wdf;
                new_doclen = new_doclen.saturating_add(wdf);
                self.db.stats.check_wdf(wdf);
                self.buffer.stage_add(term, did, wdf);
                if data.positions.is_empty() {
                    self.db.position.delete_positionlist(did, term)?;
                } else {
                    self.db.position.set_positionlist(did, term, &data.positions)?;
                }
            }

            self.db.termlist.set_termlist(did, document, new_doclen)?;
            self.buffer.set_doclen(did, new_doclen);
            self.db.stats.add_document(new_doclen);
        }

        if !modifying || document.data_modified() {
            self.db.record.replace_record(document.data(), did)?;
        }

        if !modifying || document.values_modified() {
            let Database {
                value_manager,
                postlist,
                ..
            } = &mut self.db;
            value_manager.replace_document(postlist, did, document)?;
        }
        Ok(())
    }

    /// Loads a document and arms the modification shortcut for it.
    pub fn open_document(&mut self, did: u32) -> Result<Document> {
        let document = self.db.open_document(did)?;
        // Recorded only after success so a missed open can't poison the
        // shortcut.
        self.modify_shortcut_docid = did;
        Ok(document)
    }

    fn note_change(&mut self) -> Result<()> {
        if self.buffer.bump_change_count() >= self.flush_threshold {
            debug!(changes = self.buffer.change_count(), "auto-flushing posting buffer");
            self.flush_postlist_changes()?;
            if !self.transaction_active {
                self.apply()?;
            }
        }
        Ok(())
    }

    // ---- flush / commit / rollback ----

    pub(crate) fn flush_postlist_changes(&mut self) -> Result<()> {
        let Database {
            postlist, stats, ..
        } = &mut self.db;
        postlist.merge_changes(
            &self.buffer.mod_plists,
            &self.buffer.doclens,
            &self.buffer.freq_deltas,
        )?;
        stats.write(postlist)?;
        self.buffer.clear();
        Ok(())
    }

    /// Makes everything staged durable as one new revision.
    pub fn commit(&mut self) -> Result<()> {
        if self.transaction_active {
            return Err(DbError::InvalidArgument(
                "can't commit during a transaction".into(),
            )
            .into());
        }
        if self.buffer.change_count() > 0 {
            self.flush_postlist_changes()?;
        }
        self.apply()
    }

    fn apply(&mut self) -> Result<()> {
        if !self.db.postlist.is_modified()
            && !self.db.position.is_modified()
            && !self.db.termlist.is_modified()
            && !self.db.value_manager.is_modified()
            && !self.db.synonym.is_modified()
            && !self.db.synonym.has_buffered_changes()
            && !self.db.spelling.is_modified()
            && !self.db.spelling.has_buffered_changes()
            && !self.db.record.is_modified()
        {
            return Ok(());
        }

        let old_revision = self.db.get_revision_number();
        let new_revision = self.db.get_next_revision_number();
        if let Err(err) = self.set_revision_number(new_revision) {
            let msg = format!("{:#}", err);
            self.modifications_failed(old_revision, new_revision, &msg)?;
            return Err(err);
        }
        Ok(())
    }

    /// Discards every buffered and flushed-but-uncommitted change.
    pub fn cancel(&mut self) -> Result<()> {
        self.db.postlist.cancel();
        self.db.position.cancel();
        self.db.termlist.cancel();
        self.db.value_manager.reset();
        self.db.synonym.cancel();
        self.db.synonym.discard_buffered_changes();
        self.db.spelling.cancel();
        self.db.spelling.discard_buffered_changes();
        self.db.record.cancel();
        self.db.stats.read(&self.db.postlist)?;
        self.buffer.clear();
        Ok(())
    }

    pub(crate) fn set_revision_number(&mut self, new_revision: u32) -> Result<()> {
        {
            let Database {
                value_manager,
                postlist,
                spelling,
                synonym,
                ..
            } = &mut self.db;
            value_manager.merge_changes(postlist)?;
            spelling.merge_changes()?;
            synonym.merge_changes()?;
        }

        self.db.postlist.flush_db()?;
        self.db.position.flush_db()?;
        self.db.termlist.flush_db()?;
        self.db.synonym.flush_db()?;
        self.db.spelling.flush_db()?;
        self.db.record.flush_db()?;

        let old_revision = self.db.get_revision_number();
        let mut changes: Option<(File, PathBuf)> = None;
        if self.max_changesets > 0 && old_revision != 0 {
            // No changeset for the very first revision.
            let path = self
                .db
                .db_dir()
                .join(format!("changes{}", old_revision));
            let mut file = File::create(&path)
                .wrap_err_with(|| format!("couldn't open changeset '{}' to write", path.display()))?;
            let mut header = Vec::from(CHANGES_MAGIC);
            pack_uint(&mut header, u64::from(CHANGES_VERSION));
            pack_uint(&mut header, u64::from(old_revision));
            pack_uint(&mut header, u64::from(new_revision));
            // Changes can be applied to a live database.
            pack_uint(&mut header, 0);
            file.write_all(&header)?;
            changes = Some((file, path));
        }

        match self.commit_tables(new_revision, changes.as_mut().map(|(f, _)| f)) {
            Ok(()) => {
                if let Some((file, _)) = &changes {
                    file.sync_all()?;
                }
                debug!(old_revision, new_revision, "revision installed");
                Ok(())
            }
            Err(err) => {
                if let Some((file, path)) = changes {
                    drop(file);
                    let _ = std::fs::remove_file(path);
                }
                Err(err)
            }
        }
    }

    fn commit_tables(&mut self, revision: u32, mut changes: Option<&mut File>) -> Result<()> {
        if let Some(out) = changes.as_deref_mut() {
            // Postlist last so it lands hottest in the OS cache on the
            // follower; position just before it for the same reason.
            self.db.termlist.write_changed_blocks(&mut *out)?;
            self.db.synonym.write_changed_blocks(&mut *out)?;
            self.db.spelling.write_changed_blocks(&mut *out)?;
            self.db.record.write_changed_blocks(&mut *out)?;
            self.db.position.write_changed_blocks(&mut *out)?;
            self.db.postlist.write_changed_blocks(&mut *out)?;
        }

        self.db.postlist.commit(
            revision,
            changes.as_deref_mut().map(|f| f as &mut dyn Write),
            None,
        )?;
        self.db.position.commit(
            revision,
            changes.as_deref_mut().map(|f| f as &mut dyn Write),
            None,
        )?;
        self.db.termlist.commit(
            revision,
            changes.as_deref_mut().map(|f| f as &mut dyn Write),
            None,
        )?;
        self.db.synonym.commit(
            revision,
            changes.as_deref_mut().map(|f| f as &mut dyn Write),
            None,
        )?;
        self.db.spelling.commit(
            revision,
            changes.as_deref_mut().map(|f| f as &mut dyn Write),
            None,
        )?;

        // The record commit is the linearization point; the changeset
        // tail rides along with it.
        let tail = changes.is_some().then(|| {
            let mut tail = vec![0u8];
            pack_uint(&mut tail, u64::from(revision));
            tail
        });
        self.db.record.commit(
            revision,
            changes.as_deref_mut().map(|f| f as &mut dyn Write),
            tail.as_deref(),
        )?;
        Ok(())
    }

    fn modifications_failed(
        &mut self,
        old_revision: u32,
        new_revision: u32,
        msg: &str,
    ) -> Result<()> {
        warn!(old_revision, new_revision, "commit failed, rolling back");
        if let Err(recovery_err) = self.try_recover(old_revision, new_revision) {
            // No consistent state is reachable; close to avoid
            // corrupting anything further.
            self.close();
            return Err(DbError::Database(format!(
                "modifications failed ({}), and cannot set consistent table revision numbers: {:#}",
                msg, recovery_err
            ))
            .into());
        }
        Ok(())
    }

    fn try_recover(&mut self, old_revision: u32, new_revision: u32) -> Result<()> {
        self.cancel()?;
        self.db.open_tables_at(old_revision)?;
        // Skip past the failed number so it is never reused.
        self.set_revision_number(new_revision + 1)
    }

    // ---- transactions ----

    pub fn begin_transaction(&mut self) -> Result<()> {
        if self.transaction_active {
            return Err(DbError::InvalidArgument("transaction already active".into()).into());
        }
        self.transaction_active = true;
        Ok(())
    }

    pub fn commit_transaction(&mut self) -> Result<()> {
        if !self.transaction_active {
            return Err(DbError::InvalidArgument("no transaction active".into()).into());
        }
        self.transaction_active = false;
        self.commit()
    }

    pub fn cancel_transaction(&mut self) -> Result<()> {
        if !self.transaction_active {
            return Err(DbError::InvalidArgument("no transaction active".into()).into());
        }
        self.transaction_active = false;
        self.cancel()
    }

    pub fn transaction_active(&self) -> bool {
        self.transaction_active
    }

    // ---- reads with buffered overlays ----

    pub fn get_termfreq(&self, term: &[u8]) -> Result<u32> {
        let committed = self.db.get_termfreq(term)?;
        let delta = self.buffer.termfreq_delta(term);
        Ok((i64::from(committed) + i64::from(delta)).max(0) as u32)
    }

    pub fn get_collection_freq(&self, term: &[u8]) -> Result<u64> {
        let committed = self.db.get_collection_freq(term)?;
        let delta = self.buffer.collfreq_delta(term);
        Ok((committed as i64 + delta).max(0) as u64)
    }

    pub fn term_exists(&self, term: &[u8]) -> Result<bool> {
        Ok(self.get_termfreq(term)? != 0)
    }

    pub fn get_doclength(&self, did: u32) -> Result<u32> {
        ensure_valid_did(did)?;
        match self.buffer.doclen_overlay(did) {
            Some(Some(doclen)) => Ok(doclen),
            Some(None) => Err(DbError::DocNotFound(did).into()),
            None => self.db.get_doclength(did),
        }
    }

    pub fn get_wdf_upper_bound(&self, term: &[u8]) -> Result<u32> {
        let cf = self.get_collection_freq(term)?;
        Ok(cf.min(u64::from(self.db.stats.wdf_upper_bound())) as u32)
    }

    /// The posting list with buffered edits merged in.
    pub fn postings(&self, term: &[u8]) -> Result<Vec<(u32, u32)>> {
        let mut merged: std::collections::BTreeMap<u32, u32> =
            self.db.postlist.postings(term)?.into_iter().collect();
        if let Some(ops) = self.buffer.plist_overlay(term) {
            for (&did, &(op, wdf)) in ops {
                match op {
                    PostingOp::Delete => {
                        merged.remove(&did);
                    }
                    PostingOp::Add | PostingOp::Modify => {
                        merged.insert(did, wdf);
                    }
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    /// Terms with any buffered changes folded in first.
    pub fn all_terms(&mut self) -> Result<Vec<(Vec<u8>, u32, u64)>> {
        if self.buffer.change_count() > 0 {
            self.flush_postlist_changes()?;
        }
        self.db.all_terms()
    }

    // ---- auxiliary mutation ----

    pub fn set_metadata(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.db.postlist.set_metadata(key, value)
    }

    pub fn add_spelling(&mut self, word: &[u8], freqinc: u32) {
        self.db.spelling.add_word(word, freqinc);
    }

    pub fn remove_spelling(&mut self, word: &[u8], freqdec: u32) {
        self.db.spelling.remove_word(word, freqdec);
    }

    pub fn spelling_word_list(&mut self) -> Result<Vec<(Vec<u8>, u32)>> {
        self.db.spelling.word_list()
    }

    pub fn add_synonym(&mut self, term: &[u8], synonym: &[u8]) -> Result<()> {
        self.db.synonym.add_synonym(term, synonym)
    }

    pub fn remove_synonym(&mut self, term: &[u8], synonym: &[u8]) -> Result<()> {
        self.db.synonym.remove_synonym(term, synonym)
    }

    pub fn clear_synonyms(&mut self, term: &[u8]) {
        self.db.synonym.clear_synonyms(term)
    }

    pub fn synonym_key_list(&mut self) -> Result<Vec<Vec<u8>>> {
        self.db.synonym.key_list()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_refuses_existing_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        {
            let _db = WritableDatabase::create(&path).unwrap();
        }
        let err = WritableDatabase::create(&path).unwrap_err();
        assert!(matches!(db_error_kind(&err), Some(DbError::Create(_))));
    }

    #[test]
    fn open_refuses_missing_database() {
        let dir = tempdir().unwrap();
        let err = WritableDatabase::open(dir.path().join("absent")).unwrap_err();
        assert!(matches!(db_error_kind(&err), Some(DbError::Opening(_))));
    }

    #[test]
    fn commit_inside_transaction_is_rejected() {
        let dir = tempdir().unwrap();
        let mut db = WritableDatabase::create(dir.path().join("db")).unwrap();
        db.begin_transaction().unwrap();
        let err = db.commit().unwrap_err();
        assert!(matches!(
            db_error_kind(&err),
            Some(DbError::InvalidArgument(_))
        ));
        db.cancel_transaction().unwrap();
        db.commit().unwrap();
    }

    #[test]
    fn overwrite_resets_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        {
            let mut db = WritableDatabase::create(&path).unwrap();
            let mut doc = Document::new();
            doc.add_term("stale", 1);
            db.add_document(&doc).unwrap();
            db.commit().unwrap();
        }
        let db = WritableDatabase::create_or_overwrite(&path).unwrap();
        assert_eq!(db.get_doccount(), 0);
        assert_eq!(db.get_lastdocid(), 0);
    }
}
