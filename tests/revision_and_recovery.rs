//! # Revision and Recovery Tests
//!
//! Covers the multi-revision guarantees: monotonic revision numbers,
//! snapshot isolation for readers, consistent-open failure modes, and
//! recovery from a commit torn between the postlist and record tables.

use chert::btree::Table;
use chert::{db_error_kind, Database, DbError, Document, WritableDatabase};
use tempfile::tempdir;

fn small_doc(term: &str) -> Document {
    let mut doc = Document::new();
    doc.set_data(term.as_bytes().to_vec());
    doc.add_posting(term, 1);
    doc
}

#[test]
fn committed_revisions_strictly_increase() {
    let dir = tempdir().unwrap();
    let mut db = WritableDatabase::create(dir.path().join("db")).unwrap();

    let mut seen = vec![db.get_revision_number()];
    for i in 0..5 {
        db.add_document(&small_doc(&format!("term{}", i))).unwrap();
        db.commit().unwrap();
        seen.push(db.get_revision_number());
    }
    for pair in seen.windows(2) {
        assert!(pair[0] < pair[1], "revisions not increasing: {:?}", seen);
    }
}

#[test]
fn empty_commit_consumes_no_revision() {
    let dir = tempdir().unwrap();
    let mut db = WritableDatabase::create(dir.path().join("db")).unwrap();
    let before = db.get_revision_number();
    db.commit().unwrap();
    db.commit().unwrap();
    assert_eq!(db.get_revision_number(), before);
}

#[test]
fn readers_keep_their_snapshot() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    let mut writer = WritableDatabase::create(&path).unwrap();
    writer.add_document(&small_doc("first")).unwrap();
    writer.commit().unwrap();

    let reader_old = Database::open(&path).unwrap();
    let old_rev = reader_old.get_revision_number();
    assert_eq!(reader_old.get_doccount(), 1);

    writer.add_document(&small_doc("second")).unwrap();
    writer.commit().unwrap();

    let reader_new = Database::open(&path).unwrap();

    // Both snapshots are simultaneously observable.
    assert_eq!(reader_old.get_doccount(), 1);
    assert_eq!(reader_new.get_doccount(), 2);
    assert_eq!(reader_old.get_revision_number(), old_rev);
    assert!(reader_new.get_revision_number() > old_rev);
    assert_eq!(reader_old.get_termfreq(b"second").unwrap(), 0);
    assert_eq!(reader_new.get_termfreq(b"second").unwrap(), 1);
}

#[test]
fn reopen_chases_the_newest_revision() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    let mut writer = WritableDatabase::create(&path).unwrap();
    writer.add_document(&small_doc("first")).unwrap();
    writer.commit().unwrap();

    let mut reader = Database::open(&path).unwrap();
    assert_eq!(reader.get_doccount(), 1);

    writer.add_document(&small_doc("second")).unwrap();
    writer.commit().unwrap();

    reader.reopen().unwrap();
    assert_eq!(reader.get_doccount(), 2);

    // Reopening with no intervening commit is a no-op.
    let rev = reader.get_revision_number();
    reader.reopen().unwrap();
    assert_eq!(reader.get_revision_number(), rev);
}

#[test]
fn torn_commit_is_invisible_to_readers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    {
        let mut writer = WritableDatabase::create(&path).unwrap();
        writer.add_document(&small_doc("alpha")).unwrap();
        writer.commit().unwrap();
    }

    let reader_before = Database::open(&path).unwrap();
    let rev_before = reader_before.get_revision_number();

    // Simulate a crash after the postlist commit but before the record
    // commit: bump only the postlist table.
    {
        let mut postlist = Table::new(&path, "postlist", false);
        assert!(postlist.open_at(None).unwrap());
        let next = postlist.get_latest_revision_number() + 1;
        postlist.commit(next, None, None).unwrap();
    }

    // Readers still anchor on the record table and see the old state.
    let reader = Database::open(&path).unwrap();
    assert_eq!(reader.get_revision_number(), rev_before);
    assert_eq!(reader.get_doccount(), 1);
    assert_eq!(reader.get_termfreq(b"alpha").unwrap(), 1);
}

#[test]
fn writer_heals_torn_commit_by_skipping_the_revision() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    {
        let mut writer = WritableDatabase::create(&path).unwrap();
        writer.add_document(&small_doc("alpha")).unwrap();
        writer.commit().unwrap();
    }

    let torn_rev;
    {
        let mut postlist = Table::new(&path, "postlist", false);
        assert!(postlist.open_at(None).unwrap());
        torn_rev = postlist.get_latest_revision_number() + 1;
        postlist.commit(torn_rev, None, None).unwrap();
    }

    // Reattaching the writer detects record != postlist and re-commits
    // everything one past the torn number.
    let mut writer = WritableDatabase::open(&path).unwrap();
    assert_eq!(writer.get_revision_number(), torn_rev + 1);
    assert_eq!(writer.get_doccount(), 1);

    // The healed database keeps working.
    writer.add_document(&small_doc("beta")).unwrap();
    writer.commit().unwrap();
    assert_eq!(writer.get_revision_number(), torn_rev + 2);

    let reader = Database::open(&path).unwrap();
    assert_eq!(reader.get_doccount(), 2);
}

#[test]
fn unmatchable_revisions_surface_as_corrupt() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    {
        let mut writer = WritableDatabase::create(&path).unwrap();
        writer.add_document(&small_doc("alpha")).unwrap();
        writer.commit().unwrap();
    }

    // Push the spelling table two revisions ahead, overwriting both of
    // its base slots, so the record table's revision exists nowhere in
    // it and a changed record revision can never rescue the open.
    {
        let mut spelling = Table::new(&path, "spelling", false);
        assert!(spelling.open_at(None).unwrap());
        let next = spelling.get_latest_revision_number() + 1;
        spelling.commit(next, None, None).unwrap();
        spelling.commit(next + 1, None, None).unwrap();
    }

    let err = Database::open(&path).unwrap_err();
    assert!(matches!(db_error_kind(&err), Some(DbError::Corrupt(_))));
}

#[test]
fn writer_state_survives_close_and_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    {
        let mut writer = WritableDatabase::create(&path).unwrap();
        for i in 0..50 {
            writer.add_document(&small_doc(&format!("w{}", i))).unwrap();
        }
        writer.set_metadata(b"generation", b"one").unwrap();
        writer.commit().unwrap();
    }

    let mut writer = WritableDatabase::open(&path).unwrap();
    assert_eq!(writer.get_doccount(), 50);
    assert_eq!(writer.get_lastdocid(), 50);
    assert_eq!(writer.get_metadata(b"generation").unwrap(), b"one");
    assert_eq!(writer.get_termfreq(b"w49").unwrap(), 1);

    writer.delete_document(1).unwrap();
    writer.commit().unwrap();
    assert_eq!(writer.get_doccount(), 49);
}

#[test]
fn uuid_is_stable_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    let created_uuid;
    {
        let db = WritableDatabase::create(&path).unwrap();
        created_uuid = db.get_uuid();
        assert!(!created_uuid.is_empty());
    }
    let reader = Database::open(&path).unwrap();
    assert_eq!(reader.get_uuid(), created_uuid);

    // Overwriting mints a new identity.
    drop(reader);
    let db = WritableDatabase::create_or_overwrite(&path).unwrap();
    assert_ne!(db.get_uuid(), created_uuid);
}
