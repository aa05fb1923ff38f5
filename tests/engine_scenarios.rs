//! # Engine Scenario Tests
//!
//! End-to-end exercises of the document pipeline: indexing with
//! positions, deletion, replacement (including the modification
//! shortcut), value slots, metadata and the auxiliary spelling and
//! synonym surfaces.

use chert::{db_error_kind, is_doc_not_found, Database, DbError, Document, WritableDatabase};
use tempfile::tempdir;

fn two_term_doc() -> Document {
    let mut doc = Document::new();
    doc.set_data(&b"the cat and the dog"[..]);
    doc.add_posting("cat", 3);
    doc.add_posting("cat", 7);
    doc.add_posting("dog", 5);
    doc
}

#[test]
fn index_one_document_with_positions() {
    let dir = tempdir().unwrap();
    let mut db = WritableDatabase::create(dir.path().join("db")).unwrap();

    let did = db.add_document(&two_term_doc()).unwrap();
    assert_eq!(did, 1);
    db.commit().unwrap();

    assert_eq!(db.get_doccount(), 1);
    assert_eq!(db.get_total_length(), 3);
    assert_eq!(db.get_termfreq(b"cat").unwrap(), 1);
    assert_eq!(db.get_collection_freq(b"cat").unwrap(), 2);
    assert_eq!(db.get_termfreq(b"dog").unwrap(), 1);
    assert_eq!(db.open_position_list(1, b"cat").unwrap(), vec![3, 7]);
    assert_eq!(db.open_position_list(1, b"dog").unwrap(), vec![5]);
    assert_eq!(db.positionlist_count(1, b"cat").unwrap(), 2);
    assert_eq!(db.get_doclength(1).unwrap(), 3);
    assert!(db.has_positions());
}

#[test]
fn staged_changes_visible_before_commit() {
    let dir = tempdir().unwrap();
    let mut db = WritableDatabase::create(dir.path().join("db")).unwrap();

    db.add_document(&two_term_doc()).unwrap();
    // No commit yet: the writer's own reads see the buffered state.
    assert_eq!(db.get_termfreq(b"cat").unwrap(), 1);
    assert_eq!(db.get_collection_freq(b"cat").unwrap(), 2);
    assert_eq!(db.get_doclength(1).unwrap(), 3);
    assert!(db.term_exists(b"cat").unwrap());
    assert_eq!(db.postings(b"cat").unwrap(), vec![(1, 2)]);
    assert_eq!(db.get_lastdocid(), 1);
}

#[test]
fn delete_document_retracts_everything() {
    let dir = tempdir().unwrap();
    let mut db = WritableDatabase::create(dir.path().join("db")).unwrap();

    db.add_document(&two_term_doc()).unwrap();
    db.commit().unwrap();

    db.delete_document(1).unwrap();
    db.commit().unwrap();

    assert_eq!(db.get_doccount(), 0);
    assert_eq!(db.get_termfreq(b"cat").unwrap(), 0);
    assert!(db.open_position_list(1, b"cat").unwrap().is_empty());
    assert!(is_doc_not_found(&db.get_doclength(1).unwrap_err()));
    // The docid high-water mark survives deletion.
    assert_eq!(db.get_lastdocid(), 1);
}

#[test]
fn second_delete_fails_and_stats_count_one_removal() {
    let dir = tempdir().unwrap();
    let mut db = WritableDatabase::create(dir.path().join("db")).unwrap();

    db.add_document(&two_term_doc()).unwrap();
    db.commit().unwrap();
    let total_before = db.get_total_length();
    assert_eq!(total_before, 3);

    db.delete_document(1).unwrap();
    let err = db.delete_document(1).unwrap_err();
    assert!(is_doc_not_found(&err));
    db.commit().unwrap();

    assert_eq!(db.get_doccount(), 0);
    assert_eq!(db.get_total_length(), 0);
}

#[test]
fn oversized_term_rejected_without_state_change() {
    let dir = tempdir().unwrap();
    let mut db = WritableDatabase::create(dir.path().join("db")).unwrap();

    db.add_document(&two_term_doc()).unwrap();
    db.commit().unwrap();

    let mut bad = Document::new();
    bad.add_term("ok", 1);
    bad.add_term(vec![b'x'; 246], 1);
    let err = db.add_document(&bad).unwrap_err();
    assert!(matches!(
        db_error_kind(&err),
        Some(DbError::InvalidArgument(_))
    ));

    // The failed add left nothing behind, not even the valid term.
    db.commit().unwrap();
    assert_eq!(db.get_doccount(), 1);
    assert_eq!(db.get_termfreq(b"ok").unwrap(), 0);
    assert_eq!(db.get_total_length(), 3);

    // Exactly 245 bytes is still fine.
    let mut ok = Document::new();
    ok.add_term(vec![b'y'; 245], 1);
    db.add_document(&ok).unwrap();
    db.commit().unwrap();
    assert_eq!(db.get_doccount(), 2);
}

#[test]
fn replace_document_swaps_terms() {
    let dir = tempdir().unwrap();
    let mut db = WritableDatabase::create(dir.path().join("db")).unwrap();

    db.add_document(&two_term_doc()).unwrap();
    db.commit().unwrap();

    let mut replacement = Document::new();
    replacement.set_data(&b"a bird"[..]);
    replacement.add_posting("bird", 2);
    db.replace_document(1, &replacement).unwrap();
    db.commit().unwrap();

    assert_eq!(db.get_doccount(), 1);
    assert_eq!(db.get_termfreq(b"cat").unwrap(), 0);
    assert_eq!(db.get_termfreq(b"bird").unwrap(), 1);
    assert_eq!(db.open_position_list(1, b"bird").unwrap(), vec![2]);
    assert_eq!(db.get_doclength(1).unwrap(), 1);
    assert_eq!(db.get_total_length(), 1);

    let doc = db.open_document(1).unwrap();
    assert_eq!(doc.data(), b"a bird");
}

#[test]
fn replace_unused_docid_promotes_high_water_mark() {
    let dir = tempdir().unwrap();
    let mut db = WritableDatabase::create(dir.path().join("db")).unwrap();

    db.replace_document(40, &two_term_doc()).unwrap();
    db.commit().unwrap();

    assert_eq!(db.get_doccount(), 1);
    assert_eq!(db.get_lastdocid(), 40);
    // The next plain add continues above the mark.
    let did = db.add_document(&two_term_doc()).unwrap();
    assert_eq!(did, 41);
}

#[test]
fn replace_missing_docid_below_mark_falls_back_to_add() {
    let dir = tempdir().unwrap();
    let mut db = WritableDatabase::create(dir.path().join("db")).unwrap();

    db.replace_document(10, &two_term_doc()).unwrap();
    db.commit().unwrap();

    // Docid 5 is below the mark but was never used.
    db.replace_document(5, &two_term_doc()).unwrap();
    db.commit().unwrap();
    assert_eq!(db.get_doccount(), 2);
    assert_eq!(db.get_doclength(5).unwrap(), 3);
}

#[test]
fn modify_shortcut_matches_full_replace() {
    let dir = tempdir().unwrap();

    // Database A: replace via a document loaded from the database with
    // only the data touched.
    let path_a = dir.path().join("a");
    let mut db_a = WritableDatabase::create(&path_a).unwrap();
    let mut original = two_term_doc();
    original.set_value(0, b"slot zero".to_vec());
    db_a.add_document(&original).unwrap();
    db_a.commit().unwrap();

    let mut loaded = db_a.open_document(1).unwrap();
    loaded.set_data(&b"updated data"[..]);
    db_a.replace_document(1, &loaded).unwrap();
    db_a.commit().unwrap();

    // Database B: the same outcome via a freshly constructed document.
    let path_b = dir.path().join("b");
    let mut db_b = WritableDatabase::create(&path_b).unwrap();
    db_b.add_document(&original).unwrap();
    db_b.commit().unwrap();

    let mut fresh = two_term_doc();
    fresh.set_value(0, b"slot zero".to_vec());
    fresh.set_data(&b"updated data"[..]);
    db_b.replace_document(1, &fresh).unwrap();
    db_b.commit().unwrap();

    // Every observable surface agrees.
    assert_eq!(db_a.get_doccount(), db_b.get_doccount());
    assert_eq!(db_a.get_total_length(), db_b.get_total_length());
    assert_eq!(db_a.all_terms().unwrap(), db_b.all_terms().unwrap());
    for term in [&b"cat"[..], b"dog"] {
        assert_eq!(db_a.postings(term).unwrap(), db_b.postings(term).unwrap());
        assert_eq!(
            db_a.open_position_list(1, term).unwrap(),
            db_b.open_position_list(1, term).unwrap()
        );
    }
    assert_eq!(
        db_a.open_document(1).unwrap().data(),
        db_b.open_document(1).unwrap().data()
    );
    assert_eq!(
        db_a.get_value(1, 0).unwrap(),
        db_b.get_value(1, 0).unwrap()
    );
    assert_eq!(db_a.get_doclength(1).unwrap(), db_b.get_doclength(1).unwrap());
}

#[test]
fn values_carry_statistics() {
    let dir = tempdir().unwrap();
    let mut db = WritableDatabase::create(dir.path().join("db")).unwrap();

    for value in [&b"m"[..], b"a", b"z"] {
        let mut doc = Document::new();
        doc.set_value(4, value.to_vec());
        db.add_document(&doc).unwrap();
    }
    db.commit().unwrap();

    assert_eq!(db.get_value_freq(4).unwrap(), 3);
    assert_eq!(db.get_value_lower_bound(4).unwrap(), b"a");
    assert_eq!(db.get_value_upper_bound(4).unwrap(), b"z");
    assert_eq!(db.get_value(2, 4).unwrap().unwrap(), b"a");
}

#[test]
fn metadata_set_get_delete() {
    let dir = tempdir().unwrap();
    let mut db = WritableDatabase::create(dir.path().join("db")).unwrap();

    db.set_metadata(b"schema", b"v2").unwrap();
    db.set_metadata(b"owner", b"search-team").unwrap();
    db.commit().unwrap();

    assert_eq!(db.get_metadata(b"schema").unwrap(), b"v2");
    assert_eq!(db.get_metadata(b"missing").unwrap(), b"");
    assert_eq!(
        db.metadata_keys().unwrap(),
        vec![b"owner".to_vec(), b"schema".to_vec()]
    );

    db.set_metadata(b"schema", b"").unwrap();
    db.commit().unwrap();
    assert_eq!(db.get_metadata(b"schema").unwrap(), b"");
    assert_eq!(db.metadata_keys().unwrap(), vec![b"owner".to_vec()]);
}

#[test]
fn spelling_and_synonyms_survive_commit() {
    let dir = tempdir().unwrap();
    let mut db = WritableDatabase::create(dir.path().join("db")).unwrap();

    db.add_spelling(b"receive", 2);
    db.add_synonym(b"fast", b"quick").unwrap();
    db.add_synonym(b"fast", b"rapid").unwrap();
    db.commit().unwrap();

    assert_eq!(db.get_spelling_frequency(b"receive").unwrap(), 2);
    assert_eq!(
        db.get_synonyms(b"fast").unwrap(),
        vec![b"quick".to_vec(), b"rapid".to_vec()]
    );

    let reader = Database::open(dir.path().join("db")).unwrap();
    assert_eq!(reader.get_spelling_frequency(b"receive").unwrap(), 2);
    assert_eq!(reader.get_synonyms(b"fast").unwrap().len(), 2);

    db.remove_spelling(b"receive", 2);
    db.clear_synonyms(b"fast");
    db.commit().unwrap();
    assert_eq!(db.get_spelling_frequency(b"receive").unwrap(), 0);
    assert!(db.get_synonyms(b"fast").unwrap().is_empty());
}

#[test]
fn cancel_discards_staged_documents() {
    let dir = tempdir().unwrap();
    let mut db = WritableDatabase::create(dir.path().join("db")).unwrap();

    db.add_document(&two_term_doc()).unwrap();
    db.commit().unwrap();

    db.add_document(&two_term_doc()).unwrap();
    db.cancel().unwrap();
    db.commit().unwrap();

    assert_eq!(db.get_doccount(), 1);
    assert_eq!(db.get_termfreq(b"cat").unwrap(), 1);
    // Stats were re-read from the committed state.
    assert_eq!(db.get_lastdocid(), 1);
}

#[test]
fn empty_term_query_is_invalid_argument() {
    let dir = tempdir().unwrap();
    let db = WritableDatabase::create(dir.path().join("db")).unwrap();
    let err = db.get_termfreq(b"").unwrap_err();
    assert!(matches!(
        db_error_kind(&err),
        Some(DbError::InvalidArgument(_))
    ));
}

#[test]
fn deleting_termlist_files_disables_document_mutation() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("db");
    {
        let mut db = WritableDatabase::create(&path).unwrap();
        db.add_document(&two_term_doc()).unwrap();
        db.commit().unwrap();
    }
    for suffix in ["DB", "baseA", "baseB"] {
        let file = path.join(format!("termlist.{}", suffix));
        if file.exists() {
            std::fs::remove_file(file).unwrap();
        }
    }

    let mut db = WritableDatabase::open(&path).unwrap();
    let err = db.delete_document(1).unwrap_err();
    assert!(matches!(
        db_error_kind(&err),
        Some(DbError::FeatureUnavailable(_))
    ));
    let err = db.replace_document(1, &two_term_doc()).unwrap_err();
    assert!(matches!(
        db_error_kind(&err),
        Some(DbError::FeatureUnavailable(_))
    ));
    // Adding brand-new documents still works without a termlist.
    db.add_document(&two_term_doc()).unwrap();
    db.commit().unwrap();
    assert_eq!(db.get_doccount(), 2);
}

#[test]
fn auto_flush_fires_once_per_threshold() {
    let dir = tempdir().unwrap();
    let mut db = WritableDatabase::create(dir.path().join("db")).unwrap();
    let initial_rev = db.get_revision_number();

    // The default threshold is 10 000 document-level changes; crossing
    // it flushes and applies exactly once.
    for i in 0..10_000u32 {
        let mut doc = Document::new();
        doc.add_term(format!("t{}", i % 500), 1);
        db.add_document(&doc).unwrap();
    }
    let after_adds = db.get_revision_number();
    assert_eq!(after_adds, initial_rev + 1);

    // Everything was flushed by the threshold crossing, so the final
    // commit has nothing left and does not consume a revision.
    db.commit().unwrap();
    assert_eq!(db.get_revision_number(), after_adds);
    assert_eq!(db.get_doccount(), 10_000);
    assert_eq!(db.get_termfreq(b"t0").unwrap(), 20);
}
