//! # Chert - Multi-Revision Inverted-Index Storage Engine
//!
//! Chert is the on-disk storage core of a full-text search system: six
//! multi-revision B-tree tables holding postings, term positions,
//! termlists, document records, spelling and synonym data, plus the
//! write pipeline that buffers mutations and commits them atomically as
//! a new database revision.
//!
//! ## Quick Start
//!
//! ```ignore
//! use chert::{Document, WritableDatabase, Database};
//!
//! let mut db = WritableDatabase::create("./index")?;
//! let mut doc = Document::new();
//! doc.set_data(&b"A cat and a dog."[..]);
//! doc.add_posting("cat", 3);
//! doc.add_posting("cat", 7);
//! doc.add_posting("dog", 5);
//! let did = db.add_document(&doc)?;
//! db.commit()?;
//!
//! let reader = Database::open("./index")?;
//! assert_eq!(reader.get_doccount(), 1);
//! assert_eq!(reader.open_position_list(did, b"cat")?, vec![3, 7]);
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │   Database / WritableDatabase (coordinator)  │
//! ├──────────────┬───────────────────────────────┤
//! │ PostingBuffer│  ValueManager │ DatabaseStats │
//! ├──────────────┴───────────────────────────────┤
//! │ postlist position termlist record            │
//! │          spelling synonym        (wrappers)  │
//! ├──────────────────────────────────────────────┤
//! │    Multi-revision copy-on-write B-tree       │
//! ├──────────────────────────────────────────────┤
//! │  Block mmap, base files, version, lock       │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency Model
//!
//! One writer, many readers, no global lock. The writer holds a
//! filesystem lock for its lifetime; readers open private snapshots and
//! stay on them until reopened. Commit order (postlist first, record
//! last) makes the record table's superblock the linearization point:
//! whatever revision it exposes is fully committed everywhere else.
//!
//! ## Replication
//!
//! Every commit can emit a `changes<R>` file describing the block delta
//! from revision R to R+1. The [`replication`] module streams those
//! files (or whole-database copies) to a follower and replays them.
//!
//! ## Module Overview
//!
//! - [`database`]: coordinator, posting buffer, writer pipeline
//! - [`btree`]: the multi-revision copy-on-write B-tree
//! - [`tables`]: per-table key/value encodings
//! - [`encoding`]: packed uints, bitstream, position codec
//! - [`storage`]: block mmap, version file, write lock
//! - [`replication`]: changeset export and replay
//! - [`document`]: the indexable document model
//! - [`error`]: the typed error taxonomy

pub mod btree;
pub mod config;
pub mod database;
pub mod document;
pub mod encoding;
pub mod error;
pub mod replication;
pub mod storage;
pub mod tables;

pub use database::writable::WritableDatabase;
pub use database::Database;
pub use document::{DocOrigin, Document, TermData};
pub use error::{db_error_kind, is_doc_not_found, DbError, LockReason};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
