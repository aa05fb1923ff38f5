//! # Storage Module
//!
//! The foundational file layer under the B-tree tables: memory-mapped
//! block files, the database format marker, and the writer's exclusive
//! lock.
//!
//! ## Directory Layout
//!
//! A database is a directory:
//!
//! ```text
//! db_dir/
//! ├── iamchert           # format magic + database UUID
//! ├── flintlock          # writer's exclusive lock (fcntl)
//! ├── postlist.DB        # one block file per table
//! ├── postlist.baseA     # alternating superblocks
//! ├── postlist.baseB
//! ├── position.DB ...    # position, termlist, record, spelling, synonym
//! └── changes17          # optional changeset per committed revision
//! ```
//!
//! ## Safety Model
//!
//! Block files are memory-mapped. The mapped region is invalidated by
//! `grow()`, which takes `&mut self`, so the borrow checker guarantees no
//! block reference survives a remap. All writes go through
//! `block_mut()`; durability is explicit via `sync()`.
//!
//! ## Module Organization
//!
//! - `mmap`: block-granular memory-mapped storage ([`BlockStorage`])
//! - `version`: the `iamchert` marker file ([`VersionFile`])
//! - `lock`: the `flintlock` fcntl write lock ([`WriteLock`])

mod lock;
mod mmap;
mod version;

pub use lock::WriteLock;
pub use mmap::BlockStorage;
pub use version::VersionFile;
