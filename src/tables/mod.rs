//! # Table Wrappers
//!
//! One module per table, each owning its key and value encodings over
//! the shared multi-revision [`Table`](crate::btree::Table) structure,
//! plus the two pieces of shared bookkeeping that live inside the
//! postlist table: aggregate statistics and document values.
//!
//! | Table      | Keys                  | Values                         |
//! |------------|-----------------------|--------------------------------|
//! | `postlist` | partitioned key space | postings, doclens, metadata,   |
//! |            |                       | stats, value chunks and stats  |
//! | `position` | (did, term)           | interpolative position lists   |
//! | `termlist` | did                   | doclen + (term, wdf) vector    |
//! | `record`   | did                   | opaque document data           |
//! | `spelling` | word                  | word frequency                 |
//! | `synonym`  | term                  | synonym set                    |

pub mod position;
pub mod postlist;
pub mod record;
pub mod spelling;
pub mod stats;
pub mod synonym;
pub mod termlist;
pub mod values;

pub use position::PositionTable;
pub use postlist::{DocLenChanges, FreqDeltas, ModPostlists, PostingOp, PostlistTable, TermIter};
pub use record::RecordTable;
pub use spelling::SpellingTable;
pub use stats::{DatabaseStats, DOCLEN_DELETED};
pub use synonym::SynonymTable;
pub use termlist::{TermList, TermlistTable};
pub use values::{ValueManager, ValueStats};
