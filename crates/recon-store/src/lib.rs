//! Document store for the reconciliation pipeline.
//!
//! Collections are named sets of loosely-typed documents, one SQLite table
//! each (`id INTEGER PRIMARY KEY` plus a JSON `doc` column). Filters compile
//! to `json_extract` WHERE clauses; cursors page by rowid so a batch loop
//! never materializes more than one batch. All writes are either plain
//! inserts, keyed read-merge-write updates, or keyed upserts — there are no
//! cross-collection transactions.

mod cursor;
mod error;
mod filter;
mod store;

pub use cursor::Cursor;
pub use error::StoreError;
pub use filter::Filter;
pub use store::{Collection, DocId, Store, UpsertOutcome};
