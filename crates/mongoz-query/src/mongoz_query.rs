//! Mongoz Query - query execution and document edits
//!
//! This crate runs validated `QueryOptions` against a `Connection` and
//! turns the rows into `DocumentTree`s, and applies point edits keyed by
//! the document `_id`.

mod executor;
mod mutator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_helpers;

pub use executor::QueryExecutor;
pub use mutator::DocumentMutator;
