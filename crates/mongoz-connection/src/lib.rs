//! Mongoz Connection - Connection management and profile storage
//!
//! `ConnectionManager` is a blocking façade over the async query engine.
//! It owns its Tokio runtime and caches one connection per profile identity.

mod manager;
mod runtime;
mod sinks;
mod storage;

pub use manager::ConnectionManager;
pub use sinks::{LoadingSink, NoLoadingSink, ResultSink};
pub use storage::ProfileStore;
