//! Mongoz Core - Core abstractions and types for the document store client
//!
//! This crate provides the fundamental traits and types that all other
//! mongoz crates depend on. It defines:
//!
//! - `ConnectionProfile` - How to reach a server, with endpoint validation
//! - `QueryOptions` - Parsed and validated query fragments
//! - `DocumentTree` / `Node` - Editable result documents and their text form
//! - `DatabaseDriver` / `Connection` - Traits the engine runs against
//! - `MongozError` - The error type shared by every crate

mod connection;
pub mod document;
mod driver;
mod error;
pub mod profile;
pub mod query;
mod types;

pub use connection::*;
pub use document::{DocumentTree, ID_FIELD, Node, NodeKind, NodePath, PathSegment, format_utc_date};
pub use driver::*;
pub use error::*;
pub use profile::{
    AuthMechanism, ConnectionProfile, IgnoreMatcher, ProfileFields, ProfileIdentity,
    ReadPreference, ServerAddress, validate_endpoints,
};
pub use query::{FindRequest, QueryOptions, QueryRequest, RawQuery};
pub use types::*;

pub use bson;
