//! MongoDB driver for mongoz
//!
//! Implements the `DatabaseDriver` and `Connection` traits from
//! `mongoz-core` on top of the official `mongodb` crate.
//!
//! # Example
//!
//! ```ignore
//! use mongoz_core::{ConnectionProfile, DatabaseDriver};
//! use mongoz_driver_mongodb::MongoDbDriver;
//!
//! let driver = MongoDbDriver::new();
//! let profile = ConnectionProfile::localhost();
//! let conn = driver.connect(&profile).await?;
//! let databases = conn.list_database_names().await?;
//! ```

mod connection;
mod driver;
#[cfg(test)]
mod driver_tests;

pub use connection::*;
pub use driver::*;
