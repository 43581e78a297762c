//! SQLite backend for the ukbcc cohort database.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated
//! thread without blocking the async runtime. Builds stream the sources
//! into four long-format fact tables; queries run one parameterised
//! statement per criteria term.

mod encode;
mod ingest;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
