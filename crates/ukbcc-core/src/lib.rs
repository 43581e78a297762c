//! Core types and algorithms for the ukbcc cohort curator.
//!
//! Covers field classification against the metadata catalogue, the
//! four-table long-format schema, row melting, criteria compilation and the
//! set algebra that turns per-term results into a cohort. Nothing here
//! touches a database; backends implement [`store::CohortStore`].

pub mod catalogue;
pub mod cohort;
pub mod criteria;
pub mod error;
pub mod field;
pub mod query;
pub mod record;
pub mod schema;
pub mod source;
pub mod store;

pub use catalogue::{Catalogue, CatalogueEntry};
pub use error::{Error, Result};
