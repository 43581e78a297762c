//! Error type for `ukbcc-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] ukbcc_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("sqlite error: {0}")]
  Sqlite(#[from] rusqlite::Error),

  #[error("csv error: {0}")]
  Csv(#[from] csv::Error),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// The build was cancelled between batches and rolled back.
  #[error("build cancelled after {rows} rows; previous tables kept")]
  Cancelled { rows: u64 },

  #[error("stored route for field {field_id} is unreadable: {table_name} / {declared_type}")]
  CorruptRoute {
    field_id:      String,
    table_name:    String,
    declared_type: String,
  },

  #[error("cannot route {source_name} columns: {message}")]
  Routing {
    source_name: &'static str,
    message:     String,
  },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
