//! Error types for `ukbcc-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// A wide-table column names a field the metadata catalogue does not know.
  #[error("column {column:?}: field {field_id} is not in the catalogue")]
  CatalogueLookup { column: String, field_id: String },

  #[error("field {field_id}: declared value type {declared:?} has no storage mapping")]
  TypeMapping { field_id: String, declared: String },

  /// The same field id was routed two different ways.
  #[error("field {field_id} routed to both {first} and {second}")]
  SchemaConsistency {
    field_id: String,
    first:    String,
    second:   String,
  },

  #[error("{source_name} row {row}: {message}")]
  SourceFormat {
    source_name: String,
    row:         u64,
    message:     String,
  },

  #[error("malformed column header: {0:?}")]
  ColumnHeader(String),

  #[error("catalogue row {row}: {message}")]
  CatalogueFormat { row: u64, message: String },

  #[error("criteria group {group}: {encoded} encoded terms but {decoded} decoded terms")]
  CriteriaMisaligned {
    group:   &'static str,
    encoded: usize,
    decoded: usize,
  },

  #[error("criteria dump: {0}")]
  CriteriaFormat(String),

  #[error("csv error: {0}")]
  Csv(#[from] csv::Error),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
