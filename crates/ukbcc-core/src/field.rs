//! Field classification: one [`FieldDescriptor`] per wide-table column.
//!
//! A column header `"<field_id>-<instance>.<array>"` is split into its bare
//! field id, looked up in the [`Catalogue`], and classified by declared value
//! type. The declared type fixes the SQL storage class through a total
//! `match`, so adding a variant without a mapping does not compile.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{Catalogue, Error, Result};

/// Name of the identifier column in every source file.
pub const EID_COLUMN: &str = "eid";

// ─── Type taxonomy ───────────────────────────────────────────────────────────

/// Value type as declared in the metadata catalogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeclaredType {
  Integer,
  Continuous,
  Text,
  Date,
  Time,
  CategoricalSingle,
  CategoricalMultiple,
  Compound,
}

impl DeclaredType {
  /// The catalogue spelling of this type.
  pub fn label(self) -> &'static str {
    match self {
      Self::Integer => "Integer",
      Self::Continuous => "Continuous",
      Self::Text => "Text",
      Self::Date => "Date",
      Self::Time => "Time",
      Self::CategoricalSingle => "Categorical single",
      Self::CategoricalMultiple => "Categorical multiple",
      Self::Compound => "Compound",
    }
  }

  pub fn sql_type(self) -> SqlType {
    match self {
      Self::Integer => SqlType::Integer,
      Self::Continuous => SqlType::Real,
      Self::Text | Self::CategoricalSingle | Self::CategoricalMultiple | Self::Compound => {
        SqlType::Varchar
      }
      Self::Date | Self::Time => SqlType::Numeric,
    }
  }

  pub fn repr_type(self) -> ReprType {
    match self {
      Self::Integer => ReprType::Int64,
      Self::Continuous => ReprType::Real,
      Self::Text
      | Self::Date
      | Self::Time
      | Self::CategoricalSingle
      | Self::CategoricalMultiple
      | Self::Compound => ReprType::Text,
    }
  }

  /// Whether one stored value may hold several comma-separated tokens.
  pub fn is_multi_valued(self) -> bool {
    matches!(self, Self::CategoricalMultiple | Self::Compound)
  }
}

impl FromStr for DeclaredType {
  type Err = ();

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim() {
      "Integer" => Ok(Self::Integer),
      "Continuous" => Ok(Self::Continuous),
      "Text" => Ok(Self::Text),
      "Date" => Ok(Self::Date),
      "Time" => Ok(Self::Time),
      "Categorical single" => Ok(Self::CategoricalSingle),
      "Categorical multiple" => Ok(Self::CategoricalMultiple),
      "Compound" => Ok(Self::Compound),
      _ => Err(()),
    }
  }
}

impl fmt::Display for DeclaredType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.label()) }
}

/// SQL storage class of a `value` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SqlType {
  Integer,
  Varchar,
  Real,
  Numeric,
}

impl SqlType {
  pub fn as_sql(self) -> &'static str {
    match self {
      Self::Integer => "INTEGER",
      Self::Varchar => "VARCHAR",
      Self::Real => "REAL",
      Self::Numeric => "NUMERIC",
    }
  }
}

impl fmt::Display for SqlType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_sql()) }
}

/// In-memory representation used while melting rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReprType {
  Int64,
  Real,
  Text,
}

// ─── Column identifiers ──────────────────────────────────────────────────────

/// A parsed `"<field_id>-<instance>.<array>"` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnId {
  pub field_id: String,
  pub instance: u32,
  pub array:    u32,
}

impl FromStr for ColumnId {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    let bad = || Error::ColumnHeader(s.to_owned());
    let (field_id, rest) = s.split_once('-').ok_or_else(bad)?;
    let (instance, array) = rest.split_once('.').ok_or_else(bad)?;
    if field_id.is_empty() || !field_id.bytes().all(|b| b.is_ascii_digit()) {
      return Err(bad());
    }
    Ok(Self {
      field_id: field_id.to_owned(),
      instance: instance.parse().map_err(|_| bad())?,
      array:    array.parse().map_err(|_| bad())?,
    })
  }
}

// ─── Descriptors ─────────────────────────────────────────────────────────────

/// Everything needed to route one source column into the long format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
  pub source_column: String,
  pub field_id:      String,
  /// `None` for the identifier column and the clinical-event columns.
  pub category:      Option<u32>,
  pub declared_type: DeclaredType,
  pub sql_type:      SqlType,
  pub repr_type:     ReprType,
  /// Instance number from the header; becomes the fact's `time`.
  pub instance:      Option<u32>,
  pub array:         Option<u32>,
}

impl FieldDescriptor {
  pub(crate) fn new(
    source_column: &str,
    field_id: &str,
    category: Option<u32>,
    declared: DeclaredType,
  ) -> Self {
    Self {
      source_column: source_column.to_owned(),
      field_id:      field_id.to_owned(),
      category,
      declared_type: declared,
      sql_type:      declared.sql_type(),
      repr_type:     declared.repr_type(),
      instance:      None,
      array:         None,
    }
  }

  /// Descriptor for the identifier column.
  pub fn eid() -> Self { Self::new(EID_COLUMN, EID_COLUMN, None, DeclaredType::Integer) }

  pub fn is_eid(&self) -> bool { self.field_id == EID_COLUMN }

  /// Category as printed in catalogue dumps, with `-1` for the sentinel.
  pub fn category_code(&self) -> i64 { self.category.map_or(-1, i64::from) }
}

/// Classify every column of a wide-table header.
///
/// Output order matches `header`; repeated instances of the same field each
/// get their own descriptor. Fails on the first column whose field is
/// missing from the catalogue or whose declared type is not recognised.
pub fn build_field_descriptors<S: AsRef<str>>(
  header: &[S],
  catalogue: &Catalogue,
) -> Result<Vec<FieldDescriptor>> {
  header
    .iter()
    .map(|column| {
      let column = column.as_ref().trim();
      if column == EID_COLUMN {
        return Ok(FieldDescriptor::eid());
      }
      let id: ColumnId = column.parse()?;
      let entry = catalogue.resolve(column, &id.field_id)?;
      let declared = entry
        .value_type
        .parse::<DeclaredType>()
        .map_err(|()| Error::TypeMapping {
          field_id: id.field_id.clone(),
          declared: entry.value_type.clone(),
        })?;
      let mut descriptor = FieldDescriptor::new(column, &id.field_id, Some(entry.category), declared);
      descriptor.instance = Some(id.instance);
      descriptor.array = Some(id.array);
      Ok(descriptor)
    })
    .collect()
}
