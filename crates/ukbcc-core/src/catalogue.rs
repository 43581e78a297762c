//! Field metadata catalogue (the biobank "showcase" export).
//!
//! The catalogue is keyed by bare field id and supplies the grouping
//! category and the declared value type for every field that may appear in
//! a wide extract. Declared types are kept verbatim here; turning them into
//! a storage class is the job of [`crate::field`].

use std::{collections::HashMap, fs::File, io::Read, path::Path};

use crate::{Error, Result};

const FIELD_ID_COLUMN: &str = "FieldID";
const CATEGORY_COLUMN: &str = "Category";
const VALUE_TYPE_COLUMN: &str = "ValueType";
const TITLE_COLUMN: &str = "Field";

/// One catalogue row, reduced to what classification needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogueEntry {
  pub field_id:   String,
  pub category:   u32,
  /// Declared value type exactly as written in the catalogue.
  pub value_type: String,
  /// Human-readable field title, when the export carries one.
  pub title:      Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Catalogue {
  entries: HashMap<String, CatalogueEntry>,
}

impl Catalogue {
  pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
    Self::from_reader(File::open(path)?)
  }

  /// Read a comma-delimited catalogue with a header row.
  ///
  /// Columns are located by name, so extra columns and any column order
  /// are accepted.
  pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
    let mut csv = csv::ReaderBuilder::new()
      .has_headers(true)
      .flexible(true)
      .from_reader(reader);

    let headers = csv.headers()?.clone();
    let position = |name: &str| {
      headers
        .iter()
        .position(|h| h.trim() == name)
        .ok_or_else(|| Error::CatalogueFormat {
          row:     0,
          message: format!("missing {name} column"),
        })
    };
    let field_idx = position(FIELD_ID_COLUMN)?;
    let category_idx = position(CATEGORY_COLUMN)?;
    let type_idx = position(VALUE_TYPE_COLUMN)?;
    let title_idx = headers.iter().position(|h| h.trim() == TITLE_COLUMN);

    let mut catalogue = Self::default();
    for (i, record) in csv.records().enumerate() {
      let record = record?;
      let row = i as u64 + 1;
      let cell = |idx: usize| record.get(idx).map(str::trim).unwrap_or("");

      let field_id = cell(field_idx);
      if field_id.is_empty() {
        return Err(Error::CatalogueFormat {
          row,
          message: "empty FieldID".to_owned(),
        });
      }
      let category = cell(category_idx).parse::<u32>().map_err(|_| Error::CatalogueFormat {
        row,
        message: format!("category {:?} is not an unsigned integer", cell(category_idx)),
      })?;
      if catalogue.get(field_id).is_some() {
        return Err(Error::CatalogueFormat {
          row,
          message: format!("field {field_id} is listed twice"),
        });
      }
      let title = title_idx.map(cell).filter(|t| !t.is_empty()).map(str::to_owned);

      catalogue.insert(CatalogueEntry {
        field_id: field_id.to_owned(),
        category,
        value_type: cell(type_idx).to_owned(),
        title,
      });
    }
    Ok(catalogue)
  }

  /// Add or replace an entry.
  pub fn insert(&mut self, entry: CatalogueEntry) {
    self.entries.insert(entry.field_id.clone(), entry);
  }

  pub fn get(&self, field_id: &str) -> Option<&CatalogueEntry> { self.entries.get(field_id) }

  /// Look up the entry for the field behind `column`, failing the build
  /// when the field is unknown.
  pub fn resolve(&self, column: &str, field_id: &str) -> Result<&CatalogueEntry> {
    self.get(field_id).ok_or_else(|| Error::CatalogueLookup {
      column:   column.to_owned(),
      field_id: field_id.to_owned(),
    })
  }

  /// Title for display, falling back to the field id itself.
  pub fn title<'a>(&'a self, field_id: &'a str) -> &'a str {
    self
      .get(field_id)
      .and_then(|e| e.title.as_deref())
      .unwrap_or(field_id)
  }

  pub fn len(&self) -> usize { self.entries.len() }

  pub fn is_empty(&self) -> bool { self.entries.is_empty() }
}
