//! The four long-format fact tables and the field → table routing map.
//!
//! Every fact lands in exactly one of `str`, `int`, `real` or `datetime`,
//! chosen by the storage class of its field. All four share the column
//! layout `(eid, field, time, value)` and differ only in the type of
//! `value`.

use std::{
  collections::{BTreeSet, HashMap},
  fmt,
};

use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  field::{DeclaredType, FieldDescriptor, SqlType},
};

// ─── Tables ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TableKind {
  Str,
  Int,
  Real,
  Datetime,
}

impl TableKind {
  /// Canonical table order; DDL and digests follow it.
  pub const ALL: [TableKind; 4] = [Self::Str, Self::Int, Self::Real, Self::Datetime];

  pub fn name(self) -> &'static str {
    match self {
      Self::Str => "str",
      Self::Int => "int",
      Self::Real => "real",
      Self::Datetime => "datetime",
    }
  }

  /// Inverse of [`TableKind::name`].
  pub fn from_name(name: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|kind| kind.name() == name)
  }

  pub fn for_sql_type(sql_type: SqlType) -> Self {
    match sql_type {
      SqlType::Varchar => Self::Str,
      SqlType::Integer => Self::Int,
      SqlType::Real => Self::Real,
      SqlType::Numeric => Self::Datetime,
    }
  }

  pub fn sql_type(self) -> SqlType {
    match self {
      Self::Str => SqlType::Varchar,
      Self::Int => SqlType::Integer,
      Self::Real => SqlType::Real,
      Self::Datetime => SqlType::Numeric,
    }
  }

  /// Column list shared by all four tables; only `value` differs.
  pub fn columns_ddl(self) -> String {
    format!("(eid INTEGER, field VARCHAR, time INTEGER, value {})", self.sql_type().as_sql())
  }
}

impl fmt::Display for TableKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.pad(self.name()) }
}

/// One fact table and the fields routed into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
  pub kind:   TableKind,
  pub fields: BTreeSet<String>,
}

impl TableSchema {
  pub fn name(&self) -> &'static str { self.kind.name() }

  pub fn drop_statement(&self) -> String { format!("DROP TABLE IF EXISTS {}", self.name()) }

  pub fn create_statement(&self) -> String {
    format!("CREATE TABLE {} {}", self.name(), self.kind.columns_ddl())
  }

  /// Lookup indexes created once the table is loaded.
  pub fn index_statements(&self) -> [String; 2] {
    let t = self.name();
    [
      format!("CREATE INDEX {t}_field_value_idx ON {t} (field, value)"),
      format!("CREATE INDEX {t}_eid_idx ON {t} (eid)"),
    ]
  }
}

// ─── Routing ─────────────────────────────────────────────────────────────────

/// Where a field's facts live and how its values are matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRoute {
  pub table:         TableKind,
  pub declared_type: DeclaredType,
}

impl FieldRoute {
  pub fn multi_valued(&self) -> bool { self.declared_type.is_multi_valued() }
}

impl fmt::Display for FieldRoute {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} ({})", self.table, self.declared_type)
  }
}

/// Read-only map from field id to its owning table.
///
/// Built once per database build and stored next to the tables it routes
/// into; queries compile against the stored copy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldTableMap {
  routes: HashMap<String, FieldRoute>,
}

impl FieldTableMap {
  pub fn get(&self, field_id: &str) -> Option<&FieldRoute> { self.routes.get(field_id) }

  pub fn table_of(&self, field_id: &str) -> Option<TableKind> {
    self.get(field_id).map(|r| r.table)
  }

  pub fn len(&self) -> usize { self.routes.len() }

  pub fn is_empty(&self) -> bool { self.routes.is_empty() }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldRoute)> {
    self.routes.iter().map(|(k, v)| (k.as_str(), v))
  }
}

impl FromIterator<(String, FieldRoute)> for FieldTableMap {
  fn from_iter<I: IntoIterator<Item = (String, FieldRoute)>>(routes: I) -> Self {
    Self { routes: routes.into_iter().collect() }
  }
}

// ─── Schema ──────────────────────────────────────────────────────────────────

/// The full output of a schema build: four tables plus the routing map.
///
/// Built once per database build; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
  tables:    [TableSchema; 4],
  table_map: FieldTableMap,
}

impl Schema {
  pub fn tables(&self) -> &[TableSchema; 4] { &self.tables }

  pub fn table(&self, kind: TableKind) -> &TableSchema {
    &self.tables[kind as usize]
  }

  pub fn table_map(&self) -> &FieldTableMap { &self.table_map }

  /// Drop-then-create statements, table by table in canonical order.
  pub fn ddl(&self) -> Vec<String> {
    self
      .tables
      .iter()
      .flat_map(|t| [t.drop_statement(), t.create_statement()])
      .collect()
  }

  pub fn index_ddl(&self) -> Vec<String> {
    self.tables.iter().flat_map(TableSchema::index_statements).collect()
  }
}

/// Group descriptors into the four fact tables.
///
/// The identifier column is skipped. A field id that shows up with two
/// different routes (table or declared type) is rejected.
pub fn build_schema(descriptors: &[FieldDescriptor]) -> Result<Schema> {
  let mut tables = TableKind::ALL.map(|kind| TableSchema { kind, fields: BTreeSet::new() });
  let mut routes: HashMap<String, FieldRoute> = HashMap::new();

  for descriptor in descriptors.iter().filter(|d| !d.is_eid()) {
    let route = FieldRoute {
      table:         TableKind::for_sql_type(descriptor.sql_type),
      declared_type: descriptor.declared_type,
    };
    match routes.get(&descriptor.field_id) {
      Some(existing) if *existing != route => {
        return Err(Error::SchemaConsistency {
          field_id: descriptor.field_id.clone(),
          first:    existing.to_string(),
          second:   route.to_string(),
        });
      }
      Some(_) => {}
      None => {
        routes.insert(descriptor.field_id.clone(), route);
      }
    }
    for table in tables.iter_mut().filter(|t| t.kind == route.table) {
      table.fields.insert(descriptor.field_id.clone());
    }
  }

  Ok(Schema { tables, table_map: FieldTableMap { routes } })
}
