//! Connection setup for the cohort database.
//!
//! Runs once when a store is opened. The four fact tables and the
//! `field_routes` table are created empty if missing so that queries
//! against a never-built store see an empty universe rather than a missing
//! table. Every build drops and recreates the fact tables and rewrites
//! `field_routes` in the same transaction.

use ukbcc_core::schema::TableKind;

const PRAGMAS: &str = "
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
";

/// The field → table map of the live build, one row per field.
const ROUTES_TABLE: &str = "
CREATE TABLE IF NOT EXISTS field_routes (
  field         VARCHAR PRIMARY KEY,
  table_name    VARCHAR NOT NULL,
  declared_type VARCHAR NOT NULL
);
";

pub const CLEAR_ROUTES: &str = "DELETE FROM field_routes";

pub const INSERT_ROUTE: &str =
  "INSERT INTO field_routes (field, table_name, declared_type) VALUES (?1, ?2, ?3)";

pub const SELECT_ROUTES: &str = "SELECT field, table_name, declared_type FROM field_routes";

/// Pragmas plus `CREATE TABLE IF NOT EXISTS` for the routes table and each
/// fact table.
pub fn init_statements() -> String {
  let mut sql = PRAGMAS.to_owned();
  sql.push_str(ROUTES_TABLE);
  for kind in TableKind::ALL {
    sql.push_str(&format!(
      "CREATE TABLE IF NOT EXISTS {} {};\n",
      kind.name(),
      kind.columns_ddl()
    ));
  }
  sql
}

pub fn insert_statement(kind: TableKind) -> String {
  format!("INSERT INTO {} (eid, field, time, value) VALUES (?1, ?2, ?3, ?4)", kind.name())
}

/// Rows in the canonical order digests are taken over.
pub fn canonical_rows_statement(kind: TableKind) -> String {
  format!("SELECT eid, field, time, value FROM {} ORDER BY eid, field, time, value", kind.name())
}

pub fn count_statement(kind: TableKind) -> String {
  format!("SELECT COUNT(*) FROM {}", kind.name())
}

/// Distinct identifiers across all four tables.
pub fn universe_statement() -> String {
  TableKind::ALL
    .iter()
    .map(|k| format!("SELECT eid FROM {}", k.name()))
    .collect::<Vec<_>>()
    .join(" UNION ")
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn universe_unions_every_table() {
    assert_eq!(
      universe_statement(),
      "SELECT eid FROM str UNION SELECT eid FROM int UNION SELECT eid FROM real UNION SELECT eid \
       FROM datetime"
    );
  }

  #[test]
  fn init_creates_each_table_once() {
    let sql = init_statements();
    assert_eq!(sql.matches("CREATE TABLE IF NOT EXISTS").count(), 5);
    assert!(sql.contains("CREATE TABLE IF NOT EXISTS field_routes"));
    assert!(sql.contains("CREATE TABLE IF NOT EXISTS datetime (eid INTEGER, field VARCHAR, time INTEGER, value NUMERIC);"));
  }
}
