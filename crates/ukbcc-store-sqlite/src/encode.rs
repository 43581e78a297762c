//! Conversions between core values and SQLite values, and the row encoding
//! used for table digests.

use rusqlite::types::{Value, ValueRef};
use sha2::{Digest, Sha256};
use ukbcc_core::{
  field::DeclaredType,
  query::SqlParam,
  record::FieldValue,
  schema::{FieldRoute, TableKind},
};

// ─── Values ──────────────────────────────────────────────────────────────────

pub fn encode_value(value: FieldValue) -> Value {
  match value {
    FieldValue::Integer(i) => Value::Integer(i),
    FieldValue::Real(r) => Value::Real(r),
    FieldValue::Text(t) => Value::Text(t),
  }
}

pub fn encode_param(param: &SqlParam) -> Value {
  match param {
    SqlParam::Integer(i) => Value::Integer(*i),
    SqlParam::Real(r) => Value::Real(*r),
    SqlParam::Text(t) => Value::Text(t.clone()),
  }
}

/// Identifiers are checked to fit `i64` when parsed.
pub fn encode_eid(eid: u64) -> i64 { eid as i64 }

pub fn decode_eid(eid: i64) -> Option<u64> { u64::try_from(eid).ok() }

// ─── Routes ──────────────────────────────────────────────────────────────────

pub fn encode_route(route: &FieldRoute) -> (&'static str, &'static str) {
  (route.table.name(), route.declared_type.label())
}

/// `None` when either column holds a name this build does not know.
pub fn decode_route(table_name: &str, declared_type: &str) -> Option<FieldRoute> {
  Some(FieldRoute {
    table:         TableKind::from_name(table_name)?,
    declared_type: declared_type.parse::<DeclaredType>().ok()?,
  })
}

// ─── Digests ─────────────────────────────────────────────────────────────────

/// Feed one cell into `hasher`, tagged by storage class so that `1` and
/// `'1'` hash differently.
pub fn digest_cell(hasher: &mut Sha256, cell: ValueRef<'_>) {
  match cell {
    ValueRef::Null => hasher.update(b"N"),
    ValueRef::Integer(i) => {
      hasher.update(b"I");
      hasher.update(i.to_le_bytes());
    }
    ValueRef::Real(r) => {
      hasher.update(b"R");
      hasher.update(r.to_bits().to_le_bytes());
    }
    ValueRef::Text(t) => {
      hasher.update(b"T");
      hasher.update((t.len() as u64).to_le_bytes());
      hasher.update(t);
    }
    ValueRef::Blob(b) => {
      hasher.update(b"B");
      hasher.update((b.len() as u64).to_le_bytes());
      hasher.update(b);
    }
  }
}

pub fn finish_digest(hasher: Sha256) -> String { hex::encode(hasher.finalize()) }
