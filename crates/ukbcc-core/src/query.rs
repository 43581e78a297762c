//! Compiles criteria terms into standalone parameterised queries.
//!
//! Each term becomes a [`TermQuery`]: a table plus a predicate list. SQL
//! text is rendered from the predicates with numbered placeholders and
//! every value is bound, never spliced. A term that cannot be routed or
//! whose value does not fit the owning table compiles to
//! [`CompiledTerm::Unresolved`], which matches nobody.

use crate::{
  criteria::{Criteria, Group, Term},
  record::{FieldValue, coerce},
  schema::{FieldTableMap, TableKind},
};

// ─── Query builder ───────────────────────────────────────────────────────────

/// A value bound to a placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
  Integer(i64),
  Real(f64),
  Text(String),
}

impl From<FieldValue> for SqlParam {
  fn from(value: FieldValue) -> Self {
    match value {
      FieldValue::Integer(i) => Self::Integer(i),
      FieldValue::Real(r) => Self::Real(r),
      FieldValue::Text(t) => Self::Text(t),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
  FieldEquals(String),
  ValueEquals(SqlParam),
  /// The comma-separated `value` contains this token as a whole element.
  ValueHasToken(String),
}

impl Predicate {
  fn render(&self, placeholder: usize) -> String {
    match self {
      Self::FieldEquals(_) => format!("field = ?{placeholder}"),
      Self::ValueEquals(_) => format!("value = ?{placeholder}"),
      Self::ValueHasToken(_) => format!("instr(',' || value || ',', ?{placeholder}) > 0"),
    }
  }

  fn param(&self) -> SqlParam {
    match self {
      Self::FieldEquals(field) => SqlParam::Text(field.clone()),
      Self::ValueEquals(value) => value.clone(),
      Self::ValueHasToken(token) => SqlParam::Text(format!(",{token},")),
    }
  }
}

/// `SELECT DISTINCT eid FROM <table> WHERE <predicates...>`.
#[derive(Debug, Clone, PartialEq)]
pub struct TermQuery {
  pub table:      TableKind,
  pub predicates: Vec<Predicate>,
}

impl TermQuery {
  pub fn sql(&self) -> String {
    let mut sql = format!("SELECT DISTINCT eid FROM {}", self.table.name());
    for (i, predicate) in self.predicates.iter().enumerate() {
      sql.push_str(if i == 0 { " WHERE " } else { " AND " });
      sql.push_str(&predicate.render(i + 1));
    }
    sql
  }

  /// Parameters in placeholder order.
  pub fn params(&self) -> Vec<SqlParam> { self.predicates.iter().map(Predicate::param).collect() }
}

// ─── Compilation ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum CompiledTerm {
  Query { term: Term, query: TermQuery },
  Unresolved { term: Term, reason: String },
}

impl CompiledTerm {
  pub fn term(&self) -> &Term {
    match self {
      Self::Query { term, .. } | Self::Unresolved { term, .. } => term,
    }
  }

  pub fn query(&self) -> Option<&TermQuery> {
    match self {
      Self::Query { query, .. } => Some(query),
      Self::Unresolved { .. } => None,
    }
  }

  pub fn is_resolved(&self) -> bool { matches!(self, Self::Query { .. }) }
}

/// Compile one term against the table map.
pub fn compile_term(term: &Term, table_map: &FieldTableMap) -> CompiledTerm {
  let unresolved = |reason: String| CompiledTerm::Unresolved { term: term.clone(), reason };

  let Some(route) = table_map.get(&term.field_id) else {
    return unresolved(format!("field {} is not in the database", term.field_id));
  };
  let raw = term.value.trim();
  let value_predicate = if route.multi_valued() {
    Predicate::ValueHasToken(raw.to_owned())
  } else {
    match coerce(route.declared_type, raw) {
      Ok(value) => Predicate::ValueEquals(value.into()),
      Err(reason) => return unresolved(format!("{} value {reason}", route.table)),
    }
  };

  CompiledTerm::Query {
    term:  term.clone(),
    query: TermQuery {
      table:      route.table,
      predicates: vec![Predicate::FieldEquals(term.field_id.clone()), value_predicate],
    },
  }
}

/// Per-group compiled terms, in the order the terms were given.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledCriteria {
  pub all_of:  Vec<CompiledTerm>,
  pub any_of:  Vec<CompiledTerm>,
  pub none_of: Vec<CompiledTerm>,
}

impl CompiledCriteria {
  pub fn group(&self, group: Group) -> &[CompiledTerm] {
    match group {
      Group::AllOf => &self.all_of,
      Group::AnyOf => &self.any_of,
      Group::NoneOf => &self.none_of,
    }
  }
}

pub fn compile_criteria(criteria: &Criteria, table_map: &FieldTableMap) -> CompiledCriteria {
  let compile = |group: Group| -> Vec<CompiledTerm> {
    criteria.group(group).iter().map(|t| compile_term(t, table_map)).collect()
  };
  CompiledCriteria {
    all_of:  compile(Group::AllOf),
    any_of:  compile(Group::AnyOf),
    none_of: compile(Group::NoneOf),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    catalogue::tests::showcase,
    field::{build_field_descriptors, tests::MAIN_HEADER},
    schema::build_schema,
  };

  fn table_map() -> FieldTableMap {
    let descriptors = build_field_descriptors(&MAIN_HEADER[..], &showcase()).unwrap();
    build_schema(&descriptors).unwrap().table_map().clone()
  }

  fn compiled(field: &str, value: &str) -> CompiledTerm {
    compile_term(&Term::new(field, value), &table_map())
  }

  #[test]
  fn integer_term_binds_a_typed_value() {
    let term = compiled("21003", "67");
    let query = term.query().unwrap();
    assert_eq!(query.sql(), "SELECT DISTINCT eid FROM int WHERE field = ?1 AND value = ?2");
    assert_eq!(query.params(), vec![
      SqlParam::Text("21003".into()),
      SqlParam::Integer(67)
    ]);
  }

  #[test]
  fn multi_valued_term_matches_tokens() {
    let term = compiled("22182", "2");
    let query = term.query().unwrap();
    assert_eq!(
      query.sql(),
      "SELECT DISTINCT eid FROM str WHERE field = ?1 AND instr(',' || value || ',', ?2) > 0"
    );
    assert_eq!(query.params()[1], SqlParam::Text(",2,".into()));
  }

  #[test]
  fn single_valued_categorical_uses_equality() {
    let term = compiled("6070", "2");
    assert_eq!(term.query().unwrap().predicates[1], Predicate::ValueEquals(SqlParam::Text("2".into())));
  }

  #[test]
  fn date_values_are_normalised() {
    let term = compiled("53", "1/10/2008");
    let query = term.query().unwrap();
    assert_eq!(query.table, TableKind::Datetime);
    assert_eq!(query.params()[1], SqlParam::Text("2008-10-01".into()));
  }

  #[test]
  fn unknown_fields_and_bad_values_are_unresolved() {
    assert!(!compiled("99999", "1").is_resolved());
    assert!(!compiled("21003", "sixty-seven").is_resolved());
    assert_eq!(compiled("99999", "1").term(), &Term::new("99999", "1"));
  }

  #[test]
  fn criteria_compile_group_by_group() {
    let criteria = Criteria {
      all_of:  vec![Term::new("21003", "67")],
      any_of:  vec![],
      none_of: vec![Term::new("6070", "1"), Term::new("31", "0")],
    };
    let compiled = compile_criteria(&criteria, &table_map());
    assert_eq!(compiled.group(Group::AllOf).len(), 1);
    assert!(compiled.group(Group::AnyOf).is_empty());
    let resolved: Vec<_> = compiled.none_of.iter().map(CompiledTerm::is_resolved).collect();
    assert_eq!(resolved, vec![true, false]);
  }
}
