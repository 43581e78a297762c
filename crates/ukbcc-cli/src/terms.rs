//! Command-line criteria terms.

use ukbcc_core::{
  Catalogue,
  criteria::{CohortCriteria, Group, Term},
};

/// Parse `FIELD=VALUE`. The value may itself contain `=`.
pub fn parse_term(raw: &str) -> Result<Term, String> {
  let (field, value) = raw
    .split_once('=')
    .ok_or_else(|| format!("expected FIELD=VALUE, got {raw:?}"))?;
  let (field, value) = (field.trim(), value.trim());
  if field.is_empty() || value.is_empty() {
    return Err(format!("expected FIELD=VALUE, got {raw:?}"));
  }
  Ok(Term::new(field, value))
}

/// Append terms to `criteria`, labelling each with its catalogue title.
pub fn push_terms(
  criteria: &mut CohortCriteria,
  group: Group,
  terms: Vec<Term>,
  catalogue: Option<&Catalogue>,
) {
  for term in terms {
    let label = catalogue.map_or(term.field_id.as_str(), |c| c.title(&term.field_id));
    let decoded = Term::new(label, term.value.clone());
    criteria.push(group, term, decoded);
  }
}
