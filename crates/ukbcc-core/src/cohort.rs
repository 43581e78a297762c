//! Set algebra over per-term identifier sets.
//!
//! Executing terms is the store's job; combining their results is pure and
//! lives here. Every combinator is a commutative set operation, so the
//! cohort does not depend on term order or group evaluation order.

use std::{fs::File, path::Path};

use roaring::RoaringTreemap;
use serde::Serialize;

use crate::{Result, criteria::Group};

fn intersect_all(sets: &[RoaringTreemap], universe: &RoaringTreemap) -> RoaringTreemap {
  sets.iter().fold(universe.clone(), |acc, s| acc & s)
}

fn union_all(sets: &[RoaringTreemap]) -> RoaringTreemap {
  sets.iter().fold(RoaringTreemap::new(), |acc, s| acc | s)
}

/// Combine per-term results into the final cohort.
///
/// - `all_of`: intersection of the group.
/// - `any_of`: union of the group.
/// - `none_of`: `universe` minus the union of the group.
///
/// An empty group imposes no restriction. The result is always a subset of
/// `universe`.
pub fn combine(
  all_of: &[RoaringTreemap],
  any_of: &[RoaringTreemap],
  none_of: &[RoaringTreemap],
  universe: &RoaringTreemap,
) -> RoaringTreemap {
  let mut cohort = intersect_all(all_of, universe);
  if !any_of.is_empty() {
    cohort &= union_all(any_of);
  }
  if !none_of.is_empty() {
    cohort -= union_all(none_of);
  }
  cohort
}

// ─── Results ─────────────────────────────────────────────────────────────────

/// How many identifiers one term matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TermCount {
  pub group:    Group,
  pub field_id: String,
  pub value:    String,
  pub count:    u64,
  /// `false` when the term could not be compiled and matched nobody.
  pub resolved: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CohortResult {
  pub identifiers:     RoaringTreemap,
  pub per_term_counts: Vec<TermCount>,
}

impl CohortResult {
  /// Identifiers in ascending order.
  pub fn identifiers(&self) -> Vec<u64> { self.identifiers.iter().collect() }

  pub fn len(&self) -> u64 { self.identifiers.len() }

  pub fn is_empty(&self) -> bool { self.identifiers.is_empty() }
}

/// Write `identifiers` as a one-column CSV with an `eid` header.
pub fn export_cohort(identifiers: &RoaringTreemap, destination: impl AsRef<Path>) -> Result<()> {
  let mut writer = csv::Writer::from_writer(File::create(destination)?);
  writer.write_record(["eid"])?;
  for eid in identifiers {
    writer.write_record([eid.to_string()])?;
  }
  writer.flush()?;
  Ok(())
}
