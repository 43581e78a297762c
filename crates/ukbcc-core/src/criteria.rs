//! Cohort criteria: boolean groups of `(field, value)` terms.
//!
//! Criteria travel in two parallel forms. The encoded form carries field
//! ids and coded values and is what gets compiled; the decoded form carries
//! human labels for audit. [`CohortCriteria`] keeps the two index-aligned.

use std::{
  fmt,
  fs::File,
  io::{BufRead, BufReader, BufWriter, Write},
  path::Path,
};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const ENCODED_DUMP: &str = "cohort_dictionary_encoded.txt";
pub const DECODED_DUMP: &str = "cohort_dictionary_decoded.txt";

// ─── Terms and groups ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Group {
  AllOf,
  AnyOf,
  NoneOf,
}

impl Group {
  pub const ALL: [Group; 3] = [Self::AllOf, Self::AnyOf, Self::NoneOf];

  pub fn key(self) -> &'static str {
    match self {
      Self::AllOf => "all_of",
      Self::AnyOf => "any_of",
      Self::NoneOf => "none_of",
    }
  }

  fn from_key(key: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|g| g.key() == key)
  }
}

impl fmt::Display for Group {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.key()) }
}

/// One elementary `(field_id, value)` term. Serialises as a two-element
/// array.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(String, String)", into = "(String, String)")]
pub struct Term {
  pub field_id: String,
  pub value:    String,
}

impl Term {
  pub fn new(field_id: impl Into<String>, value: impl Into<String>) -> Self {
    Self { field_id: field_id.into(), value: value.into() }
  }
}

impl From<(String, String)> for Term {
  fn from((field_id, value): (String, String)) -> Self { Self { field_id, value } }
}

impl From<Term> for (String, String) {
  fn from(term: Term) -> Self { (term.field_id, term.value) }
}

impl fmt::Display for Term {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}={}", self.field_id, self.value)
  }
}

/// Three ordered term groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criteria {
  #[serde(default)]
  pub all_of:  Vec<Term>,
  #[serde(default)]
  pub any_of:  Vec<Term>,
  #[serde(default)]
  pub none_of: Vec<Term>,
}

impl Criteria {
  pub fn group(&self, group: Group) -> &[Term] {
    match group {
      Group::AllOf => &self.all_of,
      Group::AnyOf => &self.any_of,
      Group::NoneOf => &self.none_of,
    }
  }

  fn group_mut(&mut self, group: Group) -> &mut Vec<Term> {
    match group {
      Group::AllOf => &mut self.all_of,
      Group::AnyOf => &mut self.any_of,
      Group::NoneOf => &mut self.none_of,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.all_of.is_empty() && self.any_of.is_empty() && self.none_of.is_empty()
  }

  pub fn len(&self) -> usize { self.all_of.len() + self.any_of.len() + self.none_of.len() }
}

// ─── Aligned pair ────────────────────────────────────────────────────────────

/// Encoded and decoded criteria, kept 1:1 per group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CohortCriteria {
  encoded: Criteria,
  decoded: Criteria,
}

impl CohortCriteria {
  /// Pair the two forms, rejecting any group whose lengths differ.
  pub fn new(encoded: Criteria, decoded: Criteria) -> Result<Self> {
    for group in Group::ALL {
      let (e, d) = (encoded.group(group).len(), decoded.group(group).len());
      if e != d {
        return Err(Error::CriteriaMisaligned { group: group.key(), encoded: e, decoded: d });
      }
    }
    Ok(Self { encoded, decoded })
  }

  /// Use the encoded terms as their own labels.
  pub fn from_encoded(encoded: Criteria) -> Self {
    Self { decoded: encoded.clone(), encoded }
  }

  /// Append one term to both forms at once.
  pub fn push(&mut self, group: Group, encoded: Term, decoded: Term) {
    self.encoded.group_mut(group).push(encoded);
    self.decoded.group_mut(group).push(decoded);
  }

  pub fn encoded(&self) -> &Criteria { &self.encoded }

  pub fn decoded(&self) -> &Criteria { &self.decoded }

  /// Write both dumps into `dir`.
  pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;
    for (name, criteria) in [(ENCODED_DUMP, &self.encoded), (DECODED_DUMP, &self.decoded)] {
      let mut out = BufWriter::new(File::create(dir.join(name))?);
      write_dictionary(criteria, &mut out)?;
      out.flush()?;
    }
    Ok(())
  }

  /// Read both dumps back from `dir`.
  pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
    let dir = dir.as_ref();
    let read = |name: &str| -> Result<Criteria> {
      read_dictionary(BufReader::new(File::open(dir.join(name))?))
    };
    Self::new(read(ENCODED_DUMP)?, read(DECODED_DUMP)?)
  }
}

// ─── Dump format ─────────────────────────────────────────────────────────────

/// One `group: [[field, value], ...]` line per group.
pub fn write_dictionary<W: Write>(criteria: &Criteria, mut out: W) -> Result<()> {
  for group in Group::ALL {
    let terms = serde_json::to_string(criteria.group(group))?;
    writeln!(out, "{}: {terms}", group.key())?;
  }
  Ok(())
}

/// Parse a dump produced by [`write_dictionary`]. Missing groups are empty.
pub fn read_dictionary<R: BufRead>(input: R) -> Result<Criteria> {
  let mut criteria = Criteria::default();
  for line in input.lines() {
    let line = line?;
    let line = line.trim();
    if line.is_empty() {
      continue;
    }
    let (key, terms) = line
      .split_once(':')
      .ok_or_else(|| Error::CriteriaFormat(format!("no group key in {line:?}")))?;
    let group = Group::from_key(key.trim())
      .ok_or_else(|| Error::CriteriaFormat(format!("unknown group {:?}", key.trim())))?;
    *criteria.group_mut(group) = serde_json::from_str(terms.trim())?;
  }
  Ok(criteria)
}
