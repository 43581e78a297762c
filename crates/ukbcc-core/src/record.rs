//! Long-format facts and the melting of source rows into them.
//!
//! A wide row becomes one [`LongRecord`] per populated cell; a clinical
//! event row becomes one record per populated value column, stamped with the
//! event date. Empty cells produce nothing.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use csv::StringRecord;

use crate::{
  field::{DeclaredType, EID_COLUMN, FieldDescriptor},
  schema::{FieldTableMap, TableKind},
};

// ─── Values ──────────────────────────────────────────────────────────────────

/// A cell value coerced to its field's representation.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
  Integer(i64),
  Real(f64),
  Text(String),
}

const ISO_DATE: &str = "%Y-%m-%d";
const ISO_DATETIME: &str = "%Y-%m-%dT%H:%M:%S";
const DMY_DATE: &str = "%d/%m/%Y";

/// Parse a calendar date written either as ISO or as day/month/year.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
  NaiveDate::parse_from_str(raw, ISO_DATE)
    .or_else(|_| NaiveDate::parse_from_str(raw, DMY_DATE))
    .ok()
}

fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
  NaiveDateTime::parse_from_str(raw, ISO_DATETIME)
    .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
    .ok()
}

/// Coerce one non-empty cell according to its declared type.
///
/// Dates and times are normalised to ISO text so they compare and sort
/// lexically. The error is a human-readable reason.
pub fn coerce(declared: DeclaredType, raw: &str) -> Result<FieldValue, String> {
  match declared {
    DeclaredType::Integer => raw
      .parse::<i64>()
      .map(FieldValue::Integer)
      .map_err(|_| format!("{raw:?} is not an integer")),
    DeclaredType::Continuous => raw
      .parse::<f64>()
      .map(FieldValue::Real)
      .map_err(|_| format!("{raw:?} is not a number")),
    DeclaredType::Date => parse_date(raw)
      .map(|d| FieldValue::Text(d.format(ISO_DATE).to_string()))
      .ok_or_else(|| format!("{raw:?} is not a date")),
    DeclaredType::Time => parse_datetime(raw)
      .map(|t| FieldValue::Text(t.format(ISO_DATETIME).to_string()))
      .ok_or_else(|| format!("{raw:?} is not a timestamp")),
    DeclaredType::Text
    | DeclaredType::CategoricalSingle
    | DeclaredType::CategoricalMultiple
    | DeclaredType::Compound => Ok(FieldValue::Text(raw.to_owned())),
  }
}

/// Parse an identifier cell. Identifiers are non-negative and fit SQLite's
/// signed 64-bit integers.
pub fn parse_eid(raw: &str) -> Result<u64, String> {
  match raw.trim().parse::<i64>() {
    Ok(eid) if eid >= 0 => Ok(eid as u64),
    _ => Err(format!("identifier {raw:?} is not a non-negative integer")),
  }
}

// ─── Records ─────────────────────────────────────────────────────────────────

/// One fact `(eid, field, time, value)` bound for `table`.
#[derive(Debug, Clone, PartialEq)]
pub struct LongRecord {
  pub table:    TableKind,
  pub eid:      u64,
  pub field_id: String,
  /// Instance number for wide-table facts, event timestamp for clinical
  /// facts, `None` when the event carries no date.
  pub time:     Option<i64>,
  pub value:    FieldValue,
}

struct MeltColumn {
  index:    usize,
  field_id: String,
  declared: DeclaredType,
  table:    TableKind,
  time:     Option<i64>,
}

/// Melts wide-table rows; built once per source from its descriptors.
pub struct RowMelter {
  eid_index: usize,
  width:     usize,
  columns:   Vec<MeltColumn>,
}

impl RowMelter {
  /// Returns `None` when the descriptors contain no identifier column or a
  /// field is missing from `table_map`.
  pub fn new(descriptors: &[FieldDescriptor], table_map: &FieldTableMap) -> Option<Self> {
    let eid_index = descriptors.iter().position(FieldDescriptor::is_eid)?;
    let columns = descriptors
      .iter()
      .enumerate()
      .filter(|(_, d)| !d.is_eid())
      .map(|(index, d)| {
        Some(MeltColumn {
          index,
          field_id: d.field_id.clone(),
          declared: d.declared_type,
          table: table_map.table_of(&d.field_id)?,
          time: d.instance.map(i64::from),
        })
      })
      .collect::<Option<Vec<_>>>()?;
    Some(Self { eid_index, width: descriptors.len(), columns })
  }

  /// Melt one row of cells into facts, appending to `out`.
  ///
  /// On error nothing is appended and the reason is returned.
  pub fn melt(&self, row: &StringRecord, out: &mut Vec<LongRecord>) -> Result<(), String> {
    if row.len() != self.width {
      return Err(format!("expected {} cells, found {}", self.width, row.len()));
    }
    let cell = |index: usize| row.get(index).map(str::trim).unwrap_or("");
    let eid = parse_eid(cell(self.eid_index))?;

    let start = out.len();
    for column in &self.columns {
      let raw = cell(column.index);
      if raw.is_empty() {
        continue;
      }
      match coerce(column.declared, raw) {
        Ok(value) => out.push(LongRecord {
          table: column.table,
          eid,
          field_id: column.field_id.clone(),
          time: column.time,
          value,
        }),
        Err(reason) => {
          out.truncate(start);
          return Err(format!("field {}: {reason}", column.field_id));
        }
      }
    }
    Ok(())
  }
}

// ─── Clinical events ─────────────────────────────────────────────────────────

/// Fixed header of the clinical-events extract.
pub const CLINICAL_COLUMNS: [&str; 8] = [
  EID_COLUMN,
  "data_provider",
  "event_dt",
  "read_2",
  "read_3",
  "value1",
  "value2",
  "value3",
];

const EVENT_DATE_INDEX: usize = 2;

/// Cells are routed by position, so the header must list
/// [`CLINICAL_COLUMNS`] in order.
pub fn check_clinical_header(header: &StringRecord) -> Result<(), String> {
  let found: Vec<&str> = header.iter().map(str::trim).collect();
  if found == CLINICAL_COLUMNS {
    return Ok(());
  }
  Err(format!("expected header {}, found {}", CLINICAL_COLUMNS.join(","), found.join(",")))
}

/// Descriptors for the clinical value columns. Each column name doubles as
/// its field id; `event_dt` is the fact time and gets no descriptor.
pub fn clinical_descriptors() -> Vec<FieldDescriptor> {
  let typed = [
    ("data_provider", DeclaredType::CategoricalSingle),
    ("read_2", DeclaredType::CategoricalSingle),
    ("read_3", DeclaredType::CategoricalSingle),
    ("value1", DeclaredType::Text),
    ("value2", DeclaredType::Text),
    ("value3", DeclaredType::Text),
  ];
  std::iter::once(FieldDescriptor::eid())
    .chain(typed.into_iter().map(|(name, declared)| FieldDescriptor::new(name, name, None, declared)))
    .collect()
}

/// Melts clinical-event rows, routing each value column through the shared
/// table map.
pub struct ClinicalMelter {
  columns: Vec<(usize, String, DeclaredType, TableKind)>,
}

impl ClinicalMelter {
  pub fn new(table_map: &FieldTableMap) -> Option<Self> {
    let columns = clinical_descriptors()
      .into_iter()
      .filter(|d| !d.is_eid())
      .map(|d| {
        let index = CLINICAL_COLUMNS.iter().position(|c| *c == d.source_column)?;
        let route = table_map.get(&d.field_id)?;
        Some((index, d.field_id, route.declared_type, route.table))
      })
      .collect::<Option<Vec<_>>>()?;
    Some(Self { columns })
  }

  /// Short rows are padded with empty cells; wider rows are rejected.
  pub fn melt(&self, row: &StringRecord, out: &mut Vec<LongRecord>) -> Result<(), String> {
    if row.len() > CLINICAL_COLUMNS.len() {
      return Err(format!(
        "expected at most {} cells, found {}",
        CLINICAL_COLUMNS.len(),
        row.len()
      ));
    }
    let cell = |index: usize| row.get(index).map(str::trim).unwrap_or("");

    let eid = parse_eid(cell(0))?;
    let time = match cell(EVENT_DATE_INDEX) {
      "" => None,
      raw => {
        let date = parse_date(raw).ok_or_else(|| format!("event date {raw:?} is not a date"))?;
        Some(date.and_time(NaiveTime::MIN).and_utc().timestamp())
      }
    };

    let start = out.len();
    for (index, field_id, declared, table) in &self.columns {
      let raw = cell(*index);
      if raw.is_empty() {
        continue;
      }
      match coerce(*declared, raw) {
        Ok(value) => out.push(LongRecord {
          table: *table,
          eid,
          field_id: field_id.clone(),
          time,
          value,
        }),
        Err(reason) => {
          out.truncate(start);
          return Err(format!("field {field_id}: {reason}"));
        }
      }
    }
    Ok(())
  }
}
