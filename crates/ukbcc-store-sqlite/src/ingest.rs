//! Streaming load of the source files into the four fact tables.
//!
//! Runs on the connection's thread inside a single transaction: drop and
//! recreate every table, stream each source row by row, record the field
//! routes, create indexes, take digests, commit. Any error or a cancellation drops the transaction
//! uncommitted, so the previous generation of tables stays live.

use std::{collections::BTreeMap, fs::File};

use csv::StringRecord;
use rusqlite::{Connection, Transaction};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use ukbcc_core::{
  record::{ClinicalMelter, LongRecord, RowMelter, check_clinical_header},
  schema::{FieldTableMap, TableKind},
  source::open_reader,
  store::{BuildOptions, BuildPlan, BuildSources, CancelToken},
};

use crate::{
  Error, Result,
  encode::{digest_cell, encode_eid, encode_route, encode_value, finish_digest},
  schema::{CLEAR_ROUTES, INSERT_ROUTE, canonical_rows_statement, insert_statement},
};

/// Everything the load needs, moved onto the connection thread.
pub struct LoadJob {
  pub plan:           BuildPlan,
  pub sources:        BuildSources,
  pub options:        BuildOptions,
  pub estimated_rows: u64,
  pub cancel:         CancelToken,
}

#[derive(Debug, Default)]
pub struct LoadStats {
  pub rows_read:        u64,
  pub malformed_rows:   u64,
  pub records_by_table: BTreeMap<TableKind, u64>,
  pub digests:          BTreeMap<TableKind, String>,
}

impl LoadStats {
  fn new() -> Self {
    Self {
      records_by_table: TableKind::ALL.into_iter().map(|k| (k, 0)).collect(),
      ..Self::default()
    }
  }
}

/// Replace all four tables with the contents of `job.sources`.
pub fn load(conn: &mut Connection, job: &LoadJob) -> Result<LoadStats> {
  let schema = &job.plan.schema;
  let tx = conn.transaction()?;

  for statement in schema.ddl() {
    tx.execute(&statement, [])?;
  }

  let inserts = TableKind::ALL.map(insert_statement);
  let mut stats = LoadStats::new();
  let mut progress = Progress { job, batch_rows: 0 };

  let melter = RowMelter::new(&job.plan.descriptors, schema.table_map()).ok_or_else(|| {
    Error::Routing {
      source_name: "main",
      message:     "header has no eid column or a field has no table".to_owned(),
    }
  })?;
  let reader = open_reader(&job.sources.main, job.options.main_delimiter)?;
  load_source(&tx, &inserts, "main", reader, &mut stats, &mut progress, |row, out| {
    melter.melt(row, out)
  })?;

  if let Some(clinical) = &job.sources.clinical {
    let melter = ClinicalMelter::new(schema.table_map()).ok_or_else(|| Error::Routing {
      source_name: "clinical",
      message:     "clinical columns are missing from the schema".to_owned(),
    })?;
    let mut reader = open_reader(clinical, job.options.clinical_delimiter)?;
    check_clinical_header(reader.headers()?).map_err(|message| Error::Routing {
      source_name: "clinical",
      message,
    })?;
    load_source(&tx, &inserts, "clinical", reader, &mut stats, &mut progress, |row, out| {
      melter.melt(row, out)
    })?;
  }

  write_routes(&tx, schema.table_map())?;
  for statement in schema.index_ddl() {
    tx.execute(&statement, [])?;
  }
  stats.digests = table_digests(&tx)?;

  if job.cancel.is_cancelled() {
    return Err(Error::Cancelled { rows: stats.rows_read });
  }
  tx.commit()?;

  info!(
    rows = stats.rows_read,
    malformed = stats.malformed_rows,
    records = ?stats.records_by_table,
    "build committed"
  );
  Ok(stats)
}

struct Progress<'j> {
  job:        &'j LoadJob,
  batch_rows: usize,
}

impl Progress<'_> {
  /// Count one row; at each batch boundary, log and honour cancellation.
  fn row_done(&mut self, rows_read: u64) -> Result<()> {
    self.batch_rows += 1;
    if self.batch_rows < self.job.options.batch_size.max(1) {
      return Ok(());
    }
    self.batch_rows = 0;
    info!(rows = rows_read, estimated = self.job.estimated_rows, "ingest progress");
    if self.job.cancel.is_cancelled() {
      warn!(rows = rows_read, "build cancelled, rolling back");
      return Err(Error::Cancelled { rows: rows_read });
    }
    Ok(())
  }
}

fn load_source<F>(
  tx: &Transaction<'_>,
  inserts: &[String; 4],
  source_name: &'static str,
  mut reader: csv::Reader<File>,
  stats: &mut LoadStats,
  progress: &mut Progress<'_>,
  melt: F,
) -> Result<()>
where
  F: Fn(&StringRecord, &mut Vec<LongRecord>) -> Result<(), String>,
{
  let strict = progress.job.options.strict;
  let mut row = StringRecord::new();
  let mut records = Vec::new();
  let mut line = 0u64;

  loop {
    line += 1;
    let melted = match reader.read_record(&mut row) {
      Ok(false) => break,
      Ok(true) => {
        records.clear();
        melt(&row, &mut records)
      }
      Err(e) if e.is_io_error() => return Err(e.into()),
      Err(e) => Err(e.to_string()),
    };
    stats.rows_read += 1;

    match melted {
      Ok(()) => {
        for record in records.drain(..) {
          let table = record.table;
          insert(tx, inserts, record)?;
          *stats.records_by_table.entry(table).or_default() += 1;
        }
      }
      Err(message) if strict => {
        let error = ukbcc_core::Error::SourceFormat {
          source_name: source_name.to_owned(),
          row: line,
          message,
        };
        return Err(error.into());
      }
      Err(message) => {
        stats.malformed_rows += 1;
        warn!(source = source_name, row = line, %message, "skipping malformed row");
      }
    }
    progress.row_done(stats.rows_read)?;
  }

  debug!(source = source_name, rows = line - 1, "source loaded");
  Ok(())
}

fn insert(tx: &Transaction<'_>, inserts: &[String; 4], record: LongRecord) -> Result<()> {
  let mut statement = tx.prepare_cached(&inserts[record.table as usize])?;
  statement.execute(rusqlite::params![
    encode_eid(record.eid),
    record.field_id,
    record.time,
    encode_value(record.value),
  ])?;
  Ok(())
}

/// Replace the stored field → table map with `table_map`.
fn write_routes(tx: &Transaction<'_>, table_map: &FieldTableMap) -> Result<()> {
  tx.execute(CLEAR_ROUTES, [])?;
  let mut statement = tx.prepare(INSERT_ROUTE)?;
  for (field_id, route) in table_map.iter() {
    let (table, declared_type) = encode_route(route);
    statement.execute(rusqlite::params![field_id, table, declared_type])?;
  }
  debug!(fields = table_map.len(), "field routes recorded");
  Ok(())
}

/// SHA-256 per table over its rows in canonical order.
pub fn table_digests(conn: &Connection) -> rusqlite::Result<BTreeMap<TableKind, String>> {
  let mut digests = BTreeMap::new();
  for kind in TableKind::ALL {
    let mut statement = conn.prepare(&canonical_rows_statement(kind))?;
    let mut rows = statement.query([])?;
    let mut hasher = Sha256::new();
    while let Some(row) = rows.next()? {
      for column in 0..4 {
        digest_cell(&mut hasher, row.get_ref(column)?);
      }
    }
    digests.insert(kind, finish_digest(hasher));
  }
  Ok(digests)
}
