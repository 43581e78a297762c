//! The `CohortStore` trait and the build inputs it consumes.
//!
//! The trait is implemented by storage backends (e.g. `ukbcc-store-sqlite`).
//! The binary depends on this abstraction, not on any concrete backend.

use std::{
  collections::BTreeMap,
  future::Future,
  path::PathBuf,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
};

use roaring::RoaringTreemap;

use crate::{
  Catalogue, Result,
  cohort::CohortResult,
  criteria::Criteria,
  field::{FieldDescriptor, build_field_descriptors},
  record::clinical_descriptors,
  schema::{FieldTableMap, Schema, TableKind, build_schema},
  source::read_header,
};

// ─── Build inputs ────────────────────────────────────────────────────────────

/// Cooperative cancellation flag shared between a build and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
  pub fn new() -> Self { Self::default() }

  pub fn cancel(&self) { self.0.store(true, Ordering::SeqCst) }

  pub fn is_cancelled(&self) -> bool { self.0.load(Ordering::SeqCst) }
}

#[derive(Debug, Clone)]
pub struct BuildSources {
  pub main:      PathBuf,
  pub clinical:  Option<PathBuf>,
  pub catalogue: PathBuf,
}

#[derive(Debug, Clone)]
pub struct BuildOptions {
  /// Rows per batch; cancellation and progress are checked between batches.
  pub batch_size:         usize,
  /// Fail on the first malformed row instead of skipping it.
  pub strict:             bool,
  /// `None` sniffs the delimiter from the header line.
  pub main_delimiter:     Option<u8>,
  pub clinical_delimiter: Option<u8>,
}

impl Default for BuildOptions {
  fn default() -> Self {
    Self {
      batch_size:         5000,
      strict:             false,
      main_delimiter:     None,
      clinical_delimiter: None,
    }
  }
}

/// Everything decided before the store is touched.
#[derive(Debug, Clone)]
pub struct BuildPlan {
  /// One per main-table column, in header order.
  pub descriptors: Vec<FieldDescriptor>,
  pub schema:      Schema,
}

/// Classify the main header against the catalogue and build the schema.
///
/// Clinical columns join the schema only when a clinical source is given.
/// Any failure here aborts the build before existing tables are touched.
pub fn plan_schema(sources: &BuildSources, options: &BuildOptions) -> Result<BuildPlan> {
  let catalogue = Catalogue::from_path(&sources.catalogue)?;
  let header = read_header(&sources.main, options.main_delimiter)?;
  let descriptors = build_field_descriptors(&header, &catalogue)?;

  let mut routed = descriptors.clone();
  if sources.clinical.is_some() {
    routed.extend(clinical_descriptors());
  }
  let schema = build_schema(&routed)?;
  Ok(BuildPlan { descriptors, schema })
}

/// Outcome of a successful build.
#[derive(Debug, Clone)]
pub struct BuildReport {
  pub schema:           Schema,
  /// Advisory data-row count taken before loading.
  pub estimated_rows:   u64,
  pub rows_read:        u64,
  pub malformed_rows:   u64,
  pub records_by_table: BTreeMap<TableKind, u64>,
  /// SHA-256 over each table's rows in canonical order, hex-encoded.
  pub digests:          BTreeMap<TableKind, String>,
}

impl BuildReport {
  pub fn total_records(&self) -> u64 { self.records_by_table.values().sum() }
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a cohort database backend.
///
/// A build replaces all four tables at once and holds exclusive access for
/// its duration; queries share access and never observe a partial build.
pub trait CohortStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Drop, recreate and load the four tables from `sources`.
  ///
  /// Returns an error, leaving the previous tables live, if planning fails,
  /// the load fails, or `cancel` fires between batches.
  fn build_database(
    &self,
    sources: BuildSources,
    options: BuildOptions,
    cancel: CancelToken,
  ) -> impl Future<Output = Result<BuildReport, Self::Error>> + Send + '_;

  /// Every identifier with at least one fact.
  fn universe(&self) -> impl Future<Output = Result<RoaringTreemap, Self::Error>> + Send + '_;

  /// The field → table map written by the last successful build. Empty
  /// for a store that was never built.
  fn table_map(&self) -> impl Future<Output = Result<FieldTableMap, Self::Error>> + Send + '_;

  /// Compile `criteria` against the stored table map and run it.
  ///
  /// The map, the universe and every term read the same build generation.
  fn run_cohort_query<'a>(
    &'a self,
    criteria: &'a Criteria,
  ) -> impl Future<Output = Result<CohortResult, Self::Error>> + Send + 'a;

  /// Current per-table content digests.
  fn table_digests(
    &self,
  ) -> impl Future<Output = Result<BTreeMap<TableKind, String>, Self::Error>> + Send + '_;
}
