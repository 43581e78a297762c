//! [`SqliteStore`]: the SQLite implementation of [`CohortStore`].

use std::{collections::BTreeMap, path::Path, sync::Arc};

use roaring::RoaringTreemap;
use rusqlite::types::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use ukbcc_core::{
  cohort::{CohortResult, TermCount, combine},
  criteria::{Criteria, Group},
  query::{CompiledTerm, compile_criteria},
  schema::{FieldTableMap, TableKind},
  source::estimate_lines,
  store::{BuildOptions, BuildReport, BuildSources, CancelToken, CohortStore, plan_schema},
};

use crate::{
  Error, Result,
  encode::{decode_eid, decode_route, encode_param},
  ingest::{self, LoadJob},
  schema::{SELECT_ROUTES, count_statement, init_statements, universe_statement},
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A cohort database backed by a single SQLite file.
///
/// Cloning is cheap: the connection and the build gate are shared. Builds
/// take the gate exclusively, queries share it. Each build stores its
/// field → table map next to the fact tables, and queries compile against
/// that stored map.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
  gate: Arc<RwLock<()>>,
}

impl SqliteStore {
  /// Open (or create) a store at `path`.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn).await
  }

  /// Open an in-memory store, as the tests do.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn).await
  }

  async fn init(conn: tokio_rusqlite::Connection) -> Result<Self> {
    let sql = init_statements();
    conn
      .call(move |conn| {
        conn.execute_batch(&sql)?;
        Ok(())
      })
      .await?;
    Ok(Self { conn, gate: Arc::new(RwLock::new(())) })
  }

  /// Row count of every fact table.
  pub async fn table_counts(&self) -> Result<BTreeMap<TableKind, u64>> {
    let _shared = self.gate.read().await;
    let counts = self
      .conn
      .call(|conn| {
        let mut counts = BTreeMap::new();
        for kind in TableKind::ALL {
          let n: i64 = conn.query_row(&count_statement(kind), [], |r| r.get(0))?;
          counts.insert(kind, n as u64);
        }
        Ok(counts)
      })
      .await?;
    Ok(counts)
  }

  /// Caller must hold the gate.
  async fn table_map_unguarded(&self) -> Result<FieldTableMap> {
    let rows = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(SELECT_ROUTES)?;
        let rows = stmt
          .query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows
      .into_iter()
      .map(|(field_id, table_name, declared_type)| {
        match decode_route(&table_name, &declared_type) {
          Some(route) => Ok((field_id, route)),
          None => Err(Error::CorruptRoute { field_id, table_name, declared_type }),
        }
      })
      .collect()
  }

  /// Caller must hold the gate.
  async fn universe_unguarded(&self) -> Result<RoaringTreemap> {
    let sql = universe_statement();
    let universe = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let ids = stmt
          .query_map([], |row| row.get::<_, i64>(0))?
          .filter_map(|eid| eid.map(decode_eid).transpose())
          .collect::<rusqlite::Result<RoaringTreemap>>()?;
        Ok(ids)
      })
      .await?;
    Ok(universe)
  }

  /// Run one group's terms in a single round trip. Unresolved terms yield
  /// the empty set.
  async fn run_group(&self, terms: &[CompiledTerm]) -> Result<Vec<RoaringTreemap>> {
    let queries: Vec<Option<(String, Vec<Value>)>> = terms
      .iter()
      .map(|t| {
        t.query()
          .map(|q| (q.sql(), q.params().iter().map(encode_param).collect()))
      })
      .collect();

    let sets = self
      .conn
      .call(move |conn| {
        let mut sets = Vec::with_capacity(queries.len());
        for query in queries {
          let Some((sql, params)) = query else {
            sets.push(RoaringTreemap::new());
            continue;
          };
          let mut stmt = conn.prepare_cached(&sql)?;
          let ids = stmt
            .query_map(rusqlite::params_from_iter(params), |row| row.get::<_, i64>(0))?
            .filter_map(|eid| eid.map(decode_eid).transpose())
            .collect::<rusqlite::Result<RoaringTreemap>>()?;
          sets.push(ids);
        }
        Ok(sets)
      })
      .await?;
    Ok(sets)
  }
}

// ─── CohortStore impl ────────────────────────────────────────────────────────

impl CohortStore for SqliteStore {
  type Error = crate::Error;

  async fn build_database(
    &self,
    sources: BuildSources,
    options: BuildOptions,
    cancel: CancelToken,
  ) -> Result<BuildReport> {
    let plan = plan_schema(&sources, &options)?;
    let mut estimated_rows = estimate_lines(&sources.main)?;
    if let Some(clinical) = &sources.clinical {
      estimated_rows += estimate_lines(clinical)?;
    }
    info!(
      main = %sources.main.display(),
      clinical = sources.clinical.is_some(),
      fields = plan.schema.table_map().len(),
      estimated_rows,
      "starting build"
    );

    let schema = plan.schema.clone();
    let job = LoadJob { plan, sources, options, estimated_rows, cancel };

    let _exclusive = self.gate.write().await;
    let stats = self
      .conn
      .call(move |conn| Ok(ingest::load(conn, &job)))
      .await??;

    Ok(BuildReport {
      schema,
      estimated_rows,
      rows_read: stats.rows_read,
      malformed_rows: stats.malformed_rows,
      records_by_table: stats.records_by_table,
      digests: stats.digests,
    })
  }

  async fn universe(&self) -> Result<RoaringTreemap> {
    let _shared = self.gate.read().await;
    self.universe_unguarded().await
  }

  async fn table_map(&self) -> Result<FieldTableMap> {
    let _shared = self.gate.read().await;
    self.table_map_unguarded().await
  }

  async fn run_cohort_query(&self, criteria: &Criteria) -> Result<CohortResult> {
    let _shared = self.gate.read().await;
    let table_map = self.table_map_unguarded().await?;
    let compiled = compile_criteria(criteria, &table_map);
    let universe = self.universe_unguarded().await?;

    let mut results = BTreeMap::new();
    let mut per_term_counts = Vec::with_capacity(criteria.len());
    for group in Group::ALL {
      let terms = compiled.group(group);
      let sets = self.run_group(terms).await?;
      for (term, set) in terms.iter().zip(&sets) {
        if let CompiledTerm::Unresolved { term, reason } = term {
          warn!(%group, %term, %reason, "term matches nobody");
        }
        debug!(%group, term = %term.term(), count = set.len(), "term executed");
        per_term_counts.push(TermCount {
          group,
          field_id: term.term().field_id.clone(),
          value: term.term().value.clone(),
          count: set.len(),
          resolved: term.is_resolved(),
        });
      }
      results.insert(group, sets);
    }

    let group_sets = |g: Group| results.get(&g).map(Vec::as_slice).unwrap_or_default();
    let identifiers = combine(
      group_sets(Group::AllOf),
      group_sets(Group::AnyOf),
      group_sets(Group::NoneOf),
      &universe,
    );
    info!(
      universe = universe.len(),
      cohort = identifiers.len(),
      terms = per_term_counts.len(),
      "cohort query finished"
    );

    Ok(CohortResult { identifiers, per_term_counts })
  }

  async fn table_digests(&self) -> Result<BTreeMap<TableKind, String>> {
    let _shared = self.gate.read().await;
    let digests = self
      .conn
      .call(|conn| Ok(ingest::table_digests(conn)?))
      .await?;
    Ok(digests)
  }
}
