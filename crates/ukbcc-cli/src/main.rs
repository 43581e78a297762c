//! `ukbcc`: build a cohort database from biobank extracts and query it.
//!
//! # Usage
//!
//! ```
//! ukbcc build --main ukb.csv --clinical gp_clinical.txt --catalogue showcase.csv
//! ukbcc query --all 21003=67 --none 6070=1 --out cohort.csv --save
//! ukbcc estimate ukb.csv
//! ```
//!
//! Settings come from `ukbcc.toml` (or `--config`), then `UKBCC_*`
//! environment variables, then flags.

mod settings;
mod terms;

use std::path::PathBuf;

use anyhow::{Context as _, Result, bail};
use clap::{Parser, Subcommand};
use settings::Settings;
use terms::{parse_term, push_terms};
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::EnvFilter;
use ukbcc_core::{
  Catalogue,
  cohort::export_cohort,
  criteria::{CohortCriteria, Group, Term},
  source::estimate_lines,
  store::{CancelToken, CohortStore},
};
use ukbcc_store_sqlite::SqliteStore;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "ukbcc", version, about = "Biobank cohort curator")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "ukbcc.toml")]
  config: PathBuf,

  /// Database file (overrides `db_path`).
  #[arg(long, global = true)]
  db: Option<PathBuf>,

  /// Main wide-format dataset.
  #[arg(long, global = true)]
  main: Option<PathBuf>,

  /// Metadata catalogue (showcase export).
  #[arg(long, global = true)]
  catalogue: Option<PathBuf>,

  /// Clinical events file.
  #[arg(long, global = true)]
  clinical: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Drop and rebuild the four fact tables from the source files.
  Build {
    #[arg(long)]
    batch_size: Option<usize>,

    /// Fail on the first malformed row instead of skipping it.
    #[arg(long)]
    strict: bool,
  },

  /// Select a cohort.
  Query {
    /// Term every member must match, as FIELD=VALUE.
    #[arg(long = "all", value_name = "FIELD=VALUE", value_parser = parse_term)]
    all_of: Vec<Term>,

    /// Term at least one of which must match.
    #[arg(long = "any", value_name = "FIELD=VALUE", value_parser = parse_term)]
    any_of: Vec<Term>,

    /// Term no member may match.
    #[arg(long = "none", value_name = "FIELD=VALUE", value_parser = parse_term)]
    none_of: Vec<Term>,

    /// Start from criteria dumps saved in this directory.
    #[arg(long, value_name = "DIR")]
    criteria: Option<PathBuf>,

    /// Write the matching identifiers to this CSV file.
    #[arg(long, value_name = "FILE")]
    out: Option<PathBuf>,

    /// Save the criteria dumps into `cohort_dir`.
    #[arg(long)]
    save: bool,

    /// Print the result as JSON.
    #[arg(long)]
    json: bool,
  },

  /// Print the advisory data-row count of a source file.
  Estimate { file: PathBuf },
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();
  let mut settings = Settings::load(&cli.config)?;
  if let Some(db) = cli.db {
    settings.db_path = settings::expand_tilde(&db);
  }
  if let Some(main) = cli.main {
    settings.main_path = Some(settings::expand_tilde(&main));
  }
  if let Some(catalogue) = cli.catalogue {
    settings.catalogue_path = Some(settings::expand_tilde(&catalogue));
  }
  if let Some(clinical) = cli.clinical {
    settings.clinical_path = Some(settings::expand_tilde(&clinical));
  }

  match cli.command {
    Command::Build { batch_size, strict } => {
      if let Some(batch_size) = batch_size {
        settings.batch_size = batch_size;
      }
      settings.strict |= strict;
      build(&settings).await
    }
    Command::Query { all_of, any_of, none_of, criteria, out, save, json } => {
      let mut cohort_criteria = match criteria {
        Some(dir) => CohortCriteria::load(&dir)
          .with_context(|| format!("failed to load criteria from {}", dir.display()))?,
        None => CohortCriteria::default(),
      };
      let catalogue = match &settings.catalogue_path {
        Some(path) => Some(
          Catalogue::from_path(path)
            .with_context(|| format!("failed to read catalogue {}", path.display()))?,
        ),
        None => None,
      };
      let groups = [(Group::AllOf, all_of), (Group::AnyOf, any_of), (Group::NoneOf, none_of)];
      for (group, terms) in groups {
        push_terms(&mut cohort_criteria, group, terms, catalogue.as_ref());
      }
      query(&settings, &cohort_criteria, QueryOutput { out, save, json }).await
    }
    Command::Estimate { file } => {
      let file = settings::expand_tilde(&file);
      let rows = estimate_lines(&file)
        .with_context(|| format!("failed to read {}", file.display()))?;
      println!("{rows}");
      Ok(())
    }
  }
}

// ─── Commands ─────────────────────────────────────────────────────────────────

async fn open_store(settings: &Settings) -> Result<SqliteStore> {
  SqliteStore::open(&settings.db_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", settings.db_path))
}

async fn build(settings: &Settings) -> Result<()> {
  let sources = settings.sources()?;
  let options = settings.build_options()?;
  let store = open_store(settings).await?;

  let cancel = CancelToken::new();
  let on_interrupt = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      warn!("interrupt received, cancelling after the current batch");
      on_interrupt.cancel();
    }
  });

  let report = store
    .build_database(sources, options, cancel)
    .await
    .context("build failed")?;

  for (table, records) in &report.records_by_table {
    let digest = report.digests.get(table).map_or("", String::as_str);
    println!("{table:<9} {records:>10} records  sha256 {digest}");
  }
  println!(
    "{} rows read ({} estimated), {} malformed rows skipped",
    report.rows_read, report.estimated_rows, report.malformed_rows
  );
  Ok(())
}

struct QueryOutput {
  out:  Option<PathBuf>,
  save: bool,
  json: bool,
}

async fn query(settings: &Settings, criteria: &CohortCriteria, output: QueryOutput) -> Result<()> {
  let store = open_store(settings).await?;

  let result = store
    .run_cohort_query(criteria.encoded())
    .await
    .context("cohort query failed")?;
  info!(cohort = result.len(), "query complete");

  if output.json {
    let body = serde_json::json!({
      "identifiers": result.identifiers(),
      "per_term_counts": result.per_term_counts,
    });
    println!("{}", serde_json::to_string_pretty(&body)?);
  } else {
    for count in &result.per_term_counts {
      let flag = if count.resolved { "" } else { "  (unresolved)" };
      println!("{} {}={}: {}{flag}", count.group, count.field_id, count.value, count.count);
    }
    println!("{} matching identifiers", result.len());
  }

  if let Some(out) = &output.out {
    let out = settings::expand_tilde(out);
    export_cohort(&result.identifiers, &out)
      .with_context(|| format!("failed to write {}", out.display()))?;
    info!(path = %out.display(), "cohort exported");
  }

  if output.save {
    let Some(dir) = &settings.cohort_dir else {
      bail!("--save needs a cohort directory (cohort_dir or UKBCC_COHORT_DIR)");
    };
    criteria
      .save(dir)
      .with_context(|| format!("failed to save criteria to {}", dir.display()))?;
    info!(dir = %dir.display(), "criteria saved");
  }
  Ok(())
}
