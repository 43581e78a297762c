//! Integration tests for `SqliteStore` against an in-memory database and
//! fixture files in a temporary directory.

use std::path::PathBuf;

use tempfile::TempDir;
use ukbcc_core::{
  Error as CoreError,
  cohort::export_cohort,
  criteria::{Criteria, Group, Term},
  schema::TableKind,
  store::{BuildOptions, BuildReport, BuildSources, CancelToken, CohortStore},
};

use crate::{Error, SqliteStore};

const MAIN: &str = r#""eid","21017-0.0","41270-0.1","6070-0.0","6119-0.0","6148-0.1","6148-0.2","53-0.0","4286-0.0","20137-0.0","21003-0.0","22182-0.0"
"1037918","21017_0_0","E119","2","","4","5","1/10/2008","","2014-12-09T18:47:10","67","2,0,0,0"
"1041796","21017_0_0","Block H40-H42","1","","","","26/10/2009","2010-02-27T08:57:11","2014-11-23T14:54:32","62","0,0,0,0"
"1033149","21017_0_0","Block H40-H42","","3","2","4","23/03/2010","2010-03-23T12:17:51","","68","0,0,0,1"
"1037058","21017_0_0","Z138","1","3","5","6","28/06/2010","2009-10-26T16:47:07","","51","2,0,0,0"
"1024938","","H048","1","1","","","27/02/2010","","2015-02-23T15:33:53","55","0,0,0,0"
"1016017","","E148","1","","4","6","24/04/2010","2010-06-28T12:31:51","","51","0,0,0,1"
"1033388","21017_0_0","D226","","3","4","6","25/10/2008","2010-06-08T12:05:46","","68","1,0,0,0"
"1031625","","H269","","3","6","","8/12/2008","","2015-02-20T16:39:27","55","2,0,0,0"
"1038882","21017_0_0","D414","1","1","2","","7/08/2008","2010-04-24T13:21:17","","63","0,0,0,0"
"1030520","","H402","1","","4","","18/05/2007","","","69","0,0,0,1"
"1003670","","H264","1","3","4","","8/06/2010","","2014-11-24T10:45:15","55","1,0,0,0"
"1027017","21017_0_0","R103","1","","5","","27/02/2010","","2015-02-23T15:33:53","55","0,0,0,0"
"1031595","","A498","","","","6","24/04/2010","2010-06-28T12:31:51","","51","0,0,0,1"
"1008947","21017_0_0","H400","","","","","","2010-06-28T12:31:51","","","51"
"#;

const MALFORMED_ROW: &str = r#""abc","","","","","","","","","","",""
"#;

const CLINICAL: &str = "eid\tdata_provider\tevent_dt\tread_2\tread_3\tvalue1\tvalue2\tvalue3\n\
1037918\t3\t01/01/1980\t\tXE0Gu\t\n\
1037918\t3\t08/05/1984\t\tF45..\t\n\
1037918\t3\t08/12/1986\t229..\t0.0\t\n\
1016017\t3\t24/12/1964\tXE0of\t\n\
1041796\t3\t21/09/1966\t4662.\t0.0\t\n\
1016017\t3\t31/10/1967\tXE0of\t1.0\t2.0\t3.0\n";

const SHOWCASE: &str = "\
Path,Category,FieldID,Field,Participants,Items,Stability,ValueType,Units,ItemType,Strata,Sexed,Instances,Array,Coding,Notes,Link
OCT,100016,6070,OCT measured (right),,98849,Complete,Categorical single,,Data,Primary,Unisex,2,1,100274,n1,
EYE,100041,6119,Which eye(s) affected by glaucoma,,3970,Complete,Categorical single,,Data,Primary,Unisex,4,1,100515,n2,
EYE,100041,6148,Eye problems/disorders,,252799,Complete,Categorical multiple,,Data,Primary,Unisex,4,5,100523,n3,
OCT,100016,21017,OCT image slices (left),,87595,Complete,Text,,Bulk,Primary,Unisex,2,2,,n4,
SummaryDx,2002,41270,Diagnoses - ICD10,,4131361,Ongoing,Categorical multiple,,Data,Primary,Unisex,1,213,19,n5,
Genomics > HLA,100035,22182,HLA imputation values,488265,488265,Accruing,Compound,,Data,Derived,Unisex,1,1,5,n6,
R > R,100024,21003,Age when attended assessment centre,502506,573525,Complete,Integer,years,Data,Derived,Unisex,4,1,,Derived,
Prospective memory,100031,4286,Time when initial screen shown,211307,239452,Complete,Time,,Data,Primary,Unisex,4,1,,,
Symbol digit substitution,122,20137,When symbol digit substitution test completed,120183,120183,Complete,Time,,Data,Primary,Unisex,1,1,,Time sybol complete,
Reception,100024,53,Date of attending assessment centre,502506,573525,Complete,Date,,Data,Primary,Unisex,4,1,,Date attend assessment,
";

const ALL_EIDS: [u64; 14] = [
  1003670, 1008947, 1016017, 1024938, 1027017, 1030520, 1031595, 1031625, 1033149, 1033388,
  1037058, 1037918, 1038882, 1041796,
];

// ─── Fixtures ────────────────────────────────────────────────────────────────

struct Fixture {
  dir:     TempDir,
  sources: BuildSources,
}

impl Fixture {
  fn new(with_clinical: bool) -> Self {
    let dir = tempfile::tempdir().expect("temp dir");
    let main = write(&dir, "ukb.csv", MAIN);
    let catalogue = write(&dir, "showcase.csv", SHOWCASE);
    let clinical = with_clinical.then(|| write(&dir, "gp.txt", CLINICAL));
    Self { dir, sources: BuildSources { main, clinical, catalogue } }
  }

  /// Same inputs, with one malformed row appended to the main table.
  fn with_malformed_row(mut self) -> Self {
    self.sources.main = write(&self.dir, "ukb_bad.csv", &format!("{MAIN}{MALFORMED_ROW}"));
    self
  }
}

fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
  let path = dir.path().join(name);
  std::fs::write(&path, contents).expect("write fixture");
  path
}

async fn store() -> SqliteStore { SqliteStore::open_in_memory().await.expect("in-memory store") }

async fn built(fixture: &Fixture) -> (SqliteStore, BuildReport) {
  let s = store().await;
  let report = s
    .build_database(fixture.sources.clone(), BuildOptions::default(), CancelToken::new())
    .await
    .expect("build");
  (s, report)
}

type Pairs<'a> = &'a [(&'a str, &'a str)];

fn criteria(all_of: Pairs<'_>, any_of: Pairs<'_>, none_of: Pairs<'_>) -> Criteria {
  let terms = |pairs: &[(&str, &str)]| pairs.iter().map(|(f, v)| Term::new(*f, *v)).collect();
  Criteria { all_of: terms(all_of), any_of: terms(any_of), none_of: terms(none_of) }
}

async fn cohort(s: &SqliteStore, criteria: &Criteria) -> Vec<u64> {
  s.run_cohort_query(criteria).await.expect("query").identifiers()
}

fn sorted(mut ids: Vec<u64>) -> Vec<u64> {
  ids.sort_unstable();
  ids
}

// ─── Build ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn build_loads_every_populated_cell() {
  let fixture = Fixture::new(false);
  let (s, report) = built(&fixture).await;

  assert_eq!(report.estimated_rows, 14);
  assert_eq!(report.rows_read, 14);
  assert_eq!(report.malformed_rows, 0);
  assert_eq!(report.total_records(), 108);
  assert_eq!(report.records_by_table[&TableKind::Str], 68);
  assert_eq!(report.records_by_table[&TableKind::Int], 13);
  assert_eq!(report.records_by_table[&TableKind::Real], 0);
  assert_eq!(report.records_by_table[&TableKind::Datetime], 27);

  assert_eq!(s.table_counts().await.unwrap(), report.records_by_table);
}

#[tokio::test]
async fn rebuilding_the_same_inputs_is_byte_identical() {
  let fixture = Fixture::new(true);
  let (s, first) = built(&fixture).await;
  let second = s
    .build_database(fixture.sources.clone(), BuildOptions::default(), CancelToken::new())
    .await
    .unwrap();

  assert_eq!(first.digests, second.digests);
  assert_eq!(s.table_digests().await.unwrap(), second.digests);
  assert_eq!(first.records_by_table, second.records_by_table);
}

#[tokio::test]
async fn small_batches_load_the_same_rows() {
  let fixture = Fixture::new(false);
  let (_, whole) = built(&fixture).await;

  let s = store().await;
  let options = BuildOptions { batch_size: 3, ..BuildOptions::default() };
  let batched = s
    .build_database(fixture.sources.clone(), options, CancelToken::new())
    .await
    .unwrap();
  assert_eq!(whole.digests, batched.digests);
}

#[tokio::test]
async fn cancelled_build_keeps_the_previous_tables() {
  let fixture = Fixture::new(false);
  let (s, first) = built(&fixture).await;

  let cancel = CancelToken::new();
  cancel.cancel();
  let options = BuildOptions { batch_size: 5, ..BuildOptions::default() };
  let err = s
    .build_database(fixture.sources.clone(), options, cancel)
    .await
    .unwrap_err();

  assert!(matches!(err, Error::Cancelled { rows: 5 }), "{err}");
  assert_eq!(s.table_digests().await.unwrap(), first.digests);
  assert_eq!(s.universe().await.unwrap().len(), 14);
}

#[tokio::test]
async fn unknown_catalogue_field_aborts_before_touching_tables() {
  let fixture = Fixture::new(false);
  let (s, first) = built(&fixture).await;

  let without_age: String = SHOWCASE
    .lines()
    .filter(|l| !l.contains(",21003,"))
    .map(|l| format!("{l}\n"))
    .collect();
  let mut sources = fixture.sources.clone();
  sources.catalogue = write(&fixture.dir, "partial.csv", &without_age);

  let err = s
    .build_database(sources, BuildOptions::default(), CancelToken::new())
    .await
    .unwrap_err();
  assert!(
    matches!(err, Error::Core(CoreError::CatalogueLookup { ref field_id, .. }) if field_id == "21003"),
    "{err}"
  );
  assert_eq!(s.table_digests().await.unwrap(), first.digests);
}

#[tokio::test]
async fn malformed_rows_are_skipped_and_counted() {
  let fixture = Fixture::new(false).with_malformed_row();
  let (_, report) = built(&fixture).await;

  assert_eq!(report.rows_read, 15);
  assert_eq!(report.malformed_rows, 1);
  assert_eq!(report.total_records(), 108);
}

#[tokio::test]
async fn strict_builds_fail_on_the_first_malformed_row() {
  let fixture = Fixture::new(false).with_malformed_row();
  let s = store().await;
  let options = BuildOptions { strict: true, ..BuildOptions::default() };

  let err = s
    .build_database(fixture.sources.clone(), options, CancelToken::new())
    .await
    .unwrap_err();
  assert!(
    matches!(err, Error::Core(CoreError::SourceFormat { row: 15, .. })),
    "{err}"
  );
  assert!(s.universe().await.unwrap().is_empty());
}

#[tokio::test]
async fn clinical_events_share_the_string_table() {
  let fixture = Fixture::new(true);
  let (s, report) = built(&fixture).await;
  let map = report.schema.table_map();

  assert_eq!(report.estimated_rows, 20);
  assert_eq!(report.records_by_table[&TableKind::Str], 68 + 17);
  assert_eq!(map.table_of("read_2"), Some(TableKind::Str));

  let read_2 = criteria(&[("read_2", "XE0of")], &[], &[]);
  assert_eq!(cohort(&s, &read_2).await, vec![1016017]);
  let read_3 = criteria(&[("read_3", "XE0Gu")], &[], &[]);
  assert_eq!(cohort(&s, &read_3).await, vec![1037918]);
}

#[tokio::test]
async fn clinical_header_out_of_order_is_rejected() {
  let fixture = Fixture::new(false);
  let (s, first) = built(&fixture).await;

  let swapped = CLINICAL.replacen("read_2\tread_3", "read_3\tread_2", 1);
  let mut sources = fixture.sources.clone();
  sources.clinical = Some(write(&fixture.dir, "gp_swapped.txt", &swapped));

  let err = s
    .build_database(sources, BuildOptions::default(), CancelToken::new())
    .await
    .unwrap_err();
  assert!(
    matches!(
      err,
      Error::Routing { source_name: "clinical", ref message } if message.contains("read_3,read_2")
    ),
    "{err}"
  );
  assert_eq!(s.table_digests().await.unwrap(), first.digests);
  assert!(s.table_map().await.unwrap().get("read_2").is_none());
}

// ─── Queries ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn integer_term_matches_exactly() {
  let fixture = Fixture::new(false);
  let (s, _) = built(&fixture).await;

  let age_67 = criteria(&[("21003", "67")], &[], &[]);
  assert_eq!(cohort(&s, &age_67).await, vec![1037918]);

  let age_55 = criteria(&[("21003", "55")], &[], &[]);
  assert_eq!(cohort(&s, &age_55).await, vec![1003670, 1024938, 1027017, 1031625]);
}

#[tokio::test]
async fn categorical_any_of_searches_every_instance() {
  let fixture = Fixture::new(false);
  let (s, _) = built(&fixture).await;

  let oct = criteria(&[], &[("6070", "2")], &[]);
  assert_eq!(cohort(&s, &oct).await, vec![1037918]);

  // 6148 spans two array columns.
  let eye = criteria(&[], &[("6148", "4")], &[]);
  assert_eq!(cohort(&s, &eye).await, vec![
    1003670, 1016017, 1030520, 1033149, 1033388, 1037918
  ]);
}

#[tokio::test]
async fn compound_values_match_by_token() {
  let fixture = Fixture::new(false);
  let (s, _) = built(&fixture).await;

  let two = criteria(&[("22182", "2")], &[], &[]);
  assert_eq!(cohort(&s, &two).await, vec![1031625, 1037058, 1037918]);

  let five = criteria(&[("22182", "5")], &[], &[]);
  assert!(cohort(&s, &five).await.is_empty());
}

#[tokio::test]
async fn dates_match_in_either_spelling() {
  let fixture = Fixture::new(false);
  let (s, _) = built(&fixture).await;

  let dmy = criteria(&[("53", "24/04/2010")], &[], &[]);
  let iso = criteria(&[("53", "2010-04-24")], &[], &[]);
  assert_eq!(cohort(&s, &dmy).await, vec![1016017, 1031595]);
  assert_eq!(cohort(&s, &iso).await, vec![1016017, 1031595]);
}

#[tokio::test]
async fn none_of_subtracts_from_the_universe() {
  let fixture = Fixture::new(false);
  let (s, _) = built(&fixture).await;

  assert_eq!(sorted(s.universe().await.unwrap().iter().collect()), ALL_EIDS.to_vec());

  let not_oct_1 = criteria(&[], &[], &[("6070", "1")]);
  assert_eq!(cohort(&s, &not_oct_1).await, vec![
    1008947, 1031595, 1031625, 1033149, 1033388, 1037918
  ]);

  let combined = criteria(&[("21003", "55")], &[], &[("6070", "1")]);
  assert_eq!(cohort(&s, &combined).await, vec![1031625]);
}

#[tokio::test]
async fn empty_criteria_select_everyone() {
  let fixture = Fixture::new(false);
  let (s, _) = built(&fixture).await;

  let everyone = cohort(&s, &Criteria::default()).await;
  assert_eq!(everyone, ALL_EIDS.to_vec());
}

#[tokio::test]
async fn term_order_within_a_group_does_not_matter() {
  let fixture = Fixture::new(false);
  let (s, _) = built(&fixture).await;

  let forward = criteria(
    &[],
    &[("6148", "4"), ("21003", "55")],
    &[("6070", "2"), ("22182", "1")],
  );
  let backward = criteria(
    &[],
    &[("21003", "55"), ("6148", "4")],
    &[("22182", "1"), ("6070", "2")],
  );
  assert_eq!(cohort(&s, &forward).await, cohort(&s, &backward).await);
}

#[tokio::test]
async fn unresolved_terms_match_nobody_without_failing_the_query() {
  let fixture = Fixture::new(false);
  let (s, _) = built(&fixture).await;

  let unknown = criteria(&[("31", "0")], &[], &[]);
  let result = s.run_cohort_query(&unknown).await.unwrap();
  assert!(result.is_empty());
  assert!(!result.per_term_counts[0].resolved);

  let mixed = criteria(&[], &[("31", "0"), ("21003", "67")], &[]);
  let result = s.run_cohort_query(&mixed).await.unwrap();
  assert_eq!(result.identifiers(), vec![1037918]);
  let counts: Vec<_> =
    result.per_term_counts.iter().map(|c| (c.group, c.count, c.resolved)).collect();
  assert_eq!(counts, vec![(Group::AnyOf, 0, false), (Group::AnyOf, 1, true)]);

  let bad_value = criteria(&[("21003", "old")], &[], &[]);
  assert!(cohort(&s, &bad_value).await.is_empty());
}

#[tokio::test]
async fn a_fresh_store_has_an_empty_universe() {
  let s = store().await;
  assert!(s.universe().await.unwrap().is_empty());
  assert!(s.table_map().await.unwrap().is_empty());
  assert!(cohort(&s, &Criteria::default()).await.is_empty());
}

#[tokio::test]
async fn exported_cohort_lists_identifiers_in_order() {
  let fixture = Fixture::new(false);
  let (s, _) = built(&fixture).await;

  let age_55 = criteria(&[("21003", "55")], &[], &[]);
  let result = s.run_cohort_query(&age_55).await.unwrap();
  let out = fixture.dir.path().join("cohort.csv");
  export_cohort(&result.identifiers, &out).unwrap();

  assert_eq!(
    std::fs::read_to_string(out).unwrap(),
    "eid\n1003670\n1024938\n1027017\n1031625\n"
  );
}

// ─── Stored table map ────────────────────────────────────────────────────────

#[tokio::test]
async fn build_stores_its_table_map() {
  let fixture = Fixture::new(true);
  let (s, report) = built(&fixture).await;
  assert_eq!(&s.table_map().await.unwrap(), report.schema.table_map());
}

#[tokio::test]
async fn queries_ignore_source_changes_after_the_build() {
  let fixture = Fixture::new(true);
  let db = fixture.dir.path().join("ukbcc.db");
  {
    let s = SqliteStore::open(&db).await.unwrap();
    s.build_database(fixture.sources.clone(), BuildOptions::default(), CancelToken::new())
      .await
      .unwrap();
  }

  // Retype age as text and drop the clinical file after the build.
  let retyped = SHOWCASE.replace(",Integer,years,", ",Text,years,");
  std::fs::write(&fixture.sources.catalogue, retyped).unwrap();
  std::fs::remove_file(fixture.sources.clinical.as_ref().unwrap()).unwrap();

  let s = SqliteStore::open(&db).await.unwrap();
  let map = s.table_map().await.unwrap();
  assert_eq!(map.table_of("21003"), Some(TableKind::Int));
  assert_eq!(map.table_of("read_2"), Some(TableKind::Str));

  let age_67 = criteria(&[("21003", "67")], &[], &[]);
  assert_eq!(cohort(&s, &age_67).await, vec![1037918]);
  let read_2 = criteria(&[("read_2", "XE0of")], &[], &[]);
  let result = s.run_cohort_query(&read_2).await.unwrap();
  assert_eq!(result.identifiers(), vec![1016017]);
  assert!(result.per_term_counts[0].resolved);
}

#[tokio::test]
async fn rebuild_without_clinical_drops_its_routes() {
  let fixture = Fixture::new(true);
  let (s, _) = built(&fixture).await;

  let main_only = BuildSources { clinical: None, ..fixture.sources.clone() };
  s.build_database(main_only, BuildOptions::default(), CancelToken::new()).await.unwrap();

  assert!(s.table_map().await.unwrap().get("read_2").is_none());
  let read_2 = criteria(&[("read_2", "XE0of")], &[], &[]);
  let result = s.run_cohort_query(&read_2).await.unwrap();
  assert!(result.is_empty());
  assert!(!result.per_term_counts[0].resolved);
}

// ─── Concurrency ─────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queries_never_observe_a_build_in_progress() {
  let fixture = Fixture::new(true);
  let s = store().await;
  let main_only = BuildSources { clinical: None, ..fixture.sources.clone() };
  let old = s.build_database(main_only, BuildOptions::default(), CancelToken::new()).await.unwrap();

  let options = BuildOptions { batch_size: 1, ..BuildOptions::default() };
  let rebuild = s.build_database(fixture.sources.clone(), options, CancelToken::new());
  let read_2 = criteria(&[("read_2", "XE0of")], &[], &[]);
  let reads = async {
    let mut seen = Vec::new();
    for _ in 0..20 {
      let counts = s.table_counts().await.unwrap();
      let universe = s.universe().await.unwrap().len();
      let matched = cohort(&s, &read_2).await;
      seen.push((counts, universe, matched));
      tokio::task::yield_now().await;
    }
    seen
  };
  let (new, seen) = tokio::join!(rebuild, reads);
  let new = new.unwrap();
  assert_ne!(old.records_by_table, new.records_by_table);

  let mut rebuilt = false;
  for (counts, universe, matched) in seen {
    assert_eq!(universe, 14);
    if counts == new.records_by_table {
      rebuilt = true;
    } else {
      assert!(!rebuilt, "old tables seen after the new ones");
      assert_eq!(counts, old.records_by_table);
    }
    assert!(matched.is_empty() || matched == vec![1016017], "{matched:?}");
  }
  assert_eq!(cohort(&s, &read_2).await, vec![1016017]);
}
