//! Layered configuration: TOML file, then `UKBCC_*` environment variables,
//! then command-line flags.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use serde::Deserialize;
use ukbcc_core::store::{BuildOptions, BuildSources};

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
  pub db_path:            PathBuf,
  pub main_path:          Option<PathBuf>,
  pub clinical_path:      Option<PathBuf>,
  pub catalogue_path:     Option<PathBuf>,
  /// Where criteria dumps are saved.
  pub cohort_dir:         Option<PathBuf>,
  pub batch_size:         usize,
  #[serde(default)]
  pub strict:             bool,
  pub main_delimiter:     Option<char>,
  pub clinical_delimiter: Option<char>,
}

impl Settings {
  pub fn load(config_file: &Path) -> Result<Self> {
    let settings = config::Config::builder()
      .set_default("db_path", "ukbcc.db")?
      .set_default("batch_size", 5000)?
      .add_source(config::File::from(config_file).required(false))
      .add_source(config::Environment::with_prefix("UKBCC"))
      .build()
      .context("failed to read config file")?;

    let mut settings: Settings =
      settings.try_deserialize().context("failed to deserialise settings")?;
    settings.expand_paths();
    Ok(settings)
  }

  fn expand_paths(&mut self) {
    self.db_path = expand_tilde(&self.db_path);
    for path in [
      &mut self.main_path,
      &mut self.clinical_path,
      &mut self.catalogue_path,
      &mut self.cohort_dir,
    ]
    .into_iter()
    .flatten()
    {
      *path = expand_tilde(path);
    }
  }

  /// Input files for a build.
  pub fn sources(&self) -> Result<BuildSources> {
    let Some(main) = self.main_path.clone() else {
      bail!("no main dataset configured (--main or UKBCC_MAIN_PATH)");
    };
    let Some(catalogue) = self.catalogue_path.clone() else {
      bail!("no metadata catalogue configured (--catalogue or UKBCC_CATALOGUE_PATH)");
    };
    Ok(BuildSources { main, clinical: self.clinical_path.clone(), catalogue })
  }

  pub fn build_options(&self) -> Result<BuildOptions> {
    Ok(BuildOptions {
      batch_size:         self.batch_size,
      strict:             self.strict,
      main_delimiter:     delimiter_byte(self.main_delimiter)?,
      clinical_delimiter: delimiter_byte(self.clinical_delimiter)?,
    })
  }
}

fn delimiter_byte(delimiter: Option<char>) -> Result<Option<u8>> {
  match delimiter {
    None => Ok(None),
    Some(c) if c.is_ascii() => Ok(Some(c as u8)),
    Some(c) => bail!("delimiter {c:?} is not a single ASCII character"),
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
