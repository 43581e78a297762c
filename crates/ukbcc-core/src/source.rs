//! Helpers for the delimited source files.

use std::{
  fs::File,
  io::{BufRead, BufReader, Read},
  path::Path,
};

use crate::Result;

/// Count data rows (lines after the header) without holding the file in
/// memory. A final line without a terminator still counts.
///
/// The result is advisory: quoted cells containing newlines are counted
/// twice.
pub fn estimate_lines(path: impl AsRef<Path>) -> Result<u64> {
  count_data_lines(File::open(path)?)
}

fn count_data_lines<R: Read>(input: R) -> Result<u64> {
  let mut reader = BufReader::with_capacity(64 * 1024, input);
  let mut lines = 0u64;
  let mut last = None;
  loop {
    let buf = reader.fill_buf()?;
    if buf.is_empty() {
      break;
    }
    lines += buf.iter().filter(|b| **b == b'\n').count() as u64;
    last = buf.last().copied();
    let consumed = buf.len();
    reader.consume(consumed);
  }
  if last.is_some_and(|b| b != b'\n') {
    lines += 1;
  }
  Ok(lines.saturating_sub(1))
}

/// Tab if the header line contains one, comma otherwise.
pub fn sniff_delimiter(path: impl AsRef<Path>) -> Result<u8> {
  let mut header = String::new();
  BufReader::new(File::open(path)?).read_line(&mut header)?;
  Ok(if header.contains('\t') { b'\t' } else { b',' })
}

/// Open a source for streaming. Rows may be ragged; width checks belong to
/// the caller.
pub fn open_reader(path: impl AsRef<Path>, delimiter: Option<u8>) -> Result<csv::Reader<File>> {
  let path = path.as_ref();
  let delimiter = match delimiter {
    Some(d) => d,
    None => sniff_delimiter(path)?,
  };
  Ok(
    csv::ReaderBuilder::new()
      .delimiter(delimiter)
      .has_headers(true)
      .flexible(true)
      .from_path(path)?,
  )
}

/// The trimmed header row of a source.
pub fn read_header(path: impl AsRef<Path>, delimiter: Option<u8>) -> Result<Vec<String>> {
  let mut reader = open_reader(path, delimiter)?;
  Ok(reader.headers()?.iter().map(|h| h.trim().to_owned()).collect())
}
