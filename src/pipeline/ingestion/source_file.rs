//! Locating and parsing marketplace extract files.

use crate::entities::SourceFormat;
use crate::error::{PipelineError, Result};
use crate::table::{Table, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

const UTF8_BOM: char = '\u{feff}';

/// The most recently modified file with the format's extension in `dir`.
pub fn discover_latest(dir: &Path, format: &SourceFormat) -> Result<PathBuf> {
    let not_found = || {
        PipelineError::NotFound(format!(
            "No .{} files found in: {}",
            format.extension,
            dir.display()
        ))
    };

    let entries = fs::read_dir(dir).map_err(|_| not_found())?;
    let mut latest: Option<(SystemTime, PathBuf)> = None;
    for entry in entries {
        let path = entry?.path();
        let matches_ext = path
            .extension()
            .map(|e| e.to_string_lossy().eq_ignore_ascii_case(format.extension))
            .unwrap_or(false);
        if !matches_ext || !path.is_file() {
            continue;
        }
        let modified = fs::metadata(&path)?.modified()?;
        debug!("Candidate input {} modified {:?}", path.display(), modified);
        let newer = match &latest {
            None => true,
            Some((t, p)) => (modified, &path) > (*t, p),
        };
        if newer {
            latest = Some((modified, path));
        }
    }
    latest.map(|(_, p)| p).ok_or_else(not_found)
}

/// Parse a delimited UTF-8 file (a leading byte-order mark is ignored).
/// Empty fields become null; ragged rows are padded with null.
pub fn read_delimited(path: &Path, format: &SourceFormat) -> Result<Table> {
    let content = fs::read_to_string(path)?;
    parse_delimited(content.trim_start_matches(UTF8_BOM), format.delimiter)
}

pub fn parse_delimited(content: &str, delimiter: u8) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(content.as_bytes());

    let headers = disambiguate_headers(reader.headers()?.iter());
    let mut table = Table::new(headers);
    for record in reader.records() {
        let record = record?;
        let cells = record
            .iter()
            .map(|field| {
                if field.is_empty() {
                    None
                } else {
                    Some(Value::text(field))
                }
            })
            .collect();
        table.push_row(cells);
    }
    Ok(table)
}

/// Make header names unique (case-insensitively, as the store requires)
/// by suffixing repeats with `.1`, `.2`, ...; blank headers get a
/// positional name.
fn disambiguate_headers<'a>(headers: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for (i, header) in headers.enumerate() {
        let base = if header.trim().is_empty() {
            format!("unnamed_{}", i)
        } else {
            header.to_string()
        };
        let mut name = base.clone();
        let mut n = 1;
        while out.iter().any(|o| o.eq_ignore_ascii_case(&name)) {
            name = format!("{}.{}", base, n);
            n += 1;
        }
        out.push(name);
    }
    out
}
