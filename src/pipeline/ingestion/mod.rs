//! Raw ingestion: land an extract in the append-only raw table.

pub mod source_file;

use crate::constants::{LOAD_ID, LOAD_TS, SOURCE_FILE};
use crate::entities::SourceFormat;
use crate::error::Result;
use crate::storage::{Store, TableRef};
use crate::table::Value;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

pub use source_file::{discover_latest, read_delimited};

/// Summary of one raw load generation.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub raw_table: String,
    pub source_file: String,
    pub load_id: String,
    pub load_ts: String,
    pub rows: usize,
}

/// Appends extracts into a raw table under a fresh load generation.
pub struct Ingestor {
    raw: TableRef,
    format: SourceFormat,
}

impl Ingestor {
    pub fn new(raw: TableRef, format: SourceFormat) -> Self {
        Self { raw, format }
    }

    /// Load the most recently modified extract in `dir`.
    pub fn load_latest(&self, store: &mut Store, dir: &Path) -> Result<IngestReport> {
        let path = discover_latest(dir, &self.format)?;
        info!("Latest input file: {}", path.display());
        self.load_file(store, &path)
    }

    pub fn load_file(&self, store: &mut Store, path: &Path) -> Result<IngestReport> {
        self.load_file_at(store, path, Utc::now())
    }

    /// Load `path` stamping `load_ts`. Prior generations are never modified.
    pub fn load_file_at(
        &self,
        store: &mut Store,
        path: &Path,
        load_ts: DateTime<Utc>,
    ) -> Result<IngestReport> {
        let span = tracing::info_span!("ingest", table = %self.raw);
        let _enter = span.enter();

        store.ensure_namespace(&self.raw.schema)?;

        let mut rows = read_delimited(path, &self.format)?;
        let source_file = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let load_id = Uuid::new_v4().to_string();
        let load_ts = load_ts.to_rfc3339_opts(SecondsFormat::Micros, true);

        rows.set_constant(LOAD_ID, Some(Value::text(&load_id)));
        rows.set_constant(LOAD_TS, Some(Value::text(&load_ts)));
        rows.set_constant(SOURCE_FILE, Some(Value::text(&source_file)));
        info!("Rows read: {} | load_id={}", rows.len(), load_id);

        let written = store.append_generation(&self.raw, &rows, &load_id)?;
        crate::metrics::ingest::rows_appended(written);
        crate::metrics::ingest::load_completed();
        info!("Loaded {} rows into {}", written, self.raw);

        Ok(IngestReport {
            raw_table: self.raw.to_string(),
            source_file,
            load_id,
            load_ts,
            rows: written,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::CATALOG_LISTINGS_SOURCE;
    use chrono::TimeZone;

    #[test]
    fn test_each_load_is_a_new_generation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("listings.txt");
        std::fs::write(&path, "sku\tasin\nA\tB001\nB\tB002\n").unwrap();

        let mut store = Store::open_in_memory().unwrap();
        let raw = TableRef::new("raw", "raw_listings");
        let ingestor = Ingestor::new(raw.clone(), CATALOG_LISTINGS_SOURCE);

        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let first = ingestor.load_file_at(&mut store, &path, t1).unwrap();
        let second = ingestor.load_file_at(&mut store, &path, t2).unwrap();

        assert_ne!(first.load_id, second.load_id);
        assert_eq!(first.rows, 2);
        assert_eq!(first.source_file, "listings.txt");

        let all = store.read_table(&raw).unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(
            all.columns(),
            ["sku", "asin", "load_id", "load_ts", "source_file"]
        );
        assert_eq!(
            store.latest_load_id(&raw).unwrap().as_deref(),
            Some(second.load_id.as_str())
        );
    }
}
