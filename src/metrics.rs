//! Pipeline metrics, grouped by phase.
//!
//! Emitted through the `metrics` facade. Nothing is exported unless the host
//! process installs a recorder, so a plain batch run pays nothing for them.
//! Names follow `mwh_<phase>_<name>_<unit>`.

pub mod ingest {
    pub fn rows_appended(rows: usize) {
        ::metrics::counter!("mwh_ingest_rows_appended_total").increment(rows as u64);
    }

    pub fn load_completed() {
        ::metrics::counter!("mwh_ingest_loads_total").increment(1);
    }
}

pub mod normalize {
    pub fn rows_read(rows: usize) {
        ::metrics::counter!("mwh_normalize_rows_read_total").increment(rows as u64);
    }

    pub fn rows_dropped_missing_key(rows: usize) {
        ::metrics::counter!("mwh_normalize_rows_dropped_missing_key_total").increment(rows as u64);
    }

    pub fn duplicates_removed(rows: usize) {
        ::metrics::counter!("mwh_normalize_duplicates_removed_total").increment(rows as u64);
    }

    pub fn rows_staged(rows: usize) {
        ::metrics::gauge!("mwh_normalize_staged_rows").set(rows as f64);
    }
}

pub mod dimension {
    pub fn merged(inserted: usize, updated: usize) {
        ::metrics::counter!("mwh_dimension_rows_inserted_total").increment(inserted as u64);
        ::metrics::counter!("mwh_dimension_rows_updated_total").increment(updated as u64);
    }
}

pub mod fact {
    pub fn rebuilt(rows: usize, duplicates_removed: usize) {
        ::metrics::gauge!("mwh_fact_rows").set(rows as f64);
        ::metrics::counter!("mwh_fact_duplicates_removed_total")
            .increment(duplicates_removed as u64);
    }
}
