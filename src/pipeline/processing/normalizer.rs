//! Staging transform: latest raw generation → canonical, deduplicated
//! staging snapshot.

use crate::constants::{LOAD_ID, NULL_LITERALS, PROVENANCE_COLUMNS};
use crate::entities::StagingSpec;
use crate::error::{PipelineError, Result};
use crate::schema::{canonicalize_columns, resolve};
use crate::storage::{Store, TableRef};
use crate::table::{key_text, Cell, Table, Value};
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct NormalizeReport {
    pub staging_table: String,
    pub load_id: String,
    pub rows_read: usize,
    pub rows_dropped_missing_key: usize,
    pub duplicates_removed: usize,
    pub rows_staged: usize,
    /// `(source column, staging column)` for every resolved field.
    pub resolved: Vec<(String, String)>,
    pub unresolved_optional: Vec<String>,
}

/// Result of the in-memory part of normalization.
#[derive(Debug, Clone)]
pub struct Normalized {
    pub table: Table,
    pub rows_read: usize,
    pub rows_dropped_missing_key: usize,
    pub duplicates_removed: usize,
    pub resolved: Vec<(String, String)>,
    pub unresolved_optional: Vec<String>,
}

pub struct Normalizer {
    raw: TableRef,
    staging: TableRef,
    spec: StagingSpec,
}

impl Normalizer {
    pub fn new(raw: TableRef, staging: TableRef, spec: StagingSpec) -> Self {
        Self { raw, staging, spec }
    }

    /// Rebuild the staging table from the newest raw generation. Schema
    /// errors surface before staging is touched.
    pub fn run(&self, store: &mut Store) -> Result<NormalizeReport> {
        let span = tracing::info_span!("normalize", entity = self.spec.entity);
        let _enter = span.enter();

        store.ensure_namespace(&self.raw.schema)?;
        store.ensure_namespace(&self.staging.schema)?;

        let load_id = store.latest_load_id(&self.raw)?.ok_or_else(|| {
            PipelineError::NotFound(format!(
                "No load_id found in {}. Run the raw loader first.",
                self.raw
            ))
        })?;
        info!("Processing load_id: {}", load_id);

        let mut raw_rows = store.read_where_eq(&self.raw, LOAD_ID, &Value::text(&load_id))?;
        info!("Read {} rows from {}", raw_rows.len(), self.raw);
        // The raw table carries the union of every generation's columns.
        match store.generation_columns(&self.raw, &load_id)? {
            Some(carried) => raw_rows = restrict_to(&raw_rows, &carried),
            None => warn!(
                "No column manifest for load {}; using every column of {}",
                load_id, self.raw
            ),
        }
        if raw_rows.is_empty() {
            return Err(PipelineError::NotFound(format!(
                "Latest raw load {} in {} returned 0 rows",
                load_id, self.raw
            )));
        }

        let normalized = normalize(&self.spec, &raw_rows)?;
        let staged = store.replace(&self.staging, &normalized.table)?;

        crate::metrics::normalize::rows_read(normalized.rows_read);
        crate::metrics::normalize::rows_dropped_missing_key(normalized.rows_dropped_missing_key);
        crate::metrics::normalize::duplicates_removed(normalized.duplicates_removed);
        crate::metrics::normalize::rows_staged(staged);
        info!("Staged {} rows into {}", staged, self.staging);

        Ok(NormalizeReport {
            staging_table: self.staging.to_string(),
            load_id,
            rows_read: normalized.rows_read,
            rows_dropped_missing_key: normalized.rows_dropped_missing_key,
            duplicates_removed: normalized.duplicates_removed,
            rows_staged: staged,
            resolved: normalized.resolved,
            unresolved_optional: normalized.unresolved_optional,
        })
    }
}

/// Canonicalize, resolve, clean keys, drop keyless rows and deduplicate.
pub fn normalize(spec: &StagingSpec, raw: &Table) -> Result<Normalized> {
    let rows_read = raw.len();

    let canonical: Vec<(String, String)> = raw
        .columns()
        .iter()
        .zip(canonicalize_columns(raw.columns()))
        .filter_map(|(src, canon)| canon.map(|c| (src.clone(), c)))
        .collect();
    let mut table = raw.project(&canonical);

    let resolution = resolve(spec.fields, table.columns())?;
    for field in &resolution.fields {
        info!("Resolved {} -> {}", field.source, field.output);
    }

    let key_sources: Vec<String> = spec
        .business_key
        .iter()
        .filter_map(|k| resolution.source_for(k).map(str::to_string))
        .collect();
    for source in &key_sources {
        table.map_column(source, normalize_key);
    }

    let key_idx: Vec<usize> = key_sources
        .iter()
        .filter_map(|s| table.column_index(s))
        .collect();
    let before = table.len();
    table.retain_rows(|row| key_idx.iter().all(|&i| row[i].is_some()));
    let rows_dropped_missing_key = before - table.len();
    if rows_dropped_missing_key > 0 {
        info!("Dropped {} rows without keys", rows_dropped_missing_key);
    }

    let mut mapping = resolution.mapping();
    for meta in PROVENANCE_COLUMNS {
        if table.has_column(meta) && !mapping.iter().any(|(_, out)| out == meta) {
            mapping.push((meta.to_string(), meta.to_string()));
        }
    }
    let mut staged = table.project(&mapping);

    let duplicates_removed = dedupe_keep_first(&mut staged, spec.business_key);
    if duplicates_removed > 0 {
        info!("Removed {} duplicate rows", duplicates_removed);
    }

    Ok(Normalized {
        table: staged,
        rows_read,
        rows_dropped_missing_key,
        duplicates_removed,
        resolved: resolution.mapping(),
        unresolved_optional: resolution.unresolved_optional,
    })
}

/// Keep only the columns a generation actually carried, plus provenance.
/// Raw column names match case-insensitively, as the store declares them.
fn restrict_to(raw: &Table, carried: &[String]) -> Table {
    let mapping: Vec<(String, String)> = raw
        .columns()
        .iter()
        .filter(|c| {
            PROVENANCE_COLUMNS.contains(&c.as_str())
                || carried.iter().any(|k| k.eq_ignore_ascii_case(c))
        })
        .map(|c| (c.clone(), c.clone()))
        .collect();
    let dropped = raw.columns().len() - mapping.len();
    if dropped > 0 {
        debug!("Ignoring {} raw columns this load did not carry", dropped);
    }
    raw.project(&mapping)
}

/// Stringify and trim a key value; blank and "nan"/"None" literals are null.
pub fn normalize_key(cell: Cell) -> Cell {
    let text = cell?.to_string();
    let trimmed = text.trim();
    if NULL_LITERALS.contains(&trimmed) {
        None
    } else {
        Some(Value::text(trimmed))
    }
}

/// Remove rows whose key tuple was already seen. Returns how many went.
fn dedupe_keep_first(table: &mut Table, key: &[&str]) -> usize {
    let idx: Vec<usize> = key.iter().filter_map(|k| table.column_index(k)).collect();
    let before = table.len();
    let mut seen = HashSet::new();
    table.retain_rows(|row| {
        let k: Vec<Option<String>> = idx.iter().map(|&i| key_text(&row[i])).collect();
        seen.insert(k)
    });
    before - table.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::CATALOG_LISTINGS;

    fn raw(columns: &[&str], rows: &[&[Option<&str>]]) -> Table {
        let mut t = Table::new(columns.iter().map(|c| c.to_string()).collect());
        for r in rows {
            t.push_row(r.iter().map(|c| c.map(Value::from)).collect());
        }
        t
    }

    #[test]
    fn test_normalize_key() {
        assert_eq!(normalize_key(Some(Value::text("  SKU1 "))), Some(Value::text("SKU1")));
        assert_eq!(normalize_key(Some(Value::text("   "))), None);
        assert_eq!(normalize_key(Some(Value::text("nan"))), None);
        assert_eq!(normalize_key(Some(Value::text("None"))), None);
        assert_eq!(normalize_key(Some(Value::Integer(42))), Some(Value::text("42")));
        assert_eq!(normalize_key(None), None);
    }

    #[test]
    fn test_renames_to_canonical_names_and_keeps_provenance() {
        let input = raw(
            &["Seller SKU", "ASIN 1", "Item Name", "load_id", "load_ts", "source_file"],
            &[&[Some("SKU1"), Some("B001"), Some("Widget"), Some("L1"), Some("t"), Some("f.txt")]],
        );
        let out = normalize(&CATALOG_LISTINGS, &input).unwrap();
        assert_eq!(
            out.table.columns(),
            ["seller_sku", "asin", "item_name", "load_id", "load_ts", "source_file"]
        );
        assert_eq!(out.unresolved_optional, vec!["status", "fulfillment channel"]);
    }

    #[test]
    fn test_drops_keyless_rows_and_duplicates() {
        let input = raw(
            &["seller-sku", "asin1"],
            &[
                &[Some("SKU1"), Some("B001")],
                &[Some(" SKU1 "), Some("B001")],
                &[Some("nan"), Some("B002")],
                &[Some("SKU3"), None],
                &[Some("SKU4"), Some("B004")],
            ],
        );
        let out = normalize(&CATALOG_LISTINGS, &input).unwrap();
        assert_eq!(out.rows_read, 5);
        assert_eq!(out.rows_dropped_missing_key, 2);
        assert_eq!(out.duplicates_removed, 1);
        assert_eq!(out.table.len(), 2);
        assert_eq!(out.table.get(0, "seller_sku"), Some(&Value::text("SKU1")));
    }

    #[test]
    fn test_restrict_to_keeps_carried_and_provenance_columns() {
        let input = raw(
            &["SKU", "asin1", "item-name", "load_id"],
            &[&[Some("A"), Some("B001"), None, Some("L2")]],
        );
        let out = restrict_to(&input, &["sku".to_string(), "asin1".to_string()]);
        assert_eq!(out.columns(), ["SKU", "asin1", "load_id"]);

        let blank_but_carried = restrict_to(
            &input,
            &["SKU".to_string(), "asin1".to_string(), "item-name".to_string()],
        );
        assert!(blank_but_carried.has_column("item-name"));
    }

    #[test]
    fn test_missing_asin_is_a_schema_error() {
        let input = raw(&["sku", "title"], &[&[Some("SKU1"), Some("x")]]);
        let err = normalize(&CATALOG_LISTINGS, &input).unwrap_err();
        assert!(err.is_schema_error());
        assert!(err.to_string().contains("asin1"));
    }
}
