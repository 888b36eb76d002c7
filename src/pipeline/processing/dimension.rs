//! Change-gated upsert of a staging snapshot into a type-1 dimension.
//!
//! A row is inserted when its key is new. An existing row is rewritten,
//! and its `updated_at` advanced, only when the secondary identifier or one
//! of the optional attributes present in staging differs from the stored
//! value (`IS NOT`, so null vs value counts as a change). Attributes that
//! staging does not carry this run are left alone.

use crate::constants::UPDATED_AT;
use crate::entities::DimensionSpec;
use crate::error::{PipelineError, Result};
use crate::storage::{quote_ident, Store, TableRef};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::params;
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub dimension_table: String,
    pub staging_rows: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub present_optional: Vec<String>,
    pub updated_at: String,
}

pub struct DimensionMerger {
    staging: TableRef,
    target: TableRef,
    spec: DimensionSpec,
}

impl DimensionMerger {
    pub fn new(staging: TableRef, target: TableRef, spec: DimensionSpec) -> Self {
        Self {
            staging,
            target,
            spec,
        }
    }

    pub fn merge(&self, store: &mut Store) -> Result<MergeReport> {
        self.merge_at(store, Utc::now())
    }

    /// Merge using `now` as the `updated_at` stamp for touched rows.
    pub fn merge_at(&self, store: &mut Store, now: DateTime<Utc>) -> Result<MergeReport> {
        let span = tracing::info_span!("merge_dimension", entity = self.spec.entity);
        let _enter = span.enter();

        store.ensure_namespace(&self.staging.schema)?;
        store.ensure_namespace(&self.target.schema)?;
        store.ddl(|conn| {
            conn.execute_batch(&self.create_table_sql())?;
            Ok(())
        })?;

        if !store.table_exists(&self.staging)? {
            return Err(PipelineError::NotFound(format!(
                "Staging table {} does not exist. Run the staging transform first.",
                self.staging
            )));
        }
        let staging_columns = store.table_columns(&self.staging)?;
        let present_optional = self.present_optional(&staging_columns)?;
        info!("Optional attributes present this run: {:?}", present_optional);

        let stamp = now.to_rfc3339_opts(SecondsFormat::Micros, true);
        let count_staging = format!("SELECT COUNT(*) FROM {}", self.staging.qualified());
        let count_new = self.count_new_keys_sql();
        let upsert = self.upsert_sql(&present_optional);
        debug!("Upsert statement: {}", upsert);

        let (staging_rows, inserted, affected) = store.with_transaction(|conn| {
            let staging_rows: i64 = conn.query_row(&count_staging, [], |r| r.get(0))?;
            let inserted: i64 = conn.query_row(&count_new, [], |r| r.get(0))?;
            let affected = conn.execute(&upsert, params![stamp])?;
            Ok((staging_rows as usize, inserted as usize, affected))
        })?;

        let updated = affected.saturating_sub(inserted);
        let unchanged = staging_rows.saturating_sub(affected);
        crate::metrics::dimension::merged(inserted, updated);
        info!(
            "Merged {} staging rows into {}: inserted={} updated={} unchanged={}",
            staging_rows, self.target, inserted, updated, unchanged
        );

        Ok(MergeReport {
            dimension_table: self.target.to_string(),
            staging_rows,
            inserted,
            updated,
            unchanged,
            present_optional,
            updated_at: stamp,
        })
    }

    /// Optional attributes staging carries; fails when a required column is
    /// missing.
    fn present_optional(&self, staging_columns: &[String]) -> Result<Vec<String>> {
        let missing: Vec<String> = self
            .spec
            .required_columns()
            .iter()
            .filter(|c| !staging_columns.iter().any(|s| s == *c))
            .map(|c| c.to_string())
            .collect();
        if !missing.is_empty() {
            let mut available = staging_columns.to_vec();
            available.sort();
            return Err(PipelineError::MissingColumns {
                table: self.staging.to_string(),
                missing,
                available,
            });
        }
        Ok(self
            .spec
            .optional
            .iter()
            .filter(|c| staging_columns.iter().any(|s| s == *c))
            .map(|c| c.to_string())
            .collect())
    }

    fn create_table_sql(&self) -> String {
        let mut defs = vec![
            format!("{} TEXT NOT NULL PRIMARY KEY", quote_ident(self.spec.key)),
            format!("{} TEXT NOT NULL", quote_ident(self.spec.secondary)),
        ];
        for attr in self.spec.optional {
            defs.push(format!("{} TEXT NULL", quote_ident(attr)));
        }
        defs.push(format!("{} TEXT NOT NULL", quote_ident(UPDATED_AT)));
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.target.qualified(),
            defs.join(", ")
        )
    }

    fn count_new_keys_sql(&self) -> String {
        let key = quote_ident(self.spec.key);
        format!(
            "SELECT COUNT(DISTINCT s.{key}) FROM {stg} AS s \
             WHERE s.{key} IS NOT NULL AND NOT EXISTS \
             (SELECT 1 FROM {dim} AS d WHERE d.{key} = s.{key})",
            key = key,
            stg = self.staging.qualified(),
            dim = self.target.qualified()
        )
    }

    /// One set-oriented statement. Only the secondary identifier and the
    /// optional attributes present in staging appear in the SET list and the
    /// change check.
    fn upsert_sql(&self, present_optional: &[String]) -> String {
        let key = quote_ident(self.spec.key);
        let tracked: Vec<String> = std::iter::once(self.spec.secondary.to_string())
            .chain(present_optional.iter().cloned())
            .map(|c| quote_ident(&c))
            .collect();

        let mut insert_cols = vec![key.clone()];
        insert_cols.extend(tracked.iter().cloned());
        insert_cols.push(quote_ident(UPDATED_AT));

        let mut select_cols = vec![key.clone()];
        select_cols.extend(tracked.iter().cloned());
        select_cols.push("?1".to_string());

        let mut sets: Vec<String> = tracked
            .iter()
            .map(|c| format!("{c} = excluded.{c}"))
            .collect();
        sets.push(format!("{u} = excluded.{u}", u = quote_ident(UPDATED_AT)));

        let changed: Vec<String> = tracked
            .iter()
            .map(|c| format!("d.{c} IS NOT excluded.{c}"))
            .collect();

        let secondary = quote_ident(self.spec.secondary);
        format!(
            "INSERT INTO {dim} AS d ({insert_cols}) \
             SELECT {select_cols} FROM {stg} \
             WHERE {key} IS NOT NULL AND {secondary} IS NOT NULL \
             ON CONFLICT ({key}) DO UPDATE SET {sets} \
             WHERE {changed}",
            dim = self.target.qualified(),
            insert_cols = insert_cols.join(", "),
            select_cols = select_cols.join(", "),
            stg = self.staging.qualified(),
            key = key,
            secondary = secondary,
            sets = sets.join(", "),
            changed = changed.join(" OR ")
        )
    }
}
