//! Daily fact rebuild from an append-only staging history.

use crate::constants::LOAD_TS;
use crate::entities::{FactSpec, RatioSpec};
use crate::error::{PipelineError, Result};
use crate::schema::canonicalize_columns;
use crate::storage::{Store, TableRef};
use crate::table::{key_text, Cell, Table, Value};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::info;

#[derive(Debug, Clone, Serialize)]
pub struct FactReport {
    pub fact_table: String,
    pub rows_read: usize,
    pub duplicates_removed: usize,
    pub rows_written: usize,
    pub derived_measures: Vec<String>,
    pub date_min: Option<String>,
    pub date_max: Option<String>,
}

/// In-memory result of a rebuild, before it is written.
#[derive(Debug, Clone)]
pub struct RebuiltFact {
    pub table: Table,
    pub duplicates_removed: usize,
    pub derived_measures: Vec<String>,
}

pub struct FactRebuilder {
    staging: TableRef,
    target: TableRef,
    spec: FactSpec,
}

impl FactRebuilder {
    pub fn new(staging: TableRef, target: TableRef, spec: FactSpec) -> Self {
        Self {
            staging,
            target,
            spec,
        }
    }

    pub fn run(&self, store: &mut Store) -> Result<FactReport> {
        let span = tracing::info_span!("build_fact", entity = self.spec.entity);
        let _enter = span.enter();

        store.ensure_namespace(&self.staging.schema)?;
        store.ensure_namespace(&self.target.schema)?;

        let history = if store.table_exists(&self.staging)? {
            store.read_table(&self.staging)?
        } else {
            Table::default()
        };
        if history.is_empty() {
            return Err(PipelineError::NotFound(format!(
                "Staging table {} is empty",
                self.staging
            )));
        }
        info!("Read {} staging rows from {}", history.len(), self.staging);

        let rebuilt = rebuild(&self.spec, &history)?;
        let written = store.replace(&self.target, &rebuilt.table)?;
        let (date_min, date_max) = date_range(&rebuilt.table, self.spec.date.output_name);

        crate::metrics::fact::rebuilt(written, rebuilt.duplicates_removed);
        info!("Built fact {} rows={}", self.target, written);

        Ok(FactReport {
            fact_table: self.target.to_string(),
            rows_read: history.len(),
            duplicates_removed: rebuilt.duplicates_removed,
            rows_written: written,
            derived_measures: rebuilt.derived_measures,
            date_min,
            date_max,
        })
    }
}

/// Resolve, project, deduplicate by recency and derive ratio measures.
pub fn rebuild(spec: &FactSpec, history: &Table) -> Result<RebuiltFact> {
    let canonical: Vec<(String, String)> = history
        .columns()
        .iter()
        .zip(canonicalize_columns(history.columns()))
        .filter_map(|(src, canon)| canon.map(|c| (src.clone(), c)))
        .collect();
    let history = history.project(&canonical);

    let key_source = spec.secondary_key.find_required(history.columns())?;
    let date_source = spec.date.find_required(history.columns())?;
    let key = spec.secondary_key.output_name;
    let date = spec.date.output_name;

    let mapping: Vec<(String, String)> = spec
        .keep
        .iter()
        .filter_map(|col| {
            let source = if *col == key {
                key_source.clone()
            } else if *col == date {
                date_source.clone()
            } else {
                col.to_string()
            };
            history
                .has_column(&source)
                .then(|| (source, col.to_string()))
        })
        .collect();
    let mut fact = history.project(&mapping);

    if let Some(ts) = fact.column_index(LOAD_TS) {
        fact.sort_rows_by(|a, b| recency_order(&a[ts], &b[ts]));
    }
    let duplicates_removed = dedupe_keep_last(&mut fact, &[date, key]);
    if duplicates_removed > 0 {
        info!("Removed {} duplicate ({}, {}) rows", duplicates_removed, date, key);
    }

    let mut derived_measures = Vec::new();
    for ratio in spec.ratios {
        if add_ratio(&mut fact, ratio) {
            derived_measures.push(ratio.name.to_string());
        }
    }

    Ok(RebuiltFact {
        table: fact,
        duplicates_removed,
        derived_measures,
    })
}

/// `numerator / denominator * scale`. Null when either operand is null or
/// non-numeric, or when the denominator is zero.
pub fn safe_ratio(numerator: Option<&Value>, denominator: Option<&Value>, scale: f64) -> Cell {
    let n = numerator?.as_f64()?;
    let d = denominator?.as_f64()?;
    if d == 0.0 {
        return None;
    }
    Some(Value::Real(n / d * scale))
}

/// Adds the ratio column when both operand columns exist.
fn add_ratio(fact: &mut Table, ratio: &RatioSpec) -> bool {
    let (Some(n), Some(d)) = (
        fact.column_index(ratio.numerator),
        fact.column_index(ratio.denominator),
    ) else {
        return false;
    };
    fact.add_derived(ratio.name, |_, row| {
        safe_ratio(row[n].as_ref(), row[d].as_ref(), ratio.scale)
    });
    true
}

/// Nulls sort first so any stamped row outranks an unstamped one.
fn recency_order(a: &Cell, b: &Cell) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.recency_cmp(b),
    }
}

/// Keep the last row per key (rows are already in recency order), keeping
/// the survivors in their original relative order.
fn dedupe_keep_last(table: &mut Table, key: &[&str]) -> usize {
    let idx: Vec<usize> = key.iter().filter_map(|k| table.column_index(k)).collect();
    let before = table.len();
    let rows = table.rows_mut();
    let mut seen = HashSet::new();
    let mut kept: Vec<Vec<Cell>> = rows
        .drain(..)
        .rev()
        .filter(|row| {
            let k: Vec<Option<String>> = idx.iter().map(|&i| key_text(&row[i])).collect();
            seen.insert(k)
        })
        .collect();
    kept.reverse();
    *rows = kept;
    before - table.len()
}

fn date_range(table: &Table, date: &str) -> (Option<String>, Option<String>) {
    let Some(i) = table.column_index(date) else {
        return (None, None);
    };
    let dates: Vec<String> = table.rows().iter().filter_map(|r| key_text(&r[i])).collect();
    (dates.iter().min().cloned(), dates.iter().max().cloned())
}
