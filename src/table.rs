//! Typed, schema-flexible row sets.
//!
//! A [`Table`] keeps the set of columns that are *present* separately from
//! the cell values, so "column not provided" and "column provided as null"
//! stay distinguishable all the way to the merge step.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;

/// A single non-null cell value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Text(String),
    Integer(i64),
    Real(f64),
}

/// A cell: `None` is SQL NULL.
pub type Cell = Option<Value>;

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// Read a value as a number. Text is accepted when it is numeric once
    /// currency, thousands and percent decoration is removed.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Real(r) => Some(*r),
            Value::Text(s) => {
                let cleaned: String = s
                    .trim()
                    .chars()
                    .filter(|c| !matches!(c, '$' | ',' | '%'))
                    .collect();
                if cleaned.is_empty() {
                    return None;
                }
                cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
            }
        }
    }

    /// Interpret the value as a point in time, if it looks like one.
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        let Value::Text(s) = self else {
            return None;
        };
        let s = s.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.with_timezone(&Utc).naive_utc());
        }
        for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
                return Some(dt);
            }
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
    }

    /// Total order used for recency sorting. Every value maps to one key:
    /// unparseable text sorts first (by text), then numbers, then
    /// timestamps (by instant, text breaking ties).
    pub fn recency_cmp(&self, other: &Value) -> Ordering {
        self.recency_key().cmp(&other.recency_key())
    }

    fn recency_key(&self) -> RecencyKey<'_> {
        match self {
            Value::Text(s) => match self.as_timestamp() {
                Some(ts) => RecencyKey::Time(ts, s),
                None => RecencyKey::Text(s),
            },
            Value::Integer(i) => RecencyKey::Number(*i as f64),
            Value::Real(r) => RecencyKey::Number(*r),
        }
    }

    /// SQLite column affinity that can hold this value.
    pub fn sql_type(&self) -> &'static str {
        match self {
            Value::Text(_) => "TEXT",
            Value::Integer(_) => "INTEGER",
            Value::Real(_) => "REAL",
        }
    }
}

#[derive(Debug)]
enum RecencyKey<'a> {
    Text(&'a str),
    Number(f64),
    Time(NaiveDateTime, &'a str),
}

impl RecencyKey<'_> {
    fn rank(&self) -> u8 {
        match self {
            RecencyKey::Text(_) => 0,
            RecencyKey::Number(_) => 1,
            RecencyKey::Time(..) => 2,
        }
    }
}

impl Ord for RecencyKey<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (RecencyKey::Text(a), RecencyKey::Text(b)) => a.cmp(b),
            (RecencyKey::Number(a), RecencyKey::Number(b)) => a.total_cmp(b),
            (RecencyKey::Time(a, x), RecencyKey::Time(b, y)) => (a, x).cmp(&(b, y)),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for RecencyKey<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for RecencyKey<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RecencyKey<'_> {}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => write!(f, "{}", s),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Real(r) => write!(f, "{}", r),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(r: f64) -> Self {
        Value::Real(r)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Real(r) => ToSqlOutput::Borrowed(ValueRef::Real(*r)),
        })
    }
}

/// Convert a value read from SQLite. Blobs are decoded lossily as text.
pub fn cell_from_sql(value: ValueRef<'_>) -> Cell {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(Value::Integer(i)),
        ValueRef::Real(r) => Some(Value::Real(r)),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Some(Value::Text(String::from_utf8_lossy(bytes).into_owned()))
        }
    }
}

/// An ordered set of present columns plus rows of cells aligned to them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Append a row, padding short rows with nulls and truncating long ones.
    pub fn push_row(&mut self, mut row: Vec<Cell>) {
        row.resize(self.columns.len(), None);
        self.rows.push(row);
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)?.as_ref()
    }

    /// Add a column holding the same value on every row. Replaces an
    /// existing column of the same name.
    pub fn set_constant(&mut self, name: &str, value: Cell) {
        match self.column_index(name) {
            Some(idx) => {
                for row in &mut self.rows {
                    row[idx] = value.clone();
                }
            }
            None => {
                self.columns.push(name.to_string());
                for row in &mut self.rows {
                    row.push(value.clone());
                }
            }
        }
    }

    /// Add a column computed from each row.
    pub fn add_derived<F>(&mut self, name: &str, mut f: F)
    where
        F: FnMut(&[String], &[Cell]) -> Cell,
    {
        let columns = self.columns.clone();
        for row in &mut self.rows {
            let v = f(&columns, row);
            row.push(v);
        }
        self.columns.push(name.to_string());
    }

    /// Keep only the listed `(source, output)` columns, in that order,
    /// renaming each to its output name. Unknown sources are skipped.
    pub fn project(&self, mapping: &[(String, String)]) -> Table {
        let picks: Vec<(usize, &String)> = mapping
            .iter()
            .filter_map(|(src, out)| self.column_index(src).map(|i| (i, out)))
            .collect();
        let mut out = Table::new(picks.iter().map(|(_, name)| (*name).clone()).collect());
        for row in &self.rows {
            out.rows
                .push(picks.iter().map(|(i, _)| row[*i].clone()).collect());
        }
        out
    }

    /// Apply `f` to every cell of one column.
    pub fn map_column<F>(&mut self, name: &str, mut f: F)
    where
        F: FnMut(Cell) -> Cell,
    {
        if let Some(idx) = self.column_index(name) {
            for row in &mut self.rows {
                let v = row[idx].take();
                row[idx] = f(v);
            }
        }
    }

    pub fn retain_rows<F>(&mut self, mut f: F)
    where
        F: FnMut(&[Cell]) -> bool,
    {
        self.rows.retain(|r| f(r));
    }

    pub fn sort_rows_by<F>(&mut self, f: F)
    where
        F: FnMut(&Vec<Cell>, &Vec<Cell>) -> Ordering,
    {
        self.rows.sort_by(f);
    }

    pub(crate) fn rows_mut(&mut self) -> &mut Vec<Vec<Cell>> {
        &mut self.rows
    }

    /// Declared SQL type per column inferred from the first non-null value.
    /// Integer columns that also hold reals widen to REAL; anything mixed
    /// with text becomes TEXT.
    pub fn inferred_types(&self) -> Vec<&'static str> {
        (0..self.columns.len())
            .map(|i| {
                let mut ty: Option<&'static str> = None;
                for v in self.rows.iter().filter_map(|r| r[i].as_ref()) {
                    ty = Some(match (ty, v.sql_type()) {
                        (None, t) => t,
                        (Some(a), b) if a == b => a,
                        (Some("INTEGER"), "REAL") | (Some("REAL"), "INTEGER") => "REAL",
                        _ => "TEXT",
                    });
                }
                ty.unwrap_or("TEXT")
            })
            .collect()
    }
}

/// Key text used for duplicate detection: the displayed value, or `None`.
pub fn key_text(cell: &Cell) -> Option<String> {
    cell.as_ref().map(|v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_text_is_read_as_number() {
        assert_eq!(Value::text("$1,234.50").as_f64(), Some(1234.5));
        assert_eq!(Value::text("12.5%").as_f64(), Some(12.5));
        assert_eq!(Value::text("n/a").as_f64(), None);
        assert_eq!(Value::Integer(3).as_f64(), Some(3.0));
    }

    #[test]
    fn test_recency_compares_timestamps_as_time() {
        let earlier = Value::text("2024-01-01T09:00:00Z");
        let later = Value::text("2024-01-01 10:00:00");
        assert_eq!(earlier.recency_cmp(&later), Ordering::Less);
    }

    #[test]
    fn test_recency_order_is_total_with_mixed_offsets_and_garbage() {
        // 05:00Z written with an offset, 06:00Z, and text that is no timestamp
        // but sorts between the two as plain strings.
        let offset = Value::text("2024-01-01T10:00:00+05:00");
        let utc = Value::text("2024-01-01T06:00:00Z");
        let garbage = Value::text("2024-01-01T08:zz");

        assert_eq!(offset.recency_cmp(&utc), Ordering::Less);
        assert_eq!(garbage.recency_cmp(&offset), Ordering::Less);
        assert_eq!(garbage.recency_cmp(&utc), Ordering::Less);
        assert_eq!(Value::Integer(7).recency_cmp(&utc), Ordering::Less);
        assert_eq!(garbage.recency_cmp(&Value::Real(1.0)), Ordering::Less);

        let mut values = vec![utc.clone(), garbage.clone(), offset.clone(), Value::Integer(3)];
        values.sort_by(|a, b| a.recency_cmp(b));
        assert_eq!(values, vec![garbage, Value::Integer(3), offset, utc]);
    }

    #[test]
    fn test_push_row_pads_short_rows() {
        let mut t = Table::new(vec!["a".into(), "b".into()]);
        t.push_row(vec![Some(Value::text("x"))]);
        assert_eq!(t.rows()[0], vec![Some(Value::text("x")), None]);
    }

    #[test]
    fn test_project_renames_and_skips_missing() {
        let mut t = Table::new(vec!["sku".into(), "asin1".into()]);
        t.push_row(vec![Some("S".into()), Some("A".into())]);
        let p = t.project(&[
            ("asin1".into(), "asin".into()),
            ("missing".into(), "x".into()),
            ("sku".into(), "seller_sku".into()),
        ]);
        assert_eq!(p.columns(), ["asin", "seller_sku"]);
        assert_eq!(p.get(0, "seller_sku"), Some(&Value::text("S")));
    }

    #[test]
    fn test_inferred_types_widen() {
        let mut t = Table::new(vec!["n".into(), "m".into(), "e".into()]);
        t.push_row(vec![Some(1i64.into()), Some(1i64.into()), None]);
        t.push_row(vec![Some(2.5f64.into()), Some("x".into()), None]);
        assert_eq!(t.inferred_types(), vec!["REAL", "TEXT", "TEXT"]);
    }
}
