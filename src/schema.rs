//! Column-name canonicalization and candidate-based field resolution.
//!
//! Marketplace extracts spell the same header many ways ("Seller SKU",
//! "seller-sku", "sku"). Every entity declares its logical fields as a
//! [`FieldSpec`] list, and resolution runs against an explicit set of
//! available column names.

use crate::error::{PipelineError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use tracing::warn;

static NON_WORD_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w]+").unwrap());
static UNDERSCORE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"_+").unwrap());

/// Canonical snake_case form of a column name.
pub fn canonicalize(name: &str) -> String {
    let name = name.trim();
    let name = NON_WORD_RUN.replace_all(name, "_");
    let name = UNDERSCORE_RUN.replace_all(&name, "_");
    name.trim_matches('_').to_lowercase()
}

/// Canonicalize a list of column names. When two source columns collapse to
/// the same canonical name only the first keeps it; later ones are returned
/// as `None` so callers can drop them.
pub fn canonicalize_columns(columns: &[String]) -> Vec<Option<String>> {
    let mut seen = HashSet::new();
    columns
        .iter()
        .map(|c| {
            let canonical = canonicalize(c);
            if seen.insert(canonical.clone()) {
                Some(canonical)
            } else {
                warn!(
                    "Column '{}' canonicalizes to '{}' which is already taken; ignoring it",
                    c, canonical
                );
                None
            }
        })
        .collect()
}

/// One logical field of an entity and the source spellings accepted for it.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    pub logical_name: &'static str,
    /// Column name written to the next layer.
    pub output_name: &'static str,
    pub required: bool,
    /// Ordered; the first candidate present wins.
    pub candidates: &'static [&'static str],
}

impl FieldSpec {
    pub const fn required(
        logical_name: &'static str,
        output_name: &'static str,
        candidates: &'static [&'static str],
    ) -> Self {
        Self {
            logical_name,
            output_name,
            required: true,
            candidates,
        }
    }

    pub const fn optional(
        logical_name: &'static str,
        output_name: &'static str,
        candidates: &'static [&'static str],
    ) -> Self {
        Self {
            logical_name,
            output_name,
            required: false,
            candidates,
        }
    }

    /// Find the first candidate present in `available` (already canonical).
    pub fn find(&self, available: &[String]) -> Option<String> {
        self.candidates
            .iter()
            .map(|c| canonicalize(c))
            .find(|c| available.iter().any(|a| a == c))
    }

    /// Like [`FieldSpec::find`], but a miss is a schema error.
    pub fn find_required(&self, available: &[String]) -> Result<String> {
        self.find(available)
            .ok_or_else(|| self.unresolved(available))
    }

    fn unresolved(&self, available: &[String]) -> PipelineError {
        PipelineError::UnresolvedColumn {
            field: self.logical_name.to_string(),
            candidates: self.candidates.iter().map(|c| c.to_string()).collect(),
            available: available.to_vec(),
        }
    }
}

/// A field that resolved to a concrete source column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedField {
    pub source: String,
    pub output: String,
    pub required: bool,
}

/// Outcome of resolving an entity's fields against the available columns.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub fields: Vec<ResolvedField>,
    /// Optional fields with no matching column this run.
    pub unresolved_optional: Vec<String>,
}

impl Resolution {
    /// `(source, output)` pairs in declaration order.
    pub fn mapping(&self) -> Vec<(String, String)> {
        self.fields
            .iter()
            .map(|f| (f.source.clone(), f.output.clone()))
            .collect()
    }

    pub fn source_for(&self, output: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.output == output)
            .map(|f| f.source.as_str())
    }
}

/// Resolve every field. Fails on the first required field that is missing,
/// before any data is written.
pub fn resolve(fields: &[FieldSpec], available: &[String]) -> Result<Resolution> {
    let mut resolution = Resolution::default();
    for spec in fields {
        match spec.find(available) {
            Some(source) => resolution.fields.push(ResolvedField {
                source,
                output: spec.output_name.to_string(),
                required: spec.required,
            }),
            None if spec.required => return Err(spec.unresolved(available)),
            None => resolution
                .unresolved_optional
                .push(spec.logical_name.to_string()),
        }
    }
    Ok(resolution)
}
