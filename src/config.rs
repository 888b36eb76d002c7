use crate::constants::*;
use crate::error::{PipelineError, Result};
use crate::storage::TableRef;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Runtime configuration, read from the environment (and `.env` when the
/// binary loads one).
#[derive(Debug, Clone)]
pub struct Config {
    pub db_url: String,
    pub catalog_input_dir: PathBuf,
    pub layout: Layout,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_url = lookup(DB_URL_ENV)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                PipelineError::Configuration(format!("{} environment variable not set", DB_URL_ENV))
            })?;

        let catalog_input_dir = lookup(CATALOG_RAW_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CATALOG_RAW_DIR));

        let layout = match lookup(LAYOUT_FILE_ENV) {
            Some(path) => Layout::load(&path)?,
            None => Layout::default(),
        };

        Ok(Self {
            db_url,
            catalog_input_dir,
            layout,
        })
    }
}

/// Log directory. Read on its own so logging can start before the rest of
/// the configuration is validated.
pub fn log_dir() -> PathBuf {
    env::var(LOG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_LOG_DIR))
}

/// Namespace and table names for every pipeline. Components receive their
/// [`TableRef`]s from here at construction.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Layout {
    pub namespaces: Namespaces,
    pub tables: TableNames,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct Namespaces {
    pub raw: String,
    pub staging: String,
    pub warehouse: String,
}

impl Default for Namespaces {
    fn default() -> Self {
        Self {
            raw: "raw".to_string(),
            staging: "staging".to_string(),
            warehouse: "warehouse".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TableNames {
    pub catalog_raw: String,
    pub catalog_staging: String,
    pub sku_asin_dimension: String,
    pub sales_traffic_staging: String,
    pub sales_traffic_fact: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            catalog_raw: "raw_amazon_catalog_listings_sku_asin_snapshot".to_string(),
            catalog_staging: "stg_amazon_catalog_listings_sku_asin_snapshot".to_string(),
            sku_asin_dimension: "dim_amazon_sku_asin_current".to_string(),
            sales_traffic_staging: "stg_amazon_business_reports_sales_traffic_child_asin_daily"
                .to_string(),
            sales_traffic_fact: "fct_amazon_business_reports_sales_traffic_child_asin_daily"
                .to_string(),
        }
    }
}

impl Layout {
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Configuration(format!("Failed to read layout file '{}': {}", path, e))
        })?;
        let layout: Layout = toml::from_str(&content)?;
        Ok(layout)
    }

    pub fn namespace_names(&self) -> [&str; 3] {
        [
            &self.namespaces.raw,
            &self.namespaces.staging,
            &self.namespaces.warehouse,
        ]
    }

    pub fn catalog_raw(&self) -> TableRef {
        TableRef::new(&self.namespaces.raw, &self.tables.catalog_raw)
    }

    pub fn catalog_staging(&self) -> TableRef {
        TableRef::new(&self.namespaces.staging, &self.tables.catalog_staging)
    }

    pub fn sku_asin_dimension(&self) -> TableRef {
        TableRef::new(&self.namespaces.warehouse, &self.tables.sku_asin_dimension)
    }

    pub fn sales_traffic_staging(&self) -> TableRef {
        TableRef::new(&self.namespaces.staging, &self.tables.sales_traffic_staging)
    }

    pub fn sales_traffic_fact(&self) -> TableRef {
        TableRef::new(&self.namespaces.warehouse, &self.tables.sales_traffic_fact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars = vars(pairs);
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_missing_db_url_is_a_configuration_error() {
        let err = config_from(&[(CATALOG_RAW_DIR_ENV, "/in")]).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
        assert!(err.to_string().contains(DB_URL_ENV));
    }

    #[test]
    fn test_blank_db_url_is_a_configuration_error() {
        for blank in ["", "   "] {
            let err = config_from(&[(DB_URL_ENV, blank)]).unwrap_err();
            assert!(matches!(err, PipelineError::Configuration(_)));
        }
    }

    #[test]
    fn test_defaults_apply_when_only_db_url_is_set() {
        let config = config_from(&[(DB_URL_ENV, "sqlite::memory:")]).unwrap();
        assert_eq!(config.db_url, "sqlite::memory:");
        assert_eq!(config.catalog_input_dir, PathBuf::from(DEFAULT_CATALOG_RAW_DIR));
        assert_eq!(config.layout, Layout::default());
    }

    #[test]
    fn test_layout_file_is_loaded_and_unreadable_one_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layout.toml");
        fs::write(&path, "[namespaces]\nraw = \"raw_test\"\n").unwrap();
        let path = path.to_string_lossy().into_owned();

        let config = config_from(&[(DB_URL_ENV, "wh.db"), (LAYOUT_FILE_ENV, &path)]).unwrap();
        assert_eq!(config.layout.namespaces.raw, "raw_test");

        let missing = dir.path().join("nope.toml").to_string_lossy().into_owned();
        let err = config_from(&[(DB_URL_ENV, "wh.db"), (LAYOUT_FILE_ENV, &missing)]).unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(_)));
    }

    #[test]
    fn test_partial_layout_file_keeps_defaults() {
        let layout: Layout = toml::from_str(
            r#"
            [namespaces]
            staging = "stg_test"

            [tables]
            sku_asin_dimension = "dim_test"
            "#,
        )
        .unwrap();
        assert_eq!(layout.namespaces.raw, "raw");
        assert_eq!(layout.catalog_staging().schema, "stg_test");
        assert_eq!(layout.sku_asin_dimension().name, "dim_test");
        assert_eq!(
            layout.tables.catalog_raw,
            TableNames::default().catalog_raw
        );
    }
}
