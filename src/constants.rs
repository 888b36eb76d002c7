/// Environment variable names and fixed column names shared across the pipelines.

// Configuration variables
pub const DB_URL_ENV: &str = "DB_URL";
pub const CATALOG_RAW_DIR_ENV: &str = "AMZ_CATALOG_LISTINGS_RAW_DIR";
pub const LAYOUT_FILE_ENV: &str = "WAREHOUSE_LAYOUT_FILE";
pub const LOG_DIR_ENV: &str = "LOG_DIR";

pub const DEFAULT_CATALOG_RAW_DIR: &str =
    "data/raw/input/amazon/catalog/listings_sku_asin_snapshot_monthly";
pub const DEFAULT_LOG_DIR: &str = "logs";

// Provenance columns stamped on every raw row
pub const LOAD_ID: &str = "load_id";
pub const LOAD_TS: &str = "load_ts";
pub const SOURCE_FILE: &str = "source_file";

pub const PROVENANCE_COLUMNS: [&str; 3] = [LOAD_ID, LOAD_TS, SOURCE_FILE];

/// Dimension bookkeeping column
pub const UPDATED_AT: &str = "updated_at";

/// Suffix of the shadow table written before an atomic swap
pub const SHADOW_SUFFIX: &str = "__shadow";

/// Suffix of the per-generation header manifest kept beside a raw table
pub const COLUMNS_SUFFIX: &str = "__columns";
pub const COLUMN_NAME: &str = "column_name";
pub const ORDINAL: &str = "ordinal";

/// Literal strings that key normalization treats as missing
pub const NULL_LITERALS: [&str; 3] = ["", "nan", "None"];
