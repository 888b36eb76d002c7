use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(
        "Could not resolve required column '{field}' (tried {candidates:?}). Available columns: {available:?}"
    )]
    UnresolvedColumn {
        field: String,
        candidates: Vec<String>,
        available: Vec<String>,
    },

    #[error("Table {table} is missing required columns {missing:?}. Found: {available:?}")]
    MissingColumns {
        table: String,
        missing: Vec<String>,
        available: Vec<String>,
    },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Delimited file error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),
}

impl PipelineError {
    /// True for the errors raised when a required column cannot be located.
    pub fn is_schema_error(&self) -> bool {
        matches!(
            self,
            PipelineError::UnresolvedColumn { .. } | PipelineError::MissingColumns { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
