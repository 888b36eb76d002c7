// Data pipeline: raw ingestion, then staging and warehouse processing

pub mod ingestion;
pub mod processing;

// Re-export the component of each stage
pub use ingestion::{IngestReport, Ingestor};
pub use processing::{DimensionMerger, FactRebuilder, Normalizer};
