// Staging, dimension and fact transforms

pub mod dimension;
pub mod fact;
pub mod normalizer;

pub use dimension::{DimensionMerger, MergeReport};
pub use fact::{FactRebuilder, FactReport};
pub use normalizer::{NormalizeReport, Normalizer};
