use crate::config::Config;
use crate::entities::{CATALOG_LISTINGS, CATALOG_LISTINGS_SOURCE, SKU_ASIN_DIMENSION};
use crate::error::Result;
use crate::pipeline::processing::{MergeReport, NormalizeReport};
use crate::pipeline::{DimensionMerger, IngestReport, Ingestor, Normalizer};
use crate::storage::Store;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Catalog listings vertical: raw load → staging snapshot → SKU/ASIN
/// dimension. Each step can run alone or all three in order.
pub struct CatalogUseCase {
    ingestor: Ingestor,
    normalizer: Normalizer,
    merger: DimensionMerger,
    input_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogRunReport {
    pub ingest: IngestReport,
    pub staging: NormalizeReport,
    pub dimension: MergeReport,
}

impl CatalogUseCase {
    pub fn new(
        ingestor: Ingestor,
        normalizer: Normalizer,
        merger: DimensionMerger,
        input_dir: PathBuf,
    ) -> Self {
        Self {
            ingestor,
            normalizer,
            merger,
            input_dir,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let layout = &config.layout;
        Self::new(
            Ingestor::new(layout.catalog_raw(), CATALOG_LISTINGS_SOURCE),
            Normalizer::new(layout.catalog_raw(), layout.catalog_staging(), CATALOG_LISTINGS),
            DimensionMerger::new(
                layout.catalog_staging(),
                layout.sku_asin_dimension(),
                SKU_ASIN_DIMENSION,
            ),
            config.catalog_input_dir.clone(),
        )
    }

    /// Load `file`, or the newest extract in the input directory.
    pub fn load_raw(&self, store: &mut Store, file: Option<&Path>) -> Result<IngestReport> {
        match file {
            Some(path) => self.ingestor.load_file(store, path),
            None => self.ingestor.load_latest(store, &self.input_dir),
        }
    }

    pub fn stage(&self, store: &mut Store) -> Result<NormalizeReport> {
        self.normalizer.run(store)
    }

    pub fn merge_dimension(&self, store: &mut Store) -> Result<MergeReport> {
        self.merger.merge(store)
    }

    /// All three steps in dependency order; the first failure aborts.
    pub fn run(&self, store: &mut Store, file: Option<&Path>) -> Result<CatalogRunReport> {
        let ingest = self.load_raw(store, file)?;
        let staging = self.stage(store)?;
        let dimension = self.merge_dimension(store)?;
        Ok(CatalogRunReport {
            ingest,
            staging,
            dimension,
        })
    }
}
