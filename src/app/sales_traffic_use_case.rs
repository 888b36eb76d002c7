use crate::config::Layout;
use crate::entities::SALES_TRAFFIC_CHILD_ASIN_DAILY;
use crate::error::Result;
use crate::pipeline::processing::FactReport;
use crate::pipeline::FactRebuilder;
use crate::storage::Store;

/// Business report sales & traffic by child ASIN: staging history → daily
/// fact.
pub struct SalesTrafficUseCase {
    rebuilder: FactRebuilder,
}

impl SalesTrafficUseCase {
    pub fn new(rebuilder: FactRebuilder) -> Self {
        Self { rebuilder }
    }

    pub fn from_layout(layout: &Layout) -> Self {
        Self::new(FactRebuilder::new(
            layout.sales_traffic_staging(),
            layout.sales_traffic_fact(),
            SALES_TRAFFIC_CHILD_ASIN_DAILY,
        ))
    }

    pub fn build_fact(&self, store: &mut Store) -> Result<FactReport> {
        self.rebuilder.run(store)
    }
}
