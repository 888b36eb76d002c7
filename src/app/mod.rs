pub mod catalog_use_case;
pub mod sales_traffic_use_case;

pub use catalog_use_case::{CatalogRunReport, CatalogUseCase};
pub use sales_traffic_use_case::SalesTrafficUseCase;
