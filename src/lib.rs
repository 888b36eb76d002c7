pub mod constants;
pub mod entities;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod schema;
pub mod storage;
pub mod table;

pub mod config;

// Application layer wiring configuration to pipeline components
pub mod app;

pub use error::{PipelineError, Result};
