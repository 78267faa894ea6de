pub mod daemon;
pub mod error;
pub mod gates;
pub mod memory;
pub mod pipeline;
pub mod provider;
pub mod rolling;
pub mod store;

pub mod test_support;

pub use daemon::RefreshDaemon;
pub use error::PipelineError;
pub use pipeline::{PipelineOutcome, ValidatedBundle, ValidationPipeline};
pub use provider::MarketDataProvider;
pub use store::MarketStore;
