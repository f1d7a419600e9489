// Ambient infrastructure shared by every component

pub mod config;
pub mod errors;
pub mod logging;

// Re-export commonly used types
pub use config::{ChapterlaneConfig, ChapterlaneConfigBuilder};
pub use errors::{ChapterlaneError, Result};
pub use logging::init_tracing;
