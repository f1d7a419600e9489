// Ambient infrastructure
pub mod core;

// Domain
pub mod model;
pub mod store;

// Execution
pub mod context;
pub mod orchestrator;
pub mod queue;

// Re-exports for convenience
pub use crate::core::{init_tracing, ChapterlaneConfig, ChapterlaneError, Result};
pub use context::{ContextResolution, ContextResolver};
pub use model::{HistoricalContextEntry, OrdinalSource, TranslationResult, Unit, UnitLinks};
pub use orchestrator::{Orchestrator, ProviderClient, TranslationOutcome, TranslationSettings};
pub use queue::{CancellationRegistry, SequentialQueue};
pub use store::{MemoryUnitStore, PersistentResolver, SledResolver, UnitStore};
