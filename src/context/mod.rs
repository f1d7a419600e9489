pub mod diagnostics;
pub mod resolver;

pub use diagnostics::{ContextDiagnostics, OrdinalDiagnosis, SlotStatus};
pub use resolver::{ContextResolution, ContextResolver, InferenceHandle, InferenceReport, TierUsage};
