//! Translation orchestration: credentials, admission, context, provider call
//! and write-back for one chapter at a time.

pub mod engine;
pub mod events;
pub mod provider;

pub use engine::{Orchestrator, RequestState, TranslationOutcome};
pub use events::{
    BufferingEventSink, CompositeEventSink, EventSink, LoggingEventSink, TranslationEvent, TranslationEventEnvelope,
};
pub use provider::{
    ApiKeyValidator, CredentialCheck, CredentialValidator, ProviderClient, ProviderError, ProviderOutput,
    TranslationRequest, TranslationSettings,
};
