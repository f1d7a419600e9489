use crate::context::{ContextDiagnostics, ContextResolver};
use crate::core::config::ChapterlaneConfig;
use crate::core::errors::ChapterlaneError;
use crate::model::TranslationResult;
use crate::orchestrator::events::{EventSink, TranslationEvent, TranslationEventEnvelope};
use crate::orchestrator::provider::{
    ApiKeyValidator, CredentialValidator, ProviderClient, ProviderError, ProviderOutput, TranslationRequest,
    TranslationSettings,
};
use crate::queue::{CancellationRegistry, QueueSlot, SequentialQueue, UnitLease};
use crate::store::{resolve_prior_result, PersistentResolver, UnitStore};
use dashmap::DashMap;
use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Final outcome of a translation request. Cancellation is not an error.
#[derive(Debug)]
pub enum TranslationOutcome {
    Completed(TranslationResult),
    Aborted,
    Failed(ChapterlaneError),
}

impl TranslationOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TranslationOutcome::Completed(_))
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, TranslationOutcome::Aborted)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TranslationOutcome::Failed(_))
    }

    pub fn result(&self) -> Option<&TranslationResult> {
        match self {
            TranslationOutcome::Completed(result) => Some(result),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ChapterlaneError> {
        match self {
            TranslationOutcome::Failed(error) => Some(error),
            _ => None,
        }
    }

    pub fn state(&self) -> RequestState {
        match self {
            TranslationOutcome::Completed(_) => RequestState::Completed,
            TranslationOutcome::Aborted => RequestState::Aborted,
            TranslationOutcome::Failed(_) => RequestState::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestState {
    Queued,
    Running,
    Completed,
    Aborted,
    Failed,
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Completed | RequestState::Aborted | RequestState::Failed
        )
    }
}

/// A request that passed the pre-queue checks and holds its queue slot
struct Admission {
    request_id: String,
    started: Instant,
    settings: TranslationSettings,
    lease: UnitLease,
    slot: QueueSlot,
}

#[derive(Debug, Clone)]
struct RequestRecord {
    request_id: String,
    state: RequestState,
}

/// Drives a chapter from request to stored translation.
///
/// Requests run one at a time across all units, in submission order. A new
/// request for a unit cancels the previous one for that unit.
#[derive(Clone)]
pub struct Orchestrator {
    config: ChapterlaneConfig,
    units: Arc<dyn UnitStore>,
    persistent: Arc<dyn PersistentResolver>,
    provider: Arc<dyn ProviderClient>,
    credentials: Arc<dyn CredentialValidator>,
    resolver: ContextResolver,
    registry: CancellationRegistry,
    queue: SequentialQueue,
    settings: Arc<RwLock<TranslationSettings>>,
    requests: Arc<DashMap<String, RequestRecord>>,
    event_sink: Option<Arc<dyn EventSink>>,
}

impl Orchestrator {
    pub fn new(
        config: ChapterlaneConfig,
        units: Arc<dyn UnitStore>,
        persistent: Arc<dyn PersistentResolver>,
        provider: Arc<dyn ProviderClient>,
    ) -> Self {
        let resolver = ContextResolver::new(units.clone(), persistent.clone())
            .with_ordinal_inference(config.infer_ordinals);
        Self {
            config,
            units,
            persistent,
            provider,
            credentials: Arc::new(ApiKeyValidator::new()),
            resolver,
            registry: CancellationRegistry::new(),
            queue: SequentialQueue::new(),
            settings: Arc::new(RwLock::new(TranslationSettings::default())),
            requests: Arc::new(DashMap::new()),
            event_sink: None,
        }
    }

    pub fn with_credential_validator(mut self, validator: Arc<dyn CredentialValidator>) -> Self {
        self.credentials = validator;
        self
    }

    pub fn with_settings(self, settings: TranslationSettings) -> Self {
        *self.settings.write() = settings;
        self
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = Some(sink);
        self
    }

    pub fn config(&self) -> &ChapterlaneConfig {
        &self.config
    }

    pub fn settings(&self) -> TranslationSettings {
        self.settings.read().clone()
    }

    /// Applies to requests that start after this call
    pub fn update_settings(&self, settings: TranslationSettings) {
        info!(provider = %settings.provider, model = %settings.model, "Translation settings updated");
        *self.settings.write() = settings;
    }

    /// Cancel the in-flight request for `unit_id`, if any
    pub fn cancel(&self, unit_id: &str) -> bool {
        self.registry.cancel_unit(unit_id)
    }

    pub fn is_translating(&self, unit_id: &str) -> bool {
        self.registry.is_active(unit_id)
    }

    pub fn active_units(&self) -> HashSet<String> {
        self.registry.active_ids()
    }

    /// State of the most recent request for `unit_id`
    pub fn request_state(&self, unit_id: &str) -> Option<RequestState> {
        self.requests.get(unit_id).map(|record| record.state)
    }

    /// Translate one unit.
    ///
    /// Credentials are checked, the unit looked up, any in-flight request for
    /// it cancelled and the queue slot taken before this returns, so the order
    /// of `translate` calls is the execution order. Credential and lookup
    /// failures resolve without ever entering the queue.
    ///
    /// An admitted request runs on its own task; the returned future only
    /// waits for its outcome. Dropping it does not cancel the request, use
    /// [`Orchestrator::cancel`] for that. Must be called within a tokio runtime.
    pub fn translate(&self, unit_id: &str) -> BoxFuture<'static, TranslationOutcome> {
        let unit_id = unit_id.to_string();
        match self.admit(&unit_id) {
            Ok(admission) => {
                let this = self.clone();
                let handle = tokio::spawn(async move { this.execute(&unit_id, admission).await });
                async move {
                    handle.await.unwrap_or_else(|e| {
                        warn!(error = %e, "Translation task did not finish");
                        TranslationOutcome::Failed(ChapterlaneError::internal(format!(
                            "translation task failed: {}",
                            e
                        )))
                    })
                }
                .boxed()
            }
            Err(outcome) => future::ready(outcome).boxed(),
        }
    }

    fn admit(&self, unit_id: &str) -> Result<Admission, TranslationOutcome> {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let settings = self.settings();

        let check = self.credentials.validate(&settings);
        if !check.valid {
            let message = check.message.unwrap_or_else(|| "credentials rejected".to_string());
            warn!(unit_id, provider = %settings.provider, "Credential check failed: {}", message);
            let error = ChapterlaneError::credentials(settings.provider.clone(), message);
            return Err(self.finish(&request_id, unit_id, started, TranslationOutcome::Failed(error)));
        }

        if self.units.get_by_id(unit_id).is_none() {
            let error = ChapterlaneError::unit_not_found(unit_id);
            return Err(self.finish(&request_id, unit_id, started, TranslationOutcome::Failed(error)));
        }

        let lease = self.registry.begin_unit(unit_id);
        let slot = self.queue.admit();
        self.transition(
            &request_id,
            unit_id,
            RequestState::Queued,
            TranslationEvent::Queued {
                unit_id: unit_id.to_string(),
                ticket: slot.ticket(),
            },
        );
        debug!(unit_id, request_id = %request_id, ticket = slot.ticket(), "Request queued");

        Ok(Admission {
            request_id,
            started,
            settings,
            lease,
            slot,
        })
    }

    async fn execute(&self, unit_id: &str, admission: Admission) -> TranslationOutcome {
        let Admission {
            request_id,
            started,
            settings,
            lease,
            slot,
        } = admission;

        let _turn = tokio::select! {
            biased;
            _ = lease.token().cancelled() => {
                debug!(unit_id, request_id = %request_id, "Cancelled while queued");
                return self.finish(&request_id, unit_id, started, TranslationOutcome::Aborted);
            }
            turn = slot.ready() => turn,
        };

        let outcome = self.run(&request_id, unit_id, &settings, &lease).await;
        self.finish(&request_id, unit_id, started, outcome)
    }

    async fn run(
        &self,
        request_id: &str,
        unit_id: &str,
        settings: &TranslationSettings,
        lease: &UnitLease,
    ) -> TranslationOutcome {
        if lease.is_cancelled() {
            return TranslationOutcome::Aborted;
        }
        self.transition(
            request_id,
            unit_id,
            RequestState::Running,
            TranslationEvent::Running {
                unit_id: unit_id.to_string(),
            },
        );

        // Re-read: the unit may have been edited while queued
        let Some(unit) = self.units.get_by_id(unit_id) else {
            return TranslationOutcome::Failed(ChapterlaneError::unit_not_found(unit_id));
        };

        let depth = self.config.context_depth.min(self.config.max_context_depth);
        let resolution = self.resolver.resolve_context(&unit, depth).await;
        self.emit(
            request_id,
            TranslationEvent::ContextResolved {
                unit_id: unit_id.to_string(),
                entries: resolution.entries.len(),
                memory: resolution.usage.memory,
                persistent: resolution.usage.persistent,
                chain: resolution.usage.chain,
            },
        );
        if resolution.is_empty() && depth > 0 && unit.ordinal.is_some() {
            if let Some(report) =
                ContextDiagnostics::collect(self.units.as_ref(), self.persistent.as_ref(), &unit, depth).await
            {
                report.log();
                self.emit(
                    request_id,
                    TranslationEvent::ContextMissing {
                        unit_id: unit_id.to_string(),
                        ordinal: report.ordinal,
                        summary: report.summary(),
                    },
                );
            }
        }

        if lease.is_cancelled() {
            return TranslationOutcome::Aborted;
        }

        let prior = match unit.active_result.clone() {
            Some(result) => Some(result),
            None => resolve_prior_result(self.persistent.as_ref(), unit_id)
                .await
                .unwrap_or_else(|e| {
                    debug!(unit_id, error = %e, "Prior result lookup failed");
                    None
                }),
        };

        let request = TranslationRequest {
            request_id: request_id.to_string(),
            unit_id: unit_id.to_string(),
            title: unit.title.clone(),
            content: unit.content.clone(),
            settings: settings.clone(),
            history: resolution.entries,
            prior,
            max_retries: self.config.max_retries,
            timeout: self.config.provider_timeout(),
        };

        let output = match self.call_provider(request, lease).await {
            Ok(output) => output,
            Err(outcome) => return outcome,
        };
        if lease.is_cancelled() {
            debug!(unit_id, request_id, "Cancelled after provider returned, discarding output");
            return TranslationOutcome::Aborted;
        }

        let result = TranslationResult::new(
            output.translated_title,
            output.translated_content,
            settings.provider.clone(),
            output.model.unwrap_or_else(|| settings.model.clone()),
        );
        TranslationOutcome::Completed(self.write_back(unit_id, result).await)
    }

    async fn call_provider(
        &self,
        request: TranslationRequest,
        lease: &UnitLease,
    ) -> Result<ProviderOutput, TranslationOutcome> {
        let provider = request.settings.provider.clone();
        let timeout = request.timeout;
        let token = lease.token().clone();

        let response = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(TranslationOutcome::Aborted),
            response = tokio::time::timeout(timeout, self.provider.translate(request, lease.token().clone())) => response,
        };

        match response {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(ProviderError::Aborted)) => Err(TranslationOutcome::Aborted),
            Ok(Err(_)) if lease.is_cancelled() => Err(TranslationOutcome::Aborted),
            Ok(Err(e)) => Err(TranslationOutcome::Failed(ChapterlaneError::provider_with_source(
                provider,
                e.to_string(),
                e,
            ))),
            Err(_) => Err(TranslationOutcome::Failed(ChapterlaneError::timeout(
                "provider_translate",
                timeout.as_millis() as u64,
            ))),
        }
    }

    /// Store the result durably and attach it in memory. Storage failures
    /// are logged; the caller still gets the fresh result.
    async fn write_back(&self, unit_id: &str, result: TranslationResult) -> TranslationResult {
        let stored = match self.persistent.store_result(unit_id, result.clone()).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(unit_id, error = %e, "Failed to persist translation result");
                result
            }
        };
        if !self.units.attach_result(unit_id, stored.clone()) {
            debug!(unit_id, "Unit no longer loaded, result kept in store only");
        }
        stored
    }

    fn finish(
        &self,
        request_id: &str,
        unit_id: &str,
        started: Instant,
        outcome: TranslationOutcome,
    ) -> TranslationOutcome {
        let duration_ms = started.elapsed().as_millis() as u64;
        let event = match &outcome {
            TranslationOutcome::Completed(result) => {
                info!(unit_id, request_id, version = result.version, duration_ms, "Translation completed");
                TranslationEvent::Completed {
                    unit_id: unit_id.to_string(),
                    version: result.version,
                    duration_ms,
                }
            }
            TranslationOutcome::Aborted => {
                info!(unit_id, request_id, "Translation aborted");
                TranslationEvent::Aborted {
                    unit_id: unit_id.to_string(),
                }
            }
            TranslationOutcome::Failed(error) => {
                warn!(unit_id, request_id, category = error.category(), "Translation failed: {}", error);
                TranslationEvent::Failed {
                    unit_id: unit_id.to_string(),
                    category: error.category().to_string(),
                    message: error.to_string(),
                }
            }
        };
        self.transition(request_id, unit_id, outcome.state(), event);
        outcome
    }

    fn transition(&self, request_id: &str, unit_id: &str, state: RequestState, event: TranslationEvent) {
        let record = RequestRecord {
            request_id: request_id.to_string(),
            state,
        };
        match state {
            // A new request takes the slot over
            RequestState::Queued => {
                self.requests.insert(unit_id.to_string(), record);
            }
            _ => {
                let mut entry = self.requests.entry(unit_id.to_string()).or_insert_with(|| record.clone());
                // Superseded requests finishing late leave the newer record alone
                if entry.request_id == request_id {
                    entry.state = state;
                }
            }
        }
        self.emit(request_id, event);
    }

    fn emit(&self, request_id: &str, event: TranslationEvent) {
        if let Some(sink) = &self.event_sink {
            sink.emit(&TranslationEventEnvelope::new(request_id, event));
        }
    }
}
