//! Shared fixtures for the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chapterlane::core::errors::{ChapterlaneError, Result};
use chapterlane::model::{OrdinalSource, TranslationResult, Unit, UnitLinks};
use chapterlane::orchestrator::{
    CredentialCheck, CredentialValidator, ProviderClient, ProviderError, ProviderOutput, TranslationRequest,
    TranslationSettings,
};
use chapterlane::store::{PersistentResolver, SledResolver};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

pub const NOVEL: &str = "https://novel.example/book";

pub fn chapter_url(n: u32) -> String {
    format!("{}/chapter-{}", NOVEL, n)
}

/// Chapter `n` with links to its neighbours and no ordinal
pub fn chapter(n: u32) -> Unit {
    Unit::new(format!("c{}", n), format!("Chapter {}", n), format!("Original text of chapter {}", n)).with_links(
        UnitLinks {
            original_url: Some(chapter_url(n)),
            prev_url: (n > 1).then(|| chapter_url(n - 1)),
            next_url: Some(chapter_url(n + 1)),
            ..Default::default()
        },
    )
}

pub fn translation(n: u32) -> TranslationResult {
    TranslationResult::new(
        format!("Translated chapter {}", n),
        format!("Translated text of chapter {}", n),
        "openai",
        "gpt-4o-mini",
    )
}

/// Chapter `n` with canonical ordinal `n` and an attached translation
pub fn translated_chapter(n: u32) -> Unit {
    chapter(n).with_ordinal(n).with_result(translation(n))
}

/// Store `unit` and, optionally, one translation for it
pub async fn persist(resolver: &dyn PersistentResolver, unit: &Unit, translated: Option<TranslationResult>) {
    resolver.put_unit(unit).await.unwrap();
    if let Some(result) = translated {
        resolver.store_result(&unit.id, result).await.unwrap();
    }
}

pub fn settings() -> TranslationSettings {
    TranslationSettings::new("openai", "gpt-4o-mini").with_api_key("sk-test")
}

/// Poll `condition` until it holds or a second has passed
pub async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Persistent resolver that counts reads and can be made to fail or stall writes
pub struct InstrumentedResolver {
    inner: SledResolver,
    reads: AtomicUsize,
    fail_writes: AtomicBool,
    write_delay: Mutex<Option<Duration>>,
}

impl InstrumentedResolver {
    pub fn new() -> Self {
        Self {
            inner: SledResolver::temporary().unwrap(),
            reads: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
            write_delay: Mutex::new(None),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn reset_reads(&self) {
        self.reads.store(0, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn delay_writes(&self, delay: Duration) {
        *self.write_delay.lock() = Some(delay);
    }

    fn read(&self) {
        self.reads.fetch_add(1, Ordering::SeqCst);
    }

    async fn before_write(&self, operation: &str) -> Result<()> {
        let delay = *self.write_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ChapterlaneError::storage(
                operation,
                std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistentResolver for InstrumentedResolver {
    async fn find_by_ordinal(&self, ordinal: u32) -> Result<Option<Unit>> {
        self.read();
        self.inner.find_by_ordinal(ordinal).await
    }

    async fn find_by_link(&self, link: &str) -> Result<Option<Unit>> {
        self.read();
        self.inner.find_by_link(link).await
    }

    async fn get_active_result(&self, unit_id: &str) -> Result<Option<TranslationResult>> {
        self.read();
        self.inner.get_active_result(unit_id).await
    }

    async fn list_result_versions(&self, unit_id: &str) -> Result<Vec<TranslationResult>> {
        self.read();
        self.inner.list_result_versions(unit_id).await
    }

    async fn set_ordinal(&self, unit_id: &str, ordinal: u32, source: OrdinalSource) -> Result<bool> {
        self.before_write("set_ordinal").await?;
        self.inner.set_ordinal(unit_id, ordinal, source).await
    }

    async fn store_result(&self, unit_id: &str, result: TranslationResult) -> Result<TranslationResult> {
        self.before_write("store_result").await?;
        self.inner.store_result(unit_id, result).await
    }

    async fn put_unit(&self, unit: &Unit) -> Result<()> {
        self.before_write("put_unit").await?;
        self.inner.put_unit(unit).await
    }
}

/// Provider that echoes its input and can hold individual calls open
#[derive(Default)]
pub struct ScriptedProvider {
    requests: Mutex<Vec<TranslationRequest>>,
    log: Mutex<Vec<String>>,
    gates: DashMap<String, Arc<Notify>>,
    failures: DashMap<String, ProviderError>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next call for `unit_id` waits until [`ScriptedProvider::release`]
    pub fn hold(&self, unit_id: &str) {
        self.gates.insert(unit_id.to_string(), Arc::new(Notify::new()));
    }

    pub fn release(&self, unit_id: &str) {
        if let Some(gate) = self.gates.get(unit_id) {
            gate.notify_one();
        }
    }

    /// The next call for `unit_id` fails with `error`
    pub fn fail_next(&self, unit_id: &str, error: ProviderError) {
        self.failures.insert(unit_id.to_string(), error);
    }

    pub fn requests(&self) -> Vec<TranslationRequest> {
        self.requests.lock().clone()
    }

    /// `start <unit>` then `end <unit>` or `abort <unit>`, in call order
    pub fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }

    pub fn started(&self, unit_id: &str) -> bool {
        self.log.lock().iter().any(|line| line == &format!("start {}", unit_id))
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Bookkeeping that must survive the call future being dropped mid-flight
struct CallGuard<'a> {
    provider: &'a ScriptedProvider,
    unit_id: String,
    gate: Option<Arc<Notify>>,
    finished: bool,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.provider.in_flight.fetch_sub(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            self.provider
                .gates
                .remove_if(&self.unit_id, |_, current| Arc::ptr_eq(current, gate));
        }
        let verb = if self.finished { "end" } else { "abort" };
        self.provider.log.lock().push(format!("{} {}", verb, self.unit_id));
    }
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    async fn translate(
        &self,
        request: TranslationRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<ProviderOutput, ProviderError> {
        let unit_id = request.unit_id.clone();
        self.requests.lock().push(request.clone());
        self.log.lock().push(format!("start {}", unit_id));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let mut guard = CallGuard {
            provider: self,
            gate: self.gates.get(&unit_id).map(|gate| Arc::clone(gate.value())),
            unit_id: unit_id.clone(),
            finished: false,
        };

        let gate = guard.gate.clone();
        tokio::select! {
            _ = cancel.cancelled() => return Err(ProviderError::Aborted),
            _ = async {
                match gate {
                    Some(gate) => gate.notified().await,
                    None => tokio::time::sleep(Duration::from_millis(5)).await,
                }
            } => {}
        }

        guard.finished = true;
        match self.failures.remove(&unit_id) {
            Some((_, error)) => Err(error),
            None => Ok(ProviderOutput::new(
                format!("EN {}", request.title),
                format!("EN {}", request.content),
            )),
        }
    }
}

/// Validator with a fixed verdict
pub struct FixedValidator(pub CredentialCheck);

impl CredentialValidator for FixedValidator {
    fn validate(&self, _settings: &TranslationSettings) -> CredentialCheck {
        self.0.clone()
    }
}
