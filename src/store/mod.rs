//! Storage seams used by the context resolver and the orchestrator.
//!
//! Two collaborators hold chapters:
//!
//! - [`UnitStore`]: the in-memory working set. Fast, synchronous, always
//!   the freshest copy of what the user is looking at.
//! - [`PersistentResolver`]: the durable counterpart. Slower, async, may lag
//!   behind memory. Owns the version history of translation results.
//!
//! [`MemoryUnitStore`] and [`SledResolver`] are the bundled implementations.

pub mod links;
pub mod memory;
pub mod sled_store;

pub use links::normalize_link;
pub use memory::MemoryUnitStore;
pub use sled_store::SledResolver;

use crate::core::errors::Result;
use crate::model::{OrdinalSource, TranslationResult, Unit};
use async_trait::async_trait;

/// In-memory unit lookups
pub trait UnitStore: Send + Sync {
    fn get_by_id(&self, id: &str) -> Option<Unit>;

    /// Unit at `ordinal`; a canonical ordinal wins over an inferred one
    fn get_by_ordinal(&self, ordinal: u32) -> Option<Unit>;

    /// Match `link` against the id and every locator of every unit
    fn get_by_link(&self, link: &str) -> Option<Unit>;

    /// Insert or replace a unit
    fn upsert(&self, unit: Unit);

    /// Copy of every loaded unit
    fn snapshot(&self) -> Vec<Unit>;

    /// Returns whether the ordinal was applied
    fn set_ordinal(&self, id: &str, ordinal: u32, source: OrdinalSource) -> bool;

    /// Returns false if the unit is not loaded
    fn attach_result(&self, id: &str, result: TranslationResult) -> bool;

    /// Attach `result` only if the unit has none yet, checked and written
    /// under one lock. Returns whether it was attached.
    fn attach_result_if_absent(&self, id: &str, result: TranslationResult) -> bool;
}

/// Durable unit and result lookups
#[async_trait]
pub trait PersistentResolver: Send + Sync {
    async fn find_by_ordinal(&self, ordinal: u32) -> Result<Option<Unit>>;

    async fn find_by_link(&self, link: &str) -> Result<Option<Unit>>;

    /// The result explicitly flagged active, if any
    async fn get_active_result(&self, unit_id: &str) -> Result<Option<TranslationResult>>;

    /// Every stored version, oldest first
    async fn list_result_versions(&self, unit_id: &str) -> Result<Vec<TranslationResult>>;

    /// Returns `Ok(false)` when the unit is unknown or the ordinal was not applied
    async fn set_ordinal(&self, unit_id: &str, ordinal: u32, source: OrdinalSource) -> Result<bool>;

    /// Store a new active version and return it with its version id
    async fn store_result(&self, unit_id: &str, result: TranslationResult) -> Result<TranslationResult>;

    /// Insert or replace the unit record. Any attached result is not stored.
    async fn put_unit(&self, unit: &Unit) -> Result<()>;
}

/// The authoritative prior result of a unit: the explicitly active version,
/// else the highest-numbered version on record.
pub async fn resolve_prior_result(
    resolver: &dyn PersistentResolver,
    unit_id: &str,
) -> Result<Option<TranslationResult>> {
    if let Some(active) = resolver.get_active_result(unit_id).await? {
        return Ok(Some(active));
    }
    let versions = resolver.list_result_versions(unit_id).await?;
    Ok(versions.into_iter().max_by_key(|r| r.version))
}
