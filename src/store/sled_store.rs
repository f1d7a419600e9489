//! sled-backed persistent resolver.
//!
//! Layout:
//!
//! | tree       | key                          | value                           |
//! |------------|------------------------------|---------------------------------|
//! | `units`    | unit id                      | zstd(bincode(Unit)), no result  |
//! | `ordinals` | ordinal, big-endian `u32`    | unit id                         |
//! | `links`    | normalized locator           | unit id                         |
//! | `results`  | `{unit id}\0{version:010}`   | zstd(bincode(TranslationResult))|

use crate::core::config::ChapterlaneConfig;
use crate::core::errors::{ChapterlaneError, Result};
use crate::model::{OrdinalSource, TranslationResult, Unit};
use crate::store::{normalize_link, PersistentResolver};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;

const UNITS_TREE: &str = "units";
const ORDINALS_TREE: &str = "ordinals";
const LINKS_TREE: &str = "links";
const RESULTS_TREE: &str = "results";

pub struct SledResolver {
    db: sled::Db,
    units: sled::Tree,
    ordinals: sled::Tree,
    links: sled::Tree,
    results: sled::Tree,
    compression_level: i32,
}

impl SledResolver {
    /// Open (or create) the database at `path`
    pub fn open(path: impl AsRef<Path>, config: &ChapterlaneConfig) -> Result<Self> {
        info!("Opening sled resolver at {:?}", path.as_ref());
        let db = sled::Config::new()
            .path(path.as_ref())
            .cache_capacity(config.db_cache_size)
            .open()?;
        Self::from_db(db, config.compression_level)
    }

    /// Open the database named by `config.db_path`
    pub fn from_config(config: &ChapterlaneConfig) -> Result<Self> {
        let path = config
            .db_path
            .as_ref()
            .ok_or_else(|| ChapterlaneError::configuration_field("db_path is not set", "db_path"))?;
        Self::open(path, config)
    }

    /// In-memory database removed on drop
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db, ChapterlaneConfig::development().compression_level)
    }

    fn from_db(db: sled::Db, compression_level: i32) -> Result<Self> {
        Ok(Self {
            units: db.open_tree(UNITS_TREE)?,
            ordinals: db.open_tree(ORDINALS_TREE)?,
            links: db.open_tree(LINKS_TREE)?,
            results: db.open_tree(RESULTS_TREE)?,
            db,
            compression_level,
        })
    }

    /// Flush pending writes
    pub async fn flush(&self) -> Result<()> {
        self.db.flush_async().await?;
        Ok(())
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        let raw = bincode::serialize(value)?;
        Ok(zstd::encode_all(&raw[..], self.compression_level)?)
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        let raw = zstd::decode_all(bytes)?;
        Ok(bincode::deserialize(&raw)?)
    }

    fn load_unit(&self, id: &[u8]) -> Result<Option<Unit>> {
        match self.units.get(id)? {
            Some(bytes) => Ok(Some(self.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write_unit(&self, unit: &Unit) -> Result<()> {
        let mut record = unit.clone();
        record.active_result = None;
        self.units.insert(unit.id.as_bytes(), self.encode(&record)?)?;
        Ok(())
    }

    /// Point `ordinal` at `unit_id` unless a canonical owner already holds it
    fn index_ordinal(&self, unit_id: &str, ordinal: u32, source: OrdinalSource) -> Result<()> {
        let key = ordinal.to_be_bytes();
        if source == OrdinalSource::Inferred {
            if let Some(owner) = self.ordinals.get(key)? {
                if owner.as_ref() != unit_id.as_bytes() {
                    if let Some(existing) = self.load_unit(&owner)? {
                        if existing.has_canonical_ordinal() && existing.ordinal == Some(ordinal) {
                            debug!(unit_id, ordinal, owner = %existing.id, "Ordinal held by canonical unit");
                            return Ok(());
                        }
                    }
                }
            }
        }
        self.ordinals.insert(key, unit_id.as_bytes())?;
        Ok(())
    }

    fn unindex_ordinal(&self, unit_id: &str, ordinal: u32) -> Result<()> {
        let key = ordinal.to_be_bytes();
        if let Some(owner) = self.ordinals.get(key)? {
            if owner.as_ref() == unit_id.as_bytes() {
                self.ordinals.remove(key)?;
            }
        }
        Ok(())
    }

    fn result_prefix(unit_id: &str) -> Vec<u8> {
        let mut prefix = unit_id.as_bytes().to_vec();
        prefix.push(0);
        prefix
    }

    fn result_key(unit_id: &str, version: u32) -> Vec<u8> {
        let mut key = Self::result_prefix(unit_id);
        key.extend_from_slice(format!("{:010}", version).as_bytes());
        key
    }

    fn scan_results(&self, unit_id: &str) -> Result<Vec<TranslationResult>> {
        let mut versions = Vec::new();
        for item in self.results.scan_prefix(Self::result_prefix(unit_id)) {
            let (_, bytes) = item?;
            versions.push(self.decode::<TranslationResult>(&bytes)?);
        }
        Ok(versions)
    }
}

#[async_trait]
impl PersistentResolver for SledResolver {
    async fn find_by_ordinal(&self, ordinal: u32) -> Result<Option<Unit>> {
        match self.ordinals.get(ordinal.to_be_bytes())? {
            Some(id) => self.load_unit(&id),
            None => Ok(None),
        }
    }

    async fn find_by_link(&self, link: &str) -> Result<Option<Unit>> {
        let Some(key) = normalize_link(link) else {
            return Ok(None);
        };
        if let Some(id) = self.links.get(key.as_bytes())? {
            return self.load_unit(&id);
        }
        // Ids double as locators
        self.load_unit(key.as_bytes())
    }

    async fn get_active_result(&self, unit_id: &str) -> Result<Option<TranslationResult>> {
        Ok(self
            .scan_results(unit_id)?
            .into_iter()
            .filter(|r| r.is_active)
            .max_by_key(|r| r.version))
    }

    async fn list_result_versions(&self, unit_id: &str) -> Result<Vec<TranslationResult>> {
        self.scan_results(unit_id)
    }

    async fn set_ordinal(&self, unit_id: &str, ordinal: u32, source: OrdinalSource) -> Result<bool> {
        let Some(mut unit) = self.load_unit(unit_id.as_bytes())? else {
            return Ok(false);
        };
        let previous = unit.ordinal;
        if !unit.apply_ordinal(ordinal, source) {
            return Ok(false);
        }
        if let Some(old) = previous.filter(|old| *old != ordinal) {
            self.unindex_ordinal(unit_id, old)?;
        }
        self.write_unit(&unit)?;
        self.index_ordinal(unit_id, ordinal, source)?;
        debug!(unit_id, ordinal, ?source, "Persisted ordinal");
        Ok(true)
    }

    async fn store_result(&self, unit_id: &str, result: TranslationResult) -> Result<TranslationResult> {
        let existing = self.scan_results(unit_id)?;
        let next_version = existing.iter().map(|r| r.version).max().unwrap_or(0) + 1;

        let mut batch = sled::Batch::default();
        for mut old in existing.into_iter().filter(|r| r.is_active) {
            old.is_active = false;
            batch.insert(Self::result_key(unit_id, old.version), self.encode(&old)?);
        }

        let mut stored = result;
        stored.version = next_version;
        stored.version_id = Some(Uuid::new_v4().to_string());
        stored.is_active = true;
        batch.insert(Self::result_key(unit_id, next_version), self.encode(&stored)?);

        self.results.apply_batch(batch)?;
        if self.units.get(unit_id.as_bytes())?.is_none() {
            warn!(unit_id, "Stored result for a unit with no persisted record");
        }
        debug!(unit_id, version = next_version, "Stored translation result");
        Ok(stored)
    }

    async fn put_unit(&self, unit: &Unit) -> Result<()> {
        if let Some(previous) = self.load_unit(unit.id.as_bytes())? {
            if let Some(old) = previous.ordinal.filter(|old| Some(*old) != unit.ordinal) {
                self.unindex_ordinal(&unit.id, old)?;
            }
        }
        self.write_unit(unit)?;
        if let (Some(ordinal), Some(source)) = (unit.ordinal, unit.ordinal_source) {
            self.index_ordinal(&unit.id, ordinal, source)?;
        }
        for locator in unit.links.locators().filter_map(normalize_link) {
            self.links.insert(locator.as_bytes(), unit.id.as_bytes())?;
        }
        Ok(())
    }
}
