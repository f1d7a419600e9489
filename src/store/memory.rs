use crate::model::{OrdinalSource, TranslationResult, Unit};
use crate::store::{normalize_link, UnitStore};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// DashMap-backed working set of loaded chapters
#[derive(Debug, Default, Clone)]
pub struct MemoryUnitStore {
    units: Arc<DashMap<String, Unit>>,
}

impl MemoryUnitStore {
    pub fn new() -> Self {
        Self {
            units: Arc::new(DashMap::new()),
        }
    }

    pub fn with_units(units: impl IntoIterator<Item = Unit>) -> Self {
        let store = Self::new();
        for unit in units {
            store.upsert(unit);
        }
        store
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

fn matches_link(unit: &Unit, wanted: &str) -> bool {
    if unit.id == wanted {
        return true;
    }
    unit.links
        .locators()
        .filter_map(normalize_link)
        .any(|candidate| candidate == wanted)
}

impl UnitStore for MemoryUnitStore {
    fn get_by_id(&self, id: &str) -> Option<Unit> {
        self.units.get(id).map(|entry| entry.value().clone())
    }

    fn get_by_ordinal(&self, ordinal: u32) -> Option<Unit> {
        let mut fallback = None;
        for entry in self.units.iter() {
            let unit = entry.value();
            if unit.ordinal != Some(ordinal) {
                continue;
            }
            if unit.has_canonical_ordinal() {
                return Some(unit.clone());
            }
            if fallback.is_none() {
                fallback = Some(unit.clone());
            }
        }
        fallback
    }

    fn get_by_link(&self, link: &str) -> Option<Unit> {
        let wanted = normalize_link(link)?;
        self.units
            .iter()
            .find(|entry| matches_link(entry.value(), &wanted))
            .map(|entry| entry.value().clone())
    }

    fn upsert(&self, unit: Unit) {
        debug!(unit_id = %unit.id, ordinal = ?unit.ordinal, "Upserting unit");
        self.units.insert(unit.id.clone(), unit);
    }

    fn snapshot(&self) -> Vec<Unit> {
        self.units.iter().map(|entry| entry.value().clone()).collect()
    }

    fn set_ordinal(&self, id: &str, ordinal: u32, source: OrdinalSource) -> bool {
        match self.units.get_mut(id) {
            Some(mut unit) => unit.apply_ordinal(ordinal, source),
            None => false,
        }
    }

    fn attach_result(&self, id: &str, result: TranslationResult) -> bool {
        match self.units.get_mut(id) {
            Some(mut unit) => {
                unit.active_result = Some(result);
                true
            }
            None => false,
        }
    }

    fn attach_result_if_absent(&self, id: &str, result: TranslationResult) -> bool {
        match self.units.get_mut(id) {
            Some(mut unit) if unit.active_result.is_none() => {
                unit.active_result = Some(result);
                true
            }
            _ => false,
        }
    }
}
