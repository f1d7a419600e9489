use crate::context::resolver::target_ordinals;
use crate::model::Unit;
use crate::store::{resolve_prior_result, PersistentResolver, UnitStore};
use serde::Serialize;
use std::fmt;
use tracing::warn;

/// Why a chapter slot could or could not feed context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SlotStatus {
    Absent,
    EmptyContent,
    MissingResult,
    Usable,
    /// The lookup itself failed
    Unavailable,
}

impl fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SlotStatus::Absent => "absent",
            SlotStatus::EmptyContent => "empty-content",
            SlotStatus::MissingResult => "missing-result",
            SlotStatus::Usable => "usable",
            SlotStatus::Unavailable => "unavailable",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrdinalDiagnosis {
    pub ordinal: u32,
    pub memory: SlotStatus,
    pub persistent: SlotStatus,
}

/// Advisory report built when a known-ordinal chapter got no context at all
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContextDiagnostics {
    pub unit_id: String,
    pub ordinal: u32,
    pub depth: usize,
    pub slots: Vec<OrdinalDiagnosis>,
}

impl ContextDiagnostics {
    /// Inspect both stores for every ordinal the target wanted.
    ///
    /// Returns `None` when there is nothing to diagnose.
    pub async fn collect(
        units: &dyn UnitStore,
        persistent: &dyn PersistentResolver,
        target: &Unit,
        depth: usize,
    ) -> Option<Self> {
        let ordinal = target.ordinal?;
        let wanted = target_ordinals(ordinal, depth);
        if wanted.is_empty() {
            return None;
        }

        let mut slots = Vec::with_capacity(wanted.len());
        for candidate in wanted {
            let memory = match units.get_by_ordinal(candidate) {
                None => SlotStatus::Absent,
                Some(unit) if !unit.has_content() => SlotStatus::EmptyContent,
                Some(unit) if unit.active_result.is_none() => SlotStatus::MissingResult,
                Some(_) => SlotStatus::Usable,
            };
            let persistent = persistent_status(persistent, candidate).await;
            slots.push(OrdinalDiagnosis {
                ordinal: candidate,
                memory,
                persistent,
            });
        }

        Some(Self {
            unit_id: target.id.clone(),
            ordinal,
            depth,
            slots,
        })
    }

    /// One line per missing ordinal, e.g. `#9 memory=absent persistent=missing-result`
    pub fn summary(&self) -> String {
        self.slots
            .iter()
            .map(|slot| format!("#{} memory={} persistent={}", slot.ordinal, slot.memory, slot.persistent))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub fn log(&self) {
        warn!(
            unit_id = %self.unit_id,
            ordinal = self.ordinal,
            depth = self.depth,
            slots = %self.summary(),
            "No historical context resolved"
        );
    }
}

async fn persistent_status(persistent: &dyn PersistentResolver, ordinal: u32) -> SlotStatus {
    let unit = match persistent.find_by_ordinal(ordinal).await {
        Ok(Some(unit)) => unit,
        Ok(None) => return SlotStatus::Absent,
        Err(_) => return SlotStatus::Unavailable,
    };
    if !unit.has_content() {
        return SlotStatus::EmptyContent;
    }
    match resolve_prior_result(persistent, &unit.id).await {
        Ok(Some(_)) => SlotStatus::Usable,
        Ok(None) => SlotStatus::MissingResult,
        Err(_) => SlotStatus::Unavailable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TranslationResult;
    use crate::store::{MemoryUnitStore, SledResolver};

    #[tokio::test]
    async fn test_reports_status_per_ordinal() {
        let memory = MemoryUnitStore::with_units(vec![
            Unit::new("c8", "Chapter 8", "").with_ordinal(8),
            Unit::new("c10", "Chapter 10", "text").with_ordinal(10),
        ]);
        let persistent = SledResolver::temporary().unwrap();
        persistent
            .put_unit(&Unit::new("c9", "Chapter 9", "text").with_ordinal(9))
            .await
            .unwrap();
        persistent
            .put_unit(&Unit::new("c8", "Chapter 8", "text").with_ordinal(8))
            .await
            .unwrap();
        persistent
            .store_result("c8", TranslationResult::new("T8", "eight", "p", "m"))
            .await
            .unwrap();

        let target = memory.get_by_id("c10").unwrap();
        let report = ContextDiagnostics::collect(&memory, &persistent, &target, 2)
            .await
            .unwrap();

        assert_eq!(
            report.slots,
            vec![
                OrdinalDiagnosis {
                    ordinal: 8,
                    memory: SlotStatus::EmptyContent,
                    persistent: SlotStatus::Usable,
                },
                OrdinalDiagnosis {
                    ordinal: 9,
                    memory: SlotStatus::Absent,
                    persistent: SlotStatus::MissingResult,
                },
            ]
        );
        assert_eq!(
            report.summary(),
            "#8 memory=empty-content persistent=usable; #9 memory=absent persistent=missing-result"
        );
    }

    #[tokio::test]
    async fn test_nothing_to_diagnose_without_ordinal() {
        let memory = MemoryUnitStore::new();
        let persistent = SledResolver::temporary().unwrap();
        let target = Unit::new("c1", "Chapter 1", "text");

        assert!(ContextDiagnostics::collect(&memory, &persistent, &target, 2).await.is_none());
        let first = Unit::new("c1", "Chapter 1", "text").with_ordinal(1);
        assert!(ContextDiagnostics::collect(&memory, &persistent, &first, 2).await.is_none());
    }
}
