//! Historical context resolution.
//!
//! For a target chapter, find up to `depth` earlier chapters that have both
//! original text and a translation. Sources are consulted in order of
//! reliability:
//!
//! 1. the in-memory unit store, by ordinal
//! 2. the persistent resolver, by ordinal, for ordinals memory could not cover
//! 3. the backward link chain, hop by hop, when ordinals are missing or sparse
//!
//! Resolution never fails. Store errors degrade to fewer entries and are
//! logged. Ordinals learnt while walking the chain are written back on a
//! detached task so the next resolution nearby can stop at tier 1 or 2.

use crate::model::{ContextSource, HistoricalContextEntry, OrdinalSource, TranslationResult, Unit};
use crate::store::{normalize_link, resolve_prior_result, PersistentResolver, UnitStore};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Ordinals `{ordinal - 1, ..., ordinal - depth}` that are still positive,
/// oldest first
pub(crate) fn target_ordinals(ordinal: u32, depth: usize) -> Vec<u32> {
    let mut wanted: Vec<u32> = (1..=depth as u64)
        .filter_map(|back| (ordinal as u64).checked_sub(back))
        .filter(|candidate| *candidate > 0)
        .map(|candidate| candidate as u32)
        .collect();
    wanted.reverse();
    wanted
}

/// What each tier contributed to a resolution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TierUsage {
    pub memory: usize,
    pub persistent: usize,
    pub chain: usize,
    /// Hops resolved while walking the chain, including duplicates dropped later
    pub chain_hops: usize,
    pub persistent_queried: bool,
    pub chain_walked: bool,
}

/// Outcome of ordinal inference
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InferenceReport {
    /// `(unit id, inferred ordinal)` in hop order
    pub assigned: Vec<(String, u32)>,
    pub failures: usize,
}

/// Handle on the detached ordinal write-back.
///
/// Dropping it does not cancel the write-back.
#[derive(Debug)]
pub struct InferenceHandle {
    handle: JoinHandle<InferenceReport>,
}

impl InferenceHandle {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the write-back to settle
    pub async fn settled(self) -> InferenceReport {
        match self.handle.await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "Ordinal inference task did not complete");
                InferenceReport::default()
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct ContextResolution {
    /// Ascending by ordinal (chain order when ordinals are unknown), at most `depth`
    pub entries: Vec<HistoricalContextEntry>,
    pub usage: TierUsage,
    pub inference: Option<InferenceHandle>,
}

impl ContextResolution {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone)]
struct ChainHop {
    unit: Unit,
    result: TranslationResult,
    /// Found in the unit store rather than the persistent resolver
    in_memory: bool,
}

fn trim_to_recent(entries: &mut Vec<HistoricalContextEntry>, depth: usize) {
    if entries.len() > depth {
        let excess = entries.len() - depth;
        entries.drain(..excess);
    }
}

fn sort_by_ordinal(entries: &mut [HistoricalContextEntry]) {
    entries.sort_by_key(|entry| entry.ordinal.unwrap_or(0));
}

/// Three-tier context resolver
#[derive(Clone)]
pub struct ContextResolver {
    units: Arc<dyn UnitStore>,
    persistent: Arc<dyn PersistentResolver>,
    infer_ordinals: bool,
}

impl ContextResolver {
    pub fn new(units: Arc<dyn UnitStore>, persistent: Arc<dyn PersistentResolver>) -> Self {
        Self {
            units,
            persistent,
            infer_ordinals: true,
        }
    }

    /// Enable/disable persisting ordinals discovered through the chain
    pub fn with_ordinal_inference(mut self, enabled: bool) -> Self {
        self.infer_ordinals = enabled;
        self
    }

    /// Resolve up to `depth` earlier chapters for `target`
    pub async fn resolve_context(&self, target: &Unit, depth: usize) -> ContextResolution {
        let mut resolution = ContextResolution::default();
        if depth == 0 {
            return resolution;
        }

        let mut entries = Vec::new();
        if let Some(ordinal) = target.ordinal {
            let wanted = target_ordinals(ordinal, depth);

            entries = self.scan_memory(target, &wanted);
            resolution.usage.memory = entries.len();
            if entries.len() >= depth {
                trim_to_recent(&mut entries, depth);
                debug!(
                    unit_id = %target.id,
                    ordinal,
                    count = entries.len(),
                    tier = ContextSource::Memory.as_str(),
                    "Context resolved"
                );
                resolution.entries = entries;
                return resolution;
            }

            let hydrated = self.hydrate_from_persistent(target, &wanted, &entries).await;
            resolution.usage.persistent_queried = true;
            resolution.usage.persistent = hydrated.len();
            entries.extend(hydrated);
            sort_by_ordinal(&mut entries);
            trim_to_recent(&mut entries, depth);
            if entries.len() >= depth {
                debug!(
                    unit_id = %target.id,
                    ordinal,
                    count = entries.len(),
                    tier = ContextSource::Persistent.as_str(),
                    "Context resolved"
                );
                resolution.entries = entries;
                return resolution;
            }
        } else {
            debug!(unit_id = %target.id, "Target ordinal unknown, skipping ordinal tiers");
        }

        let hops = self.walk_chain(target, depth).await;
        resolution.usage.chain_walked = true;
        resolution.usage.chain_hops = hops.len();

        let anchor = self.ordinal_anchor(target, &hops);
        let chain_entries = Self::chain_entries(&hops, &entries, anchor);
        resolution.usage.chain = chain_entries.len();

        if target.ordinal.is_some() {
            entries.extend(chain_entries);
            sort_by_ordinal(&mut entries);
        } else {
            // Hops were collected newest first
            entries.extend(chain_entries.into_iter().rev());
        }
        trim_to_recent(&mut entries, depth);

        if let Some(anchor) = anchor.filter(|_| self.infer_ordinals && !hops.is_empty()) {
            resolution.inference = self.spawn_inference(&target.id, anchor, hops);
        }

        debug!(
            unit_id = %target.id,
            count = entries.len(),
            memory = resolution.usage.memory,
            persistent = resolution.usage.persistent,
            chain = resolution.usage.chain,
            tier = ContextSource::Chain.as_str(),
            "Context resolved"
        );
        resolution.entries = entries;
        resolution
    }

    /// Tier 1: loaded units whose ordinal is wanted, one per ordinal
    fn scan_memory(&self, target: &Unit, wanted: &[u32]) -> Vec<HistoricalContextEntry> {
        let mut by_ordinal: Vec<(u32, Unit)> = Vec::new();
        for unit in self.units.snapshot() {
            let Some(ordinal) = unit.ordinal else { continue };
            if unit.id == target.id || !wanted.contains(&ordinal) || !unit.is_context_ready() {
                continue;
            }
            match by_ordinal.iter_mut().find(|(existing, _)| *existing == ordinal) {
                Some(slot) => {
                    if unit.has_canonical_ordinal() && !slot.1.has_canonical_ordinal() {
                        slot.1 = unit;
                    }
                }
                None => by_ordinal.push((ordinal, unit)),
            }
        }

        let mut entries: Vec<HistoricalContextEntry> = by_ordinal
            .iter()
            .filter_map(|(ordinal, unit)| {
                unit.active_result.as_ref().map(|result| {
                    HistoricalContextEntry::project(unit, result, Some(*ordinal), ContextSource::Memory)
                })
            })
            .collect();
        sort_by_ordinal(&mut entries);
        entries
    }

    /// Tier 2: ordinals memory could not cover, looked up durably
    async fn hydrate_from_persistent(
        &self,
        target: &Unit,
        wanted: &[u32],
        covered: &[HistoricalContextEntry],
    ) -> Vec<HistoricalContextEntry> {
        let satisfied: HashSet<u32> = covered.iter().filter_map(|entry| entry.ordinal).collect();
        let mut found = Vec::new();

        for &ordinal in wanted.iter().filter(|o| !satisfied.contains(o)) {
            let unit = match self.persistent.find_by_ordinal(ordinal).await {
                Ok(Some(unit)) => unit,
                Ok(None) => continue,
                Err(e) => {
                    warn!(ordinal, error = %e, "Persistent lookup by ordinal failed");
                    continue;
                }
            };
            if unit.id == target.id || !unit.has_content() {
                debug!(ordinal, unit_id = %unit.id, "Persisted unit has no usable content");
                continue;
            }
            match resolve_prior_result(self.persistent.as_ref(), &unit.id).await {
                Ok(Some(result)) => found.push(HistoricalContextEntry::project(
                    &unit,
                    &result,
                    Some(ordinal),
                    ContextSource::Persistent,
                )),
                Ok(None) => debug!(ordinal, unit_id = %unit.id, "Persisted unit has no translation"),
                Err(e) => warn!(ordinal, unit_id = %unit.id, error = %e, "Result lookup failed"),
            }
        }
        found
    }

    /// Tier 3: follow `prev_url` until `depth` hops or the first gap
    async fn walk_chain(&self, target: &Unit, depth: usize) -> Vec<ChainHop> {
        let mut hops = Vec::new();
        let mut visited: HashSet<String> = HashSet::from([target.id.clone()]);
        let mut next_link = target.links.prev_url.clone();

        while hops.len() < depth {
            let Some(link) = next_link.take().as_deref().and_then(normalize_link) else {
                break;
            };
            let Some(hop) = self.resolve_hop(&link).await else {
                debug!(unit_id = %target.id, link = %link, hop = hops.len(), "Chain stopped at unresolvable hop");
                break;
            };
            if !visited.insert(hop.unit.id.clone()) {
                warn!(unit_id = %target.id, link = %link, "Link chain loops back on itself");
                break;
            }
            next_link = hop.unit.links.prev_url.clone();
            hops.push(hop);
        }
        hops
    }

    async fn resolve_hop(&self, link: &str) -> Option<ChainHop> {
        if let Some(unit) = self.units.get_by_link(link).filter(Unit::has_content) {
            if let Some(result) = unit.active_result.clone() {
                return Some(ChainHop {
                    unit,
                    result,
                    in_memory: true,
                });
            }
            match resolve_prior_result(self.persistent.as_ref(), &unit.id).await {
                Ok(Some(result)) => {
                    return Some(ChainHop {
                        unit,
                        result,
                        in_memory: true,
                    })
                }
                Ok(None) => {}
                Err(e) => warn!(unit_id = %unit.id, error = %e, "Result lookup failed"),
            }
        }

        let unit = match self.persistent.find_by_link(link).await {
            Ok(Some(unit)) if unit.has_content() => unit,
            Ok(_) => return None,
            Err(e) => {
                warn!(link, error = %e, "Persistent lookup by link failed");
                return None;
            }
        };
        match resolve_prior_result(self.persistent.as_ref(), &unit.id).await {
            Ok(Some(result)) => Some(ChainHop {
                unit,
                result,
                in_memory: false,
            }),
            Ok(None) => None,
            Err(e) => {
                warn!(unit_id = %unit.id, error = %e, "Result lookup failed");
                None
            }
        }
    }

    /// Ordinal the chain counts back from: the target's own, else one derived
    /// from the nearest hop carrying a canonical ordinal
    fn ordinal_anchor(&self, target: &Unit, hops: &[ChainHop]) -> Option<u32> {
        if target.ordinal.is_some() {
            return target.ordinal;
        }
        hops.iter().enumerate().find_map(|(index, hop)| {
            hop.unit
                .ordinal
                .filter(|_| hop.unit.has_canonical_ordinal())
                .map(|ordinal| ordinal + index as u32 + 1)
        })
    }

    fn chain_entries(
        hops: &[ChainHop],
        earlier: &[HistoricalContextEntry],
        anchor: Option<u32>,
    ) -> Vec<HistoricalContextEntry> {
        let covered: HashSet<u32> = earlier.iter().filter_map(|entry| entry.ordinal).collect();
        let mut entries: Vec<HistoricalContextEntry> = Vec::new();

        for (index, hop) in hops.iter().enumerate() {
            let ordinal = if hop.unit.has_canonical_ordinal() {
                hop.unit.ordinal
            } else {
                anchor.and_then(|a| inferred_ordinal(a, index)).or(hop.unit.ordinal)
            };

            let duplicate = earlier
                .iter()
                .chain(entries.iter())
                .any(|entry| entry.original_content == hop.unit.content);
            if duplicate {
                continue;
            }
            // Earlier tiers win on a shared ordinal
            if ordinal.is_some_and(|o| covered.contains(&o)) {
                continue;
            }
            entries.push(HistoricalContextEntry::project(
                &hop.unit,
                &hop.result,
                ordinal,
                ContextSource::Chain,
            ));
        }
        entries
    }

    fn spawn_inference(&self, target_id: &str, anchor: u32, hops: Vec<ChainHop>) -> Option<InferenceHandle> {
        let assignments: Vec<(ChainHop, u32)> = hops
            .into_iter()
            .enumerate()
            .filter(|(_, hop)| !hop.unit.has_canonical_ordinal())
            .filter_map(|(index, hop)| inferred_ordinal(anchor, index).map(|ordinal| (hop, ordinal)))
            .filter(|(hop, ordinal)| {
                hop.unit.ordinal != Some(*ordinal) || hop.unit.ordinal_source != Some(OrdinalSource::Inferred)
            })
            .collect();
        if assignments.is_empty() {
            return None;
        }

        let units = self.units.clone();
        let persistent = self.persistent.clone();
        let target_id = target_id.to_string();

        let handle = tokio::spawn(async move {
            let mut report = InferenceReport::default();
            for (hop, ordinal) in assignments {
                let ChainHop {
                    mut unit,
                    result,
                    in_memory,
                } = hop;
                unit.apply_ordinal(ordinal, OrdinalSource::Inferred);

                let persisted = match persistent.set_ordinal(&unit.id, ordinal, OrdinalSource::Inferred).await {
                    // The unit may only be known in memory so far
                    Ok(false) if in_memory => persistent.put_unit(&unit).await,
                    Ok(_) => Ok(()),
                    Err(e) => Err(e),
                };
                if let Err(e) = persisted {
                    warn!(unit_id = %unit.id, ordinal, error = %e, "Failed to persist inferred ordinal");
                    report.failures += 1;
                }

                match units.get_by_id(&unit.id) {
                    Some(_) => {
                        units.set_ordinal(&unit.id, ordinal, OrdinalSource::Inferred);
                        // A concurrent write-back keeps its newer result
                        units.attach_result_if_absent(&unit.id, result);
                    }
                    None => {
                        unit.active_result = Some(result);
                        units.upsert(unit.clone());
                    }
                }
                report.assigned.push((unit.id, ordinal));
            }
            info!(
                unit_id = %target_id,
                assigned = report.assigned.len(),
                failures = report.failures,
                "Inferred ordinals from link chain"
            );
            report
        });

        Some(InferenceHandle { handle })
    }
}

fn inferred_ordinal(anchor: u32, hop_index: usize) -> Option<u32> {
    anchor
        .checked_sub(hop_index as u32 + 1)
        .filter(|ordinal| *ordinal > 0)
}
