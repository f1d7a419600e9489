use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug)]
struct ActiveRequest {
    generation: u64,
    token: CancellationToken,
}

/// Tracks the single in-flight request allowed per unit.
///
/// Starting a request for a unit cancels whatever request held that unit
/// before. Entries are removed when the returned [`UnitLease`] is dropped.
#[derive(Debug, Clone, Default)]
pub struct CancellationRegistry {
    entries: Arc<DashMap<String, ActiveRequest>>,
    generations: Arc<AtomicU64>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel any request holding `unit_id` and install a fresh token.
    ///
    /// The superseded token is cancelled before the new one is visible.
    pub fn begin_unit(&self, unit_id: &str) -> UnitLease {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancellationToken::new();
        let request = ActiveRequest {
            generation,
            token: token.clone(),
        };

        match self.entries.entry(unit_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                debug!(unit_id, superseded = occupied.get().generation, "Superseding in-flight request");
                occupied.get().token.cancel();
                occupied.insert(request);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(request);
            }
        }

        UnitLease {
            unit_id: unit_id.to_string(),
            generation,
            token,
            entries: self.entries.clone(),
        }
    }

    /// Cancel and forget the request holding `unit_id`.
    ///
    /// Returns whether one existed.
    pub fn cancel_unit(&self, unit_id: &str) -> bool {
        match self.entries.remove(unit_id) {
            Some((_, request)) => {
                request.token.cancel();
                debug!(unit_id, generation = request.generation, "Cancelled request");
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, unit_id: &str) -> bool {
        self.entries.contains_key(unit_id)
    }

    pub fn active_ids(&self) -> HashSet<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Ownership of a unit's registry entry for the lifetime of one request.
///
/// Dropping the lease removes the entry, but only if it still belongs to this
/// request; a superseded request finishing late leaves its successor alone.
#[derive(Debug)]
pub struct UnitLease {
    unit_id: String,
    generation: u64,
    token: CancellationToken,
    entries: Arc<DashMap<String, ActiveRequest>>,
}

impl UnitLease {
    pub fn unit_id(&self) -> &str {
        &self.unit_id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for UnitLease {
    fn drop(&mut self) {
        let generation = self.generation;
        self.entries
            .remove_if(&self.unit_id, |_, request| request.generation == generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_installs_active_token() {
        let registry = CancellationRegistry::new();
        let lease = registry.begin_unit("c1");

        assert!(registry.is_active("c1"));
        assert!(!lease.is_cancelled());
        assert_eq!(registry.active_ids(), HashSet::from(["c1".to_string()]));
    }

    #[test]
    fn test_begin_supersedes_previous_token() {
        let registry = CancellationRegistry::new();
        let first = registry.begin_unit("c1");
        let second = registry.begin_unit("c1");

        assert!(first.is_cancelled(), "Superseded token is cancelled");
        assert!(!second.is_cancelled());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_stale_lease_does_not_evict_successor() {
        let registry = CancellationRegistry::new();
        let first = registry.begin_unit("c1");
        let second = registry.begin_unit("c1");

        drop(first);
        assert!(registry.is_active("c1"), "Successor entry survives");

        drop(second);
        assert!(!registry.is_active("c1"));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_cancel_unit() {
        let registry = CancellationRegistry::new();
        let lease = registry.begin_unit("c1");

        assert!(registry.cancel_unit("c1"));
        assert!(lease.is_cancelled());
        assert!(!registry.is_active("c1"));
        assert!(!registry.cancel_unit("c1"), "Nothing left to cancel");
    }

    #[test]
    fn test_units_are_independent() {
        let registry = CancellationRegistry::new();
        let a = registry.begin_unit("a");
        let b = registry.begin_unit("b");

        registry.cancel_unit("a");
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
    }

    #[test]
    fn test_lease_released_on_panic() {
        let registry = CancellationRegistry::new();
        let cloned = registry.clone();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _lease = cloned.begin_unit("c1");
            panic!("request blew up");
        }));

        assert!(outcome.is_err());
        assert!(!registry.is_active("c1"));
    }
}
