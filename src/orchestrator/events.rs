//! Translation lifecycle events
//!
//! Every state transition of a request is wrapped in an envelope and handed
//! to the configured [`EventSink`].

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const EVENT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TranslationEvent {
    Queued {
        unit_id: String,
        ticket: u64,
    },
    Running {
        unit_id: String,
    },
    ContextResolved {
        unit_id: String,
        entries: usize,
        memory: usize,
        persistent: usize,
        chain: usize,
    },
    /// No context was found although earlier ordinals were wanted
    ContextMissing {
        unit_id: String,
        ordinal: u32,
        summary: String,
    },
    Completed {
        unit_id: String,
        version: u32,
        duration_ms: u64,
    },
    Aborted {
        unit_id: String,
    },
    Failed {
        unit_id: String,
        category: String,
        message: String,
    },
}

impl TranslationEvent {
    pub fn unit_id(&self) -> &str {
        match self {
            TranslationEvent::Queued { unit_id, .. }
            | TranslationEvent::Running { unit_id }
            | TranslationEvent::ContextResolved { unit_id, .. }
            | TranslationEvent::ContextMissing { unit_id, .. }
            | TranslationEvent::Completed { unit_id, .. }
            | TranslationEvent::Aborted { unit_id }
            | TranslationEvent::Failed { unit_id, .. } => unit_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationEventEnvelope {
    pub version: u32,
    pub sequence: u64,
    pub request_id: String,
    pub timestamp: u64,
    pub event: TranslationEvent,
}

impl TranslationEventEnvelope {
    pub fn new(request_id: &str, event: TranslationEvent) -> Self {
        Self {
            version: EVENT_VERSION,
            sequence: next_sequence(),
            request_id: request_id.to_string(),
            timestamp: now_ms(),
            event,
        }
    }
}

pub trait EventSink: Send + Sync {
    fn emit(&self, envelope: &TranslationEventEnvelope);
}

/// Mirrors events into the tracing log
#[derive(Debug, Default)]
pub struct LoggingEventSink;

impl EventSink for LoggingEventSink {
    fn emit(&self, envelope: &TranslationEventEnvelope) {
        tracing::debug!(
            request_id = %envelope.request_id,
            sequence = envelope.sequence,
            unit_id = %envelope.event.unit_id(),
            "Event: {:?}",
            envelope.event
        );
    }
}

/// Keeps the most recent `capacity` events
#[derive(Debug, Clone)]
pub struct BufferingEventSink {
    events: Arc<RwLock<VecDeque<TranslationEventEnvelope>>>,
    capacity: usize,
}

impl BufferingEventSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Arc::new(RwLock::new(VecDeque::with_capacity(capacity.min(1024)))),
            capacity: capacity.max(1),
        }
    }

    pub fn get_events(&self) -> Vec<TranslationEventEnvelope> {
        self.events.read().iter().cloned().collect()
    }

    /// Events for one unit, oldest first
    pub fn events_for(&self, unit_id: &str) -> Vec<TranslationEvent> {
        self.events
            .read()
            .iter()
            .filter(|envelope| envelope.event.unit_id() == unit_id)
            .map(|envelope| envelope.event.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }
}

impl EventSink for BufferingEventSink {
    fn emit(&self, envelope: &TranslationEventEnvelope) {
        let mut events = self.events.write();
        while events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(envelope.clone());
    }
}

/// Fans one event out to several sinks
#[derive(Default)]
pub struct CompositeEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl CompositeEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for CompositeEventSink {
    fn emit(&self, envelope: &TranslationEventEnvelope) {
        for sink in &self.sinks {
            sink.emit(envelope);
        }
    }
}

static EVENT_SEQUENCE: AtomicU64 = AtomicU64::new(0);

pub fn next_sequence() -> u64 {
    EVENT_SEQUENCE.fetch_add(1, Ordering::SeqCst)
}

/// Milliseconds since the Unix epoch
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_drops_oldest_past_capacity() {
        let sink = BufferingEventSink::new(2);
        for unit in ["a", "b", "c"] {
            sink.emit(&TranslationEventEnvelope::new(
                "r1",
                TranslationEvent::Running {
                    unit_id: unit.to_string(),
                },
            ));
        }

        let units: Vec<String> = sink
            .get_events()
            .iter()
            .map(|e| e.event.unit_id().to_string())
            .collect();
        assert_eq!(units, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_sequence_is_increasing() {
        let first = TranslationEventEnvelope::new("r1", TranslationEvent::Aborted { unit_id: "a".into() });
        let second = TranslationEventEnvelope::new("r1", TranslationEvent::Aborted { unit_id: "a".into() });
        assert!(second.sequence > first.sequence);
        assert_eq!(first.version, EVENT_VERSION);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = TranslationEvent::Queued {
            unit_id: "c1".into(),
            ticket: 3,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Queued");
        assert_eq!(json["ticket"], 3);
    }
}
