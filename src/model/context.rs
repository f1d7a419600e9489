use crate::model::unit::{Feedback, TranslationResult, Unit};
use serde::{Deserialize, Serialize};

/// Which tier produced a context entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContextSource {
    Memory,
    Persistent,
    Chain,
}

impl ContextSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextSource::Memory => "memory",
            ContextSource::Persistent => "persistent",
            ContextSource::Chain => "chain",
        }
    }
}

/// Read-only view of an earlier chapter handed to the provider as context.
/// Built per request, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalContextEntry {
    pub unit_id: String,
    pub ordinal: Option<u32>,
    pub original_title: String,
    pub original_content: String,
    pub translated_title: String,
    pub translated_content: String,
    pub feedback: Vec<Feedback>,
    pub source: ContextSource,
}

impl HistoricalContextEntry {
    pub fn project(
        unit: &Unit,
        result: &TranslationResult,
        ordinal: Option<u32>,
        source: ContextSource,
    ) -> Self {
        Self {
            unit_id: unit.id.clone(),
            ordinal,
            original_title: unit.title.clone(),
            original_content: unit.content.clone(),
            translated_title: result.translated_title.clone(),
            translated_content: result.translated_content.clone(),
            feedback: result.feedback.clone(),
            source,
        }
    }
}
