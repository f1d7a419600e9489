use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How trustworthy a unit's ordinal is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrdinalSource {
    /// Supplied by the source site or the user
    Canonical,
    /// Derived from link-chain traversal; may be replaced by a canonical value
    Inferred,
}

/// Pointers that tie a chapter to the pages around it
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitLinks {
    pub original_url: Option<String>,
    pub canonical_url: Option<String>,
    pub next_url: Option<String>,
    pub prev_url: Option<String>,
    pub aliases: Vec<String>,
}

impl UnitLinks {
    /// Every locator this unit can be referenced by, excluding neighbour pointers
    pub fn locators(&self) -> impl Iterator<Item = &str> {
        self.original_url
            .iter()
            .chain(self.canonical_url.iter())
            .chain(self.aliases.iter())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeedbackKind {
    Positive,
    Negative,
    Suggestion,
}

/// A reader annotation on a translated passage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    pub id: String,
    pub kind: FeedbackKind,
    /// The translated text the feedback refers to
    pub selection: String,
    pub comment: Option<String>,
}

/// One version of a chapter's translation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationResult {
    /// Assigned by the persistent resolver once stored
    pub version_id: Option<String>,
    pub version: u32,
    pub is_active: bool,
    pub translated_title: String,
    pub translated_content: String,
    pub feedback: Vec<Feedback>,
    pub provider: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

impl TranslationResult {
    /// A fresh, not yet stored result
    pub fn new(
        translated_title: impl Into<String>,
        translated_content: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            version_id: None,
            version: 0,
            is_active: true,
            translated_title: translated_title.into(),
            translated_content: translated_content.into(),
            feedback: Vec::new(),
            provider: provider.into(),
            model: model.into(),
            created_at: Utc::now(),
        }
    }

    pub fn with_feedback(mut self, feedback: Feedback) -> Self {
        self.feedback.push(feedback);
        self
    }
}

/// A logical chapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: String,
    pub ordinal: Option<u32>,
    pub ordinal_source: Option<OrdinalSource>,
    pub title: String,
    pub content: String,
    pub links: UnitLinks,
    pub active_result: Option<TranslationResult>,
}

impl Unit {
    pub fn new(id: impl Into<String>, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ordinal: None,
            ordinal_source: None,
            title: title.into(),
            content: content.into(),
            links: UnitLinks::default(),
            active_result: None,
        }
    }

    /// Set a canonical ordinal
    pub fn with_ordinal(mut self, ordinal: u32) -> Self {
        self.ordinal = Some(ordinal);
        self.ordinal_source = Some(OrdinalSource::Canonical);
        self
    }

    pub fn with_links(mut self, links: UnitLinks) -> Self {
        self.links = links;
        self
    }

    pub fn with_result(mut self, result: TranslationResult) -> Self {
        self.active_result = Some(result);
        self
    }

    pub fn has_content(&self) -> bool {
        !self.content.trim().is_empty()
    }

    /// Usable as translation context: has text and an attached translation
    pub fn is_context_ready(&self) -> bool {
        self.has_content() && self.active_result.is_some()
    }

    pub fn has_canonical_ordinal(&self) -> bool {
        self.ordinal.is_some() && self.ordinal_source == Some(OrdinalSource::Canonical)
    }

    /// Apply an ordinal unless it would downgrade a canonical one.
    ///
    /// Returns whether the unit changed.
    pub fn apply_ordinal(&mut self, ordinal: u32, source: OrdinalSource) -> bool {
        if source == OrdinalSource::Inferred && self.has_canonical_ordinal() {
            return false;
        }
        if self.ordinal == Some(ordinal) && self.ordinal_source == Some(source) {
            return false;
        }
        self.ordinal = Some(ordinal);
        self.ordinal_source = Some(source);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_ready_requires_content_and_result() {
        let unit = Unit::new("c1", "Chapter 1", "   ");
        assert!(!unit.is_context_ready());

        let unit = Unit::new("c1", "Chapter 1", "text");
        assert!(!unit.is_context_ready());

        let unit = unit.with_result(TranslationResult::new("T", "translated", "openai", "gpt"));
        assert!(unit.is_context_ready());
    }

    #[test]
    fn test_inferred_ordinal_never_replaces_canonical() {
        let mut unit = Unit::new("c7", "Chapter 7", "text").with_ordinal(7);
        assert!(!unit.apply_ordinal(9, OrdinalSource::Inferred));
        assert_eq!(unit.ordinal, Some(7));

        assert!(unit.apply_ordinal(8, OrdinalSource::Canonical));
        assert_eq!(unit.ordinal, Some(8));
    }

    #[test]
    fn test_canonical_ordinal_replaces_inferred() {
        let mut unit = Unit::new("c3", "Chapter 3", "text");
        assert!(unit.apply_ordinal(4, OrdinalSource::Inferred));
        assert!(!unit.apply_ordinal(4, OrdinalSource::Inferred));
        assert!(unit.apply_ordinal(3, OrdinalSource::Canonical));
        assert_eq!(unit.ordinal_source, Some(OrdinalSource::Canonical));
    }

    #[test]
    fn test_locators_skip_neighbour_links() {
        let links = UnitLinks {
            original_url: Some("https://a/1".into()),
            canonical_url: None,
            next_url: Some("https://a/2".into()),
            prev_url: Some("https://a/0".into()),
            aliases: vec!["https://mirror/1".into()],
        };
        let found: Vec<&str> = links.locators().collect();
        assert_eq!(found, vec!["https://a/1", "https://mirror/1"]);
    }
}
