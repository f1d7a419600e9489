pub mod context;
pub mod unit;

pub use context::{ContextSource, HistoricalContextEntry};
pub use unit::{Feedback, FeedbackKind, OrdinalSource, TranslationResult, Unit, UnitLinks};
