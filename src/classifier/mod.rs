//! Feedback classification.
//!
//! Maps free-text client feedback onto a tagged [`Verdict`]. The controller
//! only sees the [`Classifier`] trait, so the keyword heuristic can be
//! swapped for a learned model without touching the regeneration loop.

pub mod lexicon;

pub use lexicon::LexiconClassifier;

use serde::{Deserialize, Serialize};

/// Outcome of classifying one piece of feedback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// The client approved the content as-is.
    Approve,
    /// The client asked for changes. `reason` is the phrase that triggered it.
    Reject { reason: String },
    /// Neither lexicon fired.
    Ambiguous,
}

impl Verdict {
    /// Whether this verdict should send the record back through regeneration.
    ///
    /// Ambiguous feedback is handled exactly like a rejection: publishing
    /// low-confidence content costs more than one extra regeneration.
    pub fn requires_regeneration(&self) -> bool {
        matches!(self, Self::Reject { .. } | Self::Ambiguous)
    }

    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject { .. } => "reject",
            Self::Ambiguous => "ambiguous",
        }
    }
}

/// Anything that can turn feedback text into a verdict.
pub trait Classifier: Send + Sync {
    /// Classifier name for logs.
    fn name(&self) -> &str;

    /// Classify feedback text. Must accept empty input.
    fn classify(&self, text: &str) -> Verdict;
}
