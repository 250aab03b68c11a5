//! Feedback-driven regeneration: record model, prompts, claims and the
//! controller state machine.

pub mod claims;
pub mod controller;
pub mod model;
pub mod prompt;

pub use claims::{ClaimGuard, ClaimSet};
pub use controller::{Outcome, PendingWrite, RegenerationController};
pub use model::{FeedbackRecord, RecordStatus};
