//! Feedback record model and status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::ESCALATION_MARKER;
use crate::error::GatewayError;
use crate::gateway::{GatewayRecord, fields};
use crate::memory::QualityScores;

/// Loop status of a feedback record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Current content is waiting for client feedback.
    PendingFeedback,
    /// A replacement is being generated.
    Regenerating,
    /// Client approved the content.
    Approved,
    /// Regeneration budget exhausted; a human has to look at it.
    NeedsManualReview,
}

impl RecordStatus {
    /// Check if this state allows transitioning to another state.
    pub fn can_transition_to(&self, target: RecordStatus) -> bool {
        use RecordStatus::*;

        matches!(
            (self, target),
            (PendingFeedback, Approved)
                | (PendingFeedback, Regenerating)
                | (PendingFeedback, NeedsManualReview)
                | (Regenerating, PendingFeedback)
                | (Regenerating, NeedsManualReview)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::NeedsManualReview)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingFeedback => "pending_feedback",
            Self::Regenerating => "regenerating",
            Self::Approved => "approved",
            Self::NeedsManualReview => "needs_manual_review",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending_feedback" | "pending" => Some(Self::PendingFeedback),
            "regenerating" => Some(Self::Regenerating),
            "approved" => Some(Self::Approved),
            "needs_manual_review" | "manual_review" => Some(Self::NeedsManualReview),
            _ => None,
        }
    }
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One generated post and the feedback it has received.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackRecord {
    pub id: String,
    pub topic: String,
    pub content: String,
    pub feedback_text: String,
    pub regeneration_count: u32,
    pub status: RecordStatus,
    pub timestamp: Option<DateTime<Utc>>,
    pub quality: QualityScores,
}

impl FeedbackRecord {
    /// Decode a gateway record.
    ///
    /// Without an explicit status column, the status is derived: the
    /// escalation marker in the feedback means manual review, anything else
    /// is pending. A persisted `regenerating` status means a previous cycle
    /// died mid-flight and is read back as pending.
    pub fn from_gateway(record: &GatewayRecord) -> Result<Self, GatewayError> {
        let decode = |reason: String| GatewayError::Decode {
            id: record.id.clone(),
            reason,
        };

        let content = record
            .str_field(fields::CONTENT)
            .ok_or_else(|| decode("missing content".into()))?
            .to_string();
        let topic = record.str_field(fields::TOPIC).unwrap_or_default().to_string();
        let feedback_text = record
            .str_field(fields::FEEDBACK)
            .unwrap_or_default()
            .trim()
            .to_string();

        let regeneration_count = match record.f64_field(fields::REGENERATION_COUNT) {
            None => 0,
            Some(n) if n >= 0.0 && n.fract() == 0.0 => n as u32,
            Some(n) => return Err(decode(format!("invalid regeneration_count {n}"))),
        };

        let status = match record.str_field(fields::STATUS).and_then(RecordStatus::parse) {
            Some(RecordStatus::Regenerating) => {
                tracing::debug!(record_id = %record.id, "Recovering record left in regenerating");
                RecordStatus::PendingFeedback
            }
            Some(status) => status,
            None if feedback_text == ESCALATION_MARKER => RecordStatus::NeedsManualReview,
            None => RecordStatus::PendingFeedback,
        };

        Ok(Self {
            id: record.id.clone(),
            topic,
            content,
            feedback_text,
            regeneration_count,
            status,
            timestamp: record.str_field(fields::TIMESTAMP).and_then(parse_timestamp),
            quality: QualityScores::new(
                record.f64_field(fields::VOICE_SCORE).map(|v| v as f32),
                record.f64_field(fields::QUALITY_SCORE).map(|v| v as f32),
            ),
        })
    }

    /// Feedback present and the record still open.
    pub fn is_actionable(&self) -> bool {
        !self.status.is_terminal()
            && !self.feedback_text.is_empty()
            && self.feedback_text != ESCALATION_MARKER
    }
}

/// Build a partial field update.
pub fn update_fields(
    content: Option<&str>,
    feedback: &str,
    regeneration_count: u32,
    status: RecordStatus,
) -> Map<String, Value> {
    let mut map = Map::new();
    if let Some(content) = content {
        map.insert(fields::CONTENT.into(), Value::from(content));
    }
    map.insert(fields::FEEDBACK.into(), Value::from(feedback));
    map.insert(fields::REGENERATION_COUNT.into(), Value::from(regeneration_count));
    map.insert(fields::STATUS.into(), Value::from(status.as_str()));
    map
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .ok()
        .map(|ndt| ndt.and_utc())
}
