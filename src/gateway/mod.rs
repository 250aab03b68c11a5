//! Persistence gateway: where generated posts and client feedback live.
//!
//! Records are an id plus a loose field map. Field names below are the
//! canonical ones; backends with different column names translate at the
//! edge.

pub mod airtable;
pub mod local;
pub mod overlay;

pub use airtable::AirtableGateway;
pub use local::LocalGateway;
pub use overlay::StatusOverlayGateway;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::GatewayError;

/// Canonical field names.
pub mod fields {
    pub const TOPIC: &str = "topic";
    pub const CONTENT: &str = "content";
    pub const FEEDBACK: &str = "feedback";
    pub const TIMESTAMP: &str = "timestamp";
    pub const REGENERATION_COUNT: &str = "regeneration_count";
    pub const STATUS: &str = "status";
    pub const VOICE_SCORE: &str = "voice_score";
    pub const QUALITY_SCORE: &str = "quality_score";
}

/// One record as returned by a gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayRecord {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl GatewayRecord {
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    /// Numeric field, accepting numbers or numeric strings.
    pub fn f64_field(&self, key: &str) -> Option<f64> {
        match self.fields.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// External store of feedback records.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    fn name(&self) -> &str;

    async fn get_all_records(&self) -> Result<Vec<GatewayRecord>, GatewayError>;

    /// Merge `partial` into the record. Returns `false` if the record is gone.
    async fn update_record(
        &self,
        id: &str,
        partial: &Map<String, Value>,
    ) -> Result<bool, GatewayError>;
}
