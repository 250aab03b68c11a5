//! Tone memory data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Optional client-assigned quality scores (0 means "not scored").
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityScores {
    pub voice: Option<f32>,
    pub content: Option<f32>,
}

impl QualityScores {
    pub fn new(voice: Option<f32>, content: Option<f32>) -> Self {
        Self {
            voice: voice.filter(|v| *v > 0.0),
            content: content.filter(|v| *v > 0.0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.voice.is_none() && self.content.is_none()
    }
}

/// One approved post kept as a style exemplar.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: Uuid,
    pub client_id: String,
    pub topic: String,
    pub content: String,
    /// Fingerprint of the normalized content; unique per `client_id`.
    pub content_hash: String,
    #[serde(default)]
    pub quality_scores: QualityScores,
    pub created_at: DateTime<Utc>,
    /// Embedding of `"{topic} {content}"` when an embedder is configured.
    #[serde(default, skip_serializing)]
    pub embedding: Option<Vec<f32>>,
}

impl MemoryEntry {
    /// Create an entry stamped now.
    pub fn new(
        client_id: impl Into<String>,
        topic: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let content = content.into();
        Self {
            id: Uuid::new_v4(),
            client_id: client_id.into(),
            topic: topic.into(),
            content_hash: content_hash(&content),
            content,
            quality_scores: QualityScores::default(),
            created_at: Utc::now(),
            embedding: None,
        }
    }

    pub fn with_quality(mut self, scores: QualityScores) -> Self {
        self.quality_scores = scores;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Text that gets embedded for similarity search.
    pub fn embedding_text(&self) -> String {
        format!("{} {}", self.topic, self.content)
    }
}

/// Aggregate statistics over the whole store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryStats {
    pub total_posts: usize,
    pub unique_clients: usize,
    /// Mean of every non-zero voice and content score.
    pub avg_quality: Option<f32>,
    pub avg_voice_quality: Option<f32>,
    pub avg_content_quality: Option<f32>,
    /// Whether an embedding backend is configured.
    pub index_available: bool,
    /// Entries that carry an embedding.
    pub indexed_entries: usize,
}

/// Whitespace-collapsed, case-folded form used for hashing.
pub fn normalize_content(content: &str) -> String {
    content
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Stable hex SHA-256 fingerprint of normalized content.
pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(normalize_content(content).as_bytes());
    format!("{digest:x}")
}
