//! Bulk exemplar import from JSON exports.
//!
//! Accepts a bare array, `{"posts": [...]}`, `{"data": [...]}` or a single
//! post object. Field names are matched loosely since exports come from
//! spreadsheets and hosted tables.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use super::{MemoryEntry, QualityScores, ToneMemoryStore};
use crate::error::MemoryError;

const CONTENT_KEYS: &[&str] = &["Content", "content", "Post", "post", "text"];
const TOPIC_KEYS: &[&str] = &["Topic", "topic", "title"];
const CLIENT_KEYS: &[&str] = &["client_id", "client"];
const VOICE_KEYS: &[&str] = &["voice_quality", "voice score", "voice_score"];
const QUALITY_KEYS: &[&str] = &["post_quality", "quality score", "quality_score"];
const TIME_KEYS: &[&str] = &["created_at", "timestamp", "Timestamp"];

/// Outcome of an import run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub inserted: usize,
    pub duplicates: usize,
    /// Items with no usable content.
    pub skipped: usize,
}

impl ToneMemoryStore {
    /// Import posts from a JSON document. Duplicates are counted, not errors.
    pub async fn import_json(
        &self,
        raw: &str,
        default_client: &str,
    ) -> Result<ImportReport, MemoryError> {
        let (entries, skipped) = parse_import(raw, default_client)?;
        let mut report = ImportReport {
            skipped,
            ..Default::default()
        };

        for entry in entries {
            if self.add(entry).await? {
                report.inserted += 1;
            } else {
                report.duplicates += 1;
            }
        }

        info!(
            inserted = report.inserted,
            duplicates = report.duplicates,
            skipped = report.skipped,
            "Import complete"
        );
        Ok(report)
    }
}

/// Parse a JSON export into entries. Returns the entries and the number of
/// items skipped for lack of content.
pub fn parse_import(
    raw: &str,
    default_client: &str,
) -> Result<(Vec<MemoryEntry>, usize), MemoryError> {
    let doc: Value =
        serde_json::from_str(raw).map_err(|e| MemoryError::Import(format!("invalid JSON: {e}")))?;

    let items = match doc {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("posts").or_else(|| obj.remove("data")) {
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(MemoryError::Import("'posts'/'data' must be an array".into()));
            }
            None => vec![Value::Object(obj)],
        },
        _ => return Err(MemoryError::Import("expected an array or object".into())),
    };

    let mut entries = Vec::with_capacity(items.len());
    let mut skipped = 0;
    for (index, item) in items.iter().enumerate() {
        let Some(obj) = item.as_object() else {
            warn!(index, "Skipping non-object import item");
            skipped += 1;
            continue;
        };
        match entry_from_object(obj, default_client) {
            Some(entry) => entries.push(entry),
            None => {
                warn!(index, "Skipping import item without content");
                skipped += 1;
            }
        }
    }
    Ok((entries, skipped))
}

fn entry_from_object(obj: &Map<String, Value>, default_client: &str) -> Option<MemoryEntry> {
    let content = first_str(obj, CONTENT_KEYS).filter(|c| !c.trim().is_empty())?;
    let topic = first_str(obj, TOPIC_KEYS)
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| derive_topic(&content));
    let client = first_str(obj, CLIENT_KEYS).unwrap_or_else(|| default_client.to_string());

    let mut entry = MemoryEntry::new(client, topic, content).with_quality(QualityScores::new(
        first_f32(obj, VOICE_KEYS),
        first_f32(obj, QUALITY_KEYS),
    ));
    if let Some(ts) = first_str(obj, TIME_KEYS).and_then(|s| parse_timestamp(&s)) {
        entry = entry.with_created_at(ts);
    }
    Some(entry)
}

fn first_str(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

fn first_f32(obj: &Map<String, Value>, keys: &[&str]) -> Option<f32> {
    keys.iter().find_map(|k| match obj.get(*k)? {
        Value::Number(n) => n.as_f64().map(|v| v as f32),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
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

/// First line of the post, shortened.
fn derive_topic(content: &str) -> String {
    let first_line = content.lines().find(|l| !l.trim().is_empty()).unwrap_or("").trim();
    if first_line.chars().count() <= 50 {
        first_line.to_string()
    } else {
        let short: String = first_line.chars().take(50).collect();
        format!("{short}...")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::{Database, LibSqlBackend};

    #[test]
    fn accepts_wrapped_and_bare_documents() {
        let bare = r#"[{"topic": "a", "content": "post a"}]"#;
        let wrapped = r#"{"posts": [{"Topic": "b", "Post": "post b"}]}"#;
        let single = r#"{"title": "c", "text": "post c"}"#;

        assert_eq!(parse_import(bare, "sam").unwrap().0[0].topic, "a");
        assert_eq!(parse_import(wrapped, "sam").unwrap().0[0].content, "post b");
        assert_eq!(parse_import(single, "sam").unwrap().0[0].topic, "c");
        assert!(parse_import("42", "sam").is_err());
        assert!(parse_import("not json", "sam").is_err());
    }

    #[test]
    fn reads_scores_client_and_timestamp() {
        let raw = r#"[{
            "topic": "pricing",
            "post": "Know your floor price.",
            "client_id": "alex",
            "voice_quality": 9,
            "post_quality": "7.5",
            "timestamp": "2026-03-01T09:30:00Z"
        }]"#;
        let (entries, skipped) = parse_import(raw, "sam").unwrap();
        assert_eq!(skipped, 0);
        let entry = &entries[0];
        assert_eq!(entry.client_id, "alex");
        assert_eq!(entry.quality_scores.voice, Some(9.0));
        assert_eq!(entry.quality_scores.content, Some(7.5));
        assert_eq!(entry.created_at.to_rfc3339(), "2026-03-01T09:30:00+00:00");
    }

    #[test]
    fn missing_topic_uses_first_line() {
        let long = "x".repeat(80);
        let raw = serde_json::json!([
            {"content": "Short opener\nBody text"},
            {"content": long},
            {"topic": "no content"},
            "not an object"
        ])
        .to_string();
        let (entries, skipped) = parse_import(&raw, "sam").unwrap();
        assert_eq!(skipped, 2);
        assert_eq!(entries[0].topic, "Short opener");
        assert_eq!(entries[1].topic, format!("{}...", "x".repeat(50)));
    }

    #[tokio::test]
    async fn import_is_idempotent() {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let memory = ToneMemoryStore::load(db, None).await.unwrap();
        let raw = r#"[{"topic": "a", "content": "one"}, {"topic": "b", "content": "ONE"}]"#;

        let first = memory.import_json(raw, "sam").await.unwrap();
        assert_eq!(first, ImportReport { inserted: 1, duplicates: 1, skipped: 0 });

        let again = memory.import_json(raw, "sam").await.unwrap();
        assert_eq!(again.inserted, 0);
        assert_eq!(memory.stats().await.total_posts, 1);
    }
}
