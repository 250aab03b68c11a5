//! `Database` trait: single async interface for all persistence.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::memory::MemoryEntry;

/// A row of the local `records` table: an id plus a free-form field map.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: String,
    pub fields: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Backend-agnostic database trait covering tone memory and feedback records.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Tone memory ─────────────────────────────────────────────────

    /// Insert an entry. Returns `false` when `(client_id, content_hash)`
    /// already exists and nothing was written.
    async fn insert_memory_entry(&self, entry: &MemoryEntry) -> Result<bool, DatabaseError>;

    /// All entries, oldest first.
    async fn list_memory_entries(&self) -> Result<Vec<MemoryEntry>, DatabaseError>;

    /// Delete entries with `created_at` strictly before `cutoff`.
    /// Returns the number of entries deleted.
    async fn delete_memory_entries_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, DatabaseError>;

    /// Attach an embedding vector to an existing entry.
    async fn set_memory_embedding(&self, id: Uuid, embedding: &[f32])
    -> Result<(), DatabaseError>;

    // ── Feedback records ────────────────────────────────────────────

    /// Insert a new record. Returns the generated id.
    async fn insert_record(&self, fields: &Map<String, Value>) -> Result<String, DatabaseError>;

    /// All records in insertion order.
    async fn list_records(&self) -> Result<Vec<StoredRecord>, DatabaseError>;

    /// Get a record by id.
    async fn get_record(&self, id: &str) -> Result<Option<StoredRecord>, DatabaseError>;

    /// Merge `partial` into the record's fields. Keys not in `partial` are
    /// left alone. Returns `false` if the record does not exist.
    async fn merge_record_fields(
        &self,
        id: &str,
        partial: &Map<String, Value>,
    ) -> Result<bool, DatabaseError>;

    // ── Record status overlay ───────────────────────────────────────

    /// Remember a record's loop status for gateways that cannot store it.
    async fn set_record_status(&self, record_id: &str, status: &str)
    -> Result<(), DatabaseError>;

    /// Every remembered status, keyed by record id.
    async fn list_record_statuses(&self) -> Result<HashMap<String, String>, DatabaseError>;
}
