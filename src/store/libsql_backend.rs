//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::memory::{MemoryEntry, QualityScores};
use crate::store::migrations;
use crate::store::traits::{Database, StoredRecord};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    DatabaseError::Pool(format!("Failed to create database directory: {e}"))
                })?;
            }
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn opt_real(v: Option<f32>) -> libsql::Value {
    match v {
        Some(v) => libsql::Value::Real(v as f64),
        None => libsql::Value::Null,
    }
}

fn opt_text_owned(s: Option<String>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s),
        None => libsql::Value::Null,
    }
}

/// Column order:
/// 0:id, 1:client_id, 2:topic, 3:content, 4:content_hash, 5:voice_quality,
/// 6:content_quality, 7:created_at, 8:embedding
const MEMORY_COLUMNS: &str = "id, client_id, topic, content, content_hash, voice_quality, content_quality, created_at, embedding";

const RECORD_COLUMNS: &str = "id, fields, created_at, updated_at";

fn row_to_memory_entry(row: &libsql::Row) -> Result<MemoryEntry, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("memory row parse: {e}"));

    let id_str: String = row.get(0).map_err(parse)?;
    let id = Uuid::parse_str(&id_str)
        .map_err(|e| DatabaseError::Serialization(format!("memory id {id_str}: {e}")))?;
    let created_str: String = row.get(7).map_err(parse)?;
    let embedding = row
        .get::<String>(8)
        .ok()
        .and_then(|s| serde_json::from_str::<Vec<f32>>(&s).ok());

    Ok(MemoryEntry {
        id,
        client_id: row.get(1).map_err(parse)?,
        topic: row.get(2).map_err(parse)?,
        content: row.get(3).map_err(parse)?,
        content_hash: row.get(4).map_err(parse)?,
        quality_scores: QualityScores::new(
            row.get::<f64>(5).ok().map(|v| v as f32),
            row.get::<f64>(6).ok().map(|v| v as f32),
        ),
        created_at: parse_datetime(&created_str),
        embedding,
    })
}

fn row_to_record(row: &libsql::Row) -> Result<StoredRecord, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("record row parse: {e}"));

    let id: String = row.get(0).map_err(parse)?;
    let fields_str: String = row.get(1).map_err(parse)?;
    let fields = match serde_json::from_str::<Value>(&fields_str) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            return Err(DatabaseError::Serialization(format!(
                "record {id}: fields is not an object: {other}"
            )));
        }
        Err(e) => return Err(DatabaseError::Serialization(format!("record {id}: {e}"))),
    };
    let created_str: String = row.get(2).map_err(parse)?;
    let updated_str: String = row.get(3).map_err(parse)?;

    Ok(StoredRecord {
        id,
        fields,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Tone memory ─────────────────────────────────────────────────

    async fn insert_memory_entry(&self, entry: &MemoryEntry) -> Result<bool, DatabaseError> {
        let embedding = match &entry.embedding {
            Some(v) => Some(
                serde_json::to_string(v)
                    .map_err(|e| DatabaseError::Serialization(format!("embedding: {e}")))?,
            ),
            None => None,
        };

        let count = self
            .conn()
            .execute(
                &format!(
                    "INSERT OR IGNORE INTO tone_memory ({MEMORY_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                params![
                    entry.id.to_string(),
                    entry.client_id.clone(),
                    entry.topic.clone(),
                    entry.content.clone(),
                    entry.content_hash.clone(),
                    opt_real(entry.quality_scores.voice),
                    opt_real(entry.quality_scores.content),
                    entry.created_at.to_rfc3339(),
                    opt_text_owned(embedding),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_memory_entry: {e}")))?;

        debug!(entry_id = %entry.id, client_id = %entry.client_id, inserted = count > 0, "Memory entry insert");
        Ok(count > 0)
    }

    async fn list_memory_entries(&self) -> Result<Vec<MemoryEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {MEMORY_COLUMNS} FROM tone_memory ORDER BY created_at ASC, id ASC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_memory_entries: {e}")))?;

        let mut entries = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_memory_entries: {e}")))?
        {
            entries.push(row_to_memory_entry(&row)?);
        }
        Ok(entries)
    }

    async fn delete_memory_entries_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, DatabaseError> {
        // created_at is always written as RFC 3339 UTC, so string order is time order.
        let count = self
            .conn()
            .execute(
                "DELETE FROM tone_memory WHERE created_at < ?1",
                params![cutoff.to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_memory_entries_before: {e}")))?;

        if count > 0 {
            info!(count, cutoff = %cutoff, "Deleted old memory entries");
        }
        Ok(count as usize)
    }

    async fn set_memory_embedding(
        &self,
        id: Uuid,
        embedding: &[f32],
    ) -> Result<(), DatabaseError> {
        let json = serde_json::to_string(embedding)
            .map_err(|e| DatabaseError::Serialization(format!("embedding: {e}")))?;
        let count = self
            .conn()
            .execute(
                "UPDATE tone_memory SET embedding = ?1 WHERE id = ?2",
                params![json, id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_memory_embedding: {e}")))?;

        if count == 0 {
            return Err(DatabaseError::NotFound {
                entity: "memory_entry".into(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    // ── Feedback records ────────────────────────────────────────────

    async fn insert_record(&self, fields: &Map<String, Value>) -> Result<String, DatabaseError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let fields_json = Value::Object(fields.clone()).to_string();

        self.conn()
            .execute(
                &format!("INSERT INTO records ({RECORD_COLUMNS}) VALUES (?1, ?2, ?3, ?4)"),
                params![id.clone(), fields_json, now.clone(), now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_record: {e}")))?;

        debug!(record_id = %id, "Record inserted");
        Ok(id)
    }

    async fn list_records(&self) -> Result<Vec<StoredRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {RECORD_COLUMNS} FROM records ORDER BY rowid ASC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_records: {e}")))?;

        let mut records = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_records: {e}")))?
        {
            records.push(row_to_record(&row)?);
        }
        Ok(records)
    }

    async fn get_record(&self, id: &str) -> Result<Option<StoredRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_record: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_record(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_record: {e}"))),
        }
    }

    async fn merge_record_fields(
        &self,
        id: &str,
        partial: &Map<String, Value>,
    ) -> Result<bool, DatabaseError> {
        let Some(mut record) = self.get_record(id).await? else {
            return Ok(false);
        };
        for (key, value) in partial {
            record.fields.insert(key.clone(), value.clone());
        }

        let count = self
            .conn()
            .execute(
                "UPDATE records SET fields = ?1, updated_at = ?2 WHERE id = ?3",
                params![
                    Value::Object(record.fields).to_string(),
                    Utc::now().to_rfc3339(),
                    id.to_string()
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("merge_record_fields: {e}")))?;

        debug!(record_id = %id, keys = partial.len(), "Record fields merged");
        Ok(count > 0)
    }

    // ── Record status overlay ───────────────────────────────────────

    async fn set_record_status(&self, record_id: &str, status: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO record_status (record_id, status, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(record_id) DO UPDATE SET status = excluded.status, updated_at = excluded.updated_at",
                params![record_id.to_string(), status.to_string(), Utc::now().to_rfc3339()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_record_status: {e}")))?;
        Ok(())
    }

    async fn list_record_statuses(&self) -> Result<HashMap<String, String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT record_id, status FROM record_status", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("list_record_statuses: {e}")))?;

        let mut statuses = HashMap::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_record_statuses: {e}")))?
        {
            let id: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("record_status.record_id: {e}")))?;
            let status: String = row
                .get(1)
                .map_err(|e| DatabaseError::Query(format!("record_status.status: {e}")))?;
            statuses.insert(id, status);
        }
        Ok(statuses)
    }
}
