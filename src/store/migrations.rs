//! Schema migrations, tracked in `_migrations`.

use libsql::Connection;

use crate::error::DatabaseError;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Append only.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "tone_memory",
        sql: r#"
            CREATE TABLE IF NOT EXISTS tone_memory (
                id TEXT PRIMARY KEY,
                client_id TEXT NOT NULL,
                topic TEXT NOT NULL,
                content TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                voice_quality REAL,
                content_quality REAL,
                created_at TEXT NOT NULL,
                UNIQUE (client_id, content_hash)
            );
            CREATE INDEX IF NOT EXISTS idx_tone_memory_client ON tone_memory(client_id);
            CREATE INDEX IF NOT EXISTS idx_tone_memory_created ON tone_memory(created_at);
        "#,
    },
    Migration {
        version: 2,
        name: "feedback_records",
        sql: r#"
            CREATE TABLE IF NOT EXISTS records (
                id TEXT PRIMARY KEY,
                fields TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_records_created ON records(created_at);
        "#,
    },
    Migration {
        version: 3,
        name: "memory_embeddings",
        sql: r#"
            ALTER TABLE tone_memory ADD COLUMN embedding TEXT;
        "#,
    },
    Migration {
        version: 4,
        name: "record_status_overlay",
        sql: r#"
            CREATE TABLE IF NOT EXISTS record_status (
                record_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
        "#,
    },
];

/// Apply every migration newer than the recorded schema version.
///
/// Each step runs in its own transaction together with its `_migrations`
/// row, so a failed step leaves the schema at the previous version.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("_migrations table: {e}")))?;

    let applied = schema_version(conn).await?;
    for step in MIGRATIONS.iter().filter(|m| m.version > applied) {
        let batch = format!(
            "BEGIN;\n{}\nINSERT INTO _migrations (version, name) VALUES ({}, '{}');\nCOMMIT;",
            step.sql, step.version, step.name
        );
        if let Err(e) = conn.execute_batch(&batch).await {
            // No-op if the failing statement already ended the transaction.
            let _ = conn.execute_batch("ROLLBACK;").await;
            return Err(DatabaseError::Migration(format!(
                "V{} {}: {e}",
                step.version, step.name
            )));
        }
        tracing::info!(version = step.version, name = step.name, "Schema migrated");
    }
    Ok(())
}

/// Highest applied version; 0 on a fresh database.
async fn schema_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("schema version: {e}")))?;

    let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("schema version: {e}")))?
    else {
        return Ok(0);
    };
    row.get::<i64>(0)
        .map_err(|e| DatabaseError::Migration(format!("schema version: {e}")))
}
