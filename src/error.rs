//! Error types for postloop.

use std::time::Duration;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Content engine failures. Never treated as valid output.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Engine returned empty output")]
    EmptyOutput,

    #[error("Engine output too short: {len} chars < {min}")]
    TooShort { len: usize, min: usize },

    #[error("Engine returned the previous content unchanged")]
    Unchanged,

    #[error("Engine call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },
}

/// Persistence gateway failures.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Gateway request failed: {0}")]
    Request(String),

    #[error("Gateway call {op} timed out after {timeout:?}")]
    Timeout { op: String, timeout: Duration },

    #[error("Failed to decode record {id}: {reason}")]
    Decode { id: String, reason: String },

    #[error("Record {0} not found")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Tone memory failures.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Embedding generation failed: {reason}")]
    EmbeddingFailed { reason: String },

    #[error("Import failed: {0}")]
    Import(String),
}

/// Regeneration loop errors.
#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    #[error("Record {id} is terminal ({status}) and cannot be processed")]
    TerminalRecord { id: String, status: String },

    #[error("Record {0} is already being processed")]
    AlreadyClaimed(String),

    #[error("Record {id} cannot transition from {from} to {to}")]
    InvalidTransition { id: String, from: String, to: String },

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Cycle timed out after {0:?}")]
    CycleTimeout(Duration),
}
