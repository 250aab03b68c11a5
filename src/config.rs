//! Configuration types.
//!
//! Every component receives its configuration explicitly through its
//! constructor. `from_env()` reads the process environment; `from_lookup()`
//! takes any key → value function so tests never touch global state.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Marker written into the feedback field when a record is escalated.
pub const ESCALATION_MARKER: &str = "MAX_REGENERATIONS_REACHED - Manual review needed";

/// Feedback loop configuration.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Upper bound on automatic regenerations per record.
    pub max_regenerations: u32,
    /// Tone memory entries older than this are purged by the cleanup sweep.
    pub retention_days: u32,
    /// Wall-clock interval between driver cycles.
    pub poll_interval: Duration,
    /// Engine output shorter than this (in chars, after trimming) is a failure.
    pub min_content_length: usize,
    /// Timeout for a single content engine call.
    pub engine_timeout: Duration,
    /// Timeout for a single persistence gateway call.
    pub gateway_timeout: Duration,
    /// Timeout for a whole driver cycle.
    pub cycle_timeout: Duration,
    /// Consecutive engine attempts per cycle before giving up until the next one.
    pub engine_attempts: u32,
    /// Attempts per persistence gateway call.
    pub gateway_attempts: u32,
    /// Run the memory cleanup sweep every N cycles.
    pub cleanup_every_cycles: u64,
    /// Client whose tone memory conditions regeneration.
    pub client_id: String,
    /// libSQL database file.
    pub db_path: PathBuf,
    /// Port for the status HTTP server (disabled when `None`).
    pub status_port: Option<u16>,
    /// Directory for rolling file logs (stderr only when `None`).
    pub log_dir: Option<PathBuf>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_regenerations: 5,
            retention_days: 45,
            poll_interval: Duration::from_secs(300), // 5 minutes
            min_content_length: 200,
            engine_timeout: Duration::from_secs(120),
            gateway_timeout: Duration::from_secs(30),
            cycle_timeout: Duration::from_secs(600),
            engine_attempts: 3,
            gateway_attempts: 3,
            cleanup_every_cycles: 12, // once an hour at the default interval
            client_id: "default".to_string(),
            db_path: PathBuf::from("./data/postloop.db"),
            status_port: None,
            log_dir: None,
        }
    }
}

impl LoopConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup, falling back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            max_regenerations: parse_or(&lookup, "POSTLOOP_MAX_REGENERATIONS", defaults.max_regenerations)?,
            retention_days: parse_or(&lookup, "POSTLOOP_RETENTION_DAYS", defaults.retention_days)?,
            poll_interval: secs_or(&lookup, "POSTLOOP_POLL_INTERVAL_SECS", defaults.poll_interval)?,
            min_content_length: parse_or(&lookup, "POSTLOOP_MIN_CONTENT_LENGTH", defaults.min_content_length)?,
            engine_timeout: secs_or(&lookup, "POSTLOOP_ENGINE_TIMEOUT_SECS", defaults.engine_timeout)?,
            gateway_timeout: secs_or(&lookup, "POSTLOOP_GATEWAY_TIMEOUT_SECS", defaults.gateway_timeout)?,
            cycle_timeout: secs_or(&lookup, "POSTLOOP_CYCLE_TIMEOUT_SECS", defaults.cycle_timeout)?,
            engine_attempts: parse_or(&lookup, "POSTLOOP_ENGINE_ATTEMPTS", defaults.engine_attempts)?,
            gateway_attempts: parse_or(&lookup, "POSTLOOP_GATEWAY_ATTEMPTS", defaults.gateway_attempts)?,
            cleanup_every_cycles: parse_or(&lookup, "POSTLOOP_CLEANUP_EVERY", defaults.cleanup_every_cycles)?,
            client_id: lookup("POSTLOOP_CLIENT_ID")
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.client_id),
            db_path: lookup("POSTLOOP_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
            status_port: lookup("POSTLOOP_STATUS_PORT")
                .map(|raw| parse_value("POSTLOOP_STATUS_PORT", &raw))
                .transpose()?,
            log_dir: lookup("POSTLOOP_LOG_DIR").map(PathBuf::from),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let nonzero = [
            ("POSTLOOP_MAX_REGENERATIONS", self.max_regenerations as u64),
            ("POSTLOOP_ENGINE_ATTEMPTS", self.engine_attempts as u64),
            ("POSTLOOP_GATEWAY_ATTEMPTS", self.gateway_attempts as u64),
            ("POSTLOOP_CLEANUP_EVERY", self.cleanup_every_cycles),
            ("POSTLOOP_POLL_INTERVAL_SECS", self.poll_interval.as_secs()),
        ];
        for (key, value) in nonzero {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Supported text-generation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
    OpenAi,
}

/// Content engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub backend: LlmBackend,
    pub api_key: SecretString,
    pub model: String,
    pub max_tokens: u64,
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let backend = match lookup("POSTLOOP_LLM_BACKEND").as_deref() {
            None | Some("anthropic") => LlmBackend::Anthropic,
            Some("openai") => LlmBackend::OpenAi,
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "POSTLOOP_LLM_BACKEND".to_string(),
                    message: format!("unknown backend '{other}' (expected anthropic or openai)"),
                });
            }
        };

        let (key_var, default_model) = match backend {
            LlmBackend::Anthropic => ("ANTHROPIC_API_KEY", "claude-sonnet-4-20250514"),
            LlmBackend::OpenAi => ("OPENAI_API_KEY", "gpt-4o"),
        };

        let api_key = lookup(key_var).ok_or_else(|| ConfigError::MissingEnvVar(key_var.to_string()))?;

        Ok(Self {
            backend,
            api_key: SecretString::from(api_key),
            model: lookup("POSTLOOP_MODEL").unwrap_or_else(|| default_model.to_string()),
            max_tokens: parse_or(&lookup, "POSTLOOP_MAX_TOKENS", 2048)?,
        })
    }
}

/// Embedding backend configuration. Absent ⇒ lexical retrieval only.
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub api_key: SecretString,
    pub model: String,
    pub base_url: String,
    /// Bound on a single embedding request.
    pub timeout: Duration,
}

impl EmbeddingConfig {
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// `None` unless both the model and the API key are set.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Option<Self>, ConfigError> {
        let (Some(model), Some(api_key)) = (lookup("POSTLOOP_EMBEDDING_MODEL"), lookup("OPENAI_API_KEY"))
        else {
            return Ok(None);
        };
        let timeout = secs_or(&lookup, "POSTLOOP_EMBEDDING_TIMEOUT_SECS", Duration::from_secs(15))?;
        if timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "POSTLOOP_EMBEDDING_TIMEOUT_SECS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(Some(Self {
            api_key: SecretString::from(api_key),
            model,
            base_url: lookup("POSTLOOP_EMBEDDING_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            timeout,
        }))
    }
}

/// Hosted table configuration. Absent ⇒ local libSQL records table.
#[derive(Debug, Clone)]
pub struct AirtableConfig {
    pub api_key: SecretString,
    pub base_id: String,
    pub table_name: String,
    /// Column holding the loop status. Unset ⇒ status is derived from feedback.
    pub status_field: Option<String>,
}

impl AirtableConfig {
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        Some(Self {
            api_key: SecretString::from(lookup("AIRTABLE_API_KEY")?),
            base_id: lookup("AIRTABLE_BASE_ID")?,
            table_name: lookup("AIRTABLE_TABLE_NAME")?,
            status_field: lookup("AIRTABLE_STATUS_FIELD"),
        })
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("'{raw}': {e}"),
    })
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn secs_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    parse_or(lookup, key, default.as_secs()).map(Duration::from_secs)
}
