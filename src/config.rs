//! Engine configuration.
//!
//! One immutable [`Config`] value is constructed at process start and
//! threaded through component constructors. Environment variables
//! override the compiled-in defaults; nothing reads the environment
//! after startup.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Engine configuration, constructed once at startup.
///
/// # Examples
///
/// ```
/// use regscan_rs::config::Config;
///
/// let config = Config::default();
/// assert_eq!(config.max_chunk_tokens, 1500);
/// assert_eq!(config.similarity_threshold, 0.7);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the SQLite database file.
    pub database_path: PathBuf,

    /// Directory for temporary clone working trees.
    pub temp_clone_path: PathBuf,

    /// Maximum tokens per chunk before line-aligned splitting.
    pub max_chunk_tokens: usize,

    /// Minimum tokens for a chunk to be kept.
    pub min_chunk_tokens: usize,

    /// Files larger than this are skipped by the walker.
    pub max_file_size_mb: u64,

    /// Embedding dimension, fixed across the deployment.
    pub embedding_dimension: usize,

    /// Minimum similarity (`1 - distance`) for a retrieval hit to enter
    /// adjudication.
    pub similarity_threshold: f32,

    /// Retrieval depth for rule-to-code search.
    pub top_k: usize,

    /// Queue name tag recorded on jobs.
    pub queue_name: String,

    /// Job lease duration in seconds.
    pub job_timeout_secs: u64,

    /// Maximum queue retries before a job fails terminally.
    pub max_job_retries: u32,

    /// TTL for cached embeddings in seconds.
    pub cache_ttl_embeddings_secs: u64,

    /// TTL for cached summaries in seconds.
    pub cache_ttl_summary_secs: u64,

    /// Embedding provider quota, calls per minute.
    pub rate_limit_embeddings: u32,

    /// LLM provider quota, calls per minute.
    pub rate_limit_llm: u32,

    /// Number of background workers in the pool.
    pub worker_count: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("regscan.db"),
            temp_clone_path: std::env::temp_dir().join("regscan-clones"),
            max_chunk_tokens: 1500,
            min_chunk_tokens: 50,
            max_file_size_mb: 10,
            embedding_dimension: 1536,
            similarity_threshold: 0.7,
            top_k: 10,
            queue_name: "compliance:jobs".to_string(),
            job_timeout_secs: 3600,
            max_job_retries: 3,
            cache_ttl_embeddings_secs: 86_400,
            cache_ttl_summary_secs: 86_400,
            rate_limit_embeddings: 3500,
            rate_limit_llm: 500,
            worker_count: 4,
        }
    }
}

impl Config {
    /// Builds a configuration from environment overrides on the defaults.
    ///
    /// Recognized variables are prefixed `REGSCAN_` and match the field
    /// names upper-cased (e.g. `REGSCAN_MAX_CHUNK_TOKENS`).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a variable is present but fails to
    /// parse, or when the resulting configuration is invalid.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("REGSCAN_DATABASE_PATH") {
            config.database_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("REGSCAN_TEMP_CLONE_PATH") {
            config.temp_clone_path = PathBuf::from(v);
        }
        parse_env("REGSCAN_MAX_CHUNK_TOKENS", &mut config.max_chunk_tokens)?;
        parse_env("REGSCAN_MIN_CHUNK_TOKENS", &mut config.min_chunk_tokens)?;
        parse_env("REGSCAN_MAX_FILE_SIZE_MB", &mut config.max_file_size_mb)?;
        parse_env("REGSCAN_EMBEDDING_DIMENSION", &mut config.embedding_dimension)?;
        parse_env(
            "REGSCAN_SIMILARITY_THRESHOLD",
            &mut config.similarity_threshold,
        )?;
        parse_env("REGSCAN_TOP_K", &mut config.top_k)?;
        if let Ok(v) = std::env::var("REGSCAN_QUEUE_NAME") {
            config.queue_name = v;
        }
        parse_env("REGSCAN_JOB_TIMEOUT", &mut config.job_timeout_secs)?;
        parse_env("REGSCAN_MAX_JOB_RETRIES", &mut config.max_job_retries)?;
        parse_env(
            "REGSCAN_CACHE_TTL_EMBEDDINGS",
            &mut config.cache_ttl_embeddings_secs,
        )?;
        parse_env(
            "REGSCAN_CACHE_TTL_SUMMARY",
            &mut config.cache_ttl_summary_secs,
        )?;
        parse_env(
            "REGSCAN_RATE_LIMIT_EMBEDDINGS",
            &mut config.rate_limit_embeddings,
        )?;
        parse_env("REGSCAN_RATE_LIMIT_LLM", &mut config.rate_limit_llm)?;
        parse_env("REGSCAN_WORKER_COUNT", &mut config.worker_count)?;

        config.validate()?;
        Ok(config)
    }

    /// Validates internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when token bounds are inverted, the
    /// similarity threshold is out of `[0, 1]`, or the embedding
    /// dimension is zero.
    pub fn validate(&self) -> Result<()> {
        if self.min_chunk_tokens >= self.max_chunk_tokens {
            return Err(Error::Config {
                message: format!(
                    "min_chunk_tokens ({}) must be less than max_chunk_tokens ({})",
                    self.min_chunk_tokens, self.max_chunk_tokens
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(Error::Config {
                message: format!(
                    "similarity_threshold {} outside [0, 1]",
                    self.similarity_threshold
                ),
            });
        }
        if self.embedding_dimension == 0 {
            return Err(Error::Config {
                message: "embedding_dimension must be non-zero".to_string(),
            });
        }
        if self.worker_count == 0 {
            return Err(Error::Config {
                message: "worker_count must be non-zero".to_string(),
            });
        }
        Ok(())
    }

    /// Job lease duration.
    #[must_use]
    pub const fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// Maximum file size in bytes; files at exactly this size are
    /// included, one byte over is skipped.
    #[must_use]
    pub const fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

/// Parses an environment variable into `slot` when present.
fn parse_env<T: std::str::FromStr>(name: &str, slot: &mut T) -> Result<()> {
    if let Ok(raw) = std::env::var(name) {
        *slot = raw.parse().map_err(|_| Error::Config {
            message: format!("invalid value for {name}: {raw}"),
        })?;
    }
    Ok(())
}

/// Operation timeouts for external collaborators.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    /// Embedding and LLM call timeout.
    pub provider: Duration,
    /// Repository clone timeout.
    pub clone: Duration,
    /// Database operation timeout.
    pub db: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            provider: Duration::from_secs(30),
            clone: Duration::from_secs(300),
            db: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.max_chunk_tokens, 1500);
        assert_eq!(config.min_chunk_tokens, 50);
        assert_eq!(config.max_file_size_mb, 10);
        assert_eq!(config.embedding_dimension, 1536);
        assert!((config.similarity_threshold - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.top_k, 10);
        assert_eq!(config.max_job_retries, 3);
        assert_eq!(config.queue_name, "compliance:jobs");
    }

    #[test]
    fn test_validate_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_inverted_token_bounds() {
        let config = Config {
            min_chunk_tokens: 2000,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_threshold_range() {
        let config = Config {
            similarity_threshold: 1.5,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_dimension() {
        let config = Config {
            embedding_dimension: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_file_size_bytes() {
        let config = Config {
            max_file_size_mb: 2,
            ..Config::default()
        };
        assert_eq!(config.max_file_size_bytes(), 2 * 1024 * 1024);
    }

    #[test]
    fn test_timeouts_defaults() {
        let t = Timeouts::default();
        assert_eq!(t.provider.as_secs(), 30);
        assert_eq!(t.clone.as_secs(), 300);
        assert_eq!(t.db.as_secs(), 60);
    }
}
