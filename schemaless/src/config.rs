//! Engine configuration loading
//!
//! Loads configuration from `~/.config/schemaless/schemaless.toml` (or the
//! `SCHEMALESS_CONFIG` env). Every field has a default so a missing file or a
//! partial file is fine.

use crate::apply::ListAlignment;
use crate::errors::{Result, SchemalessError};
use serde::Deserialize;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for the translation engine
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SchemalessConfig {
    /// Template generator retry and payload settings
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Generation lock and polling settings
    #[serde(default)]
    pub single_flight: SingleFlightConfig,

    /// Template cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Sub-standard fan-out settings
    #[serde(default)]
    pub fanout: FanoutConfig,

    /// Forward application settings
    #[serde(default)]
    pub apply: ApplyConfig,
}

// ─────────────────────────────────────────────────────────────────────────────
// [generation]
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// Total generator attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Fixed delay between attempts
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Inputs larger than this are sent to the generator as a shape skeleton
    #[serde(default = "default_max_input_bytes")]
    pub max_input_bytes: usize,
}

fn default_max_attempts() -> usize {
    5
}

fn default_retry_delay_ms() -> u64 {
    3000
}

fn default_max_input_bytes() -> usize {
    5000
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            max_input_bytes: default_max_input_bytes(),
        }
    }
}

impl GenerationConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// [single_flight]
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Clone)]
pub struct SingleFlightConfig {
    /// Lifetime of the `<key>-started` lock entry
    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,

    /// Delay between result probes while another caller generates
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Number of result probes before generating anyway
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: usize,

    /// Upper bound of the random delay before the lock check (0 disables)
    #[serde(default = "default_max_jitter_ms")]
    pub max_jitter_ms: u64,
}

fn default_lock_ttl_secs() -> u64 {
    60
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_poll_attempts() -> usize {
    6
}

fn default_max_jitter_ms() -> u64 {
    500
}

impl Default for SingleFlightConfig {
    fn default() -> Self {
        Self {
            lock_ttl_secs: default_lock_ttl_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_attempts: default_poll_attempts(),
            max_jitter_ms: default_max_jitter_ms(),
        }
    }
}

impl SingleFlightConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// [cache]
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Lifetime of a learned template in the cache
    #[serde(default = "default_template_ttl_secs")]
    pub template_ttl_secs: u64,

    /// Maximum number of chunks a single value may be split into
    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,
}

fn default_template_ttl_secs() -> u64 {
    86_400
}

fn default_max_chunks() -> usize {
    50
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            template_ttl_secs: default_template_ttl_secs(),
            max_chunks: default_max_chunks(),
        }
    }
}

impl CacheConfig {
    pub fn template_ttl(&self) -> Duration {
        Duration::from_secs(self.template_ttl_secs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// [fanout]
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Clone)]
pub struct FanoutConfig {
    /// Concurrent sub-standard translations
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Items beyond this are dropped with a warning
    #[serde(default = "default_max_items")]
    pub max_items: usize,
}

fn default_max_in_flight() -> usize {
    8
}

fn default_max_items() -> usize {
    50
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            max_items: default_max_items(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// [apply]
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ApplyConfig {
    /// How fields of different list lengths are zipped together
    #[serde(default)]
    pub list_alignment: ListAlignment,
}

impl SchemalessConfig {
    /// Environment variable for config path override
    pub const ENV_CONFIG_PATH: &'static str = "SCHEMALESS_CONFIG";

    /// Default config filename
    pub const DEFAULT_CONFIG_FILENAME: &'static str = "schemaless.toml";

    /// Load configuration from file
    ///
    /// Resolution order:
    /// 1. `SCHEMALESS_CONFIG` environment variable
    /// 2. `~/.config/schemaless/schemaless.toml`
    ///
    /// If the config file doesn't exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let path = Self::resolve_config_path();

        if !path.exists() {
            tracing::info!(
                path = %path.display(),
                "schemaless config not found, using defaults"
            );
            return Ok(Self::default());
        }

        Self::load_from_path(&path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SchemalessError::config_with_source(
                format!("failed to read config at {}", path.display()),
                e,
            )
        })?;

        Self::parse(&contents)
    }

    /// Parse configuration from TOML string
    pub fn parse(contents: &str) -> Result<Self> {
        let cfg: SchemalessConfig = toml::from_str(contents)
            .map_err(|e| SchemalessError::config_with_source("failed to parse config", e))?;

        cfg.validate()?;
        Ok(cfg)
    }

    fn resolve_config_path() -> PathBuf {
        if let Ok(path) = std::env::var(Self::ENV_CONFIG_PATH) {
            return PathBuf::from(path);
        }

        dirs::home_dir()
            .map(|h| {
                h.join(".config")
                    .join("schemaless")
                    .join(Self::DEFAULT_CONFIG_FILENAME)
            })
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_CONFIG_FILENAME))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.generation.max_attempts == 0 {
            return Err(SchemalessError::config(
                "generation.max_attempts must be at least 1",
            ));
        }
        if self.fanout.max_in_flight == 0 {
            return Err(SchemalessError::config(
                "fanout.max_in_flight must be at least 1",
            ));
        }

        if self.single_flight.poll_attempts == 0 {
            tracing::warn!(
                "single_flight.poll_attempts is 0; concurrent callers will generate without waiting"
            );
        }

        let poll_window_ms = self
            .single_flight
            .poll_interval_ms
            .saturating_mul(self.single_flight.poll_attempts as u64);
        if self.single_flight.lock_ttl_secs.saturating_mul(1000) < poll_window_ms {
            tracing::warn!(
                lock_ttl_secs = self.single_flight.lock_ttl_secs,
                poll_window_ms,
                "lock expires before waiters stop polling"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let cfg = SchemalessConfig::default();
        assert_eq!(cfg.generation.max_attempts, 5);
        assert_eq!(cfg.generation.retry_delay(), Duration::from_secs(3));
        assert_eq!(cfg.single_flight.poll_attempts, 6);
        assert_eq!(cfg.cache.template_ttl_secs, 86_400);
        assert_eq!(cfg.fanout.max_items, 50);
        assert_eq!(cfg.apply.list_alignment, ListAlignment::PadWithFirst);
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
            [single_flight]
            max_jitter_ms = 0

            [apply]
            list_alignment = "strict"
        "#;

        let cfg = SchemalessConfig::parse(toml).expect("should parse");
        assert_eq!(cfg.single_flight.max_jitter_ms, 0);
        assert_eq!(cfg.apply.list_alignment, ListAlignment::Strict);
        // Defaults should be applied
        assert_eq!(cfg.single_flight.poll_interval_ms, 5000);
        assert_eq!(cfg.generation.max_input_bytes, 5000);
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let toml = r#"
            [generation]
            max_attempts = 0
        "#;

        let err = SchemalessConfig::parse(toml).expect_err("zero attempts must fail");
        assert_eq!(err.category().as_str(), "CONFIG_ERROR");
    }

    #[test]
    fn test_huge_timings_validate() {
        let toml = r#"
            [single_flight]
            lock_ttl_secs = 9223372036854775807
            poll_interval_ms = 9223372036854775807
            poll_attempts = 4
        "#;

        let cfg = SchemalessConfig::parse(toml).expect("large timings are valid");
        assert_eq!(cfg.single_flight.poll_attempts, 4);
        assert_eq!(cfg.single_flight.lock_ttl_secs, i64::MAX as u64);
    }

    #[test]
    fn test_rejects_unknown_alignment() {
        let toml = r#"
            [apply]
            list_alignment = "truncate"
        "#;

        assert!(SchemalessConfig::parse(toml).is_err());
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            "[fanout]\nmax_in_flight = 2\nmax_items = 10\n\n[cache]\nmax_chunks = 4"
        )
        .expect("write config");

        let cfg = SchemalessConfig::load_from_path(file.path()).expect("should load");
        assert_eq!(cfg.fanout.max_in_flight, 2);
        assert_eq!(cfg.fanout.max_items, 10);
        assert_eq!(cfg.cache.max_chunks, 4);
    }

    #[test]
    fn test_load_from_missing_path_is_config_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = SchemalessConfig::load_from_path(&dir.path().join("absent.toml"))
            .expect_err("missing file");
        assert!(err.to_string().contains("failed to read config"));
    }
}
