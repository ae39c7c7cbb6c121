//! Configuration loading and typed config structures for the engine.
//!
//! The canonical configuration lives in `levelup-config.yaml` at the
//! project root. This module defines strongly-typed structs that mirror the
//! YAML structure, and provides a loader that reads and validates the file.
//! Every field has a default, so an empty or missing file is a valid
//! configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use levelup_store::{RetryPolicy, StoreOptions};
use levelup_types::GuildConfig;
use serde::Deserialize;

use crate::curve::{CurveConfig, CurveError};

/// Environment variable overriding `nats.url`.
pub const ENV_NATS_URL: &str = "NATS_URL";

/// Environment variable overriding `store.path`.
pub const ENV_STORE_PATH: &str = "LEVELUP_STORE_PATH";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The level curve parameters are invalid.
    #[error("invalid level curve: {0}")]
    Curve(#[from] CurveError),

    /// A value is outside its accepted range.
    #[error("invalid config value `{field}`: {reason}")]
    Invalid {
        /// Dotted path of the offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level engine configuration.
///
/// Mirrors the structure of `levelup-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct EngineConfig {
    /// Progress store location and flush behavior.
    #[serde(default)]
    pub store: StoreConfig,

    /// Level curve and daily bonus window.
    #[serde(default)]
    pub leveling: LevelingConfig,

    /// Configuration given to guilds the first time they are referenced.
    #[serde(default)]
    pub guild_defaults: GuildConfig,

    /// NATS connection and subjects.
    #[serde(default)]
    pub nats: NatsConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Load configuration from `path`, falling back to defaults if the file
    /// does not exist.
    ///
    /// Environment overrides are applied and the result is validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = if path.exists() {
            Self::from_file(path)?
        } else {
            let mut config = Self::default();
            config.apply_env_overrides();
            config
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file at the given path.
    ///
    /// Environment variables override YAML values:
    /// - `NATS_URL` overrides `nats.url`
    /// - `LEVELUP_STORE_PATH` overrides `store.path`
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, applying environment overrides.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Override settings with environment variables when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var(ENV_NATS_URL) {
            self.nats.url = val;
        }
        if let Ok(val) = std::env::var(ENV_STORE_PATH) {
            self.store.path = PathBuf::from(val);
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.leveling.curve.build()?;

        if self.store.retry_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "store.retry_attempts",
                reason: "at least one write attempt is required".to_owned(),
            });
        }
        if self.nats.subject_prefix.trim().is_empty() || self.nats.subject_prefix.contains(['*', '>', ' ']) {
            return Err(ConfigError::Invalid {
                field: "nats.subject_prefix",
                reason: format!("`{}` is not a literal subject token", self.nats.subject_prefix),
            });
        }
        if self.nats.dispatch_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "nats.dispatch_timeout_ms",
                reason: "must be greater than zero".to_owned(),
            });
        }
        if !self.guild_defaults.xp_per_event.is_valid() {
            return Err(ConfigError::Invalid {
                field: "guild_defaults.xp_per_event",
                reason: "range minimum exceeds maximum".to_owned(),
            });
        }
        if crate::admin::parse_color(&self.guild_defaults.cosmetic.embed_color).is_err() {
            return Err(ConfigError::Invalid {
                field: "guild_defaults.cosmetic.embed_color",
                reason: format!("`{}` is not a #RRGGBB color", self.guild_defaults.cosmetic.embed_color),
            });
        }
        Ok(())
    }

    /// Store options derived from this configuration.
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            path: (!self.store.in_memory).then(|| self.store.path.clone()),
            retry: RetryPolicy {
                max_attempts: self.store.retry_attempts,
                initial_backoff: Duration::from_millis(self.store.retry_initial_backoff_ms),
                max_backoff: Duration::from_millis(self.store.retry_max_backoff_ms),
            },
            guild_defaults: self.guild_defaults.clone(),
            pretty: self.store.pretty,
        }
    }
}

/// Progress store settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    /// State file path.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Keep state in memory only (dry runs).
    #[serde(default)]
    pub in_memory: bool,

    /// Write indented JSON.
    #[serde(default = "default_true")]
    pub pretty: bool,

    /// Write attempts per flush before the store is marked dirty.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Wait after the first failed write, in milliseconds.
    #[serde(default = "default_retry_initial_backoff_ms")]
    pub retry_initial_backoff_ms: u64,

    /// Upper bound on the wait between writes, in milliseconds.
    #[serde(default = "default_retry_max_backoff_ms")]
    pub retry_max_backoff_ms: u64,

    /// How often a dirty store retries its flush, in seconds.
    #[serde(default = "default_dirty_flush_interval_secs")]
    pub dirty_flush_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            in_memory: false,
            pretty: true,
            retry_attempts: default_retry_attempts(),
            retry_initial_backoff_ms: default_retry_initial_backoff_ms(),
            retry_max_backoff_ms: default_retry_max_backoff_ms(),
            dirty_flush_interval_secs: default_dirty_flush_interval_secs(),
        }
    }
}

/// Level curve and daily bonus settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LevelingConfig {
    /// XP-to-level curve shared by every guild.
    #[serde(default)]
    pub curve: CurveConfig,

    /// Hours between two daily bonus claims.
    #[serde(default = "default_daily_cooldown_hours")]
    pub daily_cooldown_hours: u64,
}

impl Default for LevelingConfig {
    fn default() -> Self {
        Self {
            curve: CurveConfig::default(),
            daily_cooldown_hours: default_daily_cooldown_hours(),
        }
    }
}

/// NATS connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NatsConfig {
    /// Server URL.
    #[serde(default = "default_nats_url")]
    pub url: String,

    /// First token of every subject.
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,

    /// How long to wait for a reward delivery receipt, in milliseconds.
    #[serde(default = "default_dispatch_timeout_ms")]
    pub dispatch_timeout_ms: u64,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: default_nats_url(),
            subject_prefix: default_subject_prefix(),
            dispatch_timeout_ms: default_dispatch_timeout_ms(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable output.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("levelup-data.json")
}

const fn default_true() -> bool {
    true
}

const fn default_retry_attempts() -> u32 {
    3
}

const fn default_retry_initial_backoff_ms() -> u64 {
    50
}

const fn default_retry_max_backoff_ms() -> u64 {
    1_000
}

const fn default_dirty_flush_interval_secs() -> u64 {
    30
}

const fn default_daily_cooldown_hours() -> u64 {
    24
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_owned()
}

fn default_subject_prefix() -> String {
    "levelup".to_owned()
}

const fn default_dispatch_timeout_ms() -> u64 {
    3_000
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
mod tests {
    use levelup_types::XpReward;

    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.leveling.curve, CurveConfig::Sqrt { k: 100 });
        assert_eq!(config.leveling.daily_cooldown_hours, 24);
        assert_eq!(config.store.retry_attempts, 3);
        assert_eq!(config.nats.subject_prefix, "levelup");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.guild_defaults.enabled);
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r##"
store:
  path: "/var/lib/levelup/state.json"
  pretty: false
  retry_attempts: 5
  retry_initial_backoff_ms: 20
  retry_max_backoff_ms: 400
  dirty_flush_interval_secs: 10

leveling:
  curve:
    kind: triangular
    step: 100
  daily_cooldown_hours: 20

guild_defaults:
  enabled: false
  xp_per_event: [5, 15]
  cooldown_seconds: 60
  dm_fallback_enabled: true
  daily_bonus_xp: 250
  role_reward_policy: backfill
  cosmetic:
    embed_color: "#FF0000"
    card_theme: "neon"

nats:
  subject_prefix: "xp"
  dispatch_timeout_ms: 1500

logging:
  level: "debug"
  format: json
"##;

        let config = EngineConfig::parse(yaml);
        assert!(config.is_ok(), "parse failed: {config:?}");
        let config = config.ok().unwrap_or_default();

        assert!(!config.store.pretty);
        assert_eq!(config.store.retry_attempts, 5);
        assert_eq!(config.leveling.curve, CurveConfig::Triangular { step: 100 });
        assert_eq!(config.leveling.daily_cooldown_hours, 20);
        assert!(!config.guild_defaults.enabled);
        assert_eq!(config.guild_defaults.xp_per_event, XpReward::Range(5, 15));
        assert_eq!(config.guild_defaults.cosmetic.card_theme, "neon");
        assert_eq!(config.nats.subject_prefix, "xp");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert!(config.validate().is_ok());

        let options = config.store_options();
        assert_eq!(options.retry.max_attempts, 5);
        assert_eq!(options.retry.initial_backoff, Duration::from_millis(20));
        assert!(!options.pretty);
    }

    #[test]
    fn parse_minimal_yaml() {
        let yaml = "leveling:\n  curve:\n    kind: linear\n    step: 500\n";
        let config = EngineConfig::parse(yaml).ok().unwrap_or_default();

        assert_eq!(config.leveling.curve, CurveConfig::Linear { step: 500 });
        // Everything else uses defaults
        assert_eq!(config.leveling.daily_cooldown_hours, 24);
        assert_eq!(config.guild_defaults.cooldown_seconds, 30);
    }

    #[test]
    fn parse_empty_yaml() {
        assert!(EngineConfig::parse("").is_ok());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = EngineConfig::default();
        config.leveling.curve = CurveConfig::Table {
            thresholds: vec![100, 50],
        };
        assert!(matches!(config.validate(), Err(ConfigError::Curve(_))));

        let mut config = EngineConfig::default();
        config.store.retry_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "store.retry_attempts",
                ..
            })
        ));

        let mut config = EngineConfig::default();
        config.guild_defaults.xp_per_event = XpReward::Range(9, 3);
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.nats.subject_prefix = "levelup.>".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    fn in_memory_store_has_no_path() {
        let mut config = EngineConfig::default();
        config.store.in_memory = true;
        assert!(config.store_options().path.is_none());
    }

    #[test]
    fn load_project_config_file() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("..")
            .join("..")
            .join("levelup-config.yaml");
        if path.exists() {
            let config = EngineConfig::load(&path);
            assert!(config.is_ok(), "Failed to load project config: {config:?}");
        }
    }
}
