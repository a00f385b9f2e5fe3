//! Configuration for the theorydb object-document mapper.
//!
//! The main entry point is [`TheoryConfig`], loaded with [`load_config`]:
//! serde defaults, overlaid by an optional `theorydb.yaml`, overlaid by
//! `THEORYDB_*` environment variables (nested keys joined with `__`, e.g.
//! `THEORYDB_BATCH__GET_SIZE=10`).

use std::path::Path;

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use theorydb_core::validate::Limits;

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration sources could not be read or merged.
    #[error("failed to load config: {0}")]
    Load(#[from] figment::Error),

    /// A configuration value is out of range.
    #[error("invalid configuration value for key '{key}': {reason}")]
    InvalidValue {
        /// The configuration key that had an invalid value.
        key: &'static str,
        /// Why the value is invalid.
        reason: &'static str,
    },
}

/// A specialized `Result` type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Validator size limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum length of a field-name segment.
    #[serde(default = "default_max_field_name_len")]
    pub max_field_name_len: usize,

    /// Maximum length of a string value.
    #[serde(default = "default_max_string_value_len")]
    pub max_string_value_len: usize,

    /// Maximum nesting depth of a value.
    #[serde(default = "default_max_value_depth")]
    pub max_value_depth: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_field_name_len: default_max_field_name_len(),
            max_string_value_len: default_max_string_value_len(),
            max_value_depth: default_max_value_depth(),
        }
    }
}

fn default_max_field_name_len() -> usize {
    255
}

fn default_max_string_value_len() -> usize {
    400_000
}

fn default_max_value_depth() -> usize {
    32
}

/// Batch operation sizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Items per batch-write request (the store caps this at 25).
    #[serde(default = "default_batch_size")]
    pub write_size: usize,

    /// Keys per batch-get request.
    #[serde(default = "default_batch_size")]
    pub get_size: usize,

    /// How many extra passes to retry unprocessed items before surfacing
    /// them.
    #[serde(default = "default_unprocessed_passes")]
    pub unprocessed_passes: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            write_size: default_batch_size(),
            get_size: default_batch_size(),
            unprocessed_passes: default_unprocessed_passes(),
        }
    }
}

fn default_batch_size() -> usize {
    25
}

fn default_unprocessed_passes() -> usize {
    3
}

/// Transactional write limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionConfig {
    /// Maximum items per transaction (the store's documented cap).
    #[serde(default = "default_transaction_max_items")]
    pub max_items: usize,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            max_items: default_transaction_max_items(),
        }
    }
}

fn default_transaction_max_items() -> usize {
    100
}

// ---------------------------------------------------------------------------
// Main config struct
// ---------------------------------------------------------------------------

/// The full theorydb configuration.
///
/// All fields use serde defaults so a partially-specified YAML file
/// deserializes with sensible values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TheoryConfig {
    /// Optional prefix applied to every resolved table name
    /// (e.g. `"staging-"`).
    #[serde(default)]
    pub table_prefix: Option<String>,

    /// Validator limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Batch sizes.
    #[serde(default)]
    pub batch: BatchConfig,

    /// Transaction limits.
    #[serde(default)]
    pub transaction: TransactionConfig,
}

impl TheoryConfig {
    /// The validator limits as the core crate consumes them.
    pub fn limits(&self) -> Limits {
        Limits {
            max_field_name_len: self.limits.max_field_name_len,
            max_string_value_len: self.limits.max_string_value_len,
            max_value_depth: self.limits.max_value_depth,
        }
    }

    /// Applies the configured prefix to a resolved table name.
    pub fn qualify_table(&self, table: &str) -> String {
        match &self.table_prefix {
            Some(prefix) => format!("{prefix}{table}"),
            None => table.to_string(),
        }
    }

    /// Checks the configured values against the store's hard caps.
    pub fn validate(&self) -> Result<()> {
        if self.batch.write_size == 0 || self.batch.write_size > 25 {
            return Err(ConfigError::InvalidValue {
                key: "batch.write_size",
                reason: "must be between 1 and 25",
            });
        }
        if self.batch.get_size == 0 || self.batch.get_size > 100 {
            return Err(ConfigError::InvalidValue {
                key: "batch.get_size",
                reason: "must be between 1 and 100",
            });
        }
        if self.transaction.max_items == 0 || self.transaction.max_items > 100 {
            return Err(ConfigError::InvalidValue {
                key: "transaction.max_items",
                reason: "must be between 1 and 100",
            });
        }
        if self.limits.max_field_name_len == 0 {
            return Err(ConfigError::InvalidValue {
                key: "limits.max_field_name_len",
                reason: "must be positive",
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Loads configuration: defaults, then the YAML file at `path` (missing
/// files contribute nothing), then `THEORYDB_*` environment variables.
pub fn load_config(path: Option<&Path>) -> Result<TheoryConfig> {
    let mut figment = Figment::from(Serialized::defaults(TheoryConfig::default()));
    if let Some(path) = path {
        figment = figment.merge(Yaml::file(path));
    }
    let config: TheoryConfig = figment
        .merge(Env::prefixed("THEORYDB_").split("__"))
        .extract()?;
    config.validate()?;
    Ok(config)
}
