//! Driver configuration
//!
//! Defaults match what a bare `DriverConfig::default()` caller expects; every
//! field can also be supplied through `MIGRATE_*` environment variables.

use std::env;
use serde::{Deserialize, Serialize};

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {field}: expected {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
}

/// Connection pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: u64,
    pub idle_timeout: Option<u64>,
    pub max_lifetime: Option<u64>,
    pub test_before_acquire: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: 30,
            idle_timeout: Some(600), // 10 minutes
            max_lifetime: Some(1800), // 30 minutes
            test_before_acquire: true,
        }
    }
}

/// Migration driver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Table tracking installed migrations, optionally schema-qualified
    pub version_table: String,
    /// Lines of script shown before and after a failing line
    pub context_lines: usize,
    /// Fail a revert whose version row does not exist
    pub strict_revert: bool,
    /// Principal recorded in `installed_by`; resolved from the environment when unset
    pub acting_principal: Option<String>,
    pub pool: PoolConfig,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            version_table: "schema_version".to_string(),
            context_lines: 5,
            strict_revert: false,
            acting_principal: None,
            pool: PoolConfig::default(),
        }
    }
}

impl DriverConfig {
    /// Build a configuration from `MIGRATE_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let version_table = get_env_or_default("MIGRATE_VERSION_TABLE", &defaults.version_table);
        crate::security::validate_table_name(&version_table)?;

        let context_lines = parse_env("MIGRATE_CONTEXT_LINES", "context_lines", "a non-negative number of lines")?
            .unwrap_or(defaults.context_lines);

        let strict_revert = parse_env("MIGRATE_STRICT_REVERT", "strict_revert", "true or false")?
            .unwrap_or(defaults.strict_revert);

        let max_connections = parse_env("MIGRATE_MAX_CONNECTIONS", "max_connections", "a positive number")?
            .unwrap_or(defaults.pool.max_connections);
        if max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_connections".to_string(),
                value: "0".to_string(),
                expected: "a positive number".to_string(),
            });
        }

        let acting_principal = env::var("MIGRATE_INSTALLED_BY")
            .ok()
            .filter(|name| !name.trim().is_empty());

        Ok(Self {
            version_table,
            context_lines,
            strict_revert,
            acting_principal,
            pool: PoolConfig {
                max_connections,
                ..defaults.pool
            },
        })
    }

    pub fn with_version_table(mut self, table: impl Into<String>) -> Self {
        self.version_table = table.into();
        self
    }

    pub fn with_context_lines(mut self, lines: usize) -> Self {
        self.context_lines = lines;
        self
    }

    pub fn with_strict_revert(mut self, strict: bool) -> Self {
        self.strict_revert = strict;
        self
    }

    pub fn with_acting_principal(mut self, principal: impl Into<String>) -> Self {
        self.acting_principal = Some(principal.into());
        self
    }

    /// Check the parts of the configuration that are used to build SQL
    pub fn validate(&self) -> Result<(), ConfigError> {
        crate::security::validate_table_name(&self.version_table)?;
        if self.pool.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_connections".to_string(),
                value: "0".to_string(),
                expected: "a positive number".to_string(),
            });
        }
        Ok(())
    }

    /// The explicit principal, else `$USER`, else `$USERNAME`, else `"unknown"`
    pub fn resolve_acting_principal(&self) -> String {
        first_principal([
            self.acting_principal.clone(),
            env::var("USER").ok(),
            env::var("USERNAME").ok(),
        ])
    }
}

/// First candidate that is not blank, else `"unknown"`
fn first_principal(candidates: impl IntoIterator<Item = Option<String>>) -> String {
    candidates
        .into_iter()
        .flatten()
        .find(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn get_env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T: std::str::FromStr>(key: &str, field: &str, expected: &str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                field: field.to_string(),
                value: raw,
                expected: expected.to_string(),
            }),
        Err(_) => Ok(None),
    }
}
