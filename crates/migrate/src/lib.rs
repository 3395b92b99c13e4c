//! # elif-migrate: Transactional Migration Driver for elif.rs
//!
//! Runs one migration script at a time against a database, inside a single
//! transaction, while keeping a version-tracking table in step with it.
//! Progress and failures stream back to the caller over a channel; script
//! failures are rendered with the line and column the database pointed at.
//!
//! Deciding which migrations to run, and in what order, is left to the
//! orchestrator that holds the [`Driver`].

pub mod backends;
pub mod config;
pub mod diagnostic;
pub mod driver;
pub mod error;
pub mod executor;
pub mod file;
pub mod security;
pub mod version_store;

#[cfg(test)]
mod testing;

// Re-export core traits and types
pub use backends::{DatabasePool, DatabaseTransaction, DatabaseValue, EngineError, PostgresPool};
pub use config::{ConfigError, DriverConfig, PoolConfig};
pub use diagnostic::DiagnosticRenderer;
pub use driver::{Driver, DriverFactory, DriverRegistry, PostgresDriver};
pub use error::{DriverError, DriverResult};
pub use executor::{MigrationEvent, MigrationEvents, MigrationExecutor, RunReport};
pub use file::{Direction, MigrationFile};
pub use version_store::{VersionRecord, VersionStore, NO_VERSION};
