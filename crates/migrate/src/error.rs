//! Error types for the migration driver
//!
//! Every failure a run can hit is one of these variants. Errors raised while
//! executing a migration never cross the executor boundary as `Err` values;
//! they travel to the caller as `MigrationEvent::Failed`.

use crate::backends::EngineError;

/// Result type alias for driver operations
pub type DriverResult<T> = Result<T, DriverError>;

/// Error types for driver operations
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// The target database could not be opened or reached
    #[error("Connection error: {0}")]
    Connectivity(String),

    /// The version table could not be ensured
    #[error("Schema error: {0}")]
    Schema(#[source] EngineError),

    /// Begin, commit, or a non-constraint version table write failed
    #[error("Transaction error: {0}")]
    Transaction(#[source] EngineError),

    /// Migration content could not be loaded or checksummed
    #[error("Read error: {0}")]
    Read(String),

    /// A bookkeeping write violated the version table's invariants
    #[error("Constraint error: {0}")]
    Constraint(#[source] EngineError),

    /// The migration body failed; `message` is the rendered, positioned diagnostic
    #[error("{message}")]
    ScriptExecution {
        message: String,
        #[source]
        source: EngineError,
    },

    /// Rolling back after an earlier failure also failed
    #[error("Rollback error: {0}")]
    Rollback(#[source] EngineError),

    /// Reading from the version table failed
    #[error("Query error: {0}")]
    Query(#[source] EngineError),

    /// Invalid configuration or unsupported connection URL
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The driver was used before `initialize` succeeded
    #[error("Driver is not initialized")]
    NotInitialized,

    /// A strict revert found no version row to delete
    #[error("Version {0} is not applied, nothing to revert")]
    NothingToRevert(i32),
}

impl DriverError {
    /// The engine diagnostic behind this error, when there is one
    pub fn engine_error(&self) -> Option<&EngineError> {
        match self {
            DriverError::Schema(e)
            | DriverError::Transaction(e)
            | DriverError::Constraint(e)
            | DriverError::Rollback(e)
            | DriverError::Query(e) => Some(e),
            DriverError::ScriptExecution { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Whether this error came from a rollback attempted after another failure
    pub fn is_rollback_failure(&self) -> bool {
        matches!(self, DriverError::Rollback(_))
    }
}

impl From<crate::config::ConfigError> for DriverError {
    fn from(err: crate::config::ConfigError) -> Self {
        DriverError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_execution_displays_rendered_message() {
        let err = DriverError::ScriptExecution {
            message: "ERROR 42601: syntax error in line 1, column 10:\n\n> 1: SELECT".to_string(),
            source: EngineError::new("syntax error").with_code("42601"),
        };

        assert!(err.to_string().starts_with("ERROR 42601: syntax error in line 1"));
        assert_eq!(err.engine_error().and_then(|e| e.code.as_deref()), Some("42601"));
    }

    #[test]
    fn test_rollback_failure_detection() {
        let err = DriverError::Rollback(EngineError::new("connection reset"));
        assert!(err.is_rollback_failure());
        assert!(!DriverError::NotInitialized.is_rollback_failure());
        assert!(DriverError::Read("missing".to_string()).engine_error().is_none());
    }
}
