//! Core Database Backend Traits
//!
//! This module defines the seam between the migration executor and a concrete
//! database engine. Engines classify their own failures into [`EngineError`]
//! before handing them back, so nothing above this layer needs to know which
//! driver crate produced an error.

use std::fmt;
use std::time::Duration;
use async_trait::async_trait;

/// Structured diagnostic returned by a database engine
///
/// `position` is the engine's 1-based character position into the statement
/// text that failed, when the engine reports one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    pub severity: Option<String>,
    pub code: Option<String>,
    pub message: String,
    pub position: Option<usize>,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            severity: None,
            code: None,
            message: message.into(),
            position: None,
        }
    }

    pub fn with_severity(mut self, severity: impl Into<String>) -> Self {
        self.severity = Some(severity.into());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_position(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }

    /// SQLSTATE class 23: integrity constraint violation
    pub fn is_constraint_violation(&self) -> bool {
        self.code.as_deref().is_some_and(|code| code.starts_with("23"))
    }

    /// SQLSTATE 23505: unique_violation
    pub fn is_unique_violation(&self) -> bool {
        self.code.as_deref() == Some("23505")
    }

    /// `<severity> <code>: <message>`, leaving out the parts the engine did not supply
    pub fn headline(&self) -> String {
        match (&self.severity, &self.code) {
            (Some(severity), Some(code)) => format!("{} {}: {}", severity, code, self.message),
            (Some(severity), None) => format!("{}: {}", severity, self.message),
            (None, Some(code)) => format!("{}: {}", code, self.message),
            (None, None) => self.message.clone(),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.headline())
    }
}

impl std::error::Error for EngineError {}

/// Database value enumeration for type-safe parameter binding
#[derive(Debug, Clone, PartialEq)]
pub enum DatabaseValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    String(String),
}

impl DatabaseValue {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, DatabaseValue::Null)
    }

    /// Integer view of the value, widening `Int32`
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            DatabaseValue::Int32(i) => Some(*i as i64),
            DatabaseValue::Int64(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            DatabaseValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for DatabaseValue {
    fn from(value: bool) -> Self {
        DatabaseValue::Bool(value)
    }
}

impl From<i32> for DatabaseValue {
    fn from(value: i32) -> Self {
        DatabaseValue::Int32(value)
    }
}

impl From<i64> for DatabaseValue {
    fn from(value: i64) -> Self {
        DatabaseValue::Int64(value)
    }
}

impl From<String> for DatabaseValue {
    fn from(value: String) -> Self {
        DatabaseValue::String(value)
    }
}

impl From<&str> for DatabaseValue {
    fn from(value: &str) -> Self {
        DatabaseValue::String(value.to_string())
    }
}

impl<T> From<Option<T>> for DatabaseValue
where
    T: Into<DatabaseValue>,
{
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => v.into(),
            None => DatabaseValue::Null,
        }
    }
}

/// Abstract database transaction trait
///
/// A transaction must end in exactly one of `commit` or `rollback`; both
/// consume it.
#[async_trait]
pub trait DatabaseTransaction: Send {
    /// Execute a parameterized statement and return the affected row count
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<u64, EngineError>;

    /// Execute a possibly multi-statement script without parameters
    async fn execute_script(&mut self, script: &str) -> Result<(), EngineError>;

    /// Commit the transaction
    async fn commit(self: Box<Self>) -> Result<(), EngineError>;

    /// Rollback the transaction
    async fn rollback(self: Box<Self>) -> Result<(), EngineError>;
}

/// Abstract database connection pool trait
#[async_trait]
pub trait DatabasePool: Send + Sync {
    /// Begin a transaction from the pool
    async fn begin_transaction(&self) -> Result<Box<dyn DatabaseTransaction>, EngineError>;

    /// Execute a statement directly on the pool
    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> Result<u64, EngineError>;

    /// Fetch the first column of the first row as an integer scalar
    ///
    /// `None` when no row matched, `Some(DatabaseValue::Null)` for a SQL NULL.
    async fn fetch_optional_value(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> Result<Option<DatabaseValue>, EngineError>;

    /// Round-trip a trivial query and report how long it took
    async fn health_check(&self) -> Result<Duration, EngineError>;

    /// Close the pool
    async fn close(&self);
}
