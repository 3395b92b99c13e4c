//! In-memory backend for tests
//!
//! Understands exactly the statements `VersionStore` issues. Each transaction
//! works on a private copy of the version rows and script log, published only
//! on commit, so rollback behaviour can be asserted without a database.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use async_trait::async_trait;

use crate::backends::{DatabasePool, DatabaseTransaction, DatabaseValue, EngineError};
use crate::version_store::VersionRecord;

#[derive(Default)]
struct State {
    table_exists: bool,
    create_table_calls: usize,
    rows: BTreeMap<i32, VersionRecord>,
    scripts: Vec<String>,
    open_transactions: usize,
    commits: usize,
    rollbacks: usize,
    closed: bool,
    fail_ddl: Option<EngineError>,
    fail_begin: Option<EngineError>,
    fail_commit: Option<EngineError>,
    fail_rollback: Option<EngineError>,
    fail_bookkeeping: Option<(String, EngineError)>,
    fail_script: Option<ScriptFailure>,
}

#[derive(Clone)]
struct ScriptFailure {
    pattern: String,
    error: EngineError,
    positioned: bool,
}

#[derive(Clone, Default)]
pub struct MemoryPool {
    state: Arc<Mutex<State>>,
}

impl MemoryPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// A pool whose version table already exists
    pub fn with_table() -> Self {
        let pool = Self::new();
        pool.lock().table_exists = true;
        pool
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn fail_ddl(&self, err: EngineError) {
        self.lock().fail_ddl = Some(err);
    }

    pub fn fail_begin(&self, err: EngineError) {
        self.lock().fail_begin = Some(err);
    }

    pub fn fail_commit(&self, err: EngineError) {
        self.lock().fail_commit = Some(err);
    }

    pub fn fail_rollback(&self, err: EngineError) {
        self.lock().fail_rollback = Some(err);
    }

    /// Fail version table writes whose SQL starts with `statement`
    pub fn fail_bookkeeping(&self, statement: &str, err: EngineError) {
        self.lock().fail_bookkeeping = Some((statement.to_string(), err));
    }

    /// Fail any script containing `pattern`, positioned at the pattern unless
    /// `err` already carries a position
    pub fn fail_script(&self, pattern: &str, err: EngineError) {
        self.lock().fail_script = Some(ScriptFailure {
            pattern: pattern.to_string(),
            error: err,
            positioned: true,
        });
    }

    /// Fail any script containing `pattern` with `err` exactly as given
    pub fn fail_script_unpositioned(&self, pattern: &str, err: EngineError) {
        self.lock().fail_script = Some(ScriptFailure {
            pattern: pattern.to_string(),
            error: err,
            positioned: false,
        });
    }

    pub fn create_table_calls(&self) -> usize {
        self.lock().create_table_calls
    }

    pub fn table_exists(&self) -> bool {
        self.lock().table_exists
    }

    pub fn versions(&self) -> Vec<i32> {
        self.lock().rows.keys().copied().collect()
    }

    pub fn record(&self, version: i32) -> Option<VersionRecord> {
        self.lock().rows.get(&version).cloned()
    }

    /// Scripts whose effects have been committed
    pub fn committed_scripts(&self) -> Vec<String> {
        self.lock().scripts.clone()
    }

    pub fn open_transactions(&self) -> usize {
        self.lock().open_transactions
    }

    pub fn commits(&self) -> usize {
        self.lock().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.lock().rollbacks
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

fn undefined_table() -> EngineError {
    EngineError::new("relation \"schema_version\" does not exist")
        .with_severity("ERROR")
        .with_code("42P01")
}

#[async_trait]
impl DatabasePool for MemoryPool {
    async fn begin_transaction(&self) -> Result<Box<dyn DatabaseTransaction>, EngineError> {
        let mut state = self.lock();
        if let Some(err) = state.fail_begin.clone() {
            return Err(err);
        }
        state.open_transactions += 1;

        Ok(Box::new(MemoryTransaction {
            state: Arc::clone(&self.state),
            rows: state.rows.clone(),
            scripts: Vec::new(),
        }))
    }

    async fn execute(&self, sql: &str, _params: &[DatabaseValue]) -> Result<u64, EngineError> {
        let mut state = self.lock();
        if !sql.starts_with("CREATE TABLE IF NOT EXISTS") {
            return Err(EngineError::new(format!("unsupported statement: {}", sql)));
        }
        if let Some(err) = state.fail_ddl.clone() {
            return Err(err);
        }
        state.create_table_calls += 1;
        state.table_exists = true;
        Ok(0)
    }

    async fn fetch_optional_value(
        &self,
        sql: &str,
        _params: &[DatabaseValue],
    ) -> Result<Option<DatabaseValue>, EngineError> {
        let state = self.lock();
        if !sql.starts_with("SELECT MAX(version_rank)") {
            return Err(EngineError::new(format!("unsupported query: {}", sql)));
        }
        if !state.table_exists {
            return Err(undefined_table());
        }
        let max = state.rows.values().map(|r| r.version_rank).max();
        Ok(Some(DatabaseValue::from(max)))
    }

    async fn health_check(&self) -> Result<Duration, EngineError> {
        Ok(Duration::ZERO)
    }

    async fn close(&self) {
        self.lock().closed = true;
    }
}

struct MemoryTransaction {
    state: Arc<Mutex<State>>,
    rows: BTreeMap<i32, VersionRecord>,
    scripts: Vec<String>,
}

impl MemoryTransaction {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }
}

fn int_param(params: &[DatabaseValue], index: usize) -> Result<i32, EngineError> {
    params
        .get(index)
        .and_then(DatabaseValue::as_i64)
        .map(|v| v as i32)
        .ok_or_else(|| EngineError::new(format!("missing integer parameter ${}", index + 1)))
}

fn text_param(params: &[DatabaseValue], index: usize) -> Result<String, EngineError> {
    params
        .get(index)
        .and_then(DatabaseValue::as_str)
        .map(str::to_string)
        .ok_or_else(|| EngineError::new(format!("missing text parameter ${}", index + 1)))
}

#[async_trait]
impl DatabaseTransaction for MemoryTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<u64, EngineError> {
        {
            let state = self.lock();
            if !state.table_exists {
                return Err(undefined_table());
            }
            if let Some((statement, err)) = &state.fail_bookkeeping {
                if sql.starts_with(statement.as_str()) {
                    return Err(err.clone());
                }
            }
        }

        if sql.starts_with("INSERT INTO") {
            let record = VersionRecord {
                version: int_param(params, 0)?,
                version_rank: int_param(params, 1)?,
                installed_rank: int_param(params, 2)?,
                description: text_param(params, 3)?,
                script_type: text_param(params, 4)?,
                script: text_param(params, 5)?,
                checksum: int_param(params, 6)?,
                installed_by: text_param(params, 7)?,
                execution_time: int_param(params, 8)?,
                success: matches!(params.get(9), Some(DatabaseValue::Bool(true))),
            };
            if self.rows.contains_key(&record.version) {
                return Err(EngineError::new(
                    "duplicate key value violates unique constraint \"schema_version_pkey\"",
                )
                .with_severity("ERROR")
                .with_code("23505"));
            }
            self.rows.insert(record.version, record);
            Ok(1)
        } else if sql.starts_with("DELETE FROM") {
            let version = int_param(params, 0)?;
            Ok(self.rows.remove(&version).map_or(0, |_| 1))
        } else if sql.starts_with("UPDATE") {
            let execution_time = int_param(params, 0)?;
            let version = int_param(params, 1)?;
            match self.rows.get_mut(&version) {
                Some(row) => {
                    row.execution_time = execution_time;
                    Ok(1)
                }
                None => Ok(0),
            }
        } else {
            Err(EngineError::new(format!("unsupported statement: {}", sql)))
        }
    }

    async fn execute_script(&mut self, script: &str) -> Result<(), EngineError> {
        let failure = self.lock().fail_script.clone();
        if let Some(failure) = failure {
            if let Some(byte_index) = script.find(&failure.pattern) {
                if !failure.positioned || failure.error.position.is_some() {
                    return Err(failure.error);
                }
                let position = script[..byte_index].chars().count() + 1;
                return Err(failure.error.with_position(position));
            }
        }
        self.scripts.push(script.to_string());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), EngineError> {
        let MemoryTransaction { state, rows, scripts } = *self;
        let mut state = state.lock().unwrap();
        state.open_transactions -= 1;
        if let Some(err) = state.fail_commit.clone() {
            return Err(err);
        }
        state.rows = rows;
        state.scripts.extend(scripts);
        state.commits += 1;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), EngineError> {
        let mut state = self.lock();
        state.open_transactions -= 1;
        state.rollbacks += 1;
        let failure = state.fail_rollback.clone();
        failure.map_or(Ok(()), Err)
    }
}
