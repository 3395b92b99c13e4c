//! Version Store - Bookkeeping of installed migrations
//!
//! Owns the version-tracking table: its schema, the row written when a
//! migration is applied and the row removed when it is reverted. Writes always
//! go through the caller's transaction so they commit or roll back together
//! with the migration body.

use serde::{Deserialize, Serialize};

use crate::backends::{DatabasePool, DatabaseTransaction, DatabaseValue, EngineError};
use crate::error::{DriverError, DriverResult};
use crate::file::MigrationFile;

/// Returned by `current_version` when the version table is empty
pub const NO_VERSION: i32 = -1;

/// Script kind recorded for every row
pub const SCRIPT_TYPE_SQL: &str = "SQL";

/// One row of the version table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version: i32,
    pub version_rank: i32,
    pub installed_rank: i32,
    pub description: String,
    pub script_type: String,
    pub script: String,
    pub checksum: i32,
    pub installed_by: String,
    pub execution_time: i32,
    pub success: bool,
}

impl VersionRecord {
    /// The row recorded when `file` is applied by `installed_by`
    pub fn for_file(file: &MigrationFile, installed_by: &str) -> Self {
        Self {
            version: file.version,
            version_rank: file.rank,
            installed_rank: file.rank,
            description: file.name.clone(),
            script_type: SCRIPT_TYPE_SQL.to_string(),
            script: file.file_name.clone(),
            checksum: file.checksum.unwrap_or_default(),
            installed_by: installed_by.to_string(),
            execution_time: 0,
            success: true,
        }
    }

    fn params(&self) -> Vec<DatabaseValue> {
        vec![
            self.version.into(),
            self.version_rank.into(),
            self.installed_rank.into(),
            self.description.as_str().into(),
            self.script_type.as_str().into(),
            self.script.as_str().into(),
            self.checksum.into(),
            self.installed_by.as_str().into(),
            self.execution_time.into(),
            self.success.into(),
        ]
    }
}

/// Reads and writes the version-tracking table
#[derive(Debug, Clone)]
pub struct VersionStore {
    table: String,
}

impl VersionStore {
    /// `table` must already be a validated identifier
    pub fn new(table: impl Into<String>) -> Self {
        Self { table: table.into() }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the version table if it does not exist yet
    pub async fn ensure_schema(&self, pool: &dyn DatabasePool) -> DriverResult<()> {
        pool.execute(&self.create_table_sql(), &[])
            .await
            .map_err(|e| {
                tracing::error!("Failed to ensure version table {}: {}", self.table, e);
                DriverError::Schema(e)
            })?;

        tracing::debug!("Version table {} is present", self.table);
        Ok(())
    }

    /// Insert the row for an applied migration
    pub async fn record_applied(
        &self,
        tx: &mut dyn DatabaseTransaction,
        record: &VersionRecord,
    ) -> DriverResult<()> {
        tx.execute(&self.insert_sql(), &record.params())
            .await
            .map_err(bookkeeping_error)?;

        tracing::debug!("Recorded version {} in {}", record.version, self.table);
        Ok(())
    }

    /// Delete the row for a reverted migration, returning how many rows went away
    pub async fn record_reverted(&self, tx: &mut dyn DatabaseTransaction, version: i32) -> DriverResult<u64> {
        let deleted = tx
            .execute(&self.delete_sql(), &[version.into()])
            .await
            .map_err(bookkeeping_error)?;

        tracing::debug!("Removed {} row(s) for version {} from {}", deleted, version, self.table);
        Ok(deleted)
    }

    /// Store the measured script duration on a row inserted in this transaction
    pub async fn record_execution_time(
        &self,
        tx: &mut dyn DatabaseTransaction,
        version: i32,
        execution_time_ms: i32,
    ) -> DriverResult<()> {
        tx.execute(
            &self.update_execution_time_sql(),
            &[execution_time_ms.into(), version.into()],
        )
        .await
        .map_err(bookkeeping_error)?;
        Ok(())
    }

    /// Highest version rank minus one, or [`NO_VERSION`] when nothing is applied
    pub async fn current_version(&self, pool: &dyn DatabasePool) -> DriverResult<i32> {
        let value = pool
            .fetch_optional_value(&self.current_version_sql(), &[])
            .await
            .map_err(DriverError::Query)?;

        match value.as_ref().and_then(DatabaseValue::as_i64) {
            Some(rank) => i32::try_from(rank - 1).map_err(|_| {
                DriverError::Query(EngineError::new(format!("version rank {} out of range", rank)))
            }),
            None => Ok(NO_VERSION),
        }
    }

    /// SQL to create the version tracking table
    pub fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    \
                version int not null primary key,\n    \
                version_rank int,\n    \
                installed_rank int,\n    \
                description varchar(500),\n    \
                type varchar(500),\n    \
                script varchar(500),\n    \
                checksum int,\n    \
                installed_by varchar(500),\n    \
                execution_time int,\n    \
                success boolean\n\
            );",
            self.table
        )
    }

    /// SQL to record a migration as applied
    pub fn insert_sql(&self) -> String {
        format!(
            "INSERT INTO {} (version, version_rank, installed_rank, description, type, script, checksum, installed_by, execution_time, success) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            self.table
        )
    }

    /// SQL to remove a migration record
    pub fn delete_sql(&self) -> String {
        format!("DELETE FROM {} WHERE version = $1", self.table)
    }

    /// SQL to fill in the execution time of a migration record
    pub fn update_execution_time_sql(&self) -> String {
        format!("UPDATE {} SET execution_time = $1 WHERE version = $2", self.table)
    }

    /// SQL to read the highest version rank
    pub fn current_version_sql(&self) -> String {
        format!("SELECT MAX(version_rank) FROM {}", self.table)
    }
}

/// Failed writes to the version table inside a migration's transaction
fn bookkeeping_error(err: EngineError) -> DriverError {
    if err.is_constraint_violation() {
        DriverError::Constraint(err)
    } else {
        DriverError::Transaction(err)
    }
}
