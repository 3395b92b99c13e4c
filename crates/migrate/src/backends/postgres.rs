//! PostgreSQL Backend Implementation
//!
//! This module provides the PostgreSQL-specific implementation of the database
//! backend traits using sqlx as the underlying database driver.

use std::sync::Arc;
use std::time::{Duration, Instant};
use async_trait::async_trait;
use sqlx::postgres::{PgDatabaseError, PgErrorPosition, PgPoolOptions, PgSeverity};
use sqlx::{Executor, Pool, Postgres, Row as SqlxRow};
use crate::config::PoolConfig;
use super::core::*;

/// PostgreSQL connection pool implementation
#[derive(Clone)]
pub struct PostgresPool {
    pool: Arc<Pool<Postgres>>,
}

impl PostgresPool {
    pub fn new(pool: Arc<Pool<Postgres>>) -> Self {
        Self { pool }
    }

    /// Create a pool with the given configuration and open its first connection
    pub async fn connect(database_url: &str, config: &PoolConfig) -> Result<Self, EngineError> {
        tracing::debug!(
            "Creating database pool with config: max={}, min={}, timeout={}s, idle_timeout={:?}s, max_lifetime={:?}s, test_before_acquire={}",
            config.max_connections, config.min_connections, config.acquire_timeout,
            config.idle_timeout, config.max_lifetime, config.test_before_acquire
        );

        let mut options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout))
            .test_before_acquire(config.test_before_acquire);

        if let Some(idle_timeout) = config.idle_timeout {
            options = options.idle_timeout(Duration::from_secs(idle_timeout));
        }

        if let Some(max_lifetime) = config.max_lifetime {
            options = options.max_lifetime(Duration::from_secs(max_lifetime));
        }

        let pool = options.connect(database_url).await.map_err(|e| {
            tracing::error!("Failed to create database pool: {}", e);
            classify_error(e)
        })?;

        tracing::info!("Database pool created with {} max connections", config.max_connections);
        Ok(Self::new(Arc::new(pool)))
    }

    /// Get the underlying pool
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl DatabasePool for PostgresPool {
    async fn begin_transaction(&self) -> Result<Box<dyn DatabaseTransaction>, EngineError> {
        let tx = self.pool.begin().await.map_err(classify_error)?;
        tracing::debug!("Database transaction started");
        Ok(Box::new(PostgresTransaction::new(tx)))
    }

    async fn execute(&self, sql: &str, params: &[DatabaseValue]) -> Result<u64, EngineError> {
        let mut query = sqlx::query(sql);

        for param in params {
            query = bind_database_value(query, param);
        }

        let result = query.execute(&*self.pool).await.map_err(classify_error)?;
        Ok(result.rows_affected())
    }

    async fn fetch_optional_value(
        &self,
        sql: &str,
        params: &[DatabaseValue],
    ) -> Result<Option<DatabaseValue>, EngineError> {
        let mut query = sqlx::query(sql);

        for param in params {
            query = bind_database_value(query, param);
        }

        let row = query.fetch_optional(&*self.pool).await.map_err(classify_error)?;

        match row {
            Some(row) => {
                let value: Option<i32> = row.try_get(0).map_err(classify_error)?;
                Ok(Some(DatabaseValue::from(value)))
            }
            None => Ok(None),
        }
    }

    async fn health_check(&self) -> Result<Duration, EngineError> {
        let start = Instant::now();

        sqlx::query("SELECT 1")
            .execute(&*self.pool)
            .await
            .map_err(classify_error)?;

        let duration = start.elapsed();
        tracing::debug!("Database health check passed in {:?}", duration);
        Ok(duration)
    }

    async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Database pool closed");
    }
}

/// PostgreSQL transaction implementation
pub struct PostgresTransaction {
    tx: Option<sqlx::Transaction<'static, Postgres>>,
}

impl PostgresTransaction {
    pub fn new(tx: sqlx::Transaction<'static, Postgres>) -> Self {
        Self { tx: Some(tx) }
    }

    fn active(&mut self) -> Result<&mut sqlx::Transaction<'static, Postgres>, EngineError> {
        self.tx
            .as_mut()
            .ok_or_else(|| EngineError::new("Transaction already completed"))
    }
}

#[async_trait]
impl DatabaseTransaction for PostgresTransaction {
    async fn execute(&mut self, sql: &str, params: &[DatabaseValue]) -> Result<u64, EngineError> {
        let tx = self.active()?;

        let mut query = sqlx::query(sql);

        for param in params {
            query = bind_database_value(query, param);
        }

        let result = query.execute(&mut **tx).await.map_err(classify_error)?;
        Ok(result.rows_affected())
    }

    async fn execute_script(&mut self, script: &str) -> Result<(), EngineError> {
        let tx = self.active()?;

        // A bare &str goes over the simple query protocol, which accepts
        // several statements in one round trip.
        (&mut **tx).execute(script).await.map_err(classify_error)?;
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), EngineError> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| EngineError::new("Transaction already completed"))?;

        tx.commit().await.map_err(classify_error)?;
        tracing::debug!("Transaction committed");
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), EngineError> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| EngineError::new("Transaction already completed"))?;

        tx.rollback().await.map_err(classify_error)?;
        tracing::debug!("Transaction rolled back");
        Ok(())
    }
}

/// Bind a DatabaseValue to a sqlx query
fn bind_database_value<'a>(
    query: sqlx::query::Query<'a, Postgres, sqlx::postgres::PgArguments>,
    value: &DatabaseValue,
) -> sqlx::query::Query<'a, Postgres, sqlx::postgres::PgArguments> {
    match value {
        DatabaseValue::Null => query.bind(Option::<String>::None),
        DatabaseValue::Bool(b) => query.bind(*b),
        DatabaseValue::Int32(i) => query.bind(*i),
        DatabaseValue::Int64(i) => query.bind(*i),
        DatabaseValue::String(s) => query.bind(s.clone()),
    }
}

/// Turn a sqlx error into an engine-neutral diagnostic
pub fn classify_error(err: sqlx::Error) -> EngineError {
    if let sqlx::Error::Database(db_err) = &err {
        if let Some(pg_err) = db_err.try_downcast_ref::<PgDatabaseError>() {
            let mut engine_err = EngineError::new(pg_err.message())
                .with_severity(severity_label(pg_err.severity()))
                .with_code(pg_err.code());

            if let Some(PgErrorPosition::Original(position)) = pg_err.position() {
                engine_err = engine_err.with_position(position);
            }
            return engine_err;
        }

        let mut engine_err = EngineError::new(db_err.message());
        if let Some(code) = db_err.code() {
            engine_err = engine_err.with_code(code.into_owned());
        }
        return engine_err;
    }

    EngineError::new(err.to_string())
}

fn severity_label(severity: PgSeverity) -> &'static str {
    match severity {
        PgSeverity::Panic => "PANIC",
        PgSeverity::Fatal => "FATAL",
        PgSeverity::Error => "ERROR",
        PgSeverity::Warning => "WARNING",
        PgSeverity::Notice => "NOTICE",
        PgSeverity::Debug => "DEBUG",
        PgSeverity::Info => "INFO",
        PgSeverity::Log => "LOG",
    }
}
