//! Migration drivers
//!
//! A [`Driver`] is what an orchestrator holds per target database: it is
//! initialized once, runs migrations one at a time, answers which version is
//! current, and is closed once. Backends are picked by URL scheme through the
//! [`DriverRegistry`].

use std::collections::HashMap;
use std::sync::Arc;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::backends::{DatabasePool, PostgresPool};
use crate::config::DriverConfig;
use crate::diagnostic::DiagnosticRenderer;
use crate::error::{DriverError, DriverResult};
use crate::executor::{MigrationEvent, MigrationEvents, MigrationExecutor};
use crate::file::MigrationFile;
use crate::version_store::VersionStore;

/// Capability set every storage backend provides
#[async_trait]
pub trait Driver: Send + Sync {
    /// Open the connection, verify it, and ensure the version table
    async fn initialize(&mut self, url: &str) -> DriverResult<()>;

    /// Release the connection
    async fn close(&mut self) -> DriverResult<()>;

    /// Extension of the migration files this driver executes
    fn filename_extension(&self) -> &'static str;

    /// Start running one migration; outcome arrives on the returned stream
    fn run(&self, file: MigrationFile) -> MigrationEvents;

    /// Current applied version, or `NO_VERSION` when nothing is applied
    async fn current_version(&self) -> DriverResult<i32>;
}

struct Connection {
    pool: Arc<dyn DatabasePool>,
    executor: MigrationExecutor,
}

/// PostgreSQL migration driver
pub struct PostgresDriver {
    config: DriverConfig,
    connection: Option<Connection>,
}

impl PostgresDriver {
    pub fn new() -> Self {
        Self::with_config(DriverConfig::default())
    }

    pub fn with_config(config: DriverConfig) -> Self {
        Self {
            config,
            connection: None,
        }
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.connection.is_some()
    }

    /// Finish initialization on a pool that is already open
    pub async fn initialize_with_pool(&mut self, pool: Arc<dyn DatabasePool>) -> DriverResult<()> {
        if self.connection.is_some() {
            return Err(DriverError::Configuration("Driver is already initialized".to_string()));
        }
        self.config.validate()?;

        let latency = pool
            .health_check()
            .await
            .map_err(|e| DriverError::Connectivity(format!("Database is not reachable: {}", e)))?;
        tracing::debug!("Database reachable in {:?}", latency);

        let store = VersionStore::new(self.config.version_table.clone());
        store.ensure_schema(pool.as_ref()).await?;

        let installed_by = self.config.resolve_acting_principal();
        tracing::info!("Migrations will be recorded as installed by {}", installed_by);

        let executor = MigrationExecutor::new(Arc::clone(&pool), store, installed_by)
            .with_renderer(DiagnosticRenderer::new(self.config.context_lines))
            .with_strict_revert(self.config.strict_revert);

        self.connection = Some(Connection { pool, executor });
        Ok(())
    }
}

impl Default for PostgresDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for PostgresDriver {
    async fn initialize(&mut self, url: &str) -> DriverResult<()> {
        if self.connection.is_some() {
            return Err(DriverError::Configuration("Driver is already initialized".to_string()));
        }
        self.config.validate()?;

        let pool = PostgresPool::connect(url, &self.config.pool)
            .await
            .map_err(|e| DriverError::Connectivity(format!("Failed to connect to database: {}", e)))?;

        self.initialize_with_pool(Arc::new(pool)).await
    }

    async fn close(&mut self) -> DriverResult<()> {
        if let Some(connection) = self.connection.take() {
            connection.pool.close().await;
        }
        Ok(())
    }

    fn filename_extension(&self) -> &'static str {
        "sql"
    }

    fn run(&self, file: MigrationFile) -> MigrationEvents {
        match &self.connection {
            Some(connection) => connection.executor.spawn(file),
            None => not_initialized(file),
        }
    }

    async fn current_version(&self) -> DriverResult<i32> {
        let connection = self.connection.as_ref().ok_or(DriverError::NotInitialized)?;
        connection
            .executor
            .store()
            .current_version(connection.pool.as_ref())
            .await
    }
}

/// A closed stream reporting that the driver cannot run anything yet
fn not_initialized(file: MigrationFile) -> MigrationEvents {
    let (events, receiver) = mpsc::channel(2);
    // Capacity covers both events, so neither send can fail.
    let _ = events.try_send(MigrationEvent::Started(file));
    let _ = events.try_send(MigrationEvent::Failed(DriverError::NotInitialized));
    receiver
}

/// Builds an uninitialized driver from configuration
pub type DriverFactory = fn(DriverConfig) -> Box<dyn Driver>;

fn postgres_factory(config: DriverConfig) -> Box<dyn Driver> {
    Box::new(PostgresDriver::with_config(config))
}

/// Driver registry keyed by connection URL scheme
pub struct DriverRegistry {
    factories: HashMap<String, DriverFactory>,
}

impl DriverRegistry {
    /// A registry with no drivers
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a driver for a URL scheme
    pub fn register(&mut self, scheme: &str, factory: DriverFactory) {
        self.factories.insert(scheme.to_lowercase(), factory);
    }

    /// An uninitialized driver for `url`
    pub fn driver_for_url(&self, url: &str, config: DriverConfig) -> DriverResult<Box<dyn Driver>> {
        let scheme = detect_scheme(url)?;
        let factory = self.factories.get(&scheme).ok_or_else(|| {
            DriverError::Configuration(format!("No driver registered for scheme '{}'", scheme))
        })?;

        Ok(factory(config))
    }

    /// Build and initialize the driver for `url`
    pub async fn open(&self, url: &str, config: DriverConfig) -> DriverResult<Box<dyn Driver>> {
        let mut driver = self.driver_for_url(url, config)?;
        driver.initialize(url).await?;
        Ok(driver)
    }

    /// List all registered schemes
    pub fn registered_schemes(&self) -> Vec<String> {
        let mut schemes: Vec<String> = self.factories.keys().cloned().collect();
        schemes.sort();
        schemes
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register("postgres", postgres_factory);
        registry.register("postgresql", postgres_factory);
        registry
    }
}

fn detect_scheme(url: &str) -> DriverResult<String> {
    let parsed = url::Url::parse(url)
        .map_err(|e| DriverError::Configuration(format!("Invalid database URL: {}", e)))?;
    Ok(parsed.scheme().to_lowercase())
}
