//! Migration Executor - Runs one migration as a single transaction
//!
//! A run begins a transaction, writes or deletes the version row, executes the
//! script body, and commits; any failure rolls everything back. Progress is
//! reported over a channel: the file first, then at most one failure (plus a
//! rollback failure when the rollback itself breaks), then the channel closes.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;

use crate::backends::{DatabasePool, DatabaseTransaction};
use crate::diagnostic::DiagnosticRenderer;
use crate::error::{DriverError, DriverResult};
use crate::file::{Direction, MigrationFile};
use crate::version_store::{VersionRecord, VersionStore};

/// A run emits at most three events
const EVENT_CAPACITY: usize = 4;

/// Progress of a single migration run
#[derive(Debug)]
pub enum MigrationEvent {
    /// The run has started on this file
    Started(MigrationFile),
    /// The run failed; a second `Failed` carries a rollback failure
    Failed(DriverError),
}

/// Receiving end of a run's event stream
pub type MigrationEvents = mpsc::Receiver<MigrationEvent>;

/// Everything a run emitted, gathered once its stream closed
#[derive(Debug, Default)]
pub struct RunReport {
    pub file: Option<MigrationFile>,
    pub errors: Vec<DriverError>,
}

impl RunReport {
    /// Drain `events` until the run closes the stream
    pub async fn collect(mut events: MigrationEvents) -> Self {
        let mut report = Self::default();
        while let Some(event) = events.recv().await {
            match event {
                MigrationEvent::Started(file) => report.file = Some(file),
                MigrationEvent::Failed(err) => report.errors.push(err),
            }
        }
        report
    }

    pub fn is_success(&self) -> bool {
        self.file.is_some() && self.errors.is_empty()
    }
}

/// The error that ended a run and, if rolling back also failed, that error
#[derive(Debug)]
struct RunFailure {
    primary: DriverError,
    rollback: Option<DriverError>,
}

impl RunFailure {
    fn new(primary: DriverError) -> Self {
        Self { primary, rollback: None }
    }
}

/// Executes migrations against a shared pool
#[derive(Clone)]
pub struct MigrationExecutor {
    pool: Arc<dyn DatabasePool>,
    store: VersionStore,
    renderer: DiagnosticRenderer,
    installed_by: String,
    strict_revert: bool,
}

impl MigrationExecutor {
    pub fn new(pool: Arc<dyn DatabasePool>, store: VersionStore, installed_by: impl Into<String>) -> Self {
        Self {
            pool,
            store,
            renderer: DiagnosticRenderer::default(),
            installed_by: installed_by.into(),
            strict_revert: false,
        }
    }

    pub fn with_renderer(mut self, renderer: DiagnosticRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_strict_revert(mut self, strict: bool) -> Self {
        self.strict_revert = strict;
        self
    }

    pub fn store(&self) -> &VersionStore {
        &self.store
    }

    /// Run `file` on its own task and return its event stream
    pub fn spawn(&self, file: MigrationFile) -> MigrationEvents {
        let (events, receiver) = mpsc::channel(EVENT_CAPACITY);
        let executor = self.clone();
        tokio::spawn(async move {
            executor.run(file, events).await;
        });
        receiver
    }

    /// Run `file` to completion, reporting through `events`
    ///
    /// `events` is dropped on return, which closes the stream.
    pub async fn run(&self, mut file: MigrationFile, events: mpsc::Sender<MigrationEvent>) {
        emit(&events, MigrationEvent::Started(file.clone())).await;

        if let Err(failure) = self.execute(&mut file).await {
            emit(&events, MigrationEvent::Failed(failure.primary)).await;
            if let Some(rollback) = failure.rollback {
                emit(&events, MigrationEvent::Failed(rollback)).await;
            }
        }
    }

    async fn execute(&self, file: &mut MigrationFile) -> Result<(), RunFailure> {
        tracing::info!("Running migration {}", file);

        let mut tx = self.pool.begin_transaction().await.map_err(|e| {
            tracing::error!("Failed to begin transaction for {}: {}", file.file_name, e);
            RunFailure::new(DriverError::Transaction(e))
        })?;

        if let Err(err) = file.read_content().await {
            return Err(abort(tx, err).await);
        }

        let file: &MigrationFile = file;
        let script = match file.script() {
            Ok(script) => script,
            Err(err) => return Err(abort(tx, err).await),
        };

        let bookkeeping = match file.direction {
            Direction::Up => {
                let record = VersionRecord::for_file(file, &self.installed_by);
                self.store.record_applied(tx.as_mut(), &record).await
            }
            Direction::Down => self.revert(tx.as_mut(), file.version).await,
        };
        if let Err(err) = bookkeeping {
            tracing::error!("Bookkeeping for {} failed: {}", file.file_name, err);
            return Err(abort(tx, err).await);
        }

        let started = Instant::now();
        if let Err(engine_err) = tx.execute_script(script).await {
            let message = self.renderer.render(script, &engine_err);
            tracing::error!("Migration {} failed: {}", file.file_name, engine_err);
            let err = DriverError::ScriptExecution {
                message,
                source: engine_err,
            };
            return Err(abort(tx, err).await);
        }
        let elapsed = started.elapsed();

        if file.direction == Direction::Up {
            let millis = i32::try_from(elapsed.as_millis()).unwrap_or(i32::MAX);
            if let Err(err) = self
                .store
                .record_execution_time(tx.as_mut(), file.version, millis)
                .await
            {
                return Err(abort(tx, err).await);
            }
        }

        tx.commit().await.map_err(|e| {
            tracing::error!("Failed to commit {}: {}", file.file_name, e);
            RunFailure::new(DriverError::Transaction(e))
        })?;

        tracing::info!("Migrated {} in {:?}", file, elapsed);
        Ok(())
    }

    async fn revert(&self, tx: &mut dyn DatabaseTransaction, version: i32) -> DriverResult<()> {
        let deleted = self.store.record_reverted(tx, version).await?;
        if deleted == 0 {
            if self.strict_revert {
                return Err(DriverError::NothingToRevert(version));
            }
            tracing::warn!("Version {} has no row in {}; running down script anyway", version, self.store.table());
        }
        Ok(())
    }
}

/// Roll back after `primary`, keeping any rollback failure alongside it
async fn abort(tx: Box<dyn DatabaseTransaction>, primary: DriverError) -> RunFailure {
    let rollback = match tx.rollback().await {
        Ok(()) => None,
        Err(e) => {
            tracing::error!("Rollback after failed migration also failed: {}", e);
            Some(DriverError::Rollback(e))
        }
    };

    RunFailure { primary, rollback }
}

async fn emit(events: &mpsc::Sender<MigrationEvent>, event: MigrationEvent) {
    if events.send(event).await.is_err() {
        tracing::debug!("Migration event receiver dropped");
    }
}
