use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::{DatabaseOptions, Driver, default_workers, normalize_driver};
use crate::dispatcher::{Dispatcher, DispatcherConfig};
use crate::error::DispatchError;
use crate::job::{JobOutcome, JobPayload};
use crate::query::Query;
use crate::rows::{Row, RunResult};
use crate::worker::WorkerInit;

/// Asynchronous handle to a SQLite database backed by a pool of worker
/// threads.
///
/// Cloning is cheap and every clone talks to the same pool. Queries never
/// block the calling task; they are dispatched to a worker that owns its
/// own connection and awaited.
#[derive(Clone)]
pub struct Database {
    dispatcher: Dispatcher,
    active_transactions: Arc<AtomicUsize>,
}

impl Database {
    /// Open a database with the given options, spawning the worker pool
    /// eagerly and verifying the database is reachable.
    ///
    /// # Errors
    /// Returns [`DispatchError::UnknownDriver`] for a driver name this crate
    /// cannot serve, or the underlying engine error if the database cannot
    /// be opened.
    pub async fn open(options: DatabaseOptions) -> Result<Self, DispatchError> {
        let Driver::Sqlite = normalize_driver(&options.driver)?;
        let workers = options
            .workers
            .unwrap_or_else(|| default_workers(&options.filename))
            .max(1);

        let init = WorkerInit {
            filename: options.filename.clone(),
            flags: options.open_flags,
            wal: options.wal,
            cache_capacity: options.cache_capacity,
        };
        let dispatcher = Dispatcher::start(
            DispatcherConfig {
                size: workers,
                max_queue: options.max_queue,
                retry: options.retry,
            },
            init,
        )?;

        let database = Self {
            dispatcher,
            active_transactions: Arc::new(AtomicUsize::new(0)),
        };
        // Smoke test so an unopenable file fails here, not at first query.
        database.get("SELECT 1").await?;
        Ok(database)
    }

    /// Open an in-memory database with default options.
    ///
    /// Note that with more than one worker each worker owns an independent
    /// in-memory database; use `workers = 1` when queries must share state.
    ///
    /// # Errors
    /// Propagates any [`DispatchError`] from [`Database::open`].
    pub async fn open_in_memory() -> Result<Self, DispatchError> {
        Database::open(DatabaseOptions::default()).await
    }

    /// Execute a possibly multi-statement script. No values may be bound.
    ///
    /// # Errors
    /// Returns [`DispatchError::InvalidQuery`] if the query carries bound
    /// values, or the engine error if any statement fails.
    pub async fn exec(&self, query: impl Into<Query>) -> Result<(), DispatchError> {
        let query = query.into();
        exec_payload(&query)?;
        self.dispatcher
            .submit(JobPayload::Exec { sql: query.sql })
            .await
            .map(|_| ())
    }

    /// Execute one DML statement, returning the affected row count and the
    /// last inserted rowid.
    ///
    /// # Errors
    /// Propagates any [`DispatchError`] from dispatch or execution.
    pub async fn run(&self, query: impl Into<Query>) -> Result<RunResult, DispatchError> {
        let Query { sql, values } = query.into();
        expect_run(self.dispatcher.submit(JobPayload::Run { sql, values }).await?)
    }

    /// Execute one query and return its first row, or `None` when the
    /// result set is empty.
    ///
    /// # Errors
    /// Propagates any [`DispatchError`] from dispatch or execution.
    pub async fn get(&self, query: impl Into<Query>) -> Result<Option<Row>, DispatchError> {
        let Query { sql, values } = query.into();
        expect_row(self.dispatcher.submit(JobPayload::Get { sql, values }).await?)
    }

    /// Execute one query and return every row, materialized in order.
    ///
    /// # Errors
    /// Propagates any [`DispatchError`] from dispatch or execution.
    pub async fn all(&self, query: impl Into<Query>) -> Result<Vec<Row>, DispatchError> {
        let Query { sql, values } = query.into();
        expect_rows(self.dispatcher.submit(JobPayload::All { sql, values }).await?)
    }

    /// Execute several statements atomically in one round-trip: a single
    /// worker runs them in order inside a `BEGIN IMMEDIATE`/`COMMIT`
    /// bracket, rolling back if any step fails.
    ///
    /// # Errors
    /// Propagates the first failing step's error; nothing is applied then.
    pub async fn batch(
        &self,
        queries: impl IntoIterator<Item = Query>,
    ) -> Result<(), DispatchError> {
        let steps = queries
            .into_iter()
            .map(|Query { sql, values }| JobPayload::Run { sql, values })
            .collect();
        self.dispatcher
            .submit(JobPayload::Script { steps })
            .await
            .map(|_| ())
    }

    /// Begin a transaction, reserving one worker until commit or rollback.
    ///
    /// Every statement issued through the returned [`Transaction`] runs on
    /// that worker's connection, so multi-step transactions are safe with
    /// any pool size. Dropping the guard rolls the transaction back.
    ///
    /// # Errors
    /// Propagates any [`DispatchError`] from the lease or `BEGIN IMMEDIATE`.
    pub async fn begin(&self) -> Result<Transaction, DispatchError> {
        let worker = self.dispatcher.lease().await?;
        if let Err(err) = self.dispatcher.submit_on(worker, JobPayload::Begin).await {
            self.dispatcher.release(worker);
            return Err(err);
        }
        self.active_transactions.fetch_add(1, Ordering::SeqCst);
        Ok(Transaction {
            dispatcher: self.dispatcher.clone(),
            worker,
            active: Arc::clone(&self.active_transactions),
            done: false,
        })
    }

    /// Run `f` inside a transaction: commit on `Ok`, roll back on `Err`
    /// (re-raising the original error; a rollback failure is swallowed).
    ///
    /// ```rust,no_run
    /// use sqlite_dispatch::prelude::*;
    ///
    /// # async fn demo(db: Database) -> Result<(), DispatchError> {
    /// let inserted = db
    ///     .transaction(async |tx| {
    ///         tx.run(Query::new(
    ///             "INSERT INTO users (name) VALUES (?)",
    ///             vec![SqlValue::Text("bob".into())],
    ///         ))
    ///         .await
    ///     })
    ///     .await?;
    /// # let _ = inserted; Ok(()) }
    /// ```
    ///
    /// # Errors
    /// Propagates the closure's error, or any failure of `BEGIN`/`COMMIT`.
    pub async fn transaction<T, F>(&self, f: F) -> Result<T, DispatchError>
    where
        F: AsyncFnOnce(&mut Transaction) -> Result<T, DispatchError>,
    {
        let mut tx = self.begin().await?;
        match f(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                let _ = tx.rollback().await;
                Err(err)
            }
        }
    }

    /// Whether any transaction opened through this database is live.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.active_transactions.load(Ordering::SeqCst) > 0
    }

    /// Gracefully shut the pool down: running jobs finish, queued but
    /// not-yet-started jobs are rejected and lost. Subsequent queries fail
    /// with [`DispatchError::DispatcherClosed`]. Idempotent.
    pub async fn close(&self) {
        self.dispatcher.shutdown().await;
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("in_transaction", &self.in_transaction())
            .finish_non_exhaustive()
    }
}

/// An open transaction pinned to one worker connection.
///
/// Created by [`Database::begin`] or [`Database::transaction`]. Must be
/// completed with [`Transaction::commit`] or [`Transaction::rollback`];
/// dropping the guard rolls back and returns the worker to the pool.
pub struct Transaction {
    dispatcher: Dispatcher,
    worker: usize,
    active: Arc<AtomicUsize>,
    done: bool,
}

impl Transaction {
    /// Execute a possibly multi-statement script inside the transaction.
    ///
    /// # Errors
    /// Returns [`DispatchError::InvalidQuery`] if the query carries bound
    /// values, or the engine error if any statement fails.
    pub async fn exec(&self, query: impl Into<Query>) -> Result<(), DispatchError> {
        let query = query.into();
        exec_payload(&query)?;
        self.dispatcher
            .submit_on(self.worker, JobPayload::Exec { sql: query.sql })
            .await
            .map(|_| ())
    }

    /// Execute one DML statement inside the transaction.
    ///
    /// # Errors
    /// Propagates any [`DispatchError`] from dispatch or execution.
    pub async fn run(&self, query: impl Into<Query>) -> Result<RunResult, DispatchError> {
        let Query { sql, values } = query.into();
        expect_run(
            self.dispatcher
                .submit_on(self.worker, JobPayload::Run { sql, values })
                .await?,
        )
    }

    /// Execute one query inside the transaction, returning the first row.
    ///
    /// # Errors
    /// Propagates any [`DispatchError`] from dispatch or execution.
    pub async fn get(&self, query: impl Into<Query>) -> Result<Option<Row>, DispatchError> {
        let Query { sql, values } = query.into();
        expect_row(
            self.dispatcher
                .submit_on(self.worker, JobPayload::Get { sql, values })
                .await?,
        )
    }

    /// Execute one query inside the transaction, returning every row.
    ///
    /// # Errors
    /// Propagates any [`DispatchError`] from dispatch or execution.
    pub async fn all(&self, query: impl Into<Query>) -> Result<Vec<Row>, DispatchError> {
        let Query { sql, values } = query.into();
        expect_rows(
            self.dispatcher
                .submit_on(self.worker, JobPayload::All { sql, values })
                .await?,
        )
    }

    /// Nested transactions degrade to direct execution: `f` runs against
    /// this same transaction, with no new `BEGIN`.
    ///
    /// # Errors
    /// Propagates the closure's error.
    pub async fn transaction<T, F>(&mut self, f: F) -> Result<T, DispatchError>
    where
        F: AsyncFnOnce(&mut Transaction) -> Result<T, DispatchError>,
    {
        f(self).await
    }

    /// Commit and return the worker to the pool.
    ///
    /// # Errors
    /// Propagates a `COMMIT` failure; the guard then rolls back on drop.
    pub async fn commit(mut self) -> Result<(), DispatchError> {
        self.dispatcher
            .submit_on(self.worker, JobPayload::Commit)
            .await?;
        self.finish();
        Ok(())
    }

    /// Roll back and return the worker to the pool.
    ///
    /// # Errors
    /// Propagates a `ROLLBACK` failure; the lease is released regardless.
    pub async fn rollback(mut self) -> Result<(), DispatchError> {
        let result = self
            .dispatcher
            .submit_on(self.worker, JobPayload::Rollback)
            .await;
        self.finish();
        result.map(|_| ())
    }

    fn finish(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.dispatcher.release(self.worker);
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        self.active.fetch_sub(1, Ordering::SeqCst);

        let dispatcher = self.dispatcher.clone();
        let worker = self.worker;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = dispatcher.submit_on(worker, JobPayload::Rollback).await;
                dispatcher.release(worker);
            });
        } else {
            // Without a runtime the rollback cannot be issued; the lease is
            // still returned so shutdown can finish.
            dispatcher.release(worker);
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("worker", &self.worker)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

fn exec_payload(query: &Query) -> Result<(), DispatchError> {
    if query.values.is_empty() {
        Ok(())
    } else {
        Err(DispatchError::InvalidQuery(
            "exec does not accept bound values".into(),
        ))
    }
}

fn expect_run(outcome: JobOutcome) -> Result<RunResult, DispatchError> {
    match outcome {
        JobOutcome::Run(result) => Ok(result),
        other => Err(unexpected_shape("run", &other)),
    }
}

fn expect_row(outcome: JobOutcome) -> Result<Option<Row>, DispatchError> {
    match outcome {
        JobOutcome::Row(row) => Ok(row),
        other => Err(unexpected_shape("get", &other)),
    }
}

fn expect_rows(outcome: JobOutcome) -> Result<Vec<Row>, DispatchError> {
    match outcome {
        JobOutcome::Rows(rows) => Ok(rows),
        other => Err(unexpected_shape("all", &other)),
    }
}

fn unexpected_shape(method: &str, outcome: &JobOutcome) -> DispatchError {
    DispatchError::Internal(format!("unexpected reply shape for {method}: {outcome:?}"))
}
