use std::num::NonZeroUsize;
use std::thread;
use std::time::Duration;

use rusqlite::OpenFlags;

use crate::connection::Database;
use crate::error::DispatchError;

/// Bounded exponential backoff applied when a job fails with the
/// lock-contention sentinel.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts per job, the first one included. `1` disables retry.
    pub max_attempts: u32,
    /// Delay before the first retry; doubled on each subsequent attempt.
    pub initial_backoff: Duration,
    /// Ceiling for the doubled delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 16,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub(crate) fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << shift)
            .min(self.max_backoff)
    }
}

/// Options for opening a [`Database`].
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    /// Path to the database file, or `":memory:"`.
    pub filename: String,
    /// Driver name; a trailing `sqlite3` is normalized to `sqlite`.
    pub driver: String,
    /// Worker count. Defaults to the available parallelism for in-memory
    /// databases (each worker then owns an independent database) and 2 for
    /// file-backed ones.
    pub workers: Option<usize>,
    /// Upper bound on queued jobs; `None` means unbounded.
    pub max_queue: Option<usize>,
    /// Contention retry policy.
    pub retry: RetryPolicy,
    /// Switch file-backed databases to WAL journaling at open.
    pub wal: bool,
    /// Per-connection prepared statement cache capacity.
    pub cache_capacity: usize,
    /// Engine open flags, forwarded to every worker connection untouched.
    pub open_flags: OpenFlags,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            filename: ":memory:".to_owned(),
            driver: "sqlite".to_owned(),
            workers: None,
            max_queue: None,
            retry: RetryPolicy::default(),
            wal: true,
            cache_capacity: 64,
            open_flags: OpenFlags::default(),
        }
    }
}

impl DatabaseOptions {
    #[must_use]
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn builder(filename: impl Into<String>) -> DatabaseOptionsBuilder {
        DatabaseOptionsBuilder::new(filename)
    }
}

/// Fluent builder for [`DatabaseOptions`].
#[derive(Debug, Clone)]
pub struct DatabaseOptionsBuilder {
    opts: DatabaseOptions,
}

impl DatabaseOptionsBuilder {
    #[must_use]
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            opts: DatabaseOptions::new(filename),
        }
    }

    #[must_use]
    pub fn driver(mut self, driver: impl Into<String>) -> Self {
        self.opts.driver = driver.into();
        self
    }

    #[must_use]
    pub fn workers(mut self, workers: usize) -> Self {
        self.opts.workers = Some(workers);
        self
    }

    #[must_use]
    pub fn max_queue(mut self, max_queue: usize) -> Self {
        self.opts.max_queue = Some(max_queue);
        self
    }

    #[must_use]
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.opts.retry = retry;
        self
    }

    #[must_use]
    pub fn wal(mut self, wal: bool) -> Self {
        self.opts.wal = wal;
        self
    }

    #[must_use]
    pub fn cache_capacity(mut self, cache_capacity: usize) -> Self {
        self.opts.cache_capacity = cache_capacity;
        self
    }

    #[must_use]
    pub fn open_flags(mut self, open_flags: OpenFlags) -> Self {
        self.opts.open_flags = open_flags;
        self
    }

    #[must_use]
    pub fn finish(self) -> DatabaseOptions {
        self.opts
    }

    /// Open a [`Database`] with these options.
    ///
    /// # Errors
    /// Returns `DispatchError` if the driver name is unknown or the workers
    /// cannot open the database.
    pub async fn build(self) -> Result<Database, DispatchError> {
        Database::open(self.finish()).await
    }
}

/// The engines this crate can serve. There is exactly one binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Driver {
    Sqlite,
}

/// Normalize a driver name: a trailing `sqlite3` is rewritten to `sqlite`,
/// then the name must match a known driver.
pub(crate) fn normalize_driver(name: &str) -> Result<Driver, DispatchError> {
    let normalized = match name.strip_suffix("sqlite3") {
        Some(prefix) => format!("{prefix}sqlite"),
        None => name.to_owned(),
    };
    match normalized.as_str() {
        "sqlite" => Ok(Driver::Sqlite),
        _ => Err(DispatchError::UnknownDriver(name.to_owned())),
    }
}

pub(crate) fn default_workers(filename: &str) -> usize {
    if filename == ":memory:" {
        thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1)
    } else {
        2
    }
}
