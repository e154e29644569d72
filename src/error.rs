use thiserror::Error;

/// Exact message SQLite emits when a lock cannot be acquired. Errors carrying
/// this message are retried by the dispatcher instead of being surfaced.
pub const CONTENTION_SENTINEL: &str = "database is locked";

/// Errors surfaced by the driver.
///
/// SQL errors originating from the engine are carried by value across the
/// worker boundary as `{name, message}` pairs; the original `rusqlite` error
/// identity is not preserved.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Fragment/value arity mismatch in the composer, or `exec` called with
    /// bound values attached.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Construction-time rejection of a driver name this crate cannot serve.
    #[error("unknown driver: {0}")]
    UnknownDriver(String),

    /// Submit after `close()` resolved.
    #[error("dispatcher is closed")]
    DispatcherClosed,

    /// Submit would exceed the configured `max_queue` bound.
    #[error("dispatch queue is full")]
    QueueFull,

    /// The entry was still queued when shutdown began; it never ran.
    #[error("dispatcher is shutting down")]
    DispatcherShuttingDown,

    /// A job was handed to a handle that already had one in flight. Leaking
    /// this to callers indicates an internal routing bug.
    #[error("worker is busy")]
    WorkerBusy,

    /// The worker thread exited while a job was in flight.
    #[error("worker crashed: {0}")]
    WorkerCrashed(String),

    /// An error reported by the SQLite engine, reconstructed from the wire.
    #[error("{name}: {message}")]
    Sqlite { name: String, message: String },

    /// Channel or thread plumbing failure inside the dispatch layer.
    #[error("internal dispatch error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Whether this is the lock-contention error the dispatcher retries.
    #[must_use]
    pub fn is_contention(&self) -> bool {
        matches!(self, DispatchError::Sqlite { message, .. } if message == CONTENTION_SENTINEL)
    }
}
