//! Wire protocol between the dispatcher and its worker threads.
//!
//! Requests carry a correlation id that the worker echoes verbatim in its
//! reply; the worker never emits an unsolicited message.

use crate::error::DispatchError;
use crate::rows::{Row, RunResult};
use crate::types::SqlValue;

/// A self-describing unit of work, id-stamped by the dispatcher.
#[derive(Debug)]
pub(crate) struct Job {
    pub id: u64,
    pub payload: JobPayload,
}

/// The operation a worker performs against its connection.
#[derive(Debug, Clone)]
pub(crate) enum JobPayload {
    /// Possibly multi-statement script, no parameters.
    Exec { sql: String },
    /// Single DML statement; replies with changes + last insert rowid.
    Run { sql: String, values: Vec<SqlValue> },
    /// Single query; replies with the first row, if any.
    Get { sql: String, values: Vec<SqlValue> },
    /// Single query; replies with every row, materialized.
    All { sql: String, values: Vec<SqlValue> },
    /// `BEGIN IMMEDIATE`.
    Begin,
    /// `COMMIT`.
    Commit,
    /// `ROLLBACK`.
    Rollback,
    /// Nested jobs executed in order inside one `BEGIN IMMEDIATE`/`COMMIT`
    /// bracket on the worker's own connection.
    Script { steps: Vec<JobPayload> },
}

/// Result shape per method.
#[derive(Debug)]
pub(crate) enum JobOutcome {
    None,
    Run(RunResult),
    Row(Option<Row>),
    Rows(Vec<Row>),
}

/// Engine error flattened for transport across the thread boundary.
#[derive(Debug, Clone)]
pub(crate) struct WireError {
    pub name: String,
    pub message: String,
}

impl WireError {
    pub(crate) fn from_sqlite(err: &rusqlite::Error) -> Self {
        let name = match err {
            rusqlite::Error::SqliteFailure(cause, _) => format!("{:?}", cause.code),
            other => {
                let debug = format!("{other:?}");
                match debug.split(['(', ' ', '{']).next() {
                    Some(head) if !head.is_empty() => head.to_owned(),
                    _ => "SqliteError".to_owned(),
                }
            }
        };
        Self {
            name,
            message: err.to_string(),
        }
    }
}

impl From<WireError> for DispatchError {
    fn from(err: WireError) -> Self {
        DispatchError::Sqlite {
            name: err.name,
            message: err.message,
        }
    }
}

/// Exactly one reply per job, success or failure.
#[derive(Debug)]
pub(crate) struct JobReply {
    pub id: u64,
    pub outcome: Result<JobOutcome, WireError>,
}

/// Inbound messages to a worker thread.
pub(crate) enum WorkerRequest {
    Job(Job),
    Shutdown,
}

/// Outbound messages from worker threads to the dispatcher.
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    Reply { worker: usize, reply: JobReply },
    Exited { worker: usize },
}
