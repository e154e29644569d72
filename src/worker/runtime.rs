use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc::Receiver;

use rusqlite::{Connection, OpenFlags, ToSql};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error};

use crate::job::{Job, JobOutcome, JobPayload, JobReply, WireError, WorkerEvent, WorkerRequest};
use crate::rows::{Row, RunResult};
use crate::types::{SqlValue, to_sqlite_values};

/// Everything a worker needs to open its connection.
#[derive(Debug, Clone)]
pub(crate) struct WorkerInit {
    pub filename: String,
    pub flags: OpenFlags,
    pub wal: bool,
    pub cache_capacity: usize,
}

/// Posts `Exited` on every exit path, unwinds included, so the dispatcher
/// can tell an ordered shutdown from a crash.
struct ExitGuard {
    worker: usize,
    events: UnboundedSender<WorkerEvent>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let _ = self.events.send(WorkerEvent::Exited {
            worker: self.worker,
        });
    }
}

/// Thread main for one worker: open the connection, then serve jobs one at
/// a time until a shutdown request arrives or the request channel closes.
///
/// Exactly one reply is emitted per job; a SQL failure is replied as a
/// [`WireError`] and never terminates the thread.
pub(crate) fn run_worker(
    worker: usize,
    init: &WorkerInit,
    requests: &Receiver<WorkerRequest>,
    events: &UnboundedSender<WorkerEvent>,
) {
    let _guard = ExitGuard {
        worker,
        events: events.clone(),
    };

    let conn = match open_connection(init) {
        Ok(conn) => conn,
        Err(err) => {
            error!(worker, error = %err, "sqlite worker failed to open its connection");
            return;
        }
    };
    debug!(worker, filename = %init.filename, "sqlite worker ready");

    while let Ok(request) = requests.recv() {
        match request {
            WorkerRequest::Shutdown => break,
            WorkerRequest::Job(job) => {
                let outcome = execute_payload(&conn, &job.payload)
                    .map_err(|err| WireError::from_sqlite(&err));
                let reply = JobReply {
                    id: job.id,
                    outcome,
                };
                if events.send(WorkerEvent::Reply { worker, reply }).is_err() {
                    break;
                }
            }
        }
    }

    debug!(worker, "sqlite worker shutting down");
    // The connection closes when it drops here.
}

fn open_connection(init: &WorkerInit) -> Result<Connection, rusqlite::Error> {
    let conn = Connection::open_with_flags(&init.filename, init.flags)?;
    conn.set_prepared_statement_cache_capacity(init.cache_capacity);
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    if init.wal {
        // In-memory databases ignore this and keep their "memory" journal.
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    }
    Ok(conn)
}

fn execute_payload(conn: &Connection, payload: &JobPayload) -> Result<JobOutcome, rusqlite::Error> {
    match payload {
        JobPayload::Exec { sql } => {
            conn.execute_batch(sql)?;
            Ok(JobOutcome::None)
        }
        JobPayload::Run { sql, values } => run_statement(conn, sql, values).map(JobOutcome::Run),
        JobPayload::Get { sql, values } => {
            let rows = query_rows(conn, sql, values, Some(1))?;
            Ok(JobOutcome::Row(rows.into_iter().next()))
        }
        JobPayload::All { sql, values } => {
            query_rows(conn, sql, values, None).map(JobOutcome::Rows)
        }
        // IMMEDIATE takes the reserved lock up front, so contention is paid
        // at BEGIN time where a retry is still safe.
        JobPayload::Begin => {
            conn.execute_batch("BEGIN IMMEDIATE")?;
            Ok(JobOutcome::None)
        }
        JobPayload::Commit => {
            conn.execute_batch("COMMIT")?;
            Ok(JobOutcome::None)
        }
        JobPayload::Rollback => {
            conn.execute_batch("ROLLBACK")?;
            Ok(JobOutcome::None)
        }
        JobPayload::Script { steps } => run_script(conn, steps),
    }
}

fn run_statement(
    conn: &Connection,
    sql: &str,
    values: &[SqlValue],
) -> Result<RunResult, rusqlite::Error> {
    let params = to_sqlite_values(values);
    let param_refs: Vec<&dyn ToSql> = params.iter().map(|value| value as &dyn ToSql).collect();
    let mut stmt = conn.prepare_cached(sql)?;
    let changes = stmt.execute(&param_refs[..])?;
    Ok(RunResult {
        changes,
        last_insert_rowid: conn.last_insert_rowid(),
    })
}

/// Materialize query results, sharing the column metadata across rows.
fn query_rows(
    conn: &Connection,
    sql: &str,
    values: &[SqlValue],
    limit: Option<usize>,
) -> Result<Vec<Row>, rusqlite::Error> {
    let params = to_sqlite_values(values);
    let param_refs: Vec<&dyn ToSql> = params.iter().map(|value| value as &dyn ToSql).collect();
    let mut stmt = conn.prepare_cached(sql)?;

    let column_names: Arc<Vec<String>> = Arc::new(
        stmt.column_names()
            .iter()
            .map(std::string::ToString::to_string)
            .collect(),
    );
    let column_index: Arc<HashMap<String, usize>> = Arc::new(
        column_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect(),
    );
    let col_count = column_names.len();

    let mut rows = Vec::new();
    let mut rows_iter = stmt.query(&param_refs[..])?;
    while let Some(row) = rows_iter.next()? {
        let mut row_values = Vec::with_capacity(col_count);
        for i in 0..col_count {
            row_values.push(SqlValue::from_sqlite_ref(row.get_ref(i)?));
        }
        rows.push(Row::new(
            Arc::clone(&column_names),
            Arc::clone(&column_index),
            row_values,
        ));
        if limit.is_some_and(|limit| rows.len() >= limit) {
            break;
        }
    }
    Ok(rows)
}

/// Run nested steps inside one transaction bracket on this connection.
fn run_script(conn: &Connection, steps: &[JobPayload]) -> Result<JobOutcome, rusqlite::Error> {
    conn.execute_batch("BEGIN IMMEDIATE")?;
    for step in steps {
        if let Err(err) = execute_payload(conn, step) {
            let _ = conn.execute_batch("ROLLBACK");
            return Err(err);
        }
    }
    if let Err(err) = conn.execute_batch("COMMIT") {
        let _ = conn.execute_batch("ROLLBACK");
        return Err(err);
    }
    Ok(JobOutcome::None)
}
