/*!
 * sqlite-dispatch - An asynchronous, worker-pool-backed SQLite driver
 *
 * This crate lets a tokio application issue SQL statements, including
 * transactions, without ever blocking an executor thread on disk I/O or on
 * SQLite's internal locks. SQLite itself stays synchronous; everything this
 * crate adds sits in the dispatch layer between your code and a bounded
 * pool of worker threads, each owning one `rusqlite` connection.
 *
 * # Features
 *
 * - FIFO job dispatch over a fixed worker pool, one in-flight job per worker
 * - Transactions pinned to a single connection via worker leases
 * - `BEGIN IMMEDIATE` with bounded, backed-off retry on `database is locked`
 * - Injection-safe query composition: values travel out-of-band and bind
 *   positionally to `?` placeholders
 * - Graceful shutdown that lets running jobs finish
 *
 * # Example
 *
 * ```rust,no_run
 * use sqlite_dispatch::prelude::*;
 *
 * async fn example() -> Result<(), DispatchError> {
 *     let db = Database::open(DatabaseOptions::new("app.db")).await?;
 *
 *     db.exec(
 *         "CREATE TABLE IF NOT EXISTS users (
 *             id INTEGER PRIMARY KEY,
 *             name TEXT NOT NULL
 *         )",
 *     )
 *     .await?;
 *
 *     let inserted = db
 *         .run(Query::new(
 *             "INSERT INTO users (name) VALUES (?)",
 *             vec![SqlValue::Text("alice".into())],
 *         ))
 *         .await?;
 *
 *     let row = db
 *         .get(compose(
 *             &["SELECT * FROM users WHERE id = ", ""],
 *             vec![SqlValue::Int(inserted.last_insert_rowid)],
 *         )?)
 *         .await?;
 *     if let Some(row) = row {
 *         println!("user: {:?}", row.get("name"));
 *     }
 *
 *     db.transaction(async |tx| {
 *         tx.run(Query::new(
 *             "UPDATE users SET name = ? WHERE id = ?",
 *             vec![SqlValue::Text("bob".into()), SqlValue::Int(1)],
 *         ))
 *         .await?;
 *         Ok(())
 *     })
 *     .await?;
 *
 *     db.close().await;
 *     Ok(())
 * }
 * ```
 */

#![forbid(unsafe_code)]

// Core modules
pub mod config;
pub mod connection;
pub mod error;
pub mod query;
pub mod rows;
pub mod types;

// Private dispatch plumbing
mod dispatcher;
mod job;
mod worker;

// Re-export everything that should be part of the public API
pub mod prelude {
    //! Convenient imports for common functionality.

    pub use crate::config::{DatabaseOptions, DatabaseOptionsBuilder, RetryPolicy};
    pub use crate::connection::{Database, Transaction};
    pub use crate::error::DispatchError;
    pub use crate::query::{Query, compose};
    pub use crate::rows::{Row, RunResult};
    pub use crate::types::SqlValue;
}

// Direct exports of frequently used types and functions for simplicity
pub use config::{DatabaseOptions, DatabaseOptionsBuilder, RetryPolicy};
pub use connection::{Database, Transaction};
pub use error::{CONTENTION_SENTINEL, DispatchError};
pub use query::{Query, compose};
pub use rows::{Row, RunResult};
pub use types::SqlValue;
