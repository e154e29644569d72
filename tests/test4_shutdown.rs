use std::time::Duration;

use sqlite_dispatch::{DatabaseOptions, DispatchError};
use tempfile::TempDir;
use tokio::runtime::Runtime;

const LONG_INSERT: &str = "WITH RECURSIVE cnt(x) AS (
        SELECT 1 UNION ALL SELECT x + 1 FROM cnt WHERE x < 200000
    )
    INSERT INTO big (x) SELECT x FROM cnt";

#[test]
fn graceful_shutdown_lets_busy_worker_finish() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let dir = TempDir::new()?;
        let path = dir.path().join("shutdown.db");
        let filename = path.to_string_lossy().into_owned();
        let db = DatabaseOptions::builder(filename.clone())
            .workers(1)
            .build()
            .await?;
        db.exec("CREATE TABLE big (x INTEGER)").await?;

        let long_running = tokio::spawn({
            let db = db.clone();
            async move { db.exec(LONG_INSERT).await }
        });
        // Let the long insert reach the worker before closing.
        tokio::time::sleep(Duration::from_millis(50)).await;
        db.close().await;

        // The busy job was allowed to complete.
        long_running.await??;

        // New work is refused after close.
        let err = db
            .get("SELECT COUNT(*) AS n FROM big")
            .await
            .expect_err("queries after close must fail");
        assert!(matches!(err, DispatchError::DispatcherClosed));

        // Reopen to confirm the insert really landed before shutdown.
        let reopened = DatabaseOptions::builder(filename).workers(1).build().await?;
        let row = reopened
            .get("SELECT COUNT(*) AS n FROM big")
            .await?
            .expect("count row");
        assert_eq!(row.get("n").unwrap().as_int().unwrap(), 200_000);
        reopened.close().await;

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[test]
fn close_is_idempotent_and_blocks_new_work() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let db = DatabaseOptions::builder(":memory:").workers(1).build().await?;
        db.close().await;
        db.close().await;

        assert!(matches!(
            db.get("SELECT 1").await,
            Err(DispatchError::DispatcherClosed)
        ));
        assert!(matches!(
            db.begin().await,
            Err(DispatchError::DispatcherClosed)
        ));
        assert!(!db.in_transaction());

        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[test]
fn queue_bound_rejects_excess_submissions() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let dir = TempDir::new()?;
        let path = dir.path().join("bounded.db");
        let db = DatabaseOptions::builder(path.to_string_lossy().into_owned())
            .workers(1)
            .max_queue(1)
            .build()
            .await?;
        db.exec("CREATE TABLE big (x INTEGER)").await?;
        db.exec("CREATE TABLE t (x INTEGER)").await?;

        // Occupy the only worker.
        let long_running = tokio::spawn({
            let db = db.clone();
            async move { db.exec(LONG_INSERT).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        // First waiter fills the queue.
        let queued = tokio::spawn({
            let db = db.clone();
            async move { db.run("INSERT INTO t (x) VALUES (1)").await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Second waiter is over the bound.
        let err = db
            .run("INSERT INTO t (x) VALUES (2)")
            .await
            .expect_err("queue is bounded at one entry");
        assert!(matches!(err, DispatchError::QueueFull));

        long_running.await??;
        queued.await??;
        db.close().await;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
