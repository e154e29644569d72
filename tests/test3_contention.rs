use sqlite_dispatch::{DatabaseOptions, Query, SqlValue};
use tempfile::TempDir;
use tokio::runtime::Runtime;
use tokio::task::JoinSet;

#[test]
fn concurrent_transactions_both_complete() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let dir = TempDir::new()?;
        let path = dir.path().join("contention.db");
        let db = DatabaseOptions::builder(path.to_string_lossy().into_owned())
            .workers(2)
            .build()
            .await?;

        db.exec("CREATE TABLE counters (id INTEGER PRIMARY KEY, value INTEGER NOT NULL)")
            .await?;
        db.run("INSERT INTO counters (id, value) VALUES (1, 0)")
            .await?;

        // Two BEGIN IMMEDIATE transactions race on two workers; the loser
        // is retried internally and no lock error reaches the caller.
        let first = db.transaction(async |tx| {
            tx.run("UPDATE counters SET value = value + 1 WHERE id = 1")
                .await?;
            Ok(())
        });
        let second = db.transaction(async |tx| {
            tx.run("UPDATE counters SET value = value + 1 WHERE id = 1")
                .await?;
            Ok(())
        });
        let (first, second) = tokio::join!(first, second);
        first?;
        second?;

        let row = db
            .get("SELECT value FROM counters WHERE id = 1")
            .await?
            .expect("counter row");
        assert_eq!(row.get("value").unwrap().as_int().unwrap(), 2);

        db.close().await;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[test]
fn many_writers_are_serialized_without_surfaced_errors() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let dir = TempDir::new()?;
        let path = dir.path().join("writers.db");
        let db = DatabaseOptions::builder(path.to_string_lossy().into_owned())
            .workers(2)
            .build()
            .await?;

        db.exec("CREATE TABLE log (id INTEGER PRIMARY KEY AUTOINCREMENT, writer INTEGER)")
            .await?;

        let mut writers = JoinSet::new();
        for writer in 0..8_i64 {
            let db = db.clone();
            writers.spawn(async move {
                db.transaction(async |tx| {
                    tx.run(Query::new(
                        "INSERT INTO log (writer) VALUES (?)",
                        vec![SqlValue::Int(writer)],
                    ))
                    .await?;
                    Ok(())
                })
                .await
            });
        }
        while let Some(joined) = writers.join_next().await {
            joined??;
        }

        let row = db.get("SELECT COUNT(*) AS n FROM log").await?.expect("count row");
        assert_eq!(row.get("n").unwrap().as_int().unwrap(), 8);

        db.close().await;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
