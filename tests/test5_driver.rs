use sqlite_dispatch::{DatabaseOptions, DispatchError};
use tokio::runtime::Runtime;

#[test]
fn unknown_driver_fails_construction() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let err = DatabaseOptions::builder(":memory:")
            .driver("postgres")
            .build()
            .await
            .expect_err("non-sqlite drivers are rejected");
        assert!(matches!(err, DispatchError::UnknownDriver(_)));
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[test]
fn sqlite3_driver_name_is_normalized() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let db = DatabaseOptions::builder(":memory:")
            .driver("sqlite3")
            .workers(1)
            .build()
            .await?;
        let row = db.get("SELECT 1 AS one").await?.expect("row");
        assert_eq!(row.get("one").unwrap().as_int().unwrap(), 1);
        db.close().await;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[test]
fn unreadable_file_fails_open() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let err = DatabaseOptions::builder("/definitely/missing/dir/app.db")
            .workers(1)
            .build()
            .await
            .expect_err("opening a database in a missing directory must fail");
        assert!(matches!(
            err,
            DispatchError::WorkerCrashed(_) | DispatchError::Sqlite { .. }
        ));
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
