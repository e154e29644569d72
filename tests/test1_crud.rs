use chrono::NaiveDateTime;
use serde_json::json;
use sqlite_dispatch::{DatabaseOptions, DispatchError, Query, SqlValue, compose};
use tokio::runtime::Runtime;

#[test]
fn single_row_crud() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        // One worker so every query hits the same in-memory database.
        let db = DatabaseOptions::builder(":memory:").workers(1).build().await?;

        db.exec("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)")
            .await?;

        let inserted = db
            .run(Query::new(
                "INSERT INTO users (id, name) VALUES (?, ?)",
                vec![SqlValue::Int(1), SqlValue::Text("alice".into())],
            ))
            .await?;
        assert_eq!(inserted.changes, 1);
        assert_eq!(inserted.last_insert_rowid, 1);

        let row = db
            .get(compose(
                &["SELECT * FROM users WHERE id = ", ""],
                vec![SqlValue::Int(1)],
            )?)
            .await?
            .expect("inserted row should be found");
        assert_eq!(row.get("id").unwrap().as_int().unwrap(), 1);
        assert_eq!(row.get("name").unwrap().as_text().unwrap(), "alice");
        assert!(row.get("missing_column").is_none());

        let rows = db.all("SELECT * FROM users").await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("name").unwrap().as_text().unwrap(), "alice");
        assert_eq!(rows[0].columns().to_vec(), vec!["id", "name"]);

        db.close().await;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[test]
fn insert_then_select_by_rowid_round_trips() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let db = DatabaseOptions::builder(":memory:").workers(1).build().await?;
        db.exec(
            "CREATE TABLE vals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                i INTEGER, f REAL, s TEXT, b BLOB, t TEXT, j TEXT, flag INTEGER, n TEXT
            )",
        )
        .await?;

        let ts = NaiveDateTime::parse_from_str("2024-01-01 08:00:01", "%Y-%m-%d %H:%M:%S")?;
        let inserted = db
            .run(Query::new(
                "INSERT INTO vals (i, f, s, b, t, j, flag, n) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                vec![
                    SqlValue::Int(-42),
                    SqlValue::Float(10.5),
                    SqlValue::Text("text".into()),
                    SqlValue::Blob(b"Blob12".to_vec()),
                    SqlValue::Timestamp(ts),
                    SqlValue::Json(json!({"name": "alice"})),
                    SqlValue::Bool(true),
                    SqlValue::Null,
                ],
            ))
            .await?;

        let row = db
            .get(Query::new(
                "SELECT * FROM vals WHERE id = ?",
                vec![SqlValue::Int(inserted.last_insert_rowid)],
            ))
            .await?
            .expect("row by last_insert_rowid");

        assert_eq!(row.get("i").unwrap().as_int().unwrap(), -42);
        assert_eq!(row.get("f").unwrap().as_float().unwrap(), 10.5);
        assert_eq!(row.get("s").unwrap().as_text().unwrap(), "text");
        assert_eq!(row.get("b").unwrap().as_blob().unwrap(), b"Blob12");
        assert_eq!(row.get("t").unwrap().as_timestamp().unwrap(), ts);
        assert_eq!(row.get("j").unwrap().as_text().unwrap(), r#"{"name":"alice"}"#);
        assert_eq!(row.get("flag").unwrap().as_bool().unwrap(), true);
        assert!(row.get("n").unwrap().is_null());

        db.close().await;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[test]
fn empty_results_are_none_and_empty_vec() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let db = DatabaseOptions::builder(":memory:").workers(1).build().await?;
        db.exec("CREATE TABLE empty_t (x INTEGER)").await?;

        let row = db.get("SELECT * FROM empty_t").await?;
        assert!(row.is_none());

        let rows = db.all("SELECT * FROM empty_t").await?;
        assert!(rows.is_empty());

        db.close().await;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[test]
fn exec_rejects_bound_values() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let db = DatabaseOptions::builder(":memory:").workers(1).build().await?;

        let err = db
            .exec(Query::new("SELECT ?", vec![SqlValue::Int(1)]))
            .await
            .expect_err("exec with values must fail");
        assert!(matches!(err, DispatchError::InvalidQuery(_)));

        db.close().await;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[test]
fn sql_errors_do_not_poison_the_worker() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let db = DatabaseOptions::builder(":memory:").workers(1).build().await?;

        let err = db
            .get("SELECT * FROM no_such_table")
            .await
            .expect_err("query against a missing table must fail");
        assert!(matches!(err, DispatchError::Sqlite { .. }));

        // The worker is still serving jobs afterwards.
        db.exec("CREATE TABLE t (x INTEGER)").await?;
        db.run("INSERT INTO t (x) VALUES (7)").await?;
        let row = db.get("SELECT x FROM t").await?.expect("row");
        assert_eq!(row.get("x").unwrap().as_int().unwrap(), 7);

        db.close().await;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}

#[test]
fn multi_statement_exec_scripts() -> Result<(), Box<dyn std::error::Error>> {
    let rt = Runtime::new()?;
    rt.block_on(async {
        let db = DatabaseOptions::builder(":memory:").workers(1).build().await?;
        db.exec(
            "CREATE TABLE a (x INTEGER);
             CREATE TABLE b (y INTEGER);
             INSERT INTO a (x) VALUES (1);
             INSERT INTO b (y) VALUES (2);",
        )
        .await?;

        let row = db
            .get("SELECT (SELECT x FROM a) + (SELECT y FROM b) AS total")
            .await?
            .expect("row");
        assert_eq!(row.get("total").unwrap().as_int().unwrap(), 3);

        db.close().await;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
}
