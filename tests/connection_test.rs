//! Integration tests for connection behavior: connect idempotence,
//! session setup, reconnect-retry, and the fetch helpers.

use mysql_manager::connection::Connection;
use mysql_manager::driver::DriverWarning;
use mysql_manager::testkit::{ScriptedDriver, test_config};
use mysql_manager::value::Value;
use mysql_manager::ConnectionConfig;

fn scripted_connection() -> (ScriptedDriver, Connection<ScriptedDriver>) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("mysql_manager=debug")
        .with_test_writer()
        .try_init();

    let driver = ScriptedDriver::new();
    let conn = Connection::new(driver.clone(), test_config());
    (driver, conn)
}

// ===== Connect / close =====

#[tokio::test]
async fn test_connect_is_idempotent_while_open() {
    let (driver, mut conn) = scripted_connection();

    conn.connect().await.unwrap();
    conn.connect().await.unwrap();

    assert_eq!(driver.connect_count(), 1);
}

#[tokio::test]
async fn test_timezone_statement_after_each_physical_connect() {
    let driver = ScriptedDriver::new();
    let mut conn = Connection::new(driver.clone(), ConnectionConfig::default());

    conn.connect().await.unwrap();
    assert_eq!(driver.statements(), vec!["set time_zone='+8:00'"]);

    // After a close, the next connect is physical again.
    conn.close().await.unwrap();
    conn.connect().await.unwrap();
    assert_eq!(driver.connect_count(), 2);
    assert_eq!(
        driver.statements(),
        vec!["set time_zone='+8:00'", "set time_zone='+8:00'"]
    );
}

#[tokio::test]
async fn test_empty_timezone_skips_session_statement() {
    let (driver, mut conn) = scripted_connection();

    conn.connect().await.unwrap();

    assert!(driver.statements().is_empty());
}

#[tokio::test]
async fn test_connect_failure_surfaces_driver_error() {
    let (driver, mut conn) = scripted_connection();
    driver.push_connect_error(2003, "Can't connect to MySQL server");

    let err = conn.connect().await.unwrap_err();
    assert_eq!(err.driver_code(), Some(2003));
    assert!(!conn.is_connected());
}

// ===== Reconnect-retry =====

#[tokio::test]
async fn test_retry_after_server_gone_away() {
    let (driver, mut conn) = scripted_connection();
    conn.connect().await.unwrap();

    driver.push_error(2006, "MySQL server has gone away");
    driver.push_affected(3);

    let affected = conn.query("update t set a = 1", false).await.unwrap();

    assert_eq!(affected, 3);
    // Same statement sent twice: failed attempt, then the retry.
    assert_eq!(
        driver.statements(),
        vec!["update t set a = 1", "update t set a = 1"]
    );
    assert_eq!(driver.connect_count(), 2);
    assert_eq!(driver.close_count(), 1);
}

#[tokio::test]
async fn test_retry_after_lost_connection_during_query() {
    let (driver, mut conn) = scripted_connection();
    conn.connect().await.unwrap();

    driver.push_error(2013, "Lost connection to MySQL server during query");
    driver.push_affected(1);

    let affected = conn
        .execute("delete from t where id = ?", &[Value::Int(9)])
        .await
        .unwrap();

    assert_eq!(affected, 1);
    assert_eq!(driver.connect_count(), 2);
}

#[tokio::test]
async fn test_retries_until_error_class_changes() {
    let (driver, mut conn) = scripted_connection();
    conn.connect().await.unwrap();

    driver.push_error(2006, "gone away");
    driver.push_error(2013, "lost during query");
    driver.push_affected(5);

    let affected = conn.query("select sleep(1)", false).await.unwrap();

    assert_eq!(affected, 5);
    assert_eq!(driver.statements().len(), 3);
    assert_eq!(driver.connect_count(), 3);
}

#[tokio::test]
async fn test_non_lost_errors_are_not_retried() {
    let (driver, mut conn) = scripted_connection();
    conn.connect().await.unwrap();

    driver.push_error(1064, "You have an error in your SQL syntax");

    let err = conn.query("selec 1", false).await.unwrap_err();

    assert_eq!(err.driver_code(), Some(1064));
    assert_eq!(driver.statements().len(), 1);
    assert_eq!(driver.connect_count(), 1);
}

#[tokio::test]
async fn test_reconnect_failure_surfaces() {
    let (driver, mut conn) = scripted_connection();
    conn.connect().await.unwrap();

    driver.push_error(2006, "gone away");
    driver.push_connect_error(2003, "Can't connect to MySQL server");

    let err = conn.query("select 1", false).await.unwrap_err();

    // The reconnect failure is the result, not the lost-connection error.
    assert_eq!(err.driver_code(), Some(2003));
    assert_eq!(driver.statements().len(), 1);
}

#[tokio::test]
async fn test_execute_many_sends_one_batch_statement() {
    let (driver, mut conn) = scripted_connection();
    conn.connect().await.unwrap();

    driver.push_affected(2);

    let affected = conn
        .execute_many(
            "insert into t (a) values (?)",
            &[vec![Value::Int(1)], vec![Value::Int(2)]],
        )
        .await
        .unwrap();

    assert_eq!(affected, 2);
    // The whole batch goes through a single driver call.
    assert_eq!(driver.statements(), vec!["insert into t (a) values (?)"]);
}

#[tokio::test]
async fn test_execute_many_retries_after_gone_away() {
    let (driver, mut conn) = scripted_connection();
    conn.connect().await.unwrap();

    driver.push_error(2006, "MySQL server has gone away");
    driver.push_affected(2);

    let affected = conn
        .execute_many(
            "insert into t (a) values (?)",
            &[vec![Value::Int(1)], vec![Value::Int(2)]],
        )
        .await
        .unwrap();

    assert_eq!(affected, 2);
    assert_eq!(
        driver.statements(),
        vec![
            "insert into t (a) values (?)",
            "insert into t (a) values (?)"
        ]
    );
    assert_eq!(driver.connect_count(), 2);
}

// ===== Fetch helpers =====

#[tokio::test]
async fn test_fetch_all_returns_rows() {
    let (driver, mut conn) = scripted_connection();
    conn.connect().await.unwrap();

    driver.push_rows(vec![
        ScriptedDriver::row(&["id"], vec![Value::Int(1)]),
        ScriptedDriver::row(&["id"], vec![Value::Int(2)]),
    ]);

    let rows = conn.fetch_all("select id from t", &[]).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].get("id"), Some(&Value::Int(2)));
}

#[tokio::test]
async fn test_fetch_row_appends_limit_one() {
    let (driver, mut conn) = scripted_connection();
    conn.connect().await.unwrap();

    driver.push_rows(vec![ScriptedDriver::row(&["id"], vec![Value::Int(1)])]);

    let row = conn.fetch_row("select id from t", &[]).await.unwrap();

    assert!(row.is_some());
    assert_eq!(driver.statements(), vec!["select id from t limit 1"]);
}

#[tokio::test]
async fn test_fetch_row_keeps_existing_limit() {
    let (driver, mut conn) = scripted_connection();
    conn.connect().await.unwrap();

    let row = conn.fetch_row("select id from t limit 5", &[]).await.unwrap();

    assert!(row.is_none());
    assert_eq!(driver.statements(), vec!["select id from t limit 5"]);
}

#[tokio::test]
async fn test_fetch_column_by_position() {
    let (driver, mut conn) = scripted_connection();
    conn.connect().await.unwrap();

    driver.push_rows(vec![ScriptedDriver::row(
        &["id", "name"],
        vec![Value::Int(1), Value::Text("alice".into())],
    )]);

    let value = conn
        .fetch_column("select id, name from t", &[], 1)
        .await
        .unwrap();
    assert_eq!(value, Some(Value::Text("alice".into())));
}

#[tokio::test]
async fn test_fetch_column_out_of_range_is_none() {
    let (driver, mut conn) = scripted_connection();
    conn.connect().await.unwrap();

    driver.push_rows(vec![ScriptedDriver::row(&["id"], vec![Value::Int(1)])]);

    let value = conn.fetch_column("select id from t", &[], 7).await.unwrap();
    assert_eq!(value, None);
}

#[tokio::test]
async fn test_fetch_first_returns_first_column() {
    let (driver, mut conn) = scripted_connection();
    conn.connect().await.unwrap();

    driver.push_rows(vec![ScriptedDriver::row(
        &["total"],
        vec![Value::UInt(42)],
    )]);

    let value = conn.fetch_first("select count(*) total from t", &[]).await.unwrap();
    assert_eq!(value, Some(Value::UInt(42)));
}

// ===== Metadata and warnings =====

#[tokio::test]
async fn test_rowcount_and_last_insert_id_passthrough() {
    let (driver, mut conn) = scripted_connection();
    conn.connect().await.unwrap();

    driver.push_affected(4);
    driver.set_last_insert_id(99);

    conn.execute("update t set a = 1", &[]).await.unwrap();

    assert_eq!(conn.rowcount(), 4);
    assert_eq!(conn.last_insert_id(), 99);
}

#[tokio::test]
async fn test_show_warnings_returns_driver_warnings() {
    let (driver, mut conn) = scripted_connection();
    conn.connect().await.unwrap();

    driver.set_warnings(vec![DriverWarning {
        level: "Warning".to_string(),
        code: 1366,
        message: "Incorrect integer value".to_string(),
    }]);

    let warnings = conn.show_warnings().await.unwrap();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].code, 1366);
}
