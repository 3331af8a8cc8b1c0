//! Integration tests for paginated iteration.

use std::sync::{Arc, Mutex};

use mysql_manager::DbError;
use mysql_manager::connection::{Connection, FetchOptions};
use mysql_manager::testkit::{ScriptedDriver, test_config};
use mysql_manager::value::{Row, Value};

async fn connected() -> (ScriptedDriver, Connection<ScriptedDriver>) {
    let driver = ScriptedDriver::new();
    let mut conn = Connection::new(driver.clone(), test_config());
    conn.connect().await.unwrap();
    (driver, conn)
}

fn id_rows(ids: std::ops::Range<i64>) -> Vec<Row> {
    ids.map(|id| ScriptedDriver::row(&["id"], vec![Value::Int(id)]))
        .collect()
}

// ===== Validation =====

#[tokio::test]
async fn test_rejects_non_select() {
    let (driver, mut conn) = connected().await;

    let err = conn
        .fetch_iterator("delete from t", &[], FetchOptions::new())
        .unwrap_err();

    assert!(matches!(err, DbError::Sql { .. }));
    assert!(driver.statements().is_empty());
}

#[tokio::test]
async fn test_rejects_pre_limited_select() {
    let (driver, mut conn) = connected().await;

    let err = conn
        .fetch_iterator("select * from t limit 10", &[], FetchOptions::new())
        .unwrap_err();

    assert!(matches!(err, DbError::Sql { .. }));
    assert!(driver.statements().is_empty());
}

#[tokio::test]
async fn test_rejects_zero_page_size() {
    let (_driver, mut conn) = connected().await;

    let err = conn
        .fetch_iterator("select * from t", &[], FetchOptions::new().per(0))
        .unwrap_err();

    assert!(matches!(err, DbError::InvalidInput { .. }));
}

// ===== Paging =====

#[tokio::test]
async fn test_pages_until_empty_page() {
    let (driver, mut conn) = connected().await;
    driver.push_rows(id_rows(0..2));
    driver.push_rows(id_rows(2..4));
    driver.push_rows(id_rows(4..5));
    // The short page is consumed, so one more fetch runs and ends empty.
    driver.push_rows(Vec::new());

    let mut iter = conn
        .fetch_iterator("select id from t", &[], FetchOptions::new().per(2))
        .unwrap();

    let mut ids = Vec::new();
    while let Some(row) = iter.next().await.unwrap() {
        ids.push(row.get("id").unwrap().as_i64().unwrap());
    }

    assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    assert_eq!(
        driver.statements(),
        vec![
            "select id from t limit 2 offset 0",
            "select id from t limit 2 offset 2",
            "select id from t limit 2 offset 4",
            "select id from t limit 2 offset 5",
        ]
    );
}

#[tokio::test]
async fn test_max_caps_yielded_rows() {
    let (driver, mut conn) = connected().await;
    driver.push_rows(id_rows(0..2));
    driver.push_rows(id_rows(2..4));
    driver.push_rows(id_rows(4..6));

    let iter = conn
        .fetch_iterator(
            "select id from t",
            &[],
            FetchOptions::new().per(2).max(5),
        )
        .unwrap();

    let rows = iter.collect().await.unwrap();

    // The sixth row is buffered but never yielded.
    assert_eq!(rows.len(), 5);
    assert_eq!(driver.statements().len(), 3);
}

#[tokio::test]
async fn test_callback_sees_offset_and_page_and_can_abort() {
    let (driver, mut conn) = connected().await;
    driver.push_rows(id_rows(0..2));

    let seen: Arc<Mutex<Vec<(u64, u64)>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_by_callback = Arc::clone(&seen);

    let mut iter = conn
        .fetch_iterator(
            "select id from t",
            &[],
            FetchOptions::new().per(2).on_page(move |offset, page| {
                seen_by_callback.lock().unwrap().push((offset, page));
                offset < 2
            }),
        )
        .unwrap();

    let mut count = 0;
    while iter.next().await.unwrap().is_some() {
        count += 1;
    }

    // The callback runs before every yield; its veto at offset 2 stops
    // iteration before the second page is ever fetched.
    assert_eq!(count, 2);
    assert_eq!(*seen.lock().unwrap(), vec![(0, 1), (1, 1), (2, 2)]);
    assert_eq!(driver.statements().len(), 1);
}

#[tokio::test]
async fn test_callback_veto_is_permanent() {
    let (driver, mut conn) = connected().await;
    driver.push_rows(id_rows(0..2));
    driver.push_rows(id_rows(2..4));

    let seen: Arc<Mutex<Vec<(u64, u64)>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_by_callback = Arc::clone(&seen);

    let mut iter = conn
        .fetch_iterator(
            "select id from t",
            &[],
            FetchOptions::new().per(2).on_page(move |offset, page| {
                seen_by_callback.lock().unwrap().push((offset, page));
                offset < 1
            }),
        )
        .unwrap();

    assert!(iter.next().await.unwrap().is_some());
    assert!(iter.next().await.unwrap().is_none());

    // Later calls stay terminated: the callback does not run again and
    // no further page is fetched, even with a second page scripted.
    assert!(iter.next().await.unwrap().is_none());
    assert!(iter.next().await.unwrap().is_none());
    assert_eq!(*seen.lock().unwrap(), vec![(0, 1), (1, 1)]);
    assert_eq!(driver.statements().len(), 1);
}

#[tokio::test]
async fn test_first_page_empty_ends_immediately() {
    let (driver, mut conn) = connected().await;

    let mut iter = conn
        .fetch_iterator("select id from t", &[], FetchOptions::new())
        .unwrap();

    assert!(iter.next().await.unwrap().is_none());
    assert_eq!(
        driver.statements(),
        vec!["select id from t limit 100 offset 0"]
    );
}
