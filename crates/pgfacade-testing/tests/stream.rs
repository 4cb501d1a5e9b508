//! Stream facade tests: acquisition failures and connection release on
//! end, error and drop.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use pgfacade::{Config, Database, DriverError, Postgres, Query, StreamOptions};
use pgfacade_testing::{MockDriver, MockResponse};
use serde_json::json;

const EVENTS: &str = "SELECT * FROM events ORDER BY id";

fn start(driver: &MockDriver) -> Database {
    Postgres::builder()
        .driver(Arc::new(driver.clone()))
        .build()
        .start(Config::new("postgres://localhost/test"))
        .unwrap()
}

fn events_driver() -> MockDriver {
    MockDriver::new().with_response(
        EVENTS,
        MockResponse::rows((1..=3).map(|id| json!({ "id": id }))),
    )
}

#[tokio::test]
async fn test_unreachable_server_fails_with_acquisition_error() {
    let driver = MockDriver::new().with_unreachable_server();
    let db = start(&driver);

    let err = db.stream(EVENTS, StreamOptions::new()).await.unwrap_err();

    let driver_err = err.as_driver().unwrap();
    assert!(driver_err.is_acquisition());
    assert!(matches!(driver_err, DriverError::Connection(_)));
    assert_eq!(driver.open_leases(), 0);
    assert_eq!(driver.leases_released(), 0);
    assert!(driver.executed().is_empty(), "no stream is opened");
}

#[tokio::test]
async fn test_stream_yields_rows_and_releases_on_end() {
    let driver = events_driver();
    let db = start(&driver);

    let mut stream = db.stream(EVENTS, StreamOptions::new()).await.unwrap();
    assert!(stream.holds_connection());
    assert_eq!(driver.open_leases(), 1);

    let mut ids = Vec::new();
    while let Some(row) = stream.next().await {
        ids.push(row.unwrap()["id"].as_i64().unwrap());
    }

    assert_eq!(ids, [1, 2, 3]);
    assert!(stream.is_finished());
    assert!(!stream.holds_connection());
    assert_eq!(driver.open_leases(), 0);
    assert_eq!(driver.leases_released(), 1);

    drop(stream);
    assert_eq!(driver.leases_released(), 1, "released exactly once");
}

#[tokio::test]
async fn test_stream_releases_on_error() {
    let driver = MockDriver::new().with_response(
        EVENTS,
        MockResponse::RowsThenError {
            rows: vec![json!({"id": 1}).as_object().unwrap().clone()],
            code: "57014".into(),
            message: "canceling statement due to statement timeout".into(),
        },
    );
    let db = start(&driver);

    let mut stream = db.stream(EVENTS, StreamOptions::new()).await.unwrap();
    assert!(stream.next().await.unwrap().is_ok());
    assert_eq!(driver.open_leases(), 1);

    let err = stream.next().await.unwrap().unwrap_err();
    assert_eq!(err.as_driver().and_then(DriverError::code), Some("57014"));
    assert_eq!(driver.open_leases(), 0);
    assert_eq!(driver.leases_released(), 1);

    assert!(stream.next().await.is_none());
    drop(stream);
    assert_eq!(driver.leases_released(), 1, "released exactly once");
}

#[tokio::test]
async fn test_stream_releases_on_drop() {
    let driver = events_driver();
    let db = start(&driver);

    let mut stream = db.stream(EVENTS, StreamOptions::new()).await.unwrap();
    stream.next().await.unwrap().unwrap();
    drop(stream);

    assert_eq!(driver.open_leases(), 0);
    assert_eq!(driver.leases_released(), 1);
}

#[tokio::test]
async fn test_unpolled_stream_releases_on_drop() {
    let driver = events_driver();
    let db = start(&driver);

    let stream = db.stream(EVENTS, StreamOptions::new()).await.unwrap();
    assert_eq!(driver.open_leases(), 1);
    drop(stream);

    assert_eq!(driver.leases_released(), 1);
}

#[tokio::test]
async fn test_collect_all() {
    let driver = events_driver();
    let db = start(&driver);

    let rows = db
        .stream(
            Query::new(EVENTS).log_results(false),
            StreamOptions::new().batch_size(2),
        )
        .await
        .unwrap()
        .collect_all()
        .await
        .unwrap();

    assert_eq!(rows.len(), 3);
    assert_eq!(driver.leases_released(), 1);
}

#[tokio::test]
async fn test_concurrent_streams_hold_separate_connections() {
    let driver = events_driver();
    let db = start(&driver);

    let first = db.stream(EVENTS, StreamOptions::new()).await.unwrap();
    let second = db.stream(EVENTS, StreamOptions::new()).await.unwrap();
    assert_eq!(driver.open_leases(), 2);

    let (a, b) = tokio::join!(first.collect_all(), second.collect_all());
    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(driver.open_leases(), 0);
    assert_eq!(driver.leases_released(), 2);
}

#[tokio::test]
async fn test_stream_after_stop_fails() {
    let driver = events_driver();
    let component = Postgres::builder().driver(Arc::new(driver.clone())).build();
    let db = component.start(Config::new("postgres://localhost/test")).unwrap();
    component.stop().await;

    let err = db.stream(EVENTS, StreamOptions::new()).await.unwrap_err();
    assert!(matches!(err.as_driver(), Some(DriverError::PoolClosed)));
}

#[tokio::test]
async fn test_stop_waits_for_open_stream() {
    let driver = events_driver();
    let component = Arc::new(Postgres::builder().driver(Arc::new(driver.clone())).build());
    let db = component.start(Config::new("postgres://localhost/test")).unwrap();

    let mut stream = db.stream(EVENTS, StreamOptions::new()).await.unwrap();
    stream.next().await.unwrap().unwrap();

    let stopping = tokio::spawn({
        let component = Arc::clone(&component);
        async move { component.stop().await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!stopping.is_finished(), "stop resolves only after the stream's connection returns");
    assert!(stream.holds_connection());
    assert_eq!(driver.close_calls(), 1);

    drop(stream);
    tokio::time::timeout(Duration::from_secs(1), stopping)
        .await
        .expect("stop should resolve once the stream is dropped")
        .unwrap();
    assert_eq!(driver.open_leases(), 0);
    assert!(!component.is_running());
}
