//! Query facade tests: input normalization, one event per call, result
//! logging and error propagation.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use pgfacade::{Config, Database, Dependencies, DriverError, LOG_TARGET, Postgres, Query};
use pgfacade_testing::{CapturedEvent, LogCapture, MockDriver, MockResponse};
use serde_json::json;
use tracing::Level;

const URL: &str = "postgres://localhost/test";

fn start(driver: &MockDriver, config: Config) -> (Database, LogCapture) {
    let logs = LogCapture::new();
    let db = Postgres::builder()
        .driver(Arc::new(driver.clone()))
        .build()
        .start(Dependencies::new().config(config).logger(logs.dispatch()))
        .unwrap();
    logs.clear();
    (db, logs)
}

fn query_events(logs: &LogCapture) -> Vec<CapturedEvent> {
    logs.events_for(LOG_TARGET)
}

fn users_driver() -> MockDriver {
    MockDriver::new().with_response(
        "SELECT * FROM users WHERE id = $1",
        MockResponse::rows([json!({"id": 7, "name": "ada"})]),
    )
}

#[tokio::test]
async fn test_bare_string_with_values_matches_descriptor() {
    let driver = users_driver();
    let (db, logs) = start(&driver, Config::new(URL));

    let from_pair = db
        .query(("SELECT * FROM users WHERE id = $1", vec![json!(7)]))
        .await
        .unwrap();
    let from_descriptor = db
        .query(Query::new("SELECT * FROM users WHERE id = $1").bind(7))
        .await
        .unwrap();

    assert_eq!(from_pair, from_descriptor);

    let executed = driver.executed();
    assert_eq!(executed[0], executed[1]);
    assert_eq!(executed[0].values, vec![json!(7)]);
    assert_eq!(executed[0].log_results, None);

    let events = query_events(&logs);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].field("query"), events[1].field("query"));
    assert!(events.iter().all(|e| e.has_field("results")));
}

#[tokio::test]
async fn test_success_logs_exactly_one_event() {
    let driver = users_driver();
    let (db, logs) = start(&driver, Config::new(URL));

    let rows = db
        .query(("SELECT * FROM users WHERE id = $1", vec![json!(7)]))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);

    let events = query_events(&logs);
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.level, Level::INFO);
    assert!(event.message.starts_with("query took "));
    assert!(event.message.ends_with("ms"));
    assert_eq!(
        event.field("query"),
        Some(r#"{"text":"SELECT * FROM users WHERE id = $1","values":[7]}"#)
    );
    assert_eq!(event.field("results"), Some(r#"[{"id":7,"name":"ada"}]"#));
    assert!(event.has_field("elapsed_ms"));
    assert!(!event.has_field("err"));
}

#[tokio::test]
async fn test_log_results_false_omits_results() {
    let driver = users_driver();
    let (db, logs) = start(&driver, Config::new(URL));

    db.query(
        Query::new("SELECT * FROM users WHERE id = $1")
            .bind(7)
            .log_results(false),
    )
    .await
    .unwrap();

    let events = query_events(&logs);
    assert_eq!(events.len(), 1);
    assert!(!events[0].has_field("results"));
    assert!(events[0].field("query").unwrap().contains(r#""logResults":false"#));
}

#[tokio::test]
async fn test_log_results_true_includes_results() {
    let driver = users_driver();
    let (db, logs) = start(&driver, Config::new(URL));

    db.query(
        Query::new("SELECT * FROM users WHERE id = $1")
            .bind(7)
            .log_results(true),
    )
    .await
    .unwrap();

    assert!(query_events(&logs)[0].has_field("results"));
}

#[tokio::test]
async fn test_failure_logs_error_and_returns_it_unchanged() {
    let driver = MockDriver::new().with_response(
        "SELECT * FROM missing",
        MockResponse::error("42P01", "relation \"missing\" does not exist"),
    );
    let (db, logs) = start(&driver, Config::new(URL));

    let err = db.query("SELECT * FROM missing").await.unwrap_err();

    match err.as_driver() {
        Some(DriverError::Server { code, message, .. }) => {
            assert_eq!(code, "42P01");
            assert_eq!(message, "relation \"missing\" does not exist");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let events = query_events(&logs);
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.level, Level::ERROR);
    assert_eq!(
        event.field("err"),
        Some("server error 42P01: relation \"missing\" does not exist")
    );
    assert!(!event.has_field("results"));
    assert!(event.has_field("query"));
    assert!(event.has_field("elapsed_ms"));
}

#[tokio::test]
async fn test_elapsed_time_tracks_wall_clock() {
    let latency = Duration::from_millis(40);
    let driver = MockDriver::new().with_latency(latency);
    let (db, logs) = start(&driver, Config::new(URL));

    let started = Instant::now();
    db.query("SELECT pg_sleep(0.04)").await.unwrap();
    let wall = started.elapsed();

    let events = query_events(&logs);
    let elapsed: u64 = events[0].field("elapsed_ms").unwrap().parse().unwrap();
    assert!(elapsed >= 40, "elapsed {elapsed}ms is below the injected latency");
    assert!(
        u128::from(elapsed) <= wall.as_millis() + 1,
        "elapsed {elapsed}ms exceeds wall clock {wall:?}"
    );
    assert_eq!(events[0].message, format!("query took {elapsed}ms"));
}

#[tokio::test]
async fn test_quiet_mode_logs_nothing() {
    let driver = users_driver().with_response(
        "SELECT * FROM missing",
        MockResponse::error("42P01", "relation \"missing\" does not exist"),
    );
    let (db, logs) = start(&driver, Config::new(URL).suppress_query_logging(true));

    let rows = db
        .query(("SELECT * FROM users WHERE id = $1", vec![json!(7)]))
        .await
        .unwrap();
    assert_eq!(rows[0]["name"], json!("ada"));

    let err = db.query("SELECT * FROM missing").await.unwrap_err();
    assert_eq!(err.as_driver().and_then(DriverError::code), Some("42P01"));

    assert!(query_events(&logs).is_empty());
}

#[tokio::test]
async fn test_query_from_json_descriptor() {
    let driver = users_driver();
    let (db, logs) = start(&driver, Config::new(URL));

    let query: Query = serde_json::from_value(json!({
        "text": "SELECT * FROM users WHERE id = $1",
        "values": [7],
        "logResults": false
    }))
    .unwrap();
    let rows = db.query(&query).await.unwrap();

    assert_eq!(rows.len(), 1);
    assert!(!query_events(&logs)[0].has_field("results"));
}
