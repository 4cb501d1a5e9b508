//! On-connect statements run on every new connection, in order, and a
//! failing statement does not stop the rest.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use pgfacade::{Config, Database, Dependencies, LOG_TARGET, Postgres};
use pgfacade_testing::{LogCapture, MockDriver};
use tracing::Level;

const STATEMENTS: [&str; 3] = [
    "SET search_path TO app",
    "SET bogus_setting = on",
    "SET TIME ZONE 'UTC'",
];

fn start(driver: &MockDriver, statements: &[&str]) -> (Database, LogCapture) {
    let logs = LogCapture::new();
    let config = statements
        .iter()
        .fold(Config::new("postgres://localhost/test"), |c, s| c.on_connect(*s));
    let db = Postgres::builder()
        .driver(Arc::new(driver.clone()))
        .build()
        .start(Dependencies::new().config(config).logger(logs.dispatch()))
        .unwrap();
    logs.clear();
    (db, logs)
}

#[tokio::test]
async fn test_failing_statement_does_not_stop_the_rest() {
    let driver = MockDriver::new().with_failing_connect_statement(STATEMENTS[1]);
    let (db, logs) = start(&driver, &STATEMENTS);

    db.query("SELECT 1").await.unwrap();

    assert_eq!(driver.connect_statements(), STATEMENTS);

    let errors = logs.at_level(Level::ERROR);
    assert_eq!(errors.len(), 1, "only the failing statement is logged");
    assert_eq!(errors[0].target, LOG_TARGET);
    assert_eq!(errors[0].message, format!("Error running query: {}", STATEMENTS[1]));
    assert_eq!(errors[0].field("statement"), Some(STATEMENTS[1]));
    assert!(errors[0].field("err").unwrap().contains("42601"));
}

#[tokio::test]
async fn test_statements_run_once_per_connection() {
    let driver = MockDriver::new();
    let (db, logs) = start(&driver, &STATEMENTS);

    db.query("SELECT 1").await.unwrap();
    db.query("SELECT 2").await.unwrap();
    assert_eq!(driver.connections(), 1);
    assert_eq!(driver.connect_statements().len(), 3);

    assert!(driver.simulate_connection().await);
    assert_eq!(driver.connections(), 2);
    assert_eq!(driver.connect_statements().len(), 6);
    assert_eq!(driver.connect_statements()[3..], STATEMENTS);

    assert!(logs.at_level(Level::ERROR).is_empty());
}

#[tokio::test]
async fn test_no_statements_configured() {
    let driver = MockDriver::new();
    let (db, _logs) = start(&driver, &[]);

    db.query("SELECT 1").await.unwrap();

    assert_eq!(driver.connections(), 1);
    assert!(driver.connect_statements().is_empty());
}

#[tokio::test]
async fn test_every_statement_failing_still_connects() {
    let driver = STATEMENTS
        .iter()
        .fold(MockDriver::new(), |d, s| d.with_failing_connect_statement(*s));
    let (db, logs) = start(&driver, &STATEMENTS);

    assert!(db.query("SELECT 1").await.is_ok());
    assert_eq!(logs.at_level(Level::ERROR).len(), 3);
}
