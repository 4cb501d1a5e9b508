//! # pgfacade-testing
//!
//! Test infrastructure for pgfacade.
//!
//! ## Features
//!
//! - [`MockDriver`]: scriptable in-memory driver (no server required)
//! - [`LogCapture`]: records the component's `tracing` events
//! - [`PostgresContainer`]: PostgreSQL via testcontainers for end-to-end tests
//!
//! ## Mock Driver Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use pgfacade::{Config, Dependencies, Postgres};
//! use pgfacade_testing::{LogCapture, MockDriver, MockResponse};
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn test_with_mock_driver() {
//!     let driver = MockDriver::new()
//!         .with_response("SELECT 1 AS one", MockResponse::rows([json!({"one": 1})]));
//!     let logs = LogCapture::new();
//!
//!     let component = Postgres::builder().driver(Arc::new(driver.clone())).build();
//!     let db = component
//!         .start(
//!             Dependencies::new()
//!                 .config(Config::new("postgres://localhost/test"))
//!                 .logger(logs.dispatch()),
//!         )
//!         .unwrap();
//!
//!     let rows = db.query("SELECT 1 AS one").await.unwrap();
//!     assert_eq!(rows[0]["one"], json!(1));
//!     assert_eq!(logs.events_for(pgfacade::LOG_TARGET).len(), 2);
//! }
//! ```
//!
//! ## Container Example
//!
//! ```rust,ignore
//! use pgfacade_testing::PostgresContainer;
//! use testcontainers::runners::AsyncRunner;
//!
//! #[tokio::test]
//! async fn test_with_real_server() {
//!     let image = PostgresContainer::default();
//!     let container = image.clone().start().await.unwrap();
//!     let port = container.get_host_port_ipv4(5432).await.unwrap();
//!     let url = image.connection_string("127.0.0.1", port);
//!     // Start the component with `url`...
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod container;
pub mod log_capture;
pub mod mock_driver;

pub use container::{POSTGRES_PORT, PostgresContainer};
pub use log_capture::{CapturedEvent, LogCapture};
pub use mock_driver::{MockDriver, MockResponse};
