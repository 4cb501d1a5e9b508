//! Structured logging for the component.
//!
//! Every event carries a `component` field naming the component instance.
//! Events go to the `tracing::Dispatch` supplied at `start` when there is
//! one, and to the process-wide default subscriber otherwise.
//!
//! ## Events
//!
//! | Event | Level | Fields |
//! |---|---|---|
//! | connect / disconnect | info | `component` |
//! | query succeeded | info | `component`, `elapsed_ms`, `query`, `results`? |
//! | query failed | error | `component`, `elapsed_ms`, `query`, `err` |
//! | server notice | per severity | `component`, `severity` |
//! | on-connect statement failed | error | `component`, `statement`, `err` |
//! | idle connection error | warn | `component`, `err` |

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{Dispatch, Level};

use crate::error::{DriverError, Error};
use crate::notice::Notice;
use crate::query::{Query, Row};

/// Target used for all events emitted by this crate.
pub const LOG_TARGET: &str = "pgfacade";

/// Field names used in emitted events.
pub mod fields {
    /// Component name.
    pub const COMPONENT: &str = "component";
    /// Query descriptor, as JSON.
    pub const QUERY: &str = "query";
    /// Result rows, as JSON.
    pub const RESULTS: &str = "results";
    /// Error.
    pub const ERR: &str = "err";
    /// Elapsed time in whole milliseconds, rounded up.
    pub const ELAPSED_MS: &str = "elapsed_ms";
    /// Notice severity tag.
    pub const SEVERITY: &str = "severity";
    /// Statement text.
    pub const STATEMENT: &str = "statement";
}

/// Logging handle scoped to one component instance.
#[derive(Clone)]
pub struct Logger {
    component: Arc<str>,
    dispatch: Option<Dispatch>,
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("component", &self.component)
            .field("dispatch", &self.dispatch.is_some())
            .finish()
    }
}

impl Logger {
    /// Create a logger for a component, optionally bound to a dispatcher.
    #[must_use]
    pub fn new(component: impl Into<Arc<str>>, dispatch: Option<Dispatch>) -> Self {
        Self {
            component: component.into(),
            dispatch,
        }
    }

    /// Component name attached to every event.
    #[must_use]
    pub fn component(&self) -> &str {
        &self.component
    }

    fn emit(&self, f: impl FnOnce()) {
        match &self.dispatch {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, f),
            None => f(),
        }
    }

    pub(crate) fn connecting(&self, url: &str) {
        self.emit(|| {
            tracing::info!(target: LOG_TARGET, component = %self.component, "Connecting to {url}");
        });
    }

    pub(crate) fn disconnecting(&self, url: &str) {
        self.emit(|| {
            tracing::info!(target: LOG_TARGET, component = %self.component, "Disconnecting from {url}");
        });
    }

    pub(crate) fn query_succeeded(&self, query: &Query, elapsed_ms: u64, results: Option<&[Row]>) {
        self.emit(|| match results {
            Some(rows) => tracing::info!(
                target: LOG_TARGET,
                component = %self.component,
                elapsed_ms,
                query = %Json(query),
                results = %Json(rows),
                "query took {elapsed_ms}ms"
            ),
            None => tracing::info!(
                target: LOG_TARGET,
                component = %self.component,
                elapsed_ms,
                query = %Json(query),
                "query took {elapsed_ms}ms"
            ),
        });
    }

    pub(crate) fn query_failed(&self, query: &Query, elapsed_ms: u64, err: &Error) {
        self.emit(|| {
            tracing::error!(
                target: LOG_TARGET,
                component = %self.component,
                elapsed_ms,
                query = %Json(query),
                err = %err,
                "query took {elapsed_ms}ms"
            );
        });
    }

    pub(crate) fn notice(&self, notice: &Notice) {
        let severity = notice.severity.as_str();
        let message = notice.message.as_str();
        self.emit(|| match notice.level() {
            Level::DEBUG => {
                tracing::debug!(target: LOG_TARGET, component = %self.component, severity, "{message}");
            }
            Level::INFO => {
                tracing::info!(target: LOG_TARGET, component = %self.component, severity, "{message}");
            }
            Level::WARN => {
                tracing::warn!(target: LOG_TARGET, component = %self.component, severity, "{message}");
            }
            _ => {
                tracing::error!(target: LOG_TARGET, component = %self.component, severity, "{message}");
            }
        });
    }

    pub(crate) fn on_connect_failed(&self, statement: &str, err: &DriverError) {
        self.emit(|| {
            tracing::error!(
                target: LOG_TARGET,
                component = %self.component,
                statement,
                err = %err,
                "Error running query: {statement}"
            );
        });
    }

    pub(crate) fn idle_error(&self, err: &DriverError) {
        self.emit(|| {
            tracing::warn!(
                target: LOG_TARGET,
                component = %self.component,
                err = %err,
                "An idle client has experienced an error"
            );
        });
    }
}

/// Round a duration up to whole milliseconds.
#[must_use]
pub fn elapsed_ms(elapsed: Duration) -> u64 {
    let nanos = elapsed.as_nanos();
    let ms = nanos.div_ceil(1_000_000);
    u64::try_from(ms).unwrap_or(u64::MAX)
}

/// Displays a value as compact JSON.
struct Json<'a, T: ?Sized>(&'a T);

impl<T: Serialize + ?Sized> fmt::Display for Json<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self.0) {
            Ok(s) => f.write_str(&s),
            Err(_) => f.write_str("<unserializable>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_elapsed_ms_rounds_up() {
        assert_eq!(elapsed_ms(Duration::ZERO), 0);
        assert_eq!(elapsed_ms(Duration::from_nanos(1)), 1);
        assert_eq!(elapsed_ms(Duration::from_micros(999)), 1);
        assert_eq!(elapsed_ms(Duration::from_millis(1)), 1);
        assert_eq!(elapsed_ms(Duration::from_micros(1001)), 2);
        assert_eq!(elapsed_ms(Duration::from_secs(2)), 2000);
    }

    #[test]
    fn test_elapsed_ms_is_monotonic() {
        let mut previous = 0;
        for micros in (0..50_000).step_by(337) {
            let ms = elapsed_ms(Duration::from_micros(micros));
            assert!(ms >= previous);
            previous = ms;
        }
    }

    #[test]
    fn test_json_display() {
        let query = Query::new("SELECT $1").bind(1);
        assert_eq!(
            Json(&query).to_string(),
            r#"{"text":"SELECT $1","values":[1]}"#
        );

        let mut row = Row::new();
        row.insert("id".into(), json!(1));
        let rows = vec![row];
        assert_eq!(Json(rows.as_slice()).to_string(), r#"[{"id":1}]"#);
    }

    #[test]
    fn test_logger_debug_hides_dispatch() {
        let logger = Logger::new("postgres", None);
        assert_eq!(logger.component(), "postgres");
        let debug = format!("{logger:?}");
        assert!(debug.contains("postgres"));
        assert!(debug.contains("dispatch: false"));
    }
}
