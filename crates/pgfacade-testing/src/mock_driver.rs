//! Scriptable in-memory driver.
//!
//! [`MockDriver`] implements [`pgfacade::Driver`] without a server. Responses
//! are registered per statement text; everything the facade does through the
//! driver is recorded so tests can assert on it.
//!
//! The first query or stream on a pool opens a simulated physical connection,
//! which runs the pool's on-connect statements exactly like the default
//! driver does. More connections can be simulated with
//! [`MockDriver::simulate_connection`].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use pgfacade::{
    BoxRowStream, Config, Driver, DriverConnection, DriverError, DriverPool, PoolEvents, Query,
    Row, StatementExecutor, StreamOptions,
};
use serde_json::Value;

/// Scripted outcome for a statement.
#[derive(Clone)]
pub enum MockResponse {
    /// Succeed with these rows.
    Rows(Vec<Row>),

    /// Fail with a server error.
    Error {
        /// SQLSTATE code.
        code: String,
        /// Error message.
        message: String,
    },

    /// Produce some rows, then fail. Queries return only the error; streams
    /// yield the rows first.
    RowsThenError {
        /// Rows yielded before the failure.
        rows: Vec<Row>,
        /// SQLSTATE code.
        code: String,
        /// Error message.
        message: String,
    },

    /// Compute the response from the query.
    Custom(Arc<dyn Fn(&Query) -> MockResponse + Send + Sync>),
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rows(rows) => f.debug_tuple("Rows").field(&rows.len()).finish(),
            Self::Error { code, message } => f
                .debug_struct("Error")
                .field("code", code)
                .field("message", message)
                .finish(),
            Self::RowsThenError { rows, code, .. } => f
                .debug_struct("RowsThenError")
                .field("rows", &rows.len())
                .field("code", code)
                .finish(),
            Self::Custom(_) => f.debug_tuple("Custom").field(&"<fn>").finish(),
        }
    }
}

impl MockResponse {
    /// Succeed with no rows.
    #[must_use]
    pub fn empty() -> Self {
        Self::Rows(Vec::new())
    }

    /// Succeed with rows built from JSON objects. Non-object values are skipped.
    #[must_use]
    pub fn rows(rows: impl IntoIterator<Item = Value>) -> Self {
        Self::Rows(
            rows.into_iter()
                .filter_map(|v| match v {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect(),
        )
    }

    /// Fail with a server error.
    #[must_use]
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Compute the response from the query.
    #[must_use]
    pub fn custom(f: impl Fn(&Query) -> MockResponse + Send + Sync + 'static) -> Self {
        Self::Custom(Arc::new(f))
    }

    fn resolve(&self, query: &Query) -> Self {
        match self {
            Self::Custom(f) => f(query).resolve(query),
            other => other.clone(),
        }
    }
}

fn server_error(code: &str, message: &str) -> DriverError {
    DriverError::Server {
        code: code.to_string(),
        severity: "ERROR".to_string(),
        message: message.to_string(),
        detail: None,
    }
}

#[derive(Default)]
struct Shared {
    responses: Mutex<HashMap<String, MockResponse>>,
    default_response: Mutex<Option<MockResponse>>,
    failing_connect: Mutex<HashSet<String>>,
    refuse_connections: AtomicBool,
    latency: Mutex<Option<Duration>>,

    pools: Mutex<Vec<PoolEvents>>,
    last_config: Mutex<Option<Config>>,
    executed: Mutex<Vec<Query>>,
    connect_statements: Mutex<Vec<String>>,
    connections: AtomicUsize,
    open_leases: AtomicUsize,
    released_leases: AtomicUsize,
    lease_returned: Notify,
    close_calls: AtomicUsize,
}

impl Shared {
    fn response_for(&self, query: &Query) -> MockResponse {
        let scripted = self.responses.lock().get(query.text()).cloned();
        scripted
            .or_else(|| self.default_response.lock().clone())
            .unwrap_or_else(MockResponse::empty)
            .resolve(query)
    }

    async fn delay(&self) {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

/// In-memory [`Driver`] with scripted responses and call recording.
///
/// Cheap to clone; clones share state, so keep one in the test and hand
/// another to [`pgfacade::Postgres::builder`].
#[derive(Clone, Default)]
pub struct MockDriver {
    shared: Arc<Shared>,
}

impl fmt::Debug for MockDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockDriver")
            .field("pools_created", &self.pools_created())
            .field("open_leases", &self.open_leases())
            .finish()
    }
}

impl MockDriver {
    /// Create a driver that answers every statement with no rows.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the response for an exact statement text.
    #[must_use]
    pub fn with_response(self, text: impl Into<String>, response: MockResponse) -> Self {
        self.shared.responses.lock().insert(text.into(), response);
        self
    }

    /// Response for statements without a scripted one.
    #[must_use]
    pub fn with_default_response(self, response: MockResponse) -> Self {
        *self.shared.default_response.lock() = Some(response);
        self
    }

    /// Make an on-connect statement fail.
    #[must_use]
    pub fn with_failing_connect_statement(self, statement: impl Into<String>) -> Self {
        self.shared.failing_connect.lock().insert(statement.into());
        self
    }

    /// Refuse every connection, as if the server were unreachable.
    #[must_use]
    pub fn with_unreachable_server(self) -> Self {
        self.shared.refuse_connections.store(true, Ordering::SeqCst);
        self
    }

    /// Delay every query and acquisition.
    #[must_use]
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.shared.latency.lock() = Some(latency);
        self
    }

    /// Number of pools built.
    #[must_use]
    pub fn pools_created(&self) -> usize {
        self.shared.pools.lock().len()
    }

    /// Configuration passed to the most recent `create_pool`.
    #[must_use]
    pub fn last_config(&self) -> Option<Config> {
        self.shared.last_config.lock().clone()
    }

    /// Queries and streams executed, in order.
    #[must_use]
    pub fn executed(&self) -> Vec<Query> {
        self.shared.executed.lock().clone()
    }

    /// On-connect statements executed on simulated connections, in order.
    #[must_use]
    pub fn connect_statements(&self) -> Vec<String> {
        self.shared.connect_statements.lock().clone()
    }

    /// Number of simulated physical connections opened.
    #[must_use]
    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// Connections currently checked out for streams.
    #[must_use]
    pub fn open_leases(&self) -> usize {
        self.shared.open_leases.load(Ordering::SeqCst)
    }

    /// Connections returned after a stream.
    #[must_use]
    pub fn leases_released(&self) -> usize {
        self.shared.released_leases.load(Ordering::SeqCst)
    }

    /// Number of times a pool was closed.
    #[must_use]
    pub fn close_calls(&self) -> usize {
        self.shared.close_calls.load(Ordering::SeqCst)
    }

    /// Open a physical connection on the most recent pool, running its
    /// on-connect statements.
    ///
    /// Returns `false` if no pool has been built.
    pub async fn simulate_connection(&self) -> bool {
        let events = self.shared.pools.lock().last().cloned();
        match events {
            Some(events) => {
                open_connection(&self.shared, &events).await;
                true
            }
            None => false,
        }
    }

    /// Deliver a server notice on the most recent pool.
    pub fn emit_notice(&self, severity: &str, message: &str) {
        if let Some(events) = self.shared.pools.lock().last() {
            events.notice(severity, message);
        }
    }

    /// Report an error on an idle connection of the most recent pool.
    pub fn emit_idle_error(&self, err: &DriverError) {
        if let Some(events) = self.shared.pools.lock().last() {
            events.idle_error(err);
        }
    }
}

impl Driver for MockDriver {
    fn create_pool(
        &self,
        config: &Config,
        events: PoolEvents,
    ) -> Result<Arc<dyn DriverPool>, DriverError> {
        *self.shared.last_config.lock() = Some(config.clone());
        self.shared.pools.lock().push(events.clone());
        Ok(Arc::new(MockPool {
            shared: Arc::clone(&self.shared),
            events,
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }))
    }
}

async fn open_connection(shared: &Arc<Shared>, events: &PoolEvents) {
    shared.connections.fetch_add(1, Ordering::SeqCst);
    let conn = MockExecutor {
        shared: Arc::clone(shared),
    };
    events.connected(&conn).await;
}

struct MockExecutor {
    shared: Arc<Shared>,
}

#[async_trait::async_trait]
impl StatementExecutor for MockExecutor {
    async fn execute(&self, statement: &str) -> Result<(), DriverError> {
        self.shared
            .connect_statements
            .lock()
            .push(statement.to_string());
        if self.shared.failing_connect.lock().contains(statement) {
            return Err(server_error("42601", &format!("syntax error in {statement:?}")));
        }
        Ok(())
    }
}

struct MockPool {
    shared: Arc<Shared>,
    events: PoolEvents,
    connected: AtomicBool,
    closed: AtomicBool,
}

impl MockPool {
    async fn checkout(&self) -> Result<(), DriverError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::PoolClosed);
        }
        if self.shared.refuse_connections.load(Ordering::SeqCst) {
            return Err(DriverError::Connection("connection refused".into()));
        }
        if !self.connected.swap(true, Ordering::SeqCst) {
            open_connection(&self.shared, &self.events).await;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl DriverPool for MockPool {
    async fn query(&self, query: &Query) -> Result<Vec<Row>, DriverError> {
        self.checkout().await?;
        self.shared.delay().await;
        self.shared.executed.lock().push(query.clone());

        match self.shared.response_for(query) {
            MockResponse::Rows(rows) => Ok(rows),
            MockResponse::Error { code, message }
            | MockResponse::RowsThenError { code, message, .. } => {
                Err(server_error(&code, &message))
            }
            MockResponse::Custom(_) => Ok(Vec::new()),
        }
    }

    async fn acquire(&self) -> Result<Box<dyn DriverConnection>, DriverError> {
        self.checkout().await?;
        self.shared.delay().await;
        self.shared.open_leases.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockLease {
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.shared.close_calls.fetch_add(1, Ordering::SeqCst);

        // Like a real pool, closing waits for checked-out connections.
        loop {
            let returned = self.shared.lease_returned.notified();
            if self.shared.open_leases.load(Ordering::SeqCst) == 0 {
                break;
            }
            returned.await;
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// A checked-out connection. Dropping it returns it to the pool.
struct MockLease {
    shared: Arc<Shared>,
}

impl Drop for MockLease {
    fn drop(&mut self) {
        self.shared.open_leases.fetch_sub(1, Ordering::SeqCst);
        self.shared.released_leases.fetch_add(1, Ordering::SeqCst);
        self.shared.lease_returned.notify_waiters();
    }
}

#[async_trait::async_trait]
impl DriverConnection for MockLease {
    async fn open_stream(
        &mut self,
        query: &Query,
        _options: &StreamOptions,
    ) -> Result<BoxRowStream, DriverError> {
        self.shared.executed.lock().push(query.clone());

        let items: Vec<Result<Row, DriverError>> = match self.shared.response_for(query) {
            MockResponse::Rows(rows) => rows.into_iter().map(Ok).collect(),
            MockResponse::Error { code, message } => vec![Err(server_error(&code, &message))],
            MockResponse::RowsThenError {
                rows,
                code,
                message,
            } => rows
                .into_iter()
                .map(Ok)
                .chain(std::iter::once(Err(server_error(&code, &message))))
                .collect(),
            MockResponse::Custom(_) => Vec::new(),
        };
        Ok(Box::pin(futures_util::stream::iter(items)))
    }
}
