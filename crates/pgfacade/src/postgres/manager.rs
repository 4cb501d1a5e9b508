//! Connection manager for the deadpool pool.
//!
//! Creates physical connections, spawns a driver task per connection that
//! routes server notices and connection errors to [`PoolEvents`], runs the
//! on-connect statements, and recycles connections on return.
//!
//! A connection error is reported as an idle-client error only when no query
//! is running on that connection; otherwise the running query fails with it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use deadpool::managed::{self, Metrics, RecycleError, RecycleResult};
use futures_util::StreamExt;
use tokio_postgres::tls::NoTlsStream;
use tokio_postgres::{AsyncMessage, Client, Connection, NoTls, Socket};

use crate::driver::StatementExecutor;
use crate::error::DriverError;
use crate::hooks::PoolEvents;
use crate::query::{Query, Row};

use super::params;
use super::rows::decode_row;

/// A pooled physical connection.
pub struct PgClient {
    pub(super) client: Client,
    // Set while a query or stream is running on this connection.
    busy: Arc<AtomicBool>,
}

impl std::fmt::Debug for PgClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgClient")
            .field("closed", &self.client.is_closed())
            .field("busy", &self.busy.load(Ordering::Acquire))
            .finish()
    }
}

impl PgClient {
    fn new(client: Client, busy: Arc<AtomicBool>) -> Self {
        Self { client, busy }
    }

    /// Mark the connection busy until the guard is dropped.
    pub(super) fn busy(&self) -> BusyGuard {
        self.busy.store(true, Ordering::Release);
        BusyGuard(Arc::clone(&self.busy))
    }

    /// Execute a query and decode its rows.
    pub(super) async fn query(&self, query: &Query) -> Result<Vec<Row>, DriverError> {
        let _busy = self.busy();
        let bound = params::bind(&query.values);
        let rows = self
            .client
            .query(query.text(), &params::as_refs(&bound))
            .await?;
        rows.iter().map(decode_row).collect()
    }
}

/// Clears the busy flag of a [`PgClient`] on drop.
pub(super) struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[async_trait::async_trait]
impl StatementExecutor for PgClient {
    async fn execute(&self, statement: &str) -> Result<(), DriverError> {
        self.client.batch_execute(statement).await?;
        Ok(())
    }
}

/// Creates and recycles [`PgClient`]s.
pub struct Manager {
    config: tokio_postgres::Config,
    events: PoolEvents,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("hosts", &self.config.get_hosts().len())
            .field("dbname", &self.config.get_dbname())
            .finish()
    }
}

impl Manager {
    pub(super) fn new(config: tokio_postgres::Config, events: PoolEvents) -> Self {
        Self { config, events }
    }
}

impl managed::Manager for Manager {
    type Type = PgClient;
    type Error = DriverError;

    async fn create(&self) -> Result<PgClient, DriverError> {
        let (client, connection) = self
            .config
            .connect(NoTls)
            .await
            .map_err(|e| DriverError::Connection(e.to_string()))?;

        let busy = Arc::new(AtomicBool::new(false));
        spawn_connection(connection, self.events.clone(), Arc::clone(&busy));

        let client = PgClient::new(client, busy);
        self.events.connected(&client).await;
        Ok(client)
    }

    async fn recycle(&self, client: &mut PgClient, _: &Metrics) -> RecycleResult<DriverError> {
        if client.client.is_closed() {
            return Err(RecycleError::Message("connection closed".into()));
        }
        Ok(())
    }
}

/// Drive a connection until it closes, routing asynchronous messages.
fn spawn_connection(
    mut connection: Connection<Socket, NoTlsStream>,
    events: PoolEvents,
    busy: Arc<AtomicBool>,
) {
    tokio::spawn(async move {
        let mut messages = futures_util::stream::poll_fn(move |cx| connection.poll_message(cx));
        while let Some(message) = messages.next().await {
            match message {
                Ok(AsyncMessage::Notice(notice)) => {
                    events.notice(notice.severity(), notice.message());
                }
                Ok(_) => {}
                Err(err) => {
                    connection_failed(&events, &busy, &err.into());
                    break;
                }
            }
        }
    });
}

/// Report a connection failure. Returns `true` if it was logged as an idle
/// client error.
fn connection_failed(events: &PoolEvents, busy: &AtomicBool, err: &DriverError) -> bool {
    if busy.load(Ordering::Acquire) {
        tracing::debug!(err = %err, "connection failed while a query was running");
        return false;
    }
    events.idle_error(err);
    true
}
