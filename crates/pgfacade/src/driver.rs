//! Driver abstraction.
//!
//! The facade does not pool connections or speak the wire protocol itself;
//! a [`Driver`] builds a [`DriverPool`] that does. The default
//! implementation (`postgres` feature) is [`crate::postgres::PgDriver`].
//!
//! These traits use `#[async_trait]` because the lifecycle controller holds
//! drivers and pools as trait objects.

use std::pin::Pin;
use std::sync::Arc;

use futures_core::Stream;

use crate::config::Config;
use crate::error::DriverError;
use crate::hooks::PoolEvents;
use crate::query::{Query, Row};
use crate::stream::StreamOptions;

/// Stream of rows produced by a driver connection.
pub type BoxRowStream = Pin<Box<dyn Stream<Item = Result<Row, DriverError>> + Send>>;

/// Builds pools.
pub trait Driver: Send + Sync {
    /// Construct a pool for the configuration.
    ///
    /// The driver must call [`PoolEvents::connected`] for every new physical
    /// connection before handing it out, [`PoolEvents::notice`] for every
    /// server notice, and [`PoolEvents::idle_error`] when a pooled
    /// connection fails outside of a query.
    fn create_pool(
        &self,
        config: &Config,
        events: PoolEvents,
    ) -> Result<Arc<dyn DriverPool>, DriverError>;
}

/// A connection pool.
#[async_trait::async_trait]
pub trait DriverPool: Send + Sync {
    /// Execute a statement on any pooled connection and return its rows.
    async fn query(&self, query: &Query) -> Result<Vec<Row>, DriverError>;

    /// Check out a connection for exclusive use.
    ///
    /// The connection returns to the pool when the box is dropped.
    async fn acquire(&self) -> Result<Box<dyn DriverConnection>, DriverError>;

    /// Close the pool.
    ///
    /// New checkouts fail at once and idle connections are closed. Resolves
    /// only after every checked-out connection has been returned and closed.
    async fn close(&self);

    /// Check if the pool has been closed.
    fn is_closed(&self) -> bool;
}

/// A checked-out connection.
#[async_trait::async_trait]
pub trait DriverConnection: Send {
    /// Open a row stream for a statement on this connection.
    ///
    /// The returned stream must not outlive its usefulness without this
    /// connection: callers keep the connection checked out until the stream
    /// finishes.
    async fn open_stream(
        &mut self,
        query: &Query,
        options: &StreamOptions,
    ) -> Result<BoxRowStream, DriverError>;
}

/// Executes initialization statements on a fresh connection.
#[async_trait::async_trait]
pub trait StatementExecutor: Send + Sync {
    /// Execute a statement, discarding any rows.
    async fn execute(&self, statement: &str) -> Result<(), DriverError>;
}
