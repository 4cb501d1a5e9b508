//! Query and stream facades.

use std::sync::Arc;
use std::time::Instant;

use crate::driver::DriverPool;
use crate::error::{Error, Result};
use crate::instrumentation::{Logger, elapsed_ms};
use crate::query::{IntoQuery, Query, Row};
use crate::stream::{RowStream, StreamOptions};

/// Which query facade a [`Database`] uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// Every query emits one log event with its latency.
    Logged,
    /// Queries are not logged.
    Quiet,
}

/// Handle returned by `start`.
///
/// Cheap to clone; every clone shares the same pool. Holds no per-call
/// state, so concurrent use from many tasks is fine.
#[derive(Clone)]
pub struct Database {
    pool: Arc<dyn DriverPool>,
    log: Logger,
    mode: QueryMode,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("component", &self.log.component())
            .field("mode", &self.mode)
            .field("closed", &self.pool.is_closed())
            .finish()
    }
}

impl Database {
    pub(crate) fn new(pool: Arc<dyn DriverPool>, log: Logger, mode: QueryMode) -> Self {
        Self { pool, log, mode }
    }

    /// The query facade in use.
    #[must_use]
    pub fn mode(&self) -> QueryMode {
        self.mode
    }

    /// Execute a statement and return its rows.
    ///
    /// Accepts anything convertible to a [`Query`]: a bare statement, a
    /// `(text, values)` pair or a built descriptor.
    ///
    /// ```rust,ignore
    /// let rows = db.query("SELECT now()").await?;
    /// let rows = db.query(("SELECT * FROM users WHERE id = $1", vec![json!(7)])).await?;
    /// let rows = db.query(Query::new("SELECT * FROM secrets").log_results(false)).await?;
    /// ```
    pub async fn query(&self, query: impl IntoQuery) -> Result<Vec<Row>> {
        let query = query.into_query();
        match self.mode {
            QueryMode::Logged => self.logged_query(&query).await,
            QueryMode::Quiet => self.quiet_query(&query).await,
        }
    }

    async fn quiet_query(&self, query: &Query) -> Result<Vec<Row>> {
        Ok(self.pool.query(query).await?)
    }

    async fn logged_query(&self, query: &Query) -> Result<Vec<Row>> {
        let log_results = query.should_log_results();
        let start = Instant::now();

        match self.pool.query(query).await {
            Ok(rows) => {
                let elapsed = elapsed_ms(start.elapsed());
                self.log
                    .query_succeeded(query, elapsed, log_results.then_some(rows.as_slice()));
                Ok(rows)
            }
            Err(err) => {
                let elapsed = elapsed_ms(start.elapsed());
                let err = Error::from(err);
                self.log.query_failed(query, elapsed, &err);
                Err(err)
            }
        }
    }

    /// Open a streaming query on a dedicated connection.
    ///
    /// Returns as soon as the connection is acquired and the stream is
    /// open; rows arrive as the stream is polled. Fails without creating a
    /// stream when no connection can be acquired.
    pub async fn stream(&self, query: impl IntoQuery, options: StreamOptions) -> Result<RowStream> {
        let query = query.into_query();
        let mut lease = self.pool.acquire().await?;
        // On error the lease drops here and the connection is released.
        let inner = lease.open_stream(&query, &options).await?;
        Ok(RowStream::new(inner, lease))
    }
}
