//! Streaming query results.
//!
//! A [`RowStream`] owns the connection it reads from. The connection goes
//! back to the pool exactly once, on the first of: the stream ending, the
//! stream yielding an error, or the stream being dropped.

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::StreamExt;

use crate::driver::{BoxRowStream, DriverConnection};
use crate::error::Error;
use crate::query::Row;

/// Default number of rows fetched from the server per round trip.
pub const DEFAULT_BATCH_SIZE: u32 = 100;

/// Options for a streaming query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct StreamOptions {
    /// Rows fetched from the server per round trip.
    pub batch_size: u32,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl StreamOptions {
    /// Create stream options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fetch batch size. Zero is treated as one.
    #[must_use]
    pub fn batch_size(mut self, rows: u32) -> Self {
        self.batch_size = rows.max(1);
        self
    }
}

/// A live stream of rows backed by a dedicated connection.
///
/// This stream yields rows as the server produces them; it is a handle to a
/// result that may still be filling, not a buffered result.
///
/// # Example
///
/// ```rust,ignore
/// use futures_util::StreamExt;
///
/// let mut rows = db.stream("SELECT * FROM events", StreamOptions::new()).await?;
/// while let Some(row) = rows.next().await {
///     let row = row?;
///     handle(row);
/// }
/// ```
pub struct RowStream {
    // Field order matters: the driver stream is dropped before the lease.
    inner: BoxRowStream,
    lease: Option<Box<dyn DriverConnection>>,
    finished: bool,
}

impl RowStream {
    pub(crate) fn new(inner: BoxRowStream, lease: Box<dyn DriverConnection>) -> Self {
        Self {
            inner,
            lease: Some(lease),
            finished: false,
        }
    }

    /// Check if the stream has finished (ended or failed).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Check if the stream still holds its connection.
    #[must_use]
    pub fn holds_connection(&self) -> bool {
        self.lease.is_some()
    }

    /// Collect all remaining rows into a vector.
    ///
    /// This consumes the stream and loads all rows into memory.
    pub async fn collect_all(mut self) -> Result<Vec<Row>, Error> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await {
            rows.push(row?);
        }
        Ok(rows)
    }

    fn finish(&mut self) {
        self.finished = true;
        if self.lease.take().is_some() {
            tracing::trace!("stream finished, connection released");
        }
    }
}

impl Stream for RowStream {
    type Item = Result<Row, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.finished {
            return Poll::Ready(None);
        }

        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(row))) => Poll::Ready(Some(Ok(row))),
            Poll::Ready(Some(Err(err))) => {
                this.finish();
                Poll::Ready(Some(Err(err.into())))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl fmt::Debug for RowStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowStream")
            .field("finished", &self.finished)
            .field("holds_connection", &self.lease.is_some())
            .finish()
    }
}
