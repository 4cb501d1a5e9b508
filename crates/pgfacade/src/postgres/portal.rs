//! Portal-backed row streams.
//!
//! A stream binds its statement to a portal inside a transaction and
//! executes it with a row limit, so any row-returning statement can be
//! streamed (`SELECT`, `INSERT ... RETURNING`, `SHOW`, ...). A task owns the
//! checked-out connection and hands rows to the consumer through a channel
//! bounded by the batch size.
//!
//! The transaction is committed once the portal is exhausted. It is rolled
//! back when a batch fails or the consumer goes away. The connection returns
//! to the pool before the consumer sees the end of the stream or its error.

use deadpool::managed::Object;
use tokio::sync::mpsc;
use tokio_postgres::Client;

use super::manager::Manager;
use super::params;
use super::rows::decode_row;
use crate::driver::BoxRowStream;
use crate::error::DriverError;
use crate::query::{Query, Row};

type RowSender = mpsc::Sender<Result<Row, DriverError>>;

/// Start streaming a query on a checked-out connection.
pub(crate) fn open(conn: Object<Manager>, query: Query, batch_size: u32) -> BoxRowStream {
    let batch_size = batch_size.max(1);
    let capacity = usize::try_from(batch_size).unwrap_or(usize::MAX);
    let (tx, rx) = mpsc::channel(capacity);

    tokio::spawn(run(conn, query, batch_size, tx));

    Box::pin(futures_util::stream::unfold(rx, |mut rx| async move {
        let item = rx.recv().await?;
        Some((item, rx))
    }))
}

async fn run(mut conn: Object<Manager>, query: Query, batch_size: u32, rows: RowSender) {
    let outcome = {
        let _busy = conn.busy();
        pump(&mut conn.client, &query, batch_size, &rows).await
    };
    drop(conn);

    if let Err(err) = outcome {
        tracing::trace!(err = %err, "stream failed");
        let _ = rows.send(Err(err)).await;
    }
}

async fn pump(
    client: &mut Client,
    query: &Query,
    batch_size: u32,
    rows: &RowSender,
) -> Result<(), DriverError> {
    let transaction = client.transaction().await?;
    let bound = params::bind(&query.values);
    let portal = transaction
        .bind(query.text(), &params::as_refs(&bound))
        .await?;
    let max_rows = i32::try_from(batch_size).unwrap_or(i32::MAX);

    loop {
        let batch = transaction.query_portal(&portal, max_rows).await?;
        let exhausted = batch.len() < batch_size as usize;

        for row in &batch {
            if rows.send(Ok(decode_row(row)?)).await.is_err() {
                // Dropping the transaction rolls it back.
                tracing::trace!("stream dropped by consumer");
                return Ok(());
            }
        }

        if exhausted {
            break;
        }
    }

    transaction.commit().await?;
    tracing::trace!("stream exhausted");
    Ok(())
}
