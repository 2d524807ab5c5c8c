//! Purpose: Move raw bytes between COPY channels and byte streams.
//! Exports: `copy_to_stream`, `copy_from_stream`.
//! Role: Pure byte pipe; the database engine is the sole interpreter of the
//! payload, whether native text/binary dump or CSV-with-header.
//! Invariants: No payload parsing and no buffering beyond one in-flight chunk.
//! Invariants: Dropping the sink before `finish` aborts the COPY, so a source
//! error commits nothing.

use bytes::Bytes;
use futures::{SinkExt, Stream, TryStreamExt, pin_mut};
use tokio_postgres::{Client, CopyOutStream};

use crate::core::error::{Error, ErrorKind};

fn transfer_error(message: &str, err: tokio_postgres::Error) -> Error {
    Error::new(ErrorKind::Transfer)
        .with_message(message)
        .with_source(err)
}

/// Open the bulk-export channel for `sql` and return the raw byte stream.
pub async fn copy_to_stream(client: &Client, sql: &str) -> Result<CopyOutStream, Error> {
    client
        .copy_out(sql)
        .await
        .map_err(|err| transfer_error("failed to start bulk export", err))
}

/// Feed `source` into the bulk-import channel for `sql`, returning the row
/// count reported by the database.
pub async fn copy_from_stream<S>(client: &Client, sql: &str, source: S) -> Result<u64, Error>
where
    S: Stream<Item = Result<Bytes, Error>>,
{
    let sink = client
        .copy_in(sql)
        .await
        .map_err(|err| transfer_error("failed to start bulk import", err))?;
    pin_mut!(sink);
    pin_mut!(source);
    while let Some(chunk) = source.try_next().await? {
        sink.send(chunk)
            .await
            .map_err(|err| transfer_error("bulk import write failed", err))?;
    }
    sink.finish()
        .await
        .map_err(|err| transfer_error("bulk import did not complete", err))
}
