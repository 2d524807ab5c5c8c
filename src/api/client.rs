//! Purpose: Blocking HTTP client for talking to a bridge's export endpoint.
//! Exports: `export_url`, `relay_url`, `fetch_export`.
//! Role: Bridges `ureq`'s blocking reads into async byte streams over a
//! bounded channel.
//! Invariants: A non-200 upstream is reported with its status code and at most
//! one bounded body read; it never becomes a byte stream.
//! Invariants: Dropping the returned stream unblocks the producer thread.

use std::io::Read;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use url::Url;

use crate::core::error::{Error, ErrorKind};

/// Upstream bytes are relayed in chunks of this size.
const FETCH_CHUNK_BYTES: usize = 64 * 1024;

/// Chunks buffered between the fetch thread and the consumer.
const FETCH_CHANNEL_CHUNKS: usize = 4;

/// How much of a failed upstream's body is included in the error.
const ERROR_SNIPPET_BYTES: u64 = 1024;

/// Build an export URL against `base`, a full export endpoint URL. Filter
/// keys are passed as `<column>.<op>` and become `where.<column>.<op>`.
pub fn export_url(
    base: &str,
    table: &str,
    select: Option<&str>,
    wheres: &[(String, String)],
    csv: bool,
) -> Result<Url, Error> {
    let mut url = Url::parse(base).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid export endpoint URL")
            .with_hint("Use a full URL like http://127.0.0.1:2001/export.")
            .with_source(err)
    })?;
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("table", table);
        if let Some(select) = select {
            query.append_pair("select", select);
        }
        for (key, value) in wheres {
            query.append_pair(&format!("where.{key}"), value);
        }
        if csv {
            query.append_pair("csv", "1");
        }
    }
    Ok(url)
}

/// Build the upstream URL for a relay import: every query parameter except
/// `host` and `to` is forwarded verbatim, after any params `host` already has.
pub fn relay_url(host: &str, pairs: &[(String, String)]) -> Result<Url, Error> {
    let mut url = Url::parse(host).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid host URL")
            .with_hint("Pass ?host=<full upstream export URL>.")
            .with_source(err)
    })?;
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in pairs {
            if key == "host" || key == "to" {
                continue;
            }
            query.append_pair(key, value);
        }
    }
    Ok(url)
}

/// Fetch an export and return its body as an async byte stream. The response
/// status is resolved before returning so callers can fail fast without
/// touching the database.
pub async fn fetch_export(url: Url) -> Result<ReceiverStream<Result<Bytes, Error>>, Error> {
    let (status_tx, status_rx) = oneshot::channel::<Result<(), Error>>();
    let (chunk_tx, chunk_rx) = mpsc::channel::<Result<Bytes, Error>>(FETCH_CHANNEL_CHUNKS);

    tokio::task::spawn_blocking(move || {
        let response = match ureq::get(url.as_str()).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                let mut snippet = String::new();
                let _ = response
                    .into_reader()
                    .take(ERROR_SNIPPET_BYTES)
                    .read_to_string(&mut snippet);
                let _ = status_tx.send(Err(Error::new(ErrorKind::Upstream)
                    .with_status(code)
                    .with_message(format!("host responded {code}: {snippet}"))));
                return;
            }
            Err(err) => {
                let _ = status_tx.send(Err(Error::new(ErrorKind::Upstream)
                    .with_message("failed to fetch from host")
                    .with_source(err)));
                return;
            }
        };
        if status_tx.send(Ok(())).is_err() {
            return;
        }
        let mut reader = response.into_reader();
        let mut chunk = vec![0u8; FETCH_CHUNK_BYTES];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(read) => {
                    let bytes = Bytes::copy_from_slice(&chunk[..read]);
                    if chunk_tx.blocking_send(Ok(bytes)).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    let _ = chunk_tx.blocking_send(Err(Error::new(ErrorKind::Upstream)
                        .with_message("upstream body read failed")
                        .with_source(err)));
                    break;
                }
            }
        }
    });

    status_rx
        .await
        .map_err(|_| {
            Error::new(ErrorKind::Internal)
                .with_message("fetch task dropped before reporting status")
        })??;
    Ok(ReceiverStream::new(chunk_rx))
}
