//! Purpose: Provide the HTTP bridge server over the COPY transfer core.
//! Exports: `ServeConfig`, `serve`, `init_tracing`.
//! Role: Axum-based server; one logical transfer per inbound request.
//! Invariants: Error bodies are plain human-readable text; status codes map
//! from `ErrorKind` (Usage 400, Upstream 502, everything else 500).
//! Invariants: Loopback-only unless explicitly allowed.
//! Invariants: The connection pool is injected, never constructed here.

use std::future::IntoFuture;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use deadpool_postgres::Pool;
use futures::TryStreamExt;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use pgpipe::api::{
    Error, ErrorKind, ExportSpec, ImportSpec, fetch_export, relay_url, run_export, run_import,
};

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub allow_non_loopback: bool,
}

struct AppState {
    pool: Pool,
}

pub async fn serve(config: ServeConfig, pool: Pool) -> Result<(), Error> {
    validate_config(&config)?;

    let state = Arc::new(AppState { pool });

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/export", get(export))
        .route("/import", get(import).post(import))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to bind server")
                .with_source(err)
        })?;
    tracing::info!(bind = %config.bind, "serving");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("server failed")
                    .with_source(err)
            })?;
        }
        _ = shutdown_signal() => {
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(Duration::from_secs(10), &mut server).await {
                Ok(result) => result.map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("server failed")
                        .with_source(err)
                })?,
                Err(_) => {
                    return Err(Error::new(ErrorKind::Io).with_message("server shutdown timed out"));
                }
            }
        }
    };
    Ok(())
}

fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    if !is_loopback(config.bind.ip()) && !config.allow_non_loopback {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("non-loopback bind requires explicit opt-in")
            .with_hint("Re-run with --allow-non-loopback or use a loopback address."));
    }
    Ok(())
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => addr.is_loopback(),
        IpAddr::V6(addr) => addr.is_loopback(),
    }
}

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        let mut signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler");
        signal.recv().await;
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

async fn healthz() -> Response {
    Json(json!({ "ok": true })).into_response()
}

async fn export(
    State(state): State<Arc<AppState>>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Response {
    let spec = match ExportSpec::from_pairs(&pairs) {
        Ok(spec) => spec,
        Err(err) => return error_response(err),
    };
    match run_export(&state.pool, &spec).await {
        Ok(stream) => {
            // Bytes already flushed cannot be retracted; a mid-stream failure
            // ends the body short instead of changing the status.
            let mut response = Response::new(Body::from_stream(stream));
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(spec.format.content_type()),
            );
            response
        }
        Err(err) => error_response(err),
    }
}

async fn import(
    State(state): State<Arc<AppState>>,
    Query(pairs): Query<Vec<(String, String)>>,
    body: Body,
) -> Response {
    let spec = match ImportSpec::from_pairs(&pairs) {
        Ok(spec) => spec,
        Err(err) => return error_response(err),
    };
    let result = match &spec.host {
        Some(host) => {
            // The upstream response is resolved before any database work; a
            // non-200 host never reaches the import step.
            let url = match relay_url(host, &pairs) {
                Ok(url) => url,
                Err(err) => return error_response(err),
            };
            tracing::debug!(url = %url, "fetching upstream");
            match fetch_export(url).await {
                Ok(source) => run_import(&state.pool, &spec, source).await,
                Err(err) => return error_response(err),
            }
        }
        None => {
            let source = body.into_data_stream().map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to read request body")
                    .with_source(err)
            });
            run_import(&state.pool, &spec, source).await
        }
    };
    match result {
        Ok(rows) => Json(json!({ "ok": true, "rows": rows })).into_response(),
        Err(err) => error_response(err),
    }
}

fn error_response(err: Error) -> Response {
    let status = match err.kind() {
        ErrorKind::Usage => StatusCode::BAD_REQUEST,
        ErrorKind::Upstream => StatusCode::BAD_GATEWAY,
        ErrorKind::Transfer | ErrorKind::Io | ErrorKind::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, err.to_string()).into_response()
}
