//! HTTP routes over the batch pipeline.
//!
//! [`LedgerService`] owns the [`Inserter`] and the token source and exposes
//! them as an `axum` [`Router`]:
//!
//! - `GET /` service description.
//! - `GET /health/heartbeat` liveness, as JSON or plain text.
//! - `POST /api/v1/tokens?size=<n>` fetches `n` tokens and streams one
//!   `OK  : <token>` / `ERR : <token>` line per token as each insert
//!   completes.
//!
//! With the `tracing` feature every request is also written to an access log
//! carrying method, URI, user agent, status and latency; `5xx` answers are
//! logged at error level.

use super::response::ApiError;
use crate::server::telemetry::{
    decrement_batches_inflight, increment_batches_inflight, increment_insert_errors,
    increment_requests, increment_tokens_inserted, record_batch_duration,
    record_tokens_per_request,
};
use axum::{
    Json, Router,
    body::Body,
    extract::{Query, State},
    http::{HeaderMap, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use core::convert::Infallible;
use futures::StreamExt;
use ledger::{Batch, Error, Inserter, Kind, Op, Storage, TokenSource};
use serde::{Deserialize, Serialize};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tower_http::cors::CorsLayer;

pub const DESCRIPTION: &str = "ledger token service";

/// Route handlers share this state.
pub struct LedgerService<S, T> {
    inserter: Inserter<S>,
    source: Arc<T>,
    max_batch_size: u64,
    request_timeout: Option<Duration>,
    started_at: DateTime<Utc>,
}

impl<S, T> Clone for LedgerService<S, T> {
    fn clone(&self) -> Self {
        Self {
            inserter: self.inserter.clone(),
            source: Arc::clone(&self.source),
            max_batch_size: self.max_batch_size,
            request_timeout: self.request_timeout,
            started_at: self.started_at,
        }
    }
}

impl<S: Storage, T: TokenSource> LedgerService<S, T> {
    pub fn new(inserter: Inserter<S>, source: Arc<T>, max_batch_size: u64) -> Self {
        Self {
            inserter,
            source,
            max_batch_size,
            request_timeout: None,
            started_at: Utc::now(),
        }
    }

    /// Bounds each token request: inserts still running `timeout` after the
    /// request arrived report a failure line. `None` leaves them unbounded.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn router(self) -> Router {
        let router = Router::new()
            .route("/", get(service_info))
            .route("/health/heartbeat", get(heartbeat::<S, T>))
            .route("/api/v1/tokens", post(insert_tokens::<S, T>))
            .fallback(not_found);

        // Access log: one span per request, a response event with status and
        // latency, and an error event for server failures.
        #[cfg(feature = "tracing")]
        let router = {
            use tower_http::{
                LatencyUnit,
                trace::{DefaultOnFailure, DefaultOnRequest, DefaultOnResponse, TraceLayer},
            };
            use tracing::Level;

            router.layer(
                TraceLayer::new_for_http()
                    .make_span_with(|req: &axum::extract::Request| {
                        let user_agent = req
                            .headers()
                            .get(header::USER_AGENT)
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or_default();
                        tracing::info_span!(
                            "request",
                            method = %req.method(),
                            uri = %req.uri(),
                            path = req.uri().path(),
                            user_agent,
                        )
                    })
                    .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                    .on_response(
                        DefaultOnResponse::new()
                            .level(Level::INFO)
                            .latency_unit(LatencyUnit::Millis),
                    )
                    .on_failure(
                        DefaultOnFailure::new()
                            .level(Level::ERROR)
                            .latency_unit(LatencyUnit::Millis),
                    ),
            )
        };

        router.layer(CorsLayer::permissive()).with_state(self)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub description: String,
    pub version: String,
    /// Set from `LEDGER_BUILD_TIME` at compile time.
    pub build_time: Option<String>,
    /// Set from `LEDGER_COMMIT` at compile time.
    pub commit: Option<String>,
    /// Compiler that built the binary when `LEDGER_RUSTC_VERSION` was set at
    /// compile time, otherwise the minimum supported Rust version.
    pub runtime_version: String,
    pub os: String,
    pub arch: String,
}

impl ServiceInfo {
    pub fn current() -> Self {
        Self {
            description: DESCRIPTION.to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            build_time: option_env!("LEDGER_BUILD_TIME").map(str::to_owned),
            commit: option_env!("LEDGER_COMMIT").map(str::to_owned),
            runtime_version: option_env!("LEDGER_RUSTC_VERSION")
                .unwrap_or(concat!("rust ", env!("CARGO_PKG_RUST_VERSION")))
                .to_owned(),
            os: std::env::consts::OS.to_owned(),
            arch: std::env::consts::ARCH.to_owned(),
        }
    }
}

async fn service_info() -> Json<ServiceInfo> {
    Json(ServiceInfo::current())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Heartbeat {
    pub started_at: DateTime<Utc>,
    pub now: DateTime<Utc>,
    pub status: String,
    pub version: String,
}

async fn heartbeat<S: Storage, T: TokenSource>(
    State(service): State<LedgerService<S, T>>,
    headers: HeaderMap,
) -> Response {
    let now = Utc::now();
    let wants_json = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/json"));

    if wants_json {
        Json(Heartbeat {
            started_at: service.started_at,
            now,
            status: "ok".to_owned(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
        })
        .into_response()
    } else {
        format!(
            "{DESCRIPTION} @ {}",
            now.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
        .into_response()
    }
}

#[derive(Debug, Deserialize)]
struct TokensQuery {
    size: Option<String>,
}

fn parse_size(raw: Option<&str>, max: u64) -> Result<i64, Error> {
    const OP: Op = Op::new("server.parse_size");

    let invalid = |msg: String| {
        Error::builder()
            .op(OP)
            .kind(Kind::Invalid)
            .message(msg)
            .build()
    };

    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(0);
    };
    let size: i64 = raw
        .parse()
        .map_err(|_| invalid(format!("size {raw:?} is not an integer")))?;
    if size < 0 {
        return Err(invalid(format!("size {size} must not be negative")));
    }
    if size.unsigned_abs() > max {
        return Err(invalid(format!("size {size} exceeds maximum allowed ({max})")));
    }
    Ok(size)
}

/// Handles `POST /api/v1/tokens?size=<n>`.
///
/// Parameter and source errors are answered before any work starts, as a
/// JSON error. Once the batch is running the response is `200` and each
/// outcome is written as its own chunk; the body ends with the batch.
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(size = query.size.as_deref())))]
async fn insert_tokens<S: Storage, T: TokenSource>(
    State(service): State<LedgerService<S, T>>,
    Query(query): Query<TokensQuery>,
) -> Result<Response, ApiError> {
    const OP: Op = Op::new("server.insert_tokens");

    let deadline = service
        .request_timeout
        .map(|timeout| tokio::time::Instant::now() + timeout);

    let size = parse_size(query.size.as_deref(), service.max_batch_size)
        .map_err(|e| Error::wrap(OP, e))?;

    increment_requests();
    record_tokens_per_request(size as f64);

    let batch = service
        .inserter
        .ingest_until(service.source.as_ref(), size, deadline)
        .await
        .map_err(|e| Error::wrap(OP, e))?;

    let body = Body::from_stream(outcome_lines(batch));

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response())
}

/// Per-response bookkeeping. Dropping it, whether the batch finished or the
/// client went away, closes the in-flight gauge.
struct Progress {
    inserted: u64,
    failed: u64,
    start: Instant,
}

impl Progress {
    fn new() -> Self {
        increment_batches_inflight();
        Self {
            inserted: 0,
            failed: 0,
            start: Instant::now(),
        }
    }
}

impl Drop for Progress {
    fn drop(&mut self) {
        increment_tokens_inserted(self.inserted);
        increment_insert_errors(self.failed);
        record_batch_duration(self.start.elapsed().as_millis() as f64);
        decrement_batches_inflight();
    }
}

/// Turns a running batch into newline-terminated body chunks.
fn outcome_lines(
    batch: Batch,
) -> impl futures::Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    futures::stream::unfold(
        Some((batch, Progress::new())),
        |state| async move {
            let (mut batch, mut progress) = state?;
            match batch.next().await {
                Some(outcome) => {
                    if outcome.is_ok() {
                        progress.inserted += 1;
                    } else {
                        progress.failed += 1;
                        #[cfg(feature = "tracing")]
                        if let Some(_e) = outcome.error() {
                            tracing::debug!("{_e}");
                        }
                    }
                    let line = Bytes::from(format!("{outcome}\n"));
                    Some((Ok(line), Some((batch, progress))))
                }
                None => {
                    match batch.completion().await {
                        Ok(_summary) => {
                            #[cfg(feature = "tracing")]
                            tracing::info!(
                                "Batch {:?}: {} inserted, {} failed, {} of {} dispatched",
                                _summary.state,
                                progress.inserted,
                                progress.failed,
                                _summary.dispatched,
                                _summary.received
                            );
                        }
                        Err(_e) => {
                            #[cfg(feature = "tracing")]
                            tracing::error!("{_e}");
                        }
                    }
                    drop(progress);
                    None
                }
            }
        },
    )
}

async fn not_found(uri: Uri) -> ApiError {
    Error::builder()
        .op(Op::new("server.route"))
        .kind(Kind::NotFound)
        .message(format!("no route for {}", uri.path()))
        .build()
        .into()
}
