//! Single request processing.
//!
//! # Data Flow
//! ```text
//! PendingRequest (from the per-path queue)
//!     → request id, base headers, strip accept-encoding
//!     → read body, get or load the cached handler
//!     → invoke handler (panics caught)
//!     → frame: Reply | Stream | Empty | FuncError
//!     → timing headers, optional compression
//!     → response handed to the connection; streams pumped until done
//! ```
//!
//! # Design Decisions
//! - The response travels back through a oneshot; the connection task owns
//!   writing it. Processing ends once a buffered response is handed over, or
//!   once a stream's last chunk is queued
//! - Every failure is reported once, through the server's `ErrorReporter`
//! - A stream that fails mid-way ends the body; headers are already gone

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, VARY};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, Request, Response, StatusCode};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt};
use tokio::sync::oneshot;
use tracing::Instrument;

use crate::config::{CompressionConfig, LimitsConfig};
use crate::error::FuncError;
use crate::func::{ByteStream, Context, Event, HandlerCache, Output, RawRequest, Reply};
use crate::http::body;
use crate::http::compression::{self, Encoding};
use crate::http::headers;
use crate::http::queue::Drain;
use crate::lifecycle::faults;
use crate::lifecycle::ErrorReporter;
use crate::net::ActiveRequest;
use crate::observability::{metrics, spans};

/// A request waiting for its turn on a path.
pub struct PendingRequest {
    pub request: Request<Body>,
    /// When the request arrived, before any queueing.
    pub requested_at: Instant,
    pub reply: oneshot::Sender<Response<Body>>,
    pub token: ActiveRequest,
}

enum Payload {
    Buffered { body: Bytes, textual: bool },
    Stream(ByteStream),
}

pub struct RequestProcessor {
    cache: HandlerCache,
    reporter: ErrorReporter,
    limits: LimitsConfig,
    compression: CompressionConfig,
}

impl RequestProcessor {
    pub fn new(
        cache: HandlerCache,
        reporter: ErrorReporter,
        limits: LimitsConfig,
        compression: CompressionConfig,
    ) -> Self {
        Self {
            cache,
            reporter,
            limits,
            compression,
        }
    }

    pub fn cache(&self) -> &HandlerCache {
        &self.cache
    }

    /// Answer one request for route `key`.
    pub async fn handle(&self, key: &str, pending: PendingRequest) {
        let PendingRequest {
            request,
            requested_at,
            reply,
            token,
        } = pending;

        let request_id = headers::request_id(request.headers());
        let span = spans::request_span(&request_id, request.method(), request.uri().path());

        self.respond(key, request, requested_at, request_id, reply, token)
            .instrument(span)
            .await
    }

    async fn respond(
        &self,
        key: &str,
        request: Request<Body>,
        requested_at: Instant,
        request_id: String,
        reply: oneshot::Sender<Response<Body>>,
        token: ActiveRequest,
    ) {
        let started_at = Instant::now();
        let (mut parts, body) = request.into_parts();
        tracing::info!("{} {}", parts.method, parts.uri);

        let mut headers = headers::base_headers(
            &parts.headers,
            &request_id,
            started_at.duration_since(requested_at),
        );
        let encoding = parts
            .headers
            .remove(ACCEPT_ENCODING)
            .and_then(|v| v.to_str().ok().map(str::to_string))
            .unwrap_or_default();

        let outcome = match axum::body::to_bytes(body, self.limits.max_body_bytes).await {
            Ok(body) => self.invoke(key, &parts, body, &request_id).await,
            Err(e) => Err(FuncError::Transport(format!(
                "Failed to read request body: {e}"
            ))),
        };

        let (status, payload) = match outcome {
            Ok(Output::Reply(out)) => match buffered(out) {
                Ok((status, extra, payload)) => {
                    headers::merge(&mut headers, &extra);
                    (status, payload)
                }
                Err(e) => {
                    self.reporter.report(e.clone());
                    error_payload(&e, &mut headers)
                }
            },
            Ok(Output::Stream(stream)) => match reply_status(stream.status) {
                Ok(status) => {
                    headers::merge(&mut headers, &stream.headers);
                    (status, Payload::Stream(stream.body))
                }
                Err(_) => {
                    let e = FuncError::handler(format!("Invalid status code {}", stream.status));
                    self.reporter.report(e.clone());
                    error_payload(&e, &mut headers)
                }
            },
            Ok(Output::Empty) => {
                tracing::warn!("Handler returned nothing");
                error_payload(&FuncError::handler("No response"), &mut headers)
            }
            Err(e) => {
                self.reporter.report(e.clone());
                error_payload(&e, &mut headers)
            }
        };

        let finished_at = Instant::now();
        headers::apply_timing(
            &mut headers,
            finished_at.duration_since(started_at),
            finished_at.duration_since(requested_at),
        );
        metrics::record_request(status.as_u16(), requested_at);

        match payload {
            Payload::Buffered { body, textual } => {
                let body = self.compress(status, body, textual, &encoding, &mut headers);
                tracing::debug!(status = status.as_u16(), bytes = body.len(), "Response");

                let response = build(status, headers, body::tracked(Body::from(body), token));
                if reply.send(response).is_err() {
                    tracing::warn!("Client went away before the response was sent");
                }
            }
            Payload::Stream(stream) => {
                tracing::debug!(status = status.as_u16(), "Streaming response");
                self.pump(status, headers, stream, reply, token).await;
            }
        }
    }

    async fn invoke(
        &self,
        key: &str,
        parts: &Parts,
        body: Bytes,
        request_id: &str,
    ) -> Result<Output, FuncError> {
        let func = self.cache.get_or_load(key).await?;

        let event = build_event(parts, body);
        let context = Context {
            request_id: request_id.to_string(),
            config: Arc::clone(&func.config),
        };
        let handler = Arc::clone(&func.handler);
        let call = faults::contain(Box::pin(async move { handler.call(event, context).await }));

        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(FuncError::handler(faults::panic_message(panic.as_ref()))),
        }
    }

    fn compress(
        &self,
        status: StatusCode,
        body: Bytes,
        textual: bool,
        accept: &str,
        headers: &mut HeaderMap,
    ) -> Bytes {
        if !compression::should_compress(status, textual, body.len(), self.compression.min_bytes) {
            return body;
        }
        let Some(encoding) = Encoding::negotiate(accept) else {
            return body;
        };

        match encoding.encode(&body) {
            Ok(encoded) => {
                headers.insert(VARY, HeaderValue::from_static("Accept-Encoding"));
                headers.insert(CONTENT_ENCODING, HeaderValue::from_static(encoding.as_str()));
                headers.remove(CONTENT_LENGTH);
                Bytes::from(encoded)
            }
            Err(e) => {
                self.reporter.report(FuncError::Transport(format!(
                    "{encoding} compression failed: {e}"
                )));
                body
            }
        }
    }

    async fn pump(
        &self,
        status: StatusCode,
        headers: HeaderMap,
        mut stream: ByteStream,
        reply: oneshot::Sender<Response<Body>>,
        token: ActiveRequest,
    ) {
        let (sender, body) = body::channel(self.limits.stream_buffer_chunks);
        let response = build(status, headers, body::tracked(body, token.clone()));
        if reply.send(response).is_err() {
            tracing::warn!("Client went away before the stream started");
            return;
        }

        let _token = token;
        while let Some(item) = stream.next().await {
            match item {
                Ok(chunk) if chunk.is_empty() => continue,
                Ok(chunk) => {
                    if sender.send(chunk).await.is_err() {
                        tracing::warn!("Client disconnected while streaming");
                        return;
                    }
                }
                Err(e) => {
                    self.reporter.report(FuncError::Stream(e.to_string()));
                    break;
                }
            }
        }
        tracing::debug!("Stream finished");
    }
}

impl Drain for RequestProcessor {
    type Job = PendingRequest;

    fn process<'a>(&'a self, key: &'a str, job: PendingRequest) -> BoxFuture<'a, ()> {
        Box::pin(self.handle(key, job))
    }
}

fn build(status: StatusCode, headers: HeaderMap, body: Body) -> Response<Body> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

/// Status `0` counts as unset.
fn reply_status(code: u16) -> Result<StatusCode, axum::http::status::InvalidStatusCode> {
    match code {
        0 => Ok(StatusCode::OK),
        code => StatusCode::from_u16(code),
    }
}

fn buffered(reply: Reply) -> Result<(StatusCode, BTreeMap<String, String>, Payload), FuncError> {
    let status = match reply.status_code {
        Some(code) => reply_status(code)
            .map_err(|_| FuncError::handler(format!("Invalid status code {code}")))?,
        None => StatusCode::OK,
    };

    let payload = match reply.body {
        Some(body) if reply.is_base64_encoded => {
            let decoded = BASE64
                .decode(body.as_bytes())
                .map_err(|e| FuncError::handler(format!("Invalid base64 body: {e}")))?;
            Payload::Buffered {
                body: Bytes::from(decoded),
                textual: false,
            }
        }
        Some(body) => Payload::Buffered {
            body: Bytes::from(body),
            textual: true,
        },
        None => Payload::Buffered {
            body: Bytes::new(),
            textual: true,
        },
    };

    Ok((status, reply.headers, payload))
}

fn error_payload(error: &FuncError, headers: &mut HeaderMap) -> (StatusCode, Payload) {
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/json; charset=utf-8"),
    );
    let body = serde_json::json!({ "error": { "message": error.message() } }).to_string();
    (
        error.status(),
        Payload::Buffered {
            body: Bytes::from(body),
            textual: true,
        },
    )
}

fn build_event(parts: &Parts, body: Bytes) -> Event {
    let mut headers = BTreeMap::new();
    for name in parts.headers.keys() {
        let joined = parts
            .headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join(", ");
        headers.insert(name.as_str().to_string(), joined);
    }

    let query_string = parts
        .uri
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    Event {
        headers,
        http_method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        query_string,
        body: String::from_utf8_lossy(&body).into_owned(),
        raw: RawRequest {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            version: parts.version,
            headers: parts.headers.clone(),
            body,
        },
    }
}
