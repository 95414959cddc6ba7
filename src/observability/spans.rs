//! Spans carrying correlation IDs.

use axum::http::Method;
use tracing::Span;

/// Span wrapping everything logged for one request.
pub fn request_span(request_id: &str, method: &Method, path: &str) -> Span {
    tracing::info_span!("request", request_id = %request_id, method = %method, path = %path)
}

/// Span labelling a server instance.
pub fn server_span(server_id: &str) -> Span {
    tracing::info_span!("server", id = %server_id)
}
