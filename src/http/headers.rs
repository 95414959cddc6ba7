//! Response header construction.
//!
//! # Responsibilities
//! - Pick the request id (inbound header, else generated)
//! - Build the CORS and timing headers every response carries
//! - Build the preflight `Access-Control-Allow-Headers` list
//! - Merge handler-supplied headers over the base set

use std::collections::BTreeMap;
use std::time::Duration;

use axum::http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_REQUEST_HEADERS,
    CONNECTION, HOST, ORIGIN,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use uuid::Uuid;

pub const REQUEST_ID: &str = "x-faasjs-request-id";
pub const FALLBACK_REQUEST_ID: &str = "x-request-id";
pub const TIMING_PENDING: &str = "x-faasjs-timing-pending";
pub const TIMING_PROCESSING: &str = "x-faasjs-timing-processing";
pub const TIMING_TOTAL: &str = "x-faasjs-timing-total";

/// Headers always exposed to browsers and always allowed in preflight.
pub const ADDITIONAL_HEADERS: [&str; 6] = [
    "content-type",
    "authorization",
    REQUEST_ID,
    TIMING_PENDING,
    TIMING_PROCESSING,
    TIMING_TOTAL,
];

const ALLOWED_METHODS: &str = "OPTIONS, POST";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

/// Correlation id for a request.
pub fn request_id(headers: &HeaderMap) -> String {
    header_str(headers, REQUEST_ID)
        .or_else(|| header_str(headers, FALLBACK_REQUEST_ID))
        .map(str::to_string)
        .unwrap_or_else(|| format!("FS-{}", Uuid::new_v4().simple()))
}

fn value(s: &str) -> HeaderValue {
    HeaderValue::from_str(s).unwrap_or_else(|_| HeaderValue::from_static(""))
}

fn millis(d: Duration) -> HeaderValue {
    HeaderValue::from(d.as_millis() as u64)
}

fn allow_origin(request: &HeaderMap) -> HeaderValue {
    request
        .get(ORIGIN)
        .filter(|v| !v.is_empty())
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("*"))
}

/// Declared exposed headers followed by the additional set, joined with `,`.
pub fn expose_list(request: &HeaderMap) -> String {
    let declared = header_str(request, ACCESS_CONTROL_EXPOSE_HEADERS.as_str()).unwrap_or("");

    declared
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .chain(ADDITIONAL_HEADERS)
        .collect::<Vec<_>>()
        .join(",")
}

/// Headers set on every dispatched response before the handler runs.
pub fn base_headers(request: &HeaderMap, request_id: &str, pending: Duration) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin(request));
    headers.insert(
        ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    headers.insert(ACCESS_CONTROL_EXPOSE_HEADERS, value(&expose_list(request)));
    headers.insert(REQUEST_ID, value(request_id));
    headers.insert(TIMING_PENDING, millis(pending));
    headers
}

/// Names answered in a preflight's `Access-Control-Allow-Headers`.
pub fn allow_list(request: &HeaderMap) -> String {
    let requested = header_str(request, ACCESS_CONTROL_REQUEST_HEADERS.as_str()).unwrap_or("");

    let mut names: Vec<String> = Vec::new();
    let inbound = request.keys().map(|name| name.as_str().to_string());
    let declared = requested
        .split(',')
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty());

    for name in inbound.chain(declared) {
        if name.starts_with("access-control-")
            || name == HOST.as_str()
            || name == CONNECTION.as_str()
            || ADDITIONAL_HEADERS.contains(&name.as_str())
            || names.contains(&name)
        {
            continue;
        }
        names.push(name);
    }
    names.extend(ADDITIONAL_HEADERS.iter().map(|s| s.to_string()));
    names.join(", ")
}

/// Full header set of a `204` preflight answer.
pub fn preflight_headers(request: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin(request));
    headers.insert(
        ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, value(&allow_list(request)));
    headers
}

/// Overlay handler headers. Names or values HTTP cannot carry are dropped.
pub fn merge(headers: &mut HeaderMap, overrides: &BTreeMap<String, String>) {
    for (name, raw) in overrides {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(raw),
        ) {
            (Ok(name), Ok(raw)) => {
                headers.insert(name, raw);
            }
            _ => tracing::warn!(header = %name, "Dropping invalid response header"),
        }
    }
}

/// Add processing and total timings unless the handler set them.
pub fn apply_timing(headers: &mut HeaderMap, processing: Duration, total: Duration) {
    if !headers.contains_key(TIMING_PROCESSING) {
        headers.insert(TIMING_PROCESSING, millis(processing));
    }
    if !headers.contains_key(TIMING_TOTAL) {
        headers.insert(TIMING_TOTAL, millis(total));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, v) in pairs {
            headers.insert(*name, HeaderValue::from_static(v));
        }
        headers
    }

    #[test]
    fn request_id_precedence() {
        let both = request(&[(REQUEST_ID, "a"), (FALLBACK_REQUEST_ID, "b")]);
        assert_eq!(request_id(&both), "a");

        let fallback = request(&[(FALLBACK_REQUEST_ID, "b")]);
        assert_eq!(request_id(&fallback), "b");

        let generated = request_id(&HeaderMap::new());
        assert!(generated.starts_with("FS-"));
        assert_eq!(generated.len(), 3 + 32);
    }

    #[test]
    fn base_headers_echo_origin() {
        let headers = base_headers(
            &request(&[("origin", "https://app.test")]),
            "req-1",
            Duration::from_millis(7),
        );
        assert_eq!(headers["access-control-allow-origin"], "https://app.test");
        assert_eq!(headers["access-control-allow-credentials"], "true");
        assert_eq!(headers["access-control-allow-methods"], "OPTIONS, POST");
        assert_eq!(headers[REQUEST_ID], "req-1");
        assert_eq!(headers[TIMING_PENDING], "7");

        let wildcard = base_headers(&HeaderMap::new(), "req-2", Duration::ZERO);
        assert_eq!(wildcard["access-control-allow-origin"], "*");
    }

    #[test]
    fn expose_list_keeps_declared_first() {
        let list = expose_list(&request(&[("access-control-expose-headers", "x-a,,x-b")]));
        assert_eq!(
            list,
            "x-a,x-b,content-type,authorization,x-faasjs-request-id,\
             x-faasjs-timing-pending,x-faasjs-timing-processing,x-faasjs-timing-total"
        );
    }

    #[test]
    fn allow_list_filters_reserved_names() {
        let list = allow_list(&request(&[
            ("host", "localhost"),
            ("connection", "keep-alive"),
            ("x-custom", "1"),
            ("content-type", "text/plain"),
            ("access-control-request-method", "POST"),
            ("access-control-request-headers", "X-Token, x-custom"),
        ]));
        assert_eq!(
            list,
            "x-custom, x-token, content-type, authorization, x-faasjs-request-id, \
             x-faasjs-timing-pending, x-faasjs-timing-processing, x-faasjs-timing-total"
        );
    }

    #[test]
    fn handler_timing_wins() {
        let mut headers = HeaderMap::new();
        merge(
            &mut headers,
            &BTreeMap::from([(TIMING_TOTAL.to_string(), "1".to_string())]),
        );
        apply_timing(&mut headers, Duration::from_millis(3), Duration::from_millis(9));
        assert_eq!(headers[TIMING_PROCESSING], "3");
        assert_eq!(headers[TIMING_TOTAL], "1");
    }

    #[test]
    fn invalid_handler_header_dropped() {
        let mut headers = HeaderMap::new();
        merge(
            &mut headers,
            &BTreeMap::from([
                ("bad name".to_string(), "v".to_string()),
                ("x-ok".to_string(), "v".to_string()),
            ]),
        );
        assert_eq!(headers.len(), 1);
        assert_eq!(headers["x-ok"], "v");
    }
}
