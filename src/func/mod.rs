//! Function handler contract.
//!
//! # Data Flow
//! ```text
//! handler file (resolved by routing)
//!     → loader.rs (HandlerLoader: in-process registry or interpreter process)
//!     → cache.rs (handler + FuncConfig memoized per route key)
//!     → Handler::call(Event, Context)
//!     → Output: Reply | Stream | Empty, or FuncError
//! ```
//!
//! # Design Decisions
//! - Results are an explicit tagged type; no guessing from value shapes
//! - Handlers are `Send + Sync` trait objects so one instance serves every request
//! - Closures are handlers, so embedders rarely implement the trait by hand

pub mod cache;
pub mod loader;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use axum::http::{HeaderMap, Method, Uri, Version};
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::config::FuncConfig;
use crate::error::FuncError;

pub use cache::{CachedFunc, HandlerCache};
pub use loader::{HandlerLoader, ProcessLoader, StaticLoader};

/// Future returned by every handler invocation.
pub type HandlerFuture = BoxFuture<'static, Result<Output, FuncError>>;

/// Byte stream backing a streamed reply.
pub type ByteStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

/// An invocable function.
pub trait Handler: Send + Sync {
    fn call(&self, event: Event, context: Context) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(Event, Context) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Output, FuncError>> + Send + 'static,
{
    fn call(&self, event: Event, context: Context) -> HandlerFuture {
        Box::pin(self(event, context))
    }
}

/// The request as the handler sees it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub headers: BTreeMap<String, String>,
    pub http_method: String,
    pub path: String,
    pub query_string: BTreeMap<String, String>,
    pub body: String,
    #[serde(skip)]
    pub raw: RawRequest,
}

/// Untouched request head and body bytes.
#[derive(Debug, Clone, Default)]
pub struct RawRequest {
    pub method: Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Per-invocation context.
#[derive(Debug, Clone)]
pub struct Context {
    pub request_id: String,
    pub config: Arc<FuncConfig>,
}

/// What a handler produced.
pub enum Output {
    /// Buffered reply.
    Reply(Reply),
    /// Body streamed to the client chunk by chunk.
    Stream(StreamReply),
    /// Nothing was returned; answered as an error.
    Empty,
}

impl From<Reply> for Output {
    fn from(reply: Reply) -> Self {
        Output::Reply(reply)
    }
}

impl From<StreamReply> for Output {
    fn from(reply: StreamReply) -> Self {
        Output::Stream(reply)
    }
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Output::Reply(r) => f.debug_tuple("Reply").field(r).finish(),
            Output::Stream(s) => f.debug_struct("Stream").field("status", &s.status).finish(),
            Output::Empty => f.write_str("Empty"),
        }
    }
}

/// Buffered reply, also the JSON shape process handlers print.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Reply {
    pub status_code: Option<u16>,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub is_base64_encoded: bool,
}

impl Reply {
    pub fn new() -> Self {
        Self::default()
    }

    /// `200` reply with a JSON body and content type.
    pub fn json(value: &serde_json::Value) -> Self {
        Self::new()
            .status(200)
            .header("content-type", "application/json; charset=utf-8")
            .body(value.to_string())
    }

    pub fn status(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Body given as base64, decoded to binary before sending.
    pub fn base64_body(mut self, encoded: impl Into<String>) -> Self {
        self.body = Some(encoded.into());
        self.is_base64_encoded = true;
        self
    }
}

/// Reply whose body is produced incrementally.
pub struct StreamReply {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: ByteStream,
}

impl StreamReply {
    pub fn new<S>(body: S) -> Self
    where
        S: Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static,
    {
        Self {
            status: 200,
            headers: BTreeMap::new(),
            body: body.boxed(),
        }
    }

    pub fn status(mut self, code: u16) -> Self {
        self.status = code;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_wire_shape() {
        let reply: Reply = serde_json::from_str(
            r#"{"statusCode":201,"headers":{"x-a":"1"},"body":"{\"a\":1}"}"#,
        )
        .unwrap();
        assert_eq!(reply.status_code, Some(201));
        assert_eq!(reply.body.as_deref(), Some(r#"{"a":1}"#));
        assert!(!reply.is_base64_encoded);

        let encoded = serde_json::to_value(Reply::new().base64_body("aGk=")).unwrap();
        assert_eq!(encoded["isBase64Encoded"], true);
    }

    #[test]
    fn event_serializes_camel_case() {
        let event = Event {
            headers: BTreeMap::new(),
            http_method: "POST".into(),
            path: "/a".into(),
            query_string: BTreeMap::from([("q".to_string(), "1".to_string())]),
            body: "{}".into(),
            raw: RawRequest::default(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["httpMethod"], "POST");
        assert_eq!(value["queryString"]["q"], "1");
        assert!(value.get("raw").is_none());
    }

    #[tokio::test]
    async fn closures_are_handlers() {
        let handler: Arc<dyn Handler> = Arc::new(|event: Event, _ctx: Context| async move {
            Ok::<_, FuncError>(Output::Reply(Reply::new().body(event.path)))
        });
        let ctx = Context {
            request_id: "r".into(),
            config: Arc::new(FuncConfig::default()),
        };
        let event = Event {
            headers: BTreeMap::new(),
            http_method: "POST".into(),
            path: "/hello".into(),
            query_string: BTreeMap::new(),
            body: String::new(),
            raw: RawRequest::default(),
        };
        match handler.call(event, ctx).await.unwrap() {
            Output::Reply(reply) => assert_eq!(reply.body.as_deref(), Some("/hello")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
