//! Response bodies.
//!
//! # Responsibilities
//! - Keep a request counted as active until its body is fully written
//! - Provide a bounded channel body for streamed replies

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use bytes::Bytes;
use hyper::body::{Body as HttpBody, Frame, SizeHint};
use tokio::sync::mpsc;

use crate::net::ActiveRequest;

/// Body that holds an [`ActiveRequest`] until it is dropped.
///
/// Hyper drops the body once the last frame is written or the connection
/// goes away, which is when the request stops counting as in flight.
pub struct TrackedBody {
    inner: Body,
    _request: ActiveRequest,
}

impl HttpBody for TrackedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.get_mut().inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Wrap `body` so `request` stays active while it is being sent.
pub fn tracked(body: Body, request: ActiveRequest) -> Body {
    Body::new(TrackedBody {
        inner: body,
        _request: request,
    })
}

/// Sending half of a channel body.
#[derive(Debug)]
pub struct BodySender {
    tx: mpsc::Sender<Bytes>,
}

impl BodySender {
    /// Queue a chunk. Fails once the receiving body was dropped.
    pub async fn send(&self, chunk: Bytes) -> Result<(), Bytes> {
        self.tx.send(chunk).await.map_err(|e| e.0)
    }
}

/// Body fed chunk by chunk. It ends when the sender is dropped.
pub fn channel(capacity: usize) -> (BodySender, Body) {
    let (tx, rx) = mpsc::channel::<Bytes>(capacity.max(1));
    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|chunk| (Ok::<_, Infallible>(chunk), rx))
    });
    (BodySender { tx }, Body::from_stream(stream))
}
