//! Body wrappers for both legs of a forwarded request.
//!
//! - [`ClientBody`] tags errors from the inbound stream, so a client that goes
//!   away mid-upload is never mistaken for a failing backend
//! - [`DeadlineBody`] bounds the backend's response body by what is left of the
//!   request timeout and holds the connection permit until it ends

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::{Body, Bytes};
use hyper::body::{Body as HttpBody, Frame, SizeHint};
use thiserror::Error;
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::{Instant, Sleep};

use crate::transport::client::{TimeoutPhase, TransportError};

/// The inbound request body failed while it was being forwarded.
#[derive(Debug, Error)]
#[error("client request body failed: {0}")]
pub struct ClientBodyError(#[source] axum::Error);

/// Streamed request body on its way to a backend.
#[derive(Debug)]
pub struct ClientBody {
    inner: Body,
}

impl ClientBody {
    pub fn new(inner: Body) -> Self {
        Self { inner }
    }
}

impl HttpBody for ClientBody {
    type Data = Bytes;
    type Error = ClientBodyError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.inner).poll_frame(cx).map_err(ClientBodyError)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Backend response body, cut off once the request deadline passes.
///
/// Releases its connection permit when dropped.
pub struct DeadlineBody {
    inner: Body,
    deadline: Pin<Box<Sleep>>,
    limit: Duration,
    expired: bool,
    _permit: OwnedSemaphorePermit,
}

impl DeadlineBody {
    pub fn new(inner: Body, deadline: Instant, limit: Duration, permit: OwnedSemaphorePermit) -> Self {
        Self {
            inner,
            deadline: Box::pin(tokio::time::sleep_until(deadline)),
            limit,
            expired: false,
            _permit: permit,
        }
    }
}

impl HttpBody for DeadlineBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if this.expired {
            return Poll::Ready(None);
        }

        if let Poll::Ready(frame) = Pin::new(&mut this.inner).poll_frame(cx) {
            return Poll::Ready(frame);
        }

        if this.deadline.as_mut().poll(cx).is_ready() {
            this.expired = true;
            let err = TransportError::Timeout {
                phase: TimeoutPhase::Request,
                after: this.limit,
            };
            return Poll::Ready(Some(Err(axum::Error::new(err))));
        }

        Poll::Pending
    }

    fn is_end_stream(&self) -> bool {
        self.expired || self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use futures_util::stream;
    use tokio::sync::Semaphore;

    #[tokio::test]
    async fn client_errors_are_tagged() {
        let chunks = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "client gone")),
        ]);
        let body = Body::new(ClientBody::new(Body::from_stream(chunks)));

        let err = axum::body::to_bytes(body, usize::MAX).await.unwrap_err();
        let mut source = std::error::Error::source(&err);
        let mut tagged = false;
        while let Some(cause) = source {
            tagged |= cause.is::<ClientBodyError>();
            source = cause.source();
        }
        assert!(tagged);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_body_ends_at_deadline_and_releases_permit() {
        let permits = Arc::new(Semaphore::new(1));
        let permit = permits.clone().acquire_owned().await.unwrap();
        let stalled = Body::from_stream(stream::pending::<Result<Bytes, std::io::Error>>());
        let limit = Duration::from_millis(200);
        let body = DeadlineBody::new(stalled, Instant::now() + limit, limit, permit);

        let err = axum::body::to_bytes(Body::new(body), usize::MAX)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("request timeout"));
        assert_eq!(permits.available_permits(), 1);
    }
}
