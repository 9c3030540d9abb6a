//! Request forwarding through a backend's circuit breaker.
//!
//! # Outcome classification
//! - Backend 2xx/3xx/4xx: success (4xx is the caller's problem)
//! - Backend 5xx: failure, response still relayed to the client
//! - Connect error, reset, connect or request timeout: failure
//! - Response body cut off by the backend or the request deadline: failure,
//!   charged after the fact since the status has already been relayed
//! - Pool exhaustion, transport shutdown: ignored
//! - Client disconnect, before or during the upload: nothing recorded

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::http::Response;
use hyper::body::{Body as HttpBody, Frame, SizeHint};

use crate::error::ProxyError;
use crate::http::request::ProxiedRequest;
use crate::http::response::relay;
use crate::resilience::{BreakerBank, CircuitBreaker, Outcome};
use crate::routing::BackendDescriptor;
use crate::transport::{Transport, TransportError};

#[derive(Debug, Clone)]
pub struct Forwarder {
    transport: Transport,
    breakers: Arc<BreakerBank>,
}

impl Forwarder {
    pub fn new(transport: Transport, breakers: Arc<BreakerBank>) -> Self {
        Self { transport, breakers }
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Forward `request` to `backend`. The gateway never retries.
    pub async fn forward(
        &self,
        request: ProxiedRequest,
        backend: &BackendDescriptor,
    ) -> Result<Response<Body>, ProxyError> {
        let breaker = self.breakers.get(&backend.name).ok_or_else(|| {
            ProxyError::Internal(format!("no circuit breaker for service '{}'", backend.name))
        })?;

        let method = request.method.clone();
        let replayable = request.is_replayable();
        let upstream = request.into_upstream(backend)?;
        let start = Instant::now();

        let result = breaker
            .call_classified(|| self.transport.send(upstream, backend), classify)
            .await;

        match result {
            Ok(response) => {
                tracing::debug!(
                    service = %backend.name,
                    method = %method,
                    status = response.status().as_u16(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Upstream responded"
                );
                let (parts, body) = relay(response).into_parts();
                let body = WatchedBody {
                    inner: body,
                    breaker: breaker.clone(),
                    failed: false,
                };
                Ok(Response::from_parts(parts, Body::new(body)))
            }
            Err(err) => {
                let err = ProxyError::from(err);
                tracing::warn!(
                    service = %backend.name,
                    method = %method,
                    replayable,
                    error = %err,
                    "Forwarding failed"
                );
                Err(err)
            }
        }
    }
}

/// Response body that reports a mid-stream failure to the backend's breaker.
struct WatchedBody {
    inner: Body,
    breaker: Arc<CircuitBreaker>,
    failed: bool,
}

impl HttpBody for WatchedBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        if let Poll::Ready(Some(Err(err))) = &polled {
            if !this.failed {
                this.failed = true;
                tracing::warn!(
                    service = %this.breaker.name(),
                    error = %err,
                    "Upstream response body failed"
                );
                this.breaker.record_failure();
            }
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

fn classify(result: &Result<Response<Body>, TransportError>) -> Outcome {
    match result {
        Ok(response) if response.status().is_server_error() => Outcome::Failure,
        Ok(_) => Outcome::Success,
        Err(err) if err.counts_against_backend() => Outcome::Failure,
        Err(_) => Outcome::Ignored,
    }
}
