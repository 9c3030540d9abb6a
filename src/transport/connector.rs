//! Connector applying each backend's connect timeout.
//!
//! The shared client dials every backend through one connector, so the
//! per-backend deadline is looked up by the URI authority at connect time.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::http::Uri;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::net::TcpStream;
use tower::Service;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Returned when the TCP connect did not finish within the backend's deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("connect timed out after {0:?}")]
pub struct ConnectTimeout(pub Duration);

#[derive(Debug, Clone)]
pub struct BackendConnector {
    inner: HttpConnector,
    /// authority ("host:port") → connect timeout
    timeouts: Arc<HashMap<String, Duration>>,
    default_timeout: Duration,
}

impl BackendConnector {
    pub fn new(timeouts: HashMap<String, Duration>, default_timeout: Duration) -> Self {
        let mut inner = HttpConnector::new();
        inner.set_nodelay(true);
        Self {
            inner,
            timeouts: Arc::new(timeouts),
            default_timeout,
        }
    }

    pub fn timeout_for(&self, uri: &Uri) -> Duration {
        uri.authority()
            .and_then(|authority| self.timeouts.get(authority.as_str()))
            .copied()
            .unwrap_or(self.default_timeout)
    }
}

impl Service<Uri> for BackendConnector {
    type Response = TokioIo<TcpStream>;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let limit = self.timeout_for(&uri);
        let connecting = self.inner.call(uri);
        Box::pin(async move {
            match tokio::time::timeout(limit, connecting).await {
                Ok(result) => result.map_err(Into::into),
                Err(_) => Err(Box::new(ConnectTimeout(limit)) as BoxError),
            }
        })
    }
}
