//! The shared downstream client.
//!
//! # Responsibilities
//! - Own the single keep-alive pool used for every backend
//! - Cap in-flight downstream requests across all backends
//! - Enforce the request deadline over response headers and body
//! - Classify failures so the forwarder can map them to status codes
//!
//! # Design Decisions
//! - A semaphore permit is held until the response body is fully relayed
//! - The permit caps requests in flight, not open sockets; idle keep-alive
//!   connections are governed by the pool settings alone
//! - Waiting for a permit is bounded by the backend's connect timeout
//! - Pool exhaustion and shutdown are gateway conditions, not backend failures

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use hyper_util::client::legacy::{self, Client};
use hyper_util::rt::{TokioExecutor, TokioTimer};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use crate::config::TransportConfig;
use crate::routing::{BackendDescriptor, ServiceRegistry};
use crate::transport::body::{ClientBodyError, DeadlineBody};
use crate::transport::connector::{BackendConnector, ConnectTimeout};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Which deadline expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    Connect,
    Request,
}

impl TimeoutPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeoutPhase::Connect => "connect",
            TimeoutPhase::Request => "request",
        }
    }
}

/// Downstream transport failures.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("{} timeout after {after:?}", .phase.as_str())]
    Timeout { phase: TimeoutPhase, after: Duration },

    #[error("connection to backend failed: {0}")]
    Connect(#[source] legacy::Error),

    #[error("upstream request failed: {0}")]
    Upstream(#[source] legacy::Error),

    /// The inbound client stopped sending its request body.
    #[error("client aborted the request body: {0}")]
    ClientAborted(#[source] legacy::Error),

    #[error("connection pool exhausted")]
    PoolExhausted,

    #[error("transport is shutting down")]
    ShuttingDown,
}

impl TransportError {
    /// Whether this failure says something about the backend's health.
    pub fn counts_against_backend(&self) -> bool {
        !matches!(
            self,
            TransportError::PoolExhausted
                | TransportError::ShuttingDown
                | TransportError::ClientAborted(_)
        )
    }

    fn from_client(err: legacy::Error) -> Self {
        let mut source = std::error::Error::source(&err);
        while let Some(cause) = source {
            if let Some(ConnectTimeout(after)) = cause.downcast_ref::<ConnectTimeout>() {
                return TransportError::Timeout {
                    phase: TimeoutPhase::Connect,
                    after: *after,
                };
            }
            // A request body that errored or ended short came from our side.
            let aborted_write = cause
                .downcast_ref::<hyper::Error>()
                .is_some_and(hyper::Error::is_body_write_aborted);
            if cause.is::<ClientBodyError>() || aborted_write {
                return TransportError::ClientAborted(err);
            }
            source = cause.source();
        }

        if err.is_connect() {
            TransportError::Connect(err)
        } else {
            TransportError::Upstream(err)
        }
    }
}

/// Single long-lived client shared by every backend.
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client<BackendConnector, Body>,
    permits: Arc<Semaphore>,
}

impl Transport {
    pub fn new(config: &TransportConfig, registry: &ServiceRegistry) -> Self {
        let timeouts: HashMap<String, Duration> = registry
            .backends()
            .map(|backend| (backend.authority(), backend.connect_timeout))
            .collect();
        let connector = BackendConnector::new(timeouts, DEFAULT_CONNECT_TIMEOUT);

        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(config.max_keepalive_connections)
            .pool_idle_timeout(config.keepalive_expiry())
            .pool_timer(TokioTimer::new())
            .build(connector);

        tracing::debug!(
            max_connections = config.max_connections,
            max_keepalive_connections = config.max_keepalive_connections,
            keepalive_expiry_secs = config.keepalive_expiry_secs,
            "Transport initialized"
        );

        Self {
            client,
            permits: Arc::new(Semaphore::new(config.max_connections)),
        }
    }

    /// Send `request` to `backend`, returning once response headers arrive.
    ///
    /// The returned body holds a connection permit until it is consumed or
    /// dropped, and fails once `request_timeout` has elapsed since the send.
    pub async fn send(
        &self,
        request: Request<Body>,
        backend: &BackendDescriptor,
    ) -> Result<Response<Body>, TransportError> {
        let deadline = Instant::now() + backend.request_timeout;
        let permit = match tokio::time::timeout(
            backend.connect_timeout,
            self.permits.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_closed)) => return Err(TransportError::ShuttingDown),
            Err(_elapsed) => {
                tracing::warn!(backend = %backend.name, "Connection pool exhausted");
                return Err(TransportError::PoolExhausted);
            }
        };

        let pending = self.client.request(request);
        let response = match tokio::time::timeout_at(deadline, pending).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => return Err(TransportError::from_client(err)),
            Err(_elapsed) => {
                return Err(TransportError::Timeout {
                    phase: TimeoutPhase::Request,
                    after: backend.request_timeout,
                })
            }
        };

        let (parts, body) = response.into_parts();
        let body = DeadlineBody::new(Body::new(body), deadline, backend.request_timeout, permit);
        Ok(Response::from_parts(parts, Body::new(body)))
    }

    /// Stop handing out connections. In-flight bodies finish normally.
    pub fn shutdown(&self) {
        self.permits.close();
        tracing::info!("Transport closed to new requests");
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}
