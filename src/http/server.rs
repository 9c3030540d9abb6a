//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the shared state (registry, breakers, transport, authenticator)
//! - Create Axum Router with all handlers
//! - Wire up middleware (request ID, tracing)
//! - Dispatch proxied requests to the forwarder
//! - Drive graceful shutdown: stop accepting, cancel tunnels, close the pool, drain

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, FromRef, State};
use axum::http::Request;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{AuthenticatedUser, Authenticator, JwtAuthenticator, Unauthorized};
use crate::config::{GatewayConfig, ProxyConfig, WebSocketConfig};
use crate::error::ProxyError;
use crate::health::health_handler;
use crate::http::forwarder::Forwarder;
use crate::http::request::ProxiedRequest;
use crate::observability::metrics;
use crate::resilience::BreakerBank;
use crate::routing::{RoutingError, ServiceRegistry};
use crate::transport::Transport;
use crate::tunnel::{tunnel_handler, SessionTracker};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ServiceRegistry>,
    pub breakers: Arc<BreakerBank>,
    pub forwarder: Forwarder,
    pub authenticator: Arc<dyn Authenticator>,
    pub sessions: SessionTracker,
    pub proxy: ProxyConfig,
    pub websocket: WebSocketConfig,
    pub shutdown: CancellationToken,
}

impl FromRef<AppState> for Arc<dyn Authenticator> {
    fn from_ref(state: &AppState) -> Self {
        state.authenticator.clone()
    }
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    state: AppState,
    drain_timeout: Duration,
}

impl HttpServer {
    /// Create a server using HS256 JWT verification with the configured secret.
    pub fn new(config: &GatewayConfig, shutdown: CancellationToken) -> Result<Self, RoutingError> {
        let authenticator = Arc::new(JwtAuthenticator::new(&config.auth.jwt_secret));
        Self::with_authenticator(config, authenticator, shutdown)
    }

    /// Create a server with a custom token verifier.
    pub fn with_authenticator(
        config: &GatewayConfig,
        authenticator: Arc<dyn Authenticator>,
        shutdown: CancellationToken,
    ) -> Result<Self, RoutingError> {
        let registry = Arc::new(ServiceRegistry::from_config(&config.backends)?);
        let breakers = Arc::new(BreakerBank::new(&config.backends, &config.breaker));
        let transport = Transport::new(&config.transport, &registry);

        if registry.is_empty() {
            tracing::warn!("No backends registered, every proxied request will be 404");
        }
        tracing::info!(backends = registry.len(), "Service registry loaded");

        let state = AppState {
            registry,
            breakers: breakers.clone(),
            forwarder: Forwarder::new(transport, breakers),
            authenticator,
            sessions: SessionTracker::new(),
            proxy: config.proxy.clone(),
            websocket: config.websocket.clone(),
            shutdown,
        };

        let router = Self::build_router(state.clone());
        Ok(Self {
            router,
            state,
            drain_timeout: Duration::from_secs(config.shutdown.drain_timeout_secs),
        })
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/ws/{*path}", get(tunnel_handler))
            .fallback(proxy_handler)
            .with_state(state)
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run the server until the shutdown token is cancelled.
    pub async fn run(self, listener: TcpListener) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        let shutdown = self.state.shutdown.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await?;

        self.state.forwarder.transport().shutdown();
        let open = self.state.sessions.active_count();
        if open > 0 {
            tracing::info!(tunnels = open, "Draining tunnels");
        }
        if !self.state.sessions.wait_for_drain(self.drain_timeout).await {
            tracing::warn!(
                remaining = self.state.sessions.active_count(),
                "Drain timeout expired with tunnels still open"
            );
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Main proxy handler.
/// Authenticates, resolves the backend and forwards the request.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
    user: Result<AuthenticatedUser, Unauthorized>,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let (service, response) = dispatch(&state, client_addr, user, request).await;

    metrics::record_request(
        service.as_deref().unwrap_or("none"),
        method.as_str(),
        response.status().as_u16(),
        start,
    );
    response
}

async fn dispatch(
    state: &AppState,
    client_addr: SocketAddr,
    user: Result<AuthenticatedUser, Unauthorized>,
    request: Request<Body>,
) -> (Option<String>, Response) {
    let AuthenticatedUser(claims) = match user {
        Ok(user) => user,
        Err(rejection) => {
            tracing::debug!(reason = %rejection.reason, path = %request.uri().path(), "Request not authenticated");
            return (None, rejection.into_response());
        }
    };

    let path = request.uri().path().to_string();
    let (backend, subpath) = match state.registry.resolve(&path) {
        Ok(found) => found,
        Err(err) => {
            tracing::debug!(path = %path, "No route matched");
            return (None, ProxyError::from(err).into_response());
        }
    };

    tracing::debug!(
        service = %backend.name,
        subject = %claims.sub,
        method = %request.method(),
        path = %path,
        "Proxying request"
    );

    let prepared = match ProxiedRequest::from_inbound(
        request,
        subpath,
        client_addr,
        state.proxy.streaming_threshold_bytes,
    )
    .await
    {
        Ok(prepared) => prepared,
        Err(err) => return (Some(backend.name.clone()), err.into_response()),
    };

    let response = match state.forwarder.forward(prepared, &backend).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    };
    (Some(backend.name.clone()), response)
}
