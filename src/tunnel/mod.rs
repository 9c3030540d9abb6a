//! WebSocket tunnel subsystem.
//!
//! # Session States
//! ```text
//! Connecting ──(auth ok, backend dialed)──▶ Open ──(either side closes)──▶ Closing ──▶ Closed
//!     │
//!     └──(no route: 404, breaker open: 503, bad token: close 1008, dial failed: close 1011)
//! ```
//!
//! # Design Decisions
//! - Route and breaker checks happen before the upgrade, so refusals are plain HTTP
//! - Authentication happens before any backend connection attempt
//! - A tunnel only consults the breaker at admission; it never records outcomes
//! - No reconnect: a dropped tunnel needs a fresh upgrade and fresh credentials

pub mod handshake;
pub mod relay;
pub mod session;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, RawQuery, State};
use axum::http::{HeaderMap, Uri};
use axum::response::Response;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::auth::extractor::bearer_token;
use crate::auth::{Authenticator, Reason};
use crate::error::ProxyError;
use crate::http::server::AppState;
use crate::observability::metrics;
use crate::routing::BackendDescriptor;

pub use session::{SessionGuard, SessionId, SessionInfo, SessionTracker};

/// Path prefix under which tunnels are served.
pub const TUNNEL_PREFIX: &str = "/ws";

/// Everything a tunnel needs once the upgrade has completed.
struct Tunnel {
    backend: Arc<BackendDescriptor>,
    upstream_url: Url,
    token: Option<String>,
    client_addr: SocketAddr,
    authenticator: Arc<dyn Authenticator>,
    auth_timeout: Duration,
    sessions: SessionTracker,
    shutdown: CancellationToken,
}

/// `GET /ws/{service-prefix}/{session...}`
pub async fn tunnel_handler(
    State(state): State<AppState>,
    ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    uri: Uri,
    ws: WebSocketUpgrade,
) -> Result<Response, ProxyError> {
    let path = uri.path().strip_prefix(TUNNEL_PREFIX).unwrap_or("/");
    let (backend, subpath) = state.registry.resolve(path)?;

    let breaker = state.breakers.get(&backend.name).ok_or_else(|| {
        ProxyError::Internal(format!("no circuit breaker for service '{}'", backend.name))
    })?;
    if !breaker.accepts_new_sessions() {
        tracing::warn!(service = %backend.name, "Tunnel refused, circuit open");
        metrics::record_breaker_rejection(&backend.name);
        return Err(ProxyError::CircuitOpen {
            service: backend.name.clone(),
        });
    }

    let (token, forwarded_query) =
        handshake::split_token(query.as_deref(), &state.websocket.token_param);
    let token = token.or_else(|| bearer_token(&headers).map(str::to_string));
    let upstream_url = handshake::backend_url(&backend, subpath, forwarded_query.as_deref())
        .map_err(|e| ProxyError::Internal(e.to_string()))?;

    let tunnel = Tunnel {
        backend,
        upstream_url,
        token,
        client_addr,
        authenticator: state.authenticator.clone(),
        auth_timeout: state.websocket.auth_timeout(),
        sessions: state.sessions.clone(),
        shutdown: state.shutdown.clone(),
    };

    Ok(ws
        .on_failed_upgrade(|e| tracing::warn!(error = %e, "WebSocket upgrade failed"))
        .on_upgrade(move |socket| tunnel.run(socket)))
}

impl Tunnel {
    async fn run(self, mut client: WebSocket) {
        let authenticated = handshake::authenticate(
            &mut client,
            self.token,
            self.authenticator.as_ref(),
            self.auth_timeout,
        )
        .await;
        let (claims, token) = match authenticated {
            Ok(authenticated) => authenticated,
            Err(err) => {
                tracing::info!(
                    service = %self.backend.name,
                    client = %self.client_addr,
                    reason = %err.reason,
                    "Tunnel authentication failed"
                );
                let reason = match err.reason {
                    Reason::Missing => "Token not provided",
                    _ => "Could not validate credentials",
                };
                refuse(client, close_code::POLICY, reason).await;
                return;
            }
        };

        let backend = match handshake::dial(
            &self.upstream_url,
            &self.backend,
            self.client_addr,
            &token,
        )
        .await
        {
            Ok(backend) => backend,
            Err(err) => {
                tracing::warn!(
                    service = %self.backend.name,
                    url = %self.upstream_url,
                    error = %err,
                    "Tunnel backend dial failed"
                );
                refuse(client, close_code::ERROR, "Backend unavailable").await;
                return;
            }
        };

        let guard = self.sessions.track(SessionInfo {
            service: self.backend.name.clone(),
            subject: claims.sub,
            client_addr: self.client_addr,
            started_at: Instant::now(),
        });
        tracing::info!(session_id = %guard.id(), service = %self.backend.name, "Tunnel open");

        relay::bridge(client, backend, self.shutdown).await;
        drop(guard);
    }
}

async fn refuse(mut client: WebSocket, code: u16, reason: &str) {
    let frame = CloseFrame {
        code,
        reason: reason.to_string().into(),
    };
    let _ = client.send(Message::Close(Some(frame))).await;
}
