//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Shared downstream connection pool limits.
    pub transport: TransportConfig,

    /// Request forwarding policy.
    pub proxy: ProxyConfig,

    /// Default circuit breaker settings, overridable per backend.
    pub breaker: BreakerConfig,

    /// Token verification settings.
    pub auth: AuthConfig,

    /// WebSocket tunnel settings.
    pub websocket: WebSocketConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Shutdown behaviour.
    pub shutdown: ShutdownConfig,

    /// Static prefix → backend table.
    pub backends: Vec<BackendConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8000").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
        }
    }
}

/// Connection pool limits shared by every backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Maximum downstream requests in flight, all backends combined. A request
    /// holds its slot until the response body is relayed; idle keep-alive
    /// sockets do not count against it.
    pub max_connections: usize,

    /// Maximum idle keep-alive connections kept per backend host.
    pub max_keepalive_connections: usize,

    /// Idle connections are closed after this many seconds.
    pub keepalive_expiry_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_connections: 100,
            max_keepalive_connections: 20,
            keepalive_expiry_secs: 5,
        }
    }
}

impl TransportConfig {
    pub fn keepalive_expiry(&self) -> Duration {
        Duration::from_secs(self.keepalive_expiry_secs)
    }
}

/// Request forwarding policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Bodies with a declared size below this are buffered; everything else streams.
    pub streaming_threshold_bytes: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            streaming_threshold_bytes: 1024 * 1024, // 1MB
        }
    }
}

/// Circuit breaker defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,

    /// Seconds the circuit stays open before a probe is admitted.
    pub recovery_timeout_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 30,
        }
    }
}

/// Token verification settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HMAC secret for HS256 tokens. Overridden by `JWT_SECRET_KEY`.
    pub jwt_secret: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            // WARNING: This is a placeholder! Change this in production.
            jwt_secret: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}

/// WebSocket tunnel settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Query parameter carrying the access token.
    pub token_param: String,

    /// How long to wait for an initial auth control message when no token
    /// was supplied on the upgrade request.
    pub auth_timeout_secs: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            token_param: "token".to_string(),
            auth_timeout_secs: 10,
        }
    }
}

impl WebSocketConfig {
    pub fn auth_timeout(&self) -> Duration {
        Duration::from_secs(self.auth_timeout_secs)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Shutdown behaviour.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Upper bound on waiting for open tunnels to finish closing.
    pub drain_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 10,
        }
    }
}

/// A single backend service and the prefix it owns.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Unique service identifier (also the breaker name).
    pub name: String,

    /// Route prefix, e.g. "/user".
    pub route_prefix: String,

    /// Base URL requests are forwarded to, e.g. "http://user-service:8001".
    pub base_url: String,

    /// Connect timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Time allowed until response headers arrive, in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Per-backend breaker threshold override.
    #[serde(default)]
    pub failure_threshold: Option<u32>,

    /// Per-backend breaker recovery override, in seconds.
    #[serde(default)]
    pub recovery_timeout_secs: Option<u64>,
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl BackendConfig {
    /// Backend entry with default timeouts and no breaker overrides.
    pub fn new(
        name: impl Into<String>,
        route_prefix: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            route_prefix: route_prefix.into(),
            base_url: base_url.into(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            failure_threshold: None,
            recovery_timeout_secs: None,
        }
    }
}
