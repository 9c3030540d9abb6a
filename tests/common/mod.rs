//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::json;
use service_gateway::config::{BackendConfig, GatewayConfig};
use service_gateway::http::AppState;
use service_gateway::{HttpServer, Shutdown};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const SECRET: &str = "test-secret";

/// A gateway running on an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub state: AppState,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<std::io::Result<()>>,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }
}

/// Start a gateway in front of `backends`. `tweak` adjusts the config first.
pub async fn spawn_gateway<F>(backends: Vec<BackendConfig>, tweak: F) -> TestGateway
where
    F: FnOnce(&mut GatewayConfig),
{
    let mut config = GatewayConfig {
        backends,
        ..Default::default()
    };
    config.auth.jwt_secret = SECRET.to_string();
    config.shutdown.drain_timeout_secs = 2;
    tweak(&mut config);

    let shutdown = Shutdown::new();
    let server = HttpServer::new(&config, shutdown.token()).unwrap();
    let state = server.state().clone();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(server.run(listener));

    TestGateway {
        addr,
        state,
        shutdown,
        handle,
    }
}

/// Serve `router` as a backend on an ephemeral port.
pub async fn spawn_backend(router: axum::Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// An address nothing listens on.
pub fn unused_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

pub fn backend(name: &str, prefix: &str, addr: SocketAddr) -> BackendConfig {
    BackendConfig::new(name, prefix, format!("http://{}", addr))
}

fn now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
}

fn sign(claims: serde_json::Value, secret: &str) -> String {
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .unwrap()
}

/// A valid token for `sub`.
pub fn token(sub: &str) -> String {
    sign(json!({"sub": sub, "exp": now() + 600}), SECRET)
}

pub fn expired_token(sub: &str) -> String {
    sign(json!({"sub": sub, "exp": now() - 3600}), SECRET)
}

pub fn forged_token(sub: &str) -> String {
    sign(json!({"sub": sub, "exp": now() + 600}), "not-the-secret")
}
