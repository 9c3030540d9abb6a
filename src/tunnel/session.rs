//! Live tunnel bookkeeping.
//!
//! # Responsibilities
//! - Assign process-unique session IDs for tracing
//! - Track open tunnels for the health report and shutdown drain
//! - Remove a session when its guard drops, however the tunnel ended

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::observability::metrics;

/// Global atomic counter for session IDs.
/// Relaxed ordering is enough; only uniqueness matters.
static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn new() -> Self {
        Self(SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ws-{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub service: String,
    /// Token subject of the authenticated user.
    pub subject: String,
    pub client_addr: SocketAddr,
    pub started_at: Instant,
}

/// Registry of open tunnels.
#[derive(Debug, Clone, Default)]
pub struct SessionTracker {
    sessions: Arc<DashMap<SessionId, SessionInfo>>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tunnel. The returned guard removes it on drop.
    pub fn track(&self, info: SessionInfo) -> SessionGuard {
        let id = SessionId::new();
        tracing::debug!(
            session_id = %id,
            service = %info.service,
            subject = %info.subject,
            client = %info.client_addr,
            "Tunnel opened"
        );
        self.sessions.insert(id, info);
        metrics::set_active_tunnels(self.sessions.len());

        SessionGuard {
            sessions: Arc::clone(&self.sessions),
            id,
        }
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn count_for(&self, service: &str) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.value().service == service)
            .count()
    }

    /// Wait until every tunnel has closed. Returns `false` if `timeout` expired first.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let drained = async {
            while !self.sessions.is_empty() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        tokio::time::timeout(timeout, drained).await.is_ok()
    }
}

/// Keeps a tunnel registered while alive.
#[derive(Debug)]
pub struct SessionGuard {
    sessions: Arc<DashMap<SessionId, SessionInfo>>,
    id: SessionId,
}

impl SessionGuard {
    pub fn id(&self) -> SessionId {
        self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Some((_, info)) = self.sessions.remove(&self.id) {
            tracing::debug!(
                session_id = %self.id,
                service = %info.service,
                duration_ms = info.started_at.elapsed().as_millis() as u64,
                "Tunnel closed"
            );
        }
        metrics::set_active_tunnels(self.sessions.len());
    }
}
