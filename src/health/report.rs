//! Health report assembly.
//!
//! Reads breaker snapshots and the tunnel count; never mutates either.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::resilience::{BreakerBank, BreakerState};
use crate::routing::ServiceRegistry;
use crate::tunnel::SessionTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Healthy,
    Unavailable,
    Recovering,
}

impl From<BreakerState> for ServiceStatus {
    fn from(state: BreakerState) -> Self {
        match state {
            BreakerState::Closed => ServiceStatus::Healthy,
            BreakerState::Open => ServiceStatus::Unavailable,
            BreakerState::HalfOpen => ServiceStatus::Recovering,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealth {
    pub url: String,
    pub status: ServiceStatus,
    pub failure_count: u32,
    pub active_tunnels: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub version: &'static str,
    pub services: BTreeMap<String, ServiceHealth>,
    pub active_tunnels: usize,
}

impl HealthReport {
    pub fn collect(
        registry: &ServiceRegistry,
        breakers: &BreakerBank,
        sessions: &SessionTracker,
    ) -> Self {
        let services = registry
            .backends()
            .filter_map(|backend| {
                let snapshot = breakers.get(&backend.name)?.snapshot();
                Some((
                    backend.name.clone(),
                    ServiceHealth {
                        url: backend.base_url.to_string(),
                        status: snapshot.state.into(),
                        failure_count: snapshot.failure_count,
                        active_tunnels: sessions.count_for(&backend.name),
                    },
                ))
            })
            .collect();

        Self {
            status: "ok",
            version: env!("CARGO_PKG_VERSION"),
            services,
            active_tunnels: sessions.active_count(),
        }
    }
}
