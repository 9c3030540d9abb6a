//! Per-backend breaker table.
//!
//! Built once at startup from the backend list. The map itself is immutable,
//! so lookups take no lock; each breaker guards its own state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{BackendConfig, BreakerConfig};
use crate::resilience::circuit_breaker::{BreakerSnapshot, CircuitBreaker};

#[derive(Debug, Default)]
pub struct BreakerBank {
    breakers: HashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerBank {
    /// One breaker per backend, applying per-backend overrides over `defaults`.
    pub fn new(backends: &[BackendConfig], defaults: &BreakerConfig) -> Self {
        let breakers = backends
            .iter()
            .map(|backend| {
                let threshold = backend
                    .failure_threshold
                    .unwrap_or(defaults.failure_threshold);
                let recovery = backend
                    .recovery_timeout_secs
                    .unwrap_or(defaults.recovery_timeout_secs);
                let breaker =
                    CircuitBreaker::new(&backend.name, threshold, Duration::from_secs(recovery));
                (backend.name.clone(), Arc::new(breaker))
            })
            .collect();

        Self { breakers }
    }

    pub fn get(&self, service: &str) -> Option<&Arc<CircuitBreaker>> {
        self.breakers.get(service)
    }

    /// Snapshot of every breaker, ordered by service name.
    pub fn snapshot(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<_> = self.breakers.values().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.service.cmp(&b.service));
        snapshots
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::BreakerState;

    #[tokio::test]
    async fn breakers_are_independent_and_honor_overrides() {
        let mut strict = BackendConfig::new("auth", "/auth", "http://auth:8002");
        strict.failure_threshold = Some(1);
        strict.recovery_timeout_secs = Some(5);
        let bank = BreakerBank::new(
            &[BackendConfig::new("user", "/user", "http://user:8001"), strict],
            &BreakerConfig::default(),
        );
        assert_eq!(bank.snapshot().len(), 2);

        let auth = bank.get("auth").unwrap();
        let _ = auth.call(|| async { Err::<(), _>("down") }).await;
        assert_eq!(auth.state(), BreakerState::Open);
        assert_eq!(bank.get("user").unwrap().state(), BreakerState::Closed);

        let snapshot = bank.snapshot();
        assert_eq!(snapshot[0].service, "auth");
        assert_eq!(snapshot[0].failure_threshold, 1);
        assert_eq!(snapshot[0].recovery_timeout_secs, 5);
        assert_eq!(snapshot[1].service, "user");
        assert_eq!(snapshot[1].failure_threshold, 5);
        assert!(bank.get("billing").is_none());
    }
}
