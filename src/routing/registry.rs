//! Service registry: the immutable prefix → backend table.
//!
//! # Responsibilities
//! - Store backend descriptors built from configuration
//! - Resolve a request path to its backend and sub-path
//! - Return an explicit `RoutingError::NotFound` rather than a silent default
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - Longest prefix wins; entries pre-sorted so the first hit is the answer
//! - O(n) prefix scan (acceptable for typical service counts)

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::config::BackendConfig;
use crate::routing::matcher::PathPrefixMatcher;

/// Routing failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// No configured prefix owns the path.
    #[error("no backend owns path '{path}'")]
    NotFound { path: String },

    #[error("backend '{name}': invalid base_url '{url}'")]
    InvalidBaseUrl { name: String, url: String },

    #[error("route prefix '{0}' configured twice")]
    DuplicatePrefix(String),
}

/// Immutable description of one backend service.
#[derive(Debug, Clone)]
pub struct BackendDescriptor {
    pub name: String,
    pub route_prefix: String,
    pub base_url: Url,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl BackendDescriptor {
    fn from_config(config: &BackendConfig, route_prefix: String) -> Result<Self, RoutingError> {
        let invalid = || RoutingError::InvalidBaseUrl {
            name: config.name.clone(),
            url: config.base_url.clone(),
        };
        let base_url = Url::parse(&config.base_url).map_err(|_| invalid())?;
        // Backends are dialed over plain TCP only.
        if base_url.scheme() != "http" || base_url.host_str().is_none() {
            return Err(invalid());
        }

        Ok(Self {
            name: config.name.clone(),
            route_prefix,
            base_url,
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
        })
    }

    /// `host[:port]` of the backend, as sent in the rewritten Host header.
    pub fn authority(&self) -> String {
        let host = self.base_url.host_str().unwrap_or_default();
        match self.base_url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    /// Absolute upstream URI for a sub-path and optional query string.
    pub fn upstream_uri(&self, subpath: &str, query: Option<&str>) -> String {
        let base = self.base_url.as_str().trim_end_matches('/');
        match query {
            Some(q) if !q.is_empty() => format!("{}{}?{}", base, subpath, q),
            _ => format!("{}{}", base, subpath),
        }
    }
}

/// Compiled route table.
#[derive(Debug)]
pub struct ServiceRegistry {
    /// Sorted by prefix length, longest first.
    routes: Vec<(PathPrefixMatcher, Arc<BackendDescriptor>)>,
}

impl ServiceRegistry {
    /// Build the table from configuration.
    pub fn from_config(backends: &[BackendConfig]) -> Result<Self, RoutingError> {
        let mut routes: Vec<(PathPrefixMatcher, Arc<BackendDescriptor>)> = Vec::new();

        for config in backends {
            let matcher = PathPrefixMatcher::new(&config.route_prefix);
            if routes.iter().any(|(m, _)| m == &matcher) {
                return Err(RoutingError::DuplicatePrefix(matcher.prefix().to_string()));
            }
            let descriptor = BackendDescriptor::from_config(config, matcher.prefix().to_string())?;
            routes.push((matcher, Arc::new(descriptor)));
        }

        routes.sort_by(|(a, _), (b, _)| b.prefix().len().cmp(&a.prefix().len()));

        for (matcher, backend) in &routes {
            tracing::debug!(
                prefix = %matcher.prefix(),
                backend = %backend.name,
                base_url = %backend.base_url,
                "Route registered"
            );
        }

        Ok(Self { routes })
    }

    /// Resolve `path` to its backend and the sub-path to forward.
    pub fn resolve<'a>(
        &self,
        path: &'a str,
    ) -> Result<(Arc<BackendDescriptor>, &'a str), RoutingError> {
        self.routes
            .iter()
            .find_map(|(matcher, backend)| {
                matcher.strip(path).map(|subpath| (backend.clone(), subpath))
            })
            .ok_or_else(|| RoutingError::NotFound {
                path: path.to_string(),
            })
    }

    /// All registered backends, longest prefix first.
    pub fn backends(&self) -> impl Iterator<Item = &Arc<BackendDescriptor>> {
        self.routes.iter().map(|(_, backend)| backend)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
