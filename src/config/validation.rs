//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check the route table (unique names and prefixes, parseable URLs)
//! - Validate value ranges (timeouts > 0, limits > 0)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::GatewayConfig;
use crate::routing::matcher::normalize_prefix;

/// Paths the gateway serves itself.
const RESERVED_PREFIXES: &[&str] = &["/health", "/ws"];

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid bind address '{0}'")]
    BindAddress(String),

    #[error("no backends configured")]
    NoBackends,

    #[error("duplicate backend name '{0}'")]
    DuplicateName(String),

    #[error("duplicate route prefix '{0}'")]
    DuplicatePrefix(String),

    #[error("backend '{name}': route prefix must name at least one path segment")]
    EmptyPrefix { name: String },

    #[error("backend '{name}': route prefix '{prefix}' is reserved by the gateway")]
    ReservedPrefix { name: String, prefix: String },

    #[error("backend '{name}': invalid base_url '{url}'")]
    BaseUrl { name: String, url: String },

    #[error("backend '{name}': base_url '{url}' must use http, TLS to backends is not supported")]
    UnsupportedScheme { name: String, url: String },

    #[error("backend '{name}': {field} must be greater than zero")]
    Zero { name: String, field: &'static str },

    #[error("transport: {0} must be greater than zero")]
    TransportLimit(&'static str),

    #[error("auth: jwt_secret must not be empty")]
    EmptySecret,
}

/// Validate a parsed configuration, collecting every problem found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if config.transport.max_connections == 0 {
        errors.push(ValidationError::TransportLimit("max_connections"));
    }

    if config.auth.jwt_secret.is_empty() {
        errors.push(ValidationError::EmptySecret);
    }

    if config.backends.is_empty() {
        errors.push(ValidationError::NoBackends);
    }

    let mut names = HashSet::new();
    let mut prefixes = HashSet::new();
    for backend in &config.backends {
        if !names.insert(backend.name.as_str()) {
            errors.push(ValidationError::DuplicateName(backend.name.clone()));
        }

        let prefix = normalize_prefix(&backend.route_prefix);
        if prefix == "/" {
            errors.push(ValidationError::EmptyPrefix {
                name: backend.name.clone(),
            });
        } else if RESERVED_PREFIXES
            .iter()
            .any(|reserved| prefix == *reserved || prefix.starts_with(&format!("{}/", reserved)))
        {
            errors.push(ValidationError::ReservedPrefix {
                name: backend.name.clone(),
                prefix,
            });
        } else if !prefixes.insert(prefix.clone()) {
            errors.push(ValidationError::DuplicatePrefix(prefix));
        }

        match Url::parse(&backend.base_url) {
            Ok(url) if url.scheme() == "https" => {
                errors.push(ValidationError::UnsupportedScheme {
                    name: backend.name.clone(),
                    url: backend.base_url.clone(),
                });
            }
            Ok(url) if url.scheme() == "http" && url.host_str().is_some() => {}
            _ => errors.push(ValidationError::BaseUrl {
                name: backend.name.clone(),
                url: backend.base_url.clone(),
            }),
        }

        let zero_checks = [
            ("connect_timeout_ms", backend.connect_timeout_ms == 0),
            ("request_timeout_ms", backend.request_timeout_ms == 0),
            ("failure_threshold", backend.failure_threshold == Some(0)),
        ];
        for (field, is_zero) in zero_checks {
            if is_zero {
                errors.push(ValidationError::Zero {
                    name: backend.name.clone(),
                    field,
                });
            }
        }
    }

    if config.breaker.failure_threshold == 0 {
        errors.push(ValidationError::Zero {
            name: "[breaker]".to_string(),
            field: "failure_threshold",
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::BackendConfig;

    fn config_with(backends: Vec<BackendConfig>) -> GatewayConfig {
        GatewayConfig {
            backends,
            ..Default::default()
        }
    }

    #[test]
    fn accepts_minimal_table() {
        let config = config_with(vec![
            BackendConfig::new("user", "/user", "http://user-service:8001"),
            BackendConfig::new("auth", "auth", "http://auth-service:8002"),
        ]);
        assert_eq!(validate_config(&config), Ok(()));
    }

    #[test]
    fn reports_every_problem() {
        let mut bad = BackendConfig::new("user", "/user/", "ftp://nowhere");
        bad.request_timeout_ms = 0;
        let mut config = config_with(vec![
            BackendConfig::new("user", "/user", "http://user-service:8001"),
            bad,
        ]);
        config.listener.bind_address = "not-an-addr".into();

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::BindAddress("not-an-addr".into())));
        assert!(errors.contains(&ValidationError::DuplicateName("user".into())));
        assert!(errors.contains(&ValidationError::DuplicatePrefix("/user".into())));
        assert!(errors.contains(&ValidationError::BaseUrl {
            name: "user".into(),
            url: "ftp://nowhere".into(),
        }));
        assert!(errors.contains(&ValidationError::Zero {
            name: "user".into(),
            field: "request_timeout_ms",
        }));
    }

    #[test]
    fn rejects_empty_table_and_root_prefix() {
        assert_eq!(
            validate_config(&config_with(vec![])),
            Err(vec![ValidationError::NoBackends])
        );

        let config = config_with(vec![BackendConfig::new("all", "/", "http://x:1")]);
        assert_eq!(
            validate_config(&config),
            Err(vec![ValidationError::EmptyPrefix { name: "all".into() }])
        );
    }

    #[test]
    fn rejects_gateway_owned_prefixes() {
        let config = config_with(vec![
            BackendConfig::new("status", "/health", "http://x:1"),
            BackendConfig::new("socket", "/ws/chat", "http://y:1"),
            BackendConfig::new("wsx", "/wsx", "http://z:1"),
        ]);
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(matches!(&errors[0], ValidationError::ReservedPrefix { name, .. } if name == "status"));
        assert!(matches!(&errors[1], ValidationError::ReservedPrefix { prefix, .. } if prefix == "/ws/chat"));
    }

    #[test]
    fn rejects_tls_backends() {
        let config = config_with(vec![BackendConfig::new(
            "secure",
            "/secure",
            "https://secure.internal",
        )]);
        assert_eq!(
            validate_config(&config),
            Err(vec![ValidationError::UnsupportedScheme {
                name: "secure".into(),
                url: "https://secure.internal".into(),
            }])
        );
    }
}
