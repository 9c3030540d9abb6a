//! Gateway error taxonomy and its HTTP mapping.
//!
//! | Error                       | Status |
//! |-----------------------------|--------|
//! | `Routing(NotFound)`         | 404    |
//! | `CircuitOpen`               | 503    |
//! | `Transport(Timeout)`        | 504    |
//! | `Transport(Connect/Upstream)` | 502  |
//! | `Transport(PoolExhausted/ShuttingDown)` | 503 |
//! | `Transport(ClientAborted)`  | 400    |
//! | `BadRequest`                | 400    |
//!
//! Response bodies carry the canonical reason phrase only; detail stays in logs.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::resilience::CallError;
use crate::routing::RoutingError;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error("circuit open for service '{service}'")]
    CircuitOpen { service: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The inbound body could not be read.
    #[error("invalid request body: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::Routing(_) => StatusCode::NOT_FOUND,
            ProxyError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::Transport(err) => match err {
                TransportError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                TransportError::Connect(_) | TransportError::Upstream(_) => StatusCode::BAD_GATEWAY,
                TransportError::PoolExhausted | TransportError::ShuttingDown => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                TransportError::ClientAborted(_) => StatusCode::BAD_REQUEST,
            },
            ProxyError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CallError<TransportError>> for ProxyError {
    fn from(err: CallError<TransportError>) -> Self {
        match err {
            CallError::CircuitOpen { service } => ProxyError::CircuitOpen { service },
            CallError::Failed(err) => ProxyError::Transport(err),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        tracing::debug!(status = status.as_u16(), error = %self, "Request failed at gateway");
        let reason = status.canonical_reason().unwrap_or("Error");
        (status, reason).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::transport::TimeoutPhase;

    #[test]
    fn maps_errors_to_status_codes() {
        let not_found: ProxyError = RoutingError::NotFound { path: "/x".into() }.into();
        assert_eq!(not_found.status_code(), StatusCode::NOT_FOUND);

        let open: ProxyError = CallError::<TransportError>::CircuitOpen {
            service: "user".into(),
        }
        .into();
        assert_eq!(open.status_code(), StatusCode::SERVICE_UNAVAILABLE);

        let timeout: ProxyError = CallError::Failed(TransportError::Timeout {
            phase: TimeoutPhase::Connect,
            after: Duration::from_secs(5),
        })
        .into();
        assert_eq!(timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);

        let exhausted: ProxyError = TransportError::PoolExhausted.into();
        assert_eq!(exhausted.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn body_is_reason_phrase_only() {
        let response = ProxyError::CircuitOpen {
            service: "user".into(),
        }
        .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"Service Unavailable");
    }
}
