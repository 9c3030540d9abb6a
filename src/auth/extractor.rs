//! Bearer-token extractor for proxied HTTP requests.

use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::auth::{Authenticator, Claims, Reason, Unauthorized};

/// Claims of the authenticated caller.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub Claims);

/// Token from an `Authorization: Bearer <token>` header, if present.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    Arc<dyn Authenticator>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Unauthorized;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers).ok_or(Unauthorized::new(Reason::Missing))?;
        let authenticator = <Arc<dyn Authenticator> as FromRef<S>>::from_ref(state);
        authenticator.verify(token).map(AuthenticatedUser)
    }
}

impl IntoResponse for Unauthorized {
    fn into_response(self) -> Response {
        match self.reason {
            Reason::Missing => (
                StatusCode::FORBIDDEN,
                Json(json!({"detail": "Not authenticated"})),
            )
                .into_response(),
            _ => (
                StatusCode::UNAUTHORIZED,
                [(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"))],
                Json(json!({"detail": "Could not validate credentials"})),
            )
                .into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bearer_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def.ghi"));
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer xyz"));
        assert_eq!(bearer_token(&headers), Some("xyz"));

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);
    }

    #[test]
    fn maps_reasons_to_status() {
        let missing = Unauthorized::new(Reason::Missing).into_response();
        assert_eq!(missing.status(), StatusCode::FORBIDDEN);
        assert!(missing.headers().get(WWW_AUTHENTICATE).is_none());

        let expired = Unauthorized::new(Reason::Expired).into_response();
        assert_eq!(expired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(expired.headers()[WWW_AUTHENTICATE], "Bearer");
    }
}
