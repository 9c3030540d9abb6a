//! Response relay.
//!
//! Backend status, headers and body go back to the client unmodified apart
//! from hop-by-hop headers. The body is streamed, never buffered.

use axum::body::Body;
use axum::http::Response;

use crate::http::headers::strip_hop_by_hop;

pub fn relay(response: Response<Body>) -> Response<Body> {
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    Response::from_parts(parts, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, StatusCode};

    #[test]
    fn keeps_status_and_end_to_end_headers() {
        let response = Response::builder()
            .status(StatusCode::CREATED)
            .header("x-backend", "user")
            .header(header::CONNECTION, "close")
            .header(header::TRANSFER_ENCODING, "chunked")
            .body(Body::from("created"))
            .unwrap();

        let relayed = relay(response);
        assert_eq!(relayed.status(), StatusCode::CREATED);
        assert_eq!(relayed.headers()["x-backend"], "user");
        assert!(relayed.headers().get(header::CONNECTION).is_none());
        assert!(relayed.headers().get(header::TRANSFER_ENCODING).is_none());
    }
}
