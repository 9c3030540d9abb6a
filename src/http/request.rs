//! Inbound request preparation.
//!
//! # Responsibilities
//! - Decide the body policy (buffer below the threshold, stream otherwise)
//! - Strip hop-by-hop headers
//! - Build the upstream request for a backend
//!
//! # Design Decisions
//! - A body of unknown size (chunked) is always streamed
//! - Only buffered bodies can be replayed; streamed bodies are consumed once
//! - `X-Forwarded-For` is appended, never replaced

use std::net::SocketAddr;

use axum::body::{Body, Bytes};
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::{Method, Request};
use hyper::body::Body as _;

use crate::error::ProxyError;
use crate::http::headers::{strip_hop_by_hop, X_FORWARDED_FOR};
use crate::routing::BackendDescriptor;
use crate::transport::ClientBody;

/// Body of a request on its way downstream.
#[derive(Debug)]
pub enum ProxiedBody {
    Buffered(Bytes),
    Streamed(Body),
}

/// A client request, prepared for forwarding.
#[derive(Debug)]
pub struct ProxiedRequest {
    pub method: Method,
    pub subpath: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: ProxiedBody,
    pub client_addr: SocketAddr,
}

impl ProxiedRequest {
    pub async fn from_inbound(
        request: Request<Body>,
        subpath: &str,
        client_addr: SocketAddr,
        streaming_threshold: usize,
    ) -> Result<Self, ProxyError> {
        let (parts, body) = request.into_parts();

        let declared = body.size_hint().exact();
        let body = match declared {
            Some(size) if size < streaming_threshold as u64 => {
                let bytes = axum::body::to_bytes(body, streaming_threshold)
                    .await
                    .map_err(|e| ProxyError::BadRequest(e.to_string()))?;
                ProxiedBody::Buffered(bytes)
            }
            _ => ProxiedBody::Streamed(body),
        };

        let mut headers = parts.headers;
        strip_hop_by_hop(&mut headers);

        Ok(Self {
            method: parts.method,
            subpath: subpath.to_string(),
            query: parts.uri.query().map(str::to_string),
            headers,
            body,
            client_addr,
        })
    }

    /// Whether the body could be sent again.
    pub fn is_replayable(&self) -> bool {
        matches!(self.body, ProxiedBody::Buffered(_))
    }

    /// Build the request sent to `backend`.
    pub fn into_upstream(self, backend: &BackendDescriptor) -> Result<Request<Body>, ProxyError> {
        let uri = backend.upstream_uri(&self.subpath, self.query.as_deref());
        let mut headers = self.headers;

        let host = HeaderValue::from_str(&backend.authority())
            .map_err(|e| ProxyError::Internal(format!("invalid backend authority: {}", e)))?;
        headers.insert(header::HOST, host);

        // The address string is always a valid header value.
        if let Ok(client) = HeaderValue::from_str(&self.client_addr.ip().to_string()) {
            headers.append(X_FORWARDED_FOR, client);
        }

        let body = match self.body {
            ProxiedBody::Buffered(bytes) => Body::from(bytes),
            ProxiedBody::Streamed(body) => Body::new(ClientBody::new(body)),
        };

        let mut request = Request::builder()
            .method(self.method)
            .uri(uri)
            .body(body)
            .map_err(|e| ProxyError::Internal(format!("failed to build upstream request: {}", e)))?;
        *request.headers_mut() = headers;
        Ok(request)
    }
}
