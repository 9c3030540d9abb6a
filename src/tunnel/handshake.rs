//! Tunnel establishment: token discovery, client authentication, backend dial.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use serde::Deserialize;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::{form_urlencoded, Url};

use crate::auth::{Authenticator, Claims, Reason, Unauthorized};
use crate::routing::BackendDescriptor;

pub type BackendSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("cannot derive websocket url from '{0}'")]
    InvalidUrl(String),

    #[error("backend dial timed out after {0:?}")]
    DialTimeout(Duration),

    #[error("backend dial failed: {0}")]
    Dial(#[from] tokio_tungstenite::tungstenite::Error),
}

/// First client message when no token came with the upgrade request.
#[derive(Debug, Deserialize)]
struct AuthMessage {
    #[serde(rename = "type")]
    kind: String,
    token: String,
}

/// Split the token parameter out of a raw query string.
///
/// Returns the token (if any) and the remaining query to forward.
pub fn split_token(query: Option<&str>, param: &str) -> (Option<String>, Option<String>) {
    let Some(query) = query else {
        return (None, None);
    };

    let mut token = None;
    let mut rest = form_urlencoded::Serializer::new(String::new());
    let mut kept = 0;
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        if key == param {
            if token.is_none() && !value.is_empty() {
                token = Some(value.into_owned());
            }
        } else {
            rest.append_pair(&key, &value);
            kept += 1;
        }
    }

    let rest = (kept > 0).then(|| rest.finish());
    (token, rest)
}

/// `ws` URL of the backend endpoint for `subpath`.
pub fn backend_url(
    backend: &BackendDescriptor,
    subpath: &str,
    query: Option<&str>,
) -> Result<Url, TunnelError> {
    let mut url = backend.base_url.clone();
    url.set_scheme("ws")
        .map_err(|_| TunnelError::InvalidUrl(backend.base_url.to_string()))?;

    let path = format!("{}{}", url.path().trim_end_matches('/'), subpath);
    url.set_path(&path);
    url.set_query(query.filter(|q| !q.is_empty()));
    Ok(url)
}

/// Authenticate the client, waiting for an auth control message if the
/// upgrade request carried no token.
pub async fn authenticate(
    socket: &mut WebSocket,
    token: Option<String>,
    authenticator: &dyn Authenticator,
    wait: Duration,
) -> Result<(Claims, String), Unauthorized> {
    let token = match token {
        Some(token) => token,
        None => await_auth_message(socket, wait)
            .await
            .ok_or(Unauthorized::new(Reason::Missing))?,
    };
    let claims = authenticator.verify(&token)?;
    Ok((claims, token))
}

async fn await_auth_message(socket: &mut WebSocket, wait: Duration) -> Option<String> {
    let first_message = async {
        loop {
            match socket.recv().await? {
                Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
                Ok(Message::Text(text)) => return Some(text),
                Ok(_) | Err(_) => return None,
            }
        }
    };

    let text = tokio::time::timeout(wait, first_message).await.ok()??;
    serde_json::from_str::<AuthMessage>(text.as_str())
        .ok()
        .filter(|message| message.kind == "auth")
        .map(|message| message.token)
}

/// Open the backend leg of the tunnel, bounded by the backend's connect timeout.
pub async fn dial(
    url: &Url,
    backend: &BackendDescriptor,
    client_addr: SocketAddr,
    token: &str,
) -> Result<BackendSocket, TunnelError> {
    let mut request = url.as_str().into_client_request()?;
    let headers = request.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&client_addr.ip().to_string()) {
        headers.append("x-forwarded-for", value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
        headers.insert("authorization", value);
    }

    let (socket, _response) = tokio::time::timeout(backend.connect_timeout, connect_async(request))
        .await
        .map_err(|_| TunnelError::DialTimeout(backend.connect_timeout))??;
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use crate::routing::ServiceRegistry;

    #[test]
    fn splits_token_from_query() {
        assert_eq!(split_token(None, "token"), (None, None));
        assert_eq!(
            split_token(Some("token=abc"), "token"),
            (Some("abc".to_string()), None)
        );
        assert_eq!(
            split_token(Some("room=7&token=abc&lang=en"), "token"),
            (Some("abc".to_string()), Some("room=7&lang=en".to_string()))
        );
        assert_eq!(
            split_token(Some("room=7"), "token"),
            (None, Some("room=7".to_string()))
        );
    }

    #[test]
    fn derives_backend_ws_url() {
        let registry = ServiceRegistry::from_config(&[
            BackendConfig::new("messaging", "/messaging", "http://messaging-service:8005"),
            BackendConfig::new("live", "/live", "http://live.internal/api/"),
        ])
        .unwrap();

        let (messaging, subpath) = registry.resolve("/messaging/ws/conv-1").unwrap();
        let url = backend_url(&messaging, subpath, Some("room=7")).unwrap();
        assert_eq!(url.as_str(), "ws://messaging-service:8005/ws/conv-1?room=7");

        let (live, subpath) = registry.resolve("/live/feed").unwrap();
        let url = backend_url(&live, subpath, None).unwrap();
        assert_eq!(url.as_str(), "ws://live.internal/api/feed");
    }
}
