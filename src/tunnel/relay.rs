//! Bidirectional frame relay.
//!
//! # Data Flow
//! ```text
//! Client ──▶ pump (client → backend) ──▶ Backend
//! Client ◀── pump (backend → client) ◀── Backend
//! ```
//!
//! # Design Decisions
//! - Two independent tasks sharing one cancellation token
//! - Frame-level forwarding, no message buffering
//! - Close frames propagated; whichever pump ends first cancels the other
//! - A broken leg closes the survivor with 1011, shutdown closes both with 1001
//! - Ping/pong stay on their own leg (each socket answers its own pings)

use std::fmt::Display;

use axum::extract::ws::{self, close_code, WebSocket};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::task::JoinError;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as BackendCloseFrame;
use tokio_tungstenite::tungstenite::Message as BackendMessage;
use tokio_util::sync::CancellationToken;

use crate::tunnel::handshake::BackendSocket;

/// A frame after translation to the other leg's message type.
#[derive(Debug)]
pub enum Relayed<M> {
    Frame(M),
    Close(M),
    Skip,
}

/// How a pump stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpEnd {
    /// A close frame was relayed.
    Closed,
    /// The source ended without a close frame.
    Eof,
    Error,
    Cancelled,
}

pub fn to_backend(message: ws::Message) -> Relayed<BackendMessage> {
    match message {
        ws::Message::Text(text) => Relayed::Frame(BackendMessage::text(text.as_str().to_owned())),
        ws::Message::Binary(data) => Relayed::Frame(BackendMessage::Binary(data)),
        ws::Message::Close(frame) => Relayed::Close(BackendMessage::Close(frame.map(|frame| {
            BackendCloseFrame {
                code: CloseCode::from(frame.code),
                reason: frame.reason.as_str().to_owned().into(),
            }
        }))),
        ws::Message::Ping(_) | ws::Message::Pong(_) => Relayed::Skip,
    }
}

pub fn to_client(message: BackendMessage) -> Relayed<ws::Message> {
    match message {
        BackendMessage::Text(text) => Relayed::Frame(ws::Message::Text(text.as_str().to_owned().into())),
        BackendMessage::Binary(data) => Relayed::Frame(ws::Message::Binary(data)),
        BackendMessage::Close(frame) => Relayed::Close(ws::Message::Close(frame.map(|frame| {
            ws::CloseFrame {
                code: u16::from(frame.code),
                reason: frame.reason.as_str().to_owned().into(),
            }
        }))),
        BackendMessage::Ping(_) | BackendMessage::Pong(_) | BackendMessage::Frame(_) => {
            Relayed::Skip
        }
    }
}

/// Copy frames from `source` to `sink` until either side ends or `cancel` fires.
///
/// Returns the sink so the caller can finish the close handshake.
pub async fn pump<S, K, M, N, E>(
    mut source: S,
    mut sink: K,
    convert: fn(M) -> Relayed<N>,
    cancel: CancellationToken,
    direction: &'static str,
) -> (PumpEnd, K)
where
    S: Stream<Item = Result<M, E>> + Unpin,
    K: Sink<N> + Unpin,
    K::Error: Display,
    E: Display,
{
    let end = loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break PumpEnd::Cancelled,
            next = source.next() => next,
        };

        match next {
            None => break PumpEnd::Eof,
            Some(Err(e)) => {
                tracing::debug!(direction, error = %e, "Tunnel read failed");
                break PumpEnd::Error;
            }
            Some(Ok(message)) => match convert(message) {
                Relayed::Skip => continue,
                Relayed::Frame(frame) => {
                    if let Err(e) = sink.send(frame).await {
                        tracing::debug!(direction, error = %e, "Tunnel write failed");
                        break PumpEnd::Error;
                    }
                }
                Relayed::Close(frame) => {
                    let _ = sink.send(frame).await;
                    break PumpEnd::Closed;
                }
            },
        }
    };

    // Whichever direction stops first takes the other one down.
    cancel.cancel();
    (end, sink)
}

/// Relay frames between `client` and `backend` until the tunnel closes.
pub async fn bridge(client: WebSocket, backend: BackendSocket, shutdown: CancellationToken) {
    let (client_tx, client_rx) = client.split();
    let (backend_tx, backend_rx) = backend.split();
    let session = shutdown.child_token();

    let upstream = tokio::spawn(pump(
        client_rx,
        backend_tx,
        to_backend,
        session.clone(),
        "client->backend",
    ));
    let downstream = tokio::spawn(pump(
        backend_rx,
        client_tx,
        to_client,
        session.clone(),
        "backend->client",
    ));

    let (upstream, downstream) = tokio::join!(upstream, downstream);
    let owed = owed_close(
        shutdown.is_cancelled(),
        pump_end(&upstream),
        pump_end(&downstream),
    );

    match upstream {
        Ok((end, mut backend_tx)) => {
            if let Some((code, reason)) = owed.filter(|_| end != PumpEnd::Closed) {
                let frame = BackendCloseFrame {
                    code: CloseCode::from(code),
                    reason: reason.to_string().into(),
                };
                let _ = backend_tx.send(BackendMessage::Close(Some(frame))).await;
            }
            let _ = backend_tx.close().await;
            tracing::trace!(end = ?end, "client->backend pump finished");
        }
        Err(e) => tracing::warn!(error = %e, "client->backend pump panicked"),
    }

    match downstream {
        Ok((end, mut client_tx)) => {
            if let Some((code, reason)) = owed.filter(|_| end != PumpEnd::Closed) {
                let frame = ws::CloseFrame {
                    code,
                    reason: reason.to_string().into(),
                };
                let _ = client_tx.send(ws::Message::Close(Some(frame))).await;
            }
            let _ = client_tx.close().await;
            tracing::trace!(end = ?end, "backend->client pump finished");
        }
        Err(e) => tracing::warn!(error = %e, "backend->client pump panicked"),
    }
}

fn pump_end<K>(joined: &Result<(PumpEnd, K), JoinError>) -> PumpEnd {
    joined.as_ref().map(|(end, _)| *end).unwrap_or(PumpEnd::Error)
}

/// Close frame owed to each leg that has not already relayed one.
///
/// A leg that broke off (read error, write error, or EOF without a close
/// handshake) takes the whole tunnel down with 1011.
fn owed_close(going_away: bool, upstream: PumpEnd, downstream: PumpEnd) -> Option<(u16, &'static str)> {
    let broken = |end: PumpEnd| matches!(end, PumpEnd::Error | PumpEnd::Eof);
    if broken(upstream) || broken(downstream) {
        Some((close_code::ERROR, "Tunnel failed"))
    } else if going_away {
        Some((close_code::AWAY, "Gateway shutting down"))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_frames_both_ways() {
        assert!(matches!(
            to_backend(ws::Message::Text("hi".to_string().into())),
            Relayed::Frame(BackendMessage::Text(ref t)) if t.as_str() == "hi"
        ));
        assert!(matches!(
            to_client(BackendMessage::Binary(vec![1u8, 2, 3].into())),
            Relayed::Frame(ws::Message::Binary(ref b)) if &b[..] == [1, 2, 3]
        ));
        assert!(matches!(to_backend(ws::Message::Ping(Default::default())), Relayed::Skip));
        assert!(matches!(to_client(BackendMessage::Pong(Default::default())), Relayed::Skip));
    }

    #[test]
    fn close_codes_survive_translation() {
        let close = ws::Message::Close(Some(ws::CloseFrame {
            code: 4000,
            reason: "done".to_string().into(),
        }));
        match to_backend(close) {
            Relayed::Close(BackendMessage::Close(Some(frame))) => {
                assert_eq!(u16::from(frame.code), 4000);
                assert_eq!(frame.reason.as_str(), "done");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn pump_preserves_order_and_stops_at_close() {
        let source = futures_util::stream::iter(vec![
            Ok::<_, std::io::Error>(BackendMessage::text("a".to_string())),
            Ok(BackendMessage::Ping(Default::default())),
            Ok(BackendMessage::text("b".to_string())),
            Ok(BackendMessage::Close(None)),
            Ok(BackendMessage::text("never".to_string())),
        ]);
        let cancel = CancellationToken::new();

        let (end, received) = pump(source, Vec::new(), to_client, cancel.clone(), "test").await;
        assert_eq!(end, PumpEnd::Closed);
        assert!(cancel.is_cancelled());

        assert_eq!(received.len(), 3);
        assert!(matches!(received[0], ws::Message::Text(ref t) if t.as_str() == "a"));
        assert!(matches!(received[1], ws::Message::Text(ref t) if t.as_str() == "b"));
        assert!(matches!(received[2], ws::Message::Close(None)));
    }

    #[tokio::test]
    async fn pump_stops_when_cancelled() {
        let source = futures_util::stream::pending::<Result<BackendMessage, std::io::Error>>();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (end, sink) = pump(source, Vec::<ws::Message>::new(), to_client, cancel, "test").await;
        assert!(sink.is_empty());
        assert_eq!(end, PumpEnd::Cancelled);
    }

    #[test]
    fn owed_close_codes() {
        use PumpEnd::*;
        assert_eq!(owed_close(false, Closed, Cancelled), None);
        assert_eq!(owed_close(false, Cancelled, Error).map(|(code, _)| code), Some(close_code::ERROR));
        assert_eq!(owed_close(false, Eof, Cancelled).map(|(code, _)| code), Some(close_code::ERROR));
        assert_eq!(owed_close(true, Cancelled, Cancelled).map(|(code, _)| code), Some(close_code::AWAY));
        assert_eq!(owed_close(true, Cancelled, Error).map(|(code, _)| code), Some(close_code::ERROR));
    }
}
