//! WebSocket proxy handling.
//!
//! # Responsibilities
//! - Bidirectional frame forwarding between a client and its pinned backend
//! - Tear the session down when the backend goes Down or leaves the registry
//! - Close with 1001 (going away) when the daemon shuts down
//!
//! # Data Flow
//! ```text
//! Client ←──── WebSocket frames ────→ Proxy ←──── WebSocket frames ────→ Backend
//!                                       ↑
//!                 close signal (SessionRegistry), shutdown signal
//! ```
//!
//! # Design Decisions
//! - A session never moves to another backend; subscriptions are per node
//! - Text, binary and close frames are forwarded; each side answers its own
//!   pings
//! - Backend loss closes the client side with 1013 (try again later)

use axum::extract::ws::{CloseFrame as ClientCloseFrame, Message as ClientMessage, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as UpstreamCloseFrame;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::health::passive;
use crate::health::state::FailureReason;
use crate::http::server::AppState;

/// Close code sent to a client whose backend became unavailable.
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

/// Close code sent to every client when the daemon shuts down.
pub const CLOSE_GOING_AWAY: u16 = 1001;

pub type UpstreamSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    ClientClosed,
    UpstreamClosed,
    UpstreamLost,
    BackendDown,
    ShuttingDown,
}

/// Pump frames between `client` and `upstream` until one side ends.
pub async fn run_session(client: WebSocket, upstream: UpstreamSocket, alias: String, app: AppState) {
    let AppState {
        shared,
        frontend,
        mut shutdown,
        ..
    } = app;
    let ticket = shared.sessions.open(&alias);
    tracing::info!(session = %ticket.id, backend = %alias, "WebSocket session opened");

    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    let end = loop {
        tokio::select! {
            _ = ticket.close.notified() => break SessionEnd::BackendDown,
            _ = shutdown.wait() => break SessionEnd::ShuttingDown,
            message = client_rx.next() => {
                let Some(Ok(message)) = message else { break SessionEnd::ClientClosed };
                let Some(message) = to_upstream(message) else { continue };
                let closing = message.is_close();
                if upstream_tx.send(message).await.is_err() {
                    break SessionEnd::UpstreamLost;
                }
                if closing {
                    break SessionEnd::ClientClosed;
                }
            }
            message = upstream_rx.next() => {
                let message = match message {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        tracing::debug!(session = %ticket.id, error = %e, "Upstream WebSocket error");
                        break SessionEnd::UpstreamLost;
                    }
                    None => break SessionEnd::UpstreamClosed,
                };
                let Some(message) = to_client(message) else { continue };
                let closing = matches!(message, ClientMessage::Close(_));
                if client_tx.send(message).await.is_err() {
                    break SessionEnd::ClientClosed;
                }
                if closing {
                    break SessionEnd::UpstreamClosed;
                }
            }
        }
    };

    match end {
        SessionEnd::BackendDown | SessionEnd::UpstreamLost => {
            if end == SessionEnd::UpstreamLost {
                let reason = FailureReason::Connection("websocket lost".to_string());
                passive::record_failure(&shared, &frontend, &alias, reason).await;
            }
            let frame = ClientCloseFrame {
                code: CLOSE_TRY_AGAIN_LATER,
                reason: "backend unavailable".to_string().into(),
            };
            let _ = client_tx.send(ClientMessage::Close(Some(frame))).await;
            let _ = upstream_tx.close().await;
        }
        SessionEnd::ShuttingDown => {
            let frame = ClientCloseFrame {
                code: CLOSE_GOING_AWAY,
                reason: "proxy shutting down".to_string().into(),
            };
            let _ = client_tx.send(ClientMessage::Close(Some(frame))).await;
            let _ = upstream_tx.close().await;
        }
        SessionEnd::ClientClosed => {
            let _ = upstream_tx.close().await;
        }
        SessionEnd::UpstreamClosed => {
            let _ = client_tx.close().await;
        }
    }

    shared.sessions.remove(ticket.id);
    tracing::info!(session = %ticket.id, backend = %alias, reason = ?end, "WebSocket session closed");
}

fn to_upstream(message: ClientMessage) -> Option<UpstreamMessage> {
    match message {
        ClientMessage::Text(text) => Some(UpstreamMessage::text(text.as_str().to_owned())),
        ClientMessage::Binary(data) => Some(UpstreamMessage::Binary(data)),
        ClientMessage::Ping(_) | ClientMessage::Pong(_) => None,
        ClientMessage::Close(frame) => Some(UpstreamMessage::Close(frame.map(|f| UpstreamCloseFrame {
            code: CloseCode::from(f.code),
            reason: f.reason.as_str().to_owned().into(),
        }))),
    }
}

fn to_client(message: UpstreamMessage) -> Option<ClientMessage> {
    match message {
        UpstreamMessage::Text(text) => Some(ClientMessage::Text(text.as_str().to_owned().into())),
        UpstreamMessage::Binary(data) => Some(ClientMessage::Binary(data)),
        UpstreamMessage::Ping(_) | UpstreamMessage::Pong(_) | UpstreamMessage::Frame(_) => None,
        UpstreamMessage::Close(frame) => Some(ClientMessage::Close(frame.map(|f| ClientCloseFrame {
            code: u16::from(f.code),
            reason: f.reason.as_str().to_owned().into(),
        }))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_convert_both_ways() {
        let up = to_upstream(ClientMessage::Text("hello".to_string().into())).unwrap();
        assert_eq!(up.to_text().unwrap(), "hello");

        let close = to_client(UpstreamMessage::Close(Some(UpstreamCloseFrame {
            code: CloseCode::from(CLOSE_TRY_AGAIN_LATER),
            reason: "bye".to_string().into(),
        })))
        .unwrap();
        match close {
            ClientMessage::Close(Some(frame)) => {
                assert_eq!(frame.code, CLOSE_TRY_AGAIN_LATER);
                assert_eq!(frame.reason.as_str(), "bye");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
        assert!(to_client(UpstreamMessage::Ping(Default::default())).is_none());
    }
}
