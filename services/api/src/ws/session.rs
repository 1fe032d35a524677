//! Manages the WebSocket connection lifecycle for a challenge session.
//!
//! One socket serves one session. The first client message must be
//! `register`; reconnects pass the session id they were handed the first
//! time, and the registry re-attaches them to their still-running worker
//! instead of starting a new one. The socket is subscribed to the session's
//! outbound channel *before* the registry attach flips the ready gate, which
//! is what makes the resumed "welcome back" output safe to send.

use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::state::AppState;
use crate::transport::Transport;
use crate::worker::run_session;
use crate::ws::protocol::{ClientMessage, ServerMessage};

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Outbound buffer per connection; a client this far behind is dropped.
const OUTBOUND_BUFFER: usize = 64;

/// Transport implementation backed by the connection's outbound channel.
struct WsTransport {
    tx: mpsc::Sender<ServerMessage>,
}

impl WsTransport {
    async fn push(&self, msg: ServerMessage) {
        // Best-effort: a closed connection just drops output.
        if self.tx.send(msg).await.is_err() {
            debug!("dropping output for disconnected websocket");
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&self, text: &str) {
        self.push(ServerMessage::Output {
            text: text.to_string(),
        })
        .await;
    }

    async fn session_ended(&self) {
        self.push(ServerMessage::SessionEnded).await;
    }

    async fn set_title(&self, title: &str) {
        self.push(ServerMessage::SetTitle {
            title: title.to_string(),
        })
        .await;
    }

    async fn clear_panel(&self, panel: &str) {
        self.push(ServerMessage::ClearPanel {
            panel: panel.to_string(),
        })
        .await;
    }

    async fn progress(&self, chapter: usize, challenge: usize) {
        self.push(ServerMessage::Progress { chapter, challenge }).await;
    }
}

/// Main handler for an individual WebSocket connection.
#[instrument(name = "ws_session", skip_all, fields(session_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (socket_tx, mut socket_rx) = socket.split();

    // The first message from the client must be a `register`.
    let session_id = match socket_rx.next().await {
        Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::Register { session_id }) => {
                session_id.unwrap_or_else(|| Uuid::new_v4().to_string())
            }
            _ => {
                error!("first message was not a `register` message");
                return;
            }
        },
        _ => {
            info!("client disconnected before registering");
            return;
        }
    };
    tracing::Span::current().record("session_id", session_id.as_str());

    // Subscribe this connection to the session's output *before* attaching,
    // so nothing the (possibly resumed) worker emits can be lost.
    let (out_tx, out_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_BUFFER);
    let forward_handle = tokio::spawn(forward_outbound(out_rx, socket_tx));

    let transport = Arc::new(WsTransport { tx: out_tx.clone() });
    if out_tx
        .send(ServerMessage::Registered {
            session_id: session_id.clone(),
        })
        .await
        .is_err()
    {
        return;
    }

    {
        let registry = state.registry.clone();
        let deps = state.deps.clone();
        state
            .registry
            .register(&session_id, transport, move |entry| {
                run_session(entry, registry, deps)
            })
            .await;
    }

    // Inbound loop: route input lines to the session until the socket drops.
    while let Some(msg) = socket_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Input { text }) => {
                    state.registry.submit_input(&session_id, text).await;
                }
                Ok(ClientMessage::Register { .. }) => {
                    debug!("ignoring duplicate register message");
                }
                Err(e) => debug!(error = %e, "ignoring malformed client message"),
            },
            Ok(Message::Close(_)) => {
                info!("client sent close frame");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(error = %e, "websocket receive error");
                break;
            }
        }
    }

    // Disconnect: leave the worker running so a reconnect can resume it.
    state.registry.detach(&session_id).await;
    drop(out_tx);
    let _ = forward_handle.await;
    info!("websocket connection closed");
}

/// Serializes queued server messages onto the socket until the channel closes
/// or the session ends.
async fn forward_outbound(
    mut out_rx: mpsc::Receiver<ServerMessage>,
    mut socket_tx: SplitSink<WebSocket, Message>,
) {
    while let Some(msg) = out_rx.recv().await {
        let ended = matches!(msg, ServerMessage::SessionEnded);
        let serialized = match serde_json::to_string(&msg) {
            Ok(serialized) => serialized,
            Err(e) => {
                error!(error = %e, "failed to serialize server message");
                continue;
            }
        };
        if socket_tx.send(Message::Text(serialized.into())).await.is_err() {
            debug!("websocket sink closed; stopping outbound forwarding");
            break;
        }
        if ended {
            let _ = socket_tx.send(Message::Close(None)).await;
            break;
        }
    }
}
