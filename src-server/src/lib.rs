// Dashboard bridge HTTP surface
//
// One WebSocket endpoint for UI clients plus a health probe. Each socket gets
// a writer task fed by an unbounded channel; the registry and correlator only
// ever see the channel sender.

use std::future::Future;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use dashbridge_lib::models::bridge::OutboundMessage;
use dashbridge_lib::Dispatcher;

/// Longest close reason a control frame can carry
const MAX_CLOSE_REASON_BYTES: usize = 123;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        log::info!("[server] Listening on ws://{}/ws", addr);
    }

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    log::info!("[server] Server stopped");
    Ok(())
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let bridge = state.dispatcher.bridge();
    Json(json!({
        "status": "ok",
        "activeConnections": bridge.registry().connection_count().await,
        "pendingRequests": bridge.correlator().pending_count(),
    }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();

    let dispatcher = state.dispatcher;
    let client_id = dispatcher.connect(tx).await;

    let writer_id = client_id.clone();
    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let (message, closing) = to_ws_message(outbound);
            if let Err(e) = sender.send(message).await {
                log::debug!("[server] Write to {} failed: {}", writer_id, e);
                break;
            }
            if closing {
                break;
            }
        }
    });

    while let Some(incoming) = receiver.next().await {
        let message = match incoming {
            Ok(message) => message,
            Err(e) => {
                log::debug!("[server] Read from {} failed: {}", client_id, e);
                break;
            }
        };

        match message {
            Message::Text(text) => dispatcher.handle_text(&client_id, text.as_str()).await,
            Message::Binary(_) => dispatcher.handle_binary(&client_id).await,
            Message::Close(_) => break,
            // Pings are answered by axum
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    dispatcher.disconnect(&client_id).await;
    writer.abort();
}

fn to_ws_message(outbound: OutboundMessage) -> (Message, bool) {
    match outbound {
        OutboundMessage::Text(text) => (Message::Text(text.into()), false),
        OutboundMessage::Close { code, reason } => {
            let reason = truncate_reason(&reason);
            (
                Message::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                })),
                true,
            )
        }
    }
}

fn truncate_reason(reason: &str) -> String {
    if reason.len() <= MAX_CLOSE_REASON_BYTES {
        return reason.to_string();
    }
    let mut end = MAX_CLOSE_REASON_BYTES;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_string()
}
