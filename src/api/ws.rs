//! WebSocket endpoint: upgrade handler and message loop

use super::handlers::{validate_wallet, AppError};
use super::types::{ClientMessage, ConnectQuery};
use super::AppState;
use crate::runtime::Request;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};

/// Upgrade handler. The wallet is checked before any session state exists.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let wallet = validate_wallet(query.wallet_address.as_deref().unwrap_or_default())?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, wallet)))
}

async fn handle_socket(socket: WebSocket, state: AppState, wallet: String) {
    let connection = state.runtime.connect(&wallet).await;
    let connection_id = connection.id;
    let requests = connection.requests;
    let mut events = connection.events;
    tracing::info!(wallet = %wallet, connection_id, "Client connected");

    let (mut sender, mut receiver) = socket.split();

    // Sender task: forward server events to the socket
    let send_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize server event");
                    continue;
                }
            };
            if sender.send(WsMessage::Text(json)).await.is_err() {
                break;
            }
        }
    });

    // Receiver loop: validate frames and hand them to the worker
    while let Some(Ok(ws_msg)) = receiver.next().await {
        let text = match ws_msg {
            WsMessage::Text(t) => t,
            WsMessage::Close(_) => break,
            _ => continue,
        };

        let request = ClientMessage::parse(&text).unwrap_or_else(|error| {
            tracing::warn!(wallet = %wallet, error = %error, "Invalid client message");
            Request::Rejected(error)
        });
        if requests.send(request).await.is_err() {
            // Worker replaced by a newer connection
            break;
        }
    }

    state.runtime.disconnect(&wallet, connection_id).await;
    drop(requests);
    if let Err(e) = send_task.await {
        tracing::warn!(wallet = %wallet, error = %e, "Event sender task failed");
    }
    tracing::info!(wallet = %wallet, connection_id, "Client disconnected");
}
