use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;
use crate::ws::{messages::event, ClientHandle, ClientMessage, EventMessage};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQueryParams {
    pub room_id: String,
    pub token: String,
}

/// WebSocket routes
pub fn ws_routes() -> Router<AppState> {
    Router::new().route("/ws", get(ws_upgrade))
}

/// WebSocket upgrade handler
async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsQueryParams>,
) -> Result<Response, AppError> {
    let claims = state.auth.validate_token(&params.token)?;

    if claims.room_id != params.room_id {
        return Err(AppError::Unauthorized(
            "Token room_id does not match".to_string(),
        ));
    }

    // Room must still be known to the registry.
    state.registry.room_meta(&params.room_id).await?;

    tracing::info!(
        room_id = %params.room_id,
        identity = %claims.sub,
        display = %claims.display,
        "WebSocket upgrade request"
    );

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, claims)))
}

/// Handle one realtime connection. The channel only carries liveness
/// (heartbeats) upstream and admission events downstream; all state
/// changes go through the HTTP API.
async fn handle_socket(socket: WebSocket, state: AppState, claims: crate::models::Claims) {
    let conn_id = Uuid::new_v4().to_string();
    let room_id = claims.room_id.clone();
    let identity = claims.sub.clone();

    tracing::info!(
        conn_id = %conn_id,
        room_id = %room_id,
        identity = %identity,
        "WebSocket connected"
    );

    let (tx, mut rx) = mpsc::unbounded_channel::<EventMessage>();

    let client_handle = ClientHandle::new(
        conn_id.clone(),
        identity.clone(),
        room_id.clone(),
        claims.display.clone(),
        claims.level,
        tx,
    );

    let room_connections = state.connections.get_or_create_room(&room_id);
    room_connections.add_client(client_handle);

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Task for sending events to the client
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if ws_sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
        }
    });

    // Connecting counts as a first sign of life.
    let _ = state.registry.heartbeat(&room_id, &identity).await;

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                handle_message(&text, &room_id, &identity, &conn_id, &state).await;
            }
            Ok(Message::Ping(_)) => {
                tracing::trace!(conn_id = %conn_id, "Ping received");
            }
            Ok(Message::Close(_)) => {
                tracing::info!(conn_id = %conn_id, "WebSocket close received");
                break;
            }
            Err(e) => {
                tracing::error!(conn_id = %conn_id, error = %e, "WebSocket error");
                break;
            }
            _ => {}
        }
    }

    tracing::info!(
        conn_id = %conn_id,
        room_id = %room_id,
        identity = %identity,
        "WebSocket disconnected"
    );

    // Drop the handle; the participant itself stays until the heartbeat
    // grace period runs out, so a quick reconnect re-attaches seamlessly.
    state.connections.remove_client_from_room(&room_id, &conn_id);

    send_task.abort();
}

async fn handle_message(
    text: &str,
    room_id: &str,
    identity: &str,
    conn_id: &str,
    state: &AppState,
) {
    let msg: ClientMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(_) => {
            send_to_conn(room_id, conn_id, EventMessage::error(400, "Malformed message"), state);
            return;
        }
    };

    match msg.msg_type.as_str() {
        event::HEARTBEAT | event::PING => {
            if let Err(e) = state.registry.heartbeat(room_id, identity).await {
                tracing::debug!(identity = %identity, error = %e, "Heartbeat for unknown participant");
            }
            send_to_conn(room_id, conn_id, EventMessage::pong(), state);
        }
        other => {
            tracing::warn!(msg_type = %other, "Unknown message type");
            send_to_conn(
                room_id,
                conn_id,
                EventMessage::error(400, "Unknown message type"),
                state,
            );
        }
    }
}

fn send_to_conn(room_id: &str, conn_id: &str, msg: EventMessage, state: &AppState) {
    if let Some(room) = state.connections.get_room(room_id) {
        if let Some(client) = room.get_client(conn_id) {
            let _ = client.send(msg);
        }
    }
}
