use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::HeaderMap,
    response::Response,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::services::auth_service::get_session_token;
use crate::utils::scope_guard::ScopeGuard;
use crate::AppState;

use super::admission;
use super::connctx::{ConnCtx, ConnId, ConnState, Outbound};
use super::error::{RelayError, CLOSE_TRY_AGAIN_LATER};

/// Relay routes: every path is a room name
pub fn create_relay_routes(state: AppState) -> Router {
    Router::new()
        .route("/*room", get(websocket_handler))
        .with_state(state)
}

/// WebSocket handler
pub async fn websocket_handler(
    Path(room): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = match get_session_token(&headers, &state.config.session_cookie_name) {
        Ok(token) => Some(token),
        Err(e) => {
            debug!("No session token on connection to {}: {}", room, e);
            None
        }
    };
    ws.on_upgrade(move |socket| handle_socket(socket, room, token, state))
}

fn advance(conn_id: ConnId, state: &mut ConnState, next: ConnState) {
    debug!("Connection {}: {:?} -> {:?}", conn_id, state, next);
    *state = next;
}

/// Handle one relay connection from admission to close
async fn handle_socket(mut socket: WebSocket, room_name: String, token: Option<String>, state: AppState) {
    let conn_id = Uuid::new_v4();
    let mut conn_state = ConnState::Connecting;
    info!("WebSocket connection {} opened for room {}", conn_id, room_name);

    state.registry.metrics().connection_opened();
    let registry = state.registry.clone();
    let _closed = ScopeGuard::new(move || registry.metrics().connection_closed());

    // The socket is not read until admission is decided, inbound frames wait in the transport
    let admitted = match admission::admit(&room_name, token.as_deref(), state.resolver.as_ref()).await {
        Ok(admitted) => admitted,
        Err(e) => {
            state.registry.metrics().connection_rejected();
            let close = CloseFrame {
                code: e.close_code(),
                reason: e.to_string().into(),
            };
            if let Err(err) = socket.send(Message::Close(Some(close))).await {
                debug!("Failed to send close frame to {}: {}", conn_id, err);
            }
            advance(conn_id, &mut conn_state, ConnState::Closed);
            return;
        }
    };
    advance(conn_id, &mut conn_state, ConnState::Admitted);

    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(state.config.outbound_capacity());

    // The room owns the only strong sender, dropping the connection from the room closes the writer
    let replies = tx.downgrade();
    let ctx = ConnCtx::new(conn_id, admitted.user_id(), admitted.role, tx);
    let room = match state.registry.join(&room_name, ctx).await {
        Ok(room) => room,
        Err(e) => {
            error!("Connection {} could not join room {}: {}", conn_id, room_name, e);
            return;
        }
    };

    // Drain the outbound queue into the socket
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if sender.send(Message::Binary(frame.to_vec())).await.is_err() {
                return;
            }
        }
        // Queue closed by the room, the client fell behind and has to resync
        let close = CloseFrame {
            code: CLOSE_TRY_AGAIN_LATER,
            reason: "connection fell behind".into(),
        };
        if let Err(e) = sender.send(Message::Close(Some(close))).await {
            debug!("Failed to send close frame to {}: {}", conn_id, e);
        }
    });

    advance(conn_id, &mut conn_state, ConnState::Active);

    let recv_room = room.clone();
    let registry = state.registry.clone();
    let recv_name = room_name.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Binary(data)) => {
                    let result = recv_room.lock().await.handle_frame(conn_id, &data);
                    match result {
                        Ok(Some(reply)) => {
                            let Some(tx) = replies.upgrade() else {
                                break;
                            };
                            if tx.send(reply).await.is_err() {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(RelayError::MalformedMessage(e)) => {
                            registry.metrics().malformed_frame();
                            warn!("Dropping malformed frame from {} in room {}: {}", conn_id, recv_name, e);
                        }
                        Err(e) => {
                            warn!("Failed to handle frame from {} in room {}: {}", conn_id, recv_name, e);
                        }
                    }
                }
                Ok(Message::Text(_)) => {
                    registry.metrics().malformed_frame();
                    warn!("Dropping text frame from {} in room {}", conn_id, recv_name);
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("WebSocket error on {}: {}", conn_id, e);
                    break;
                }
            }
        }
    });

    // Wait for either task to finish (and finish the other)
    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    };

    room.lock().await.leave(conn_id);
    advance(conn_id, &mut conn_state, ConnState::Closed);
    info!("WebSocket connection {} terminated", conn_id);
}
