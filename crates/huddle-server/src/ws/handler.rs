use crate::error::RelayError;
use crate::state::AppState;
use crate::ws::registry::{JoinRequest, Outbound};
use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt, stream::SplitStream};
use huddle_protocol::{ClientMessage, ServerMessage, SessionId};
use tokio::sync::mpsc;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    // Create channel for outbound messages
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();

    // Spawn task to forward messages from channel to WebSocket
    let mut send_task = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let frame = match outbound {
                Outbound::Text(text) => Message::Text(text.into()),
                Outbound::Ping => Message::Ping(Default::default()),
                Outbound::Close => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            };
            if sender.send(frame).await.is_err() {
                break;
            }
        }
    });

    let mut session: Option<SessionId> = None;

    let writer_done = tokio::select! {
        _ = &mut send_task => true,
        _ = read_loop(&state, &mut receiver, &tx, &mut session) => false,
    };

    // Transport close, transport error, explicit leave and eviction all end
    // up here; the registry announces the departure only once.
    if let Some(session_id) = session {
        state.registry.leave(&session_id).await;
        tracing::info!("Session {} disconnected from WebSocket", session_id);
    }

    // Let a queued close frame go out before tearing the writer down
    drop(tx);
    if !writer_done {
        let _ = tokio::time::timeout(std::time::Duration::from_secs(1), &mut send_task).await;
    }
    send_task.abort();
}

/// Reads client frames until the socket closes or the session must end.
async fn read_loop(
    state: &AppState,
    receiver: &mut SplitStream<WebSocket>,
    tx: &mpsc::UnboundedSender<Outbound>,
    session: &mut Option<SessionId>,
) {
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let client_msg: ClientMessage = match serde_json::from_str(text.as_str()) {
                    Ok(m) => m,
                    Err(e) => {
                        tracing::debug!("Dropping malformed message: {}", e);
                        continue;
                    }
                };

                if !handle_client_message(state, tx, session, client_msg).await {
                    break;
                }
            }
            Ok(Message::Pong(_)) => {
                if let Some(session_id) = session.as_ref() {
                    state.registry.mark_alive(session_id).await;
                }
            }
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::warn!("WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }
}

fn send_direct(tx: &mpsc::UnboundedSender<Outbound>, message: &ServerMessage) {
    match serde_json::to_string(message) {
        Ok(json) => {
            let _ = tx.send(Outbound::Text(json));
        }
        Err(e) => tracing::error!("Failed to serialize message: {}", e),
    }
}

/// Returns `false` when the connection should be closed.
async fn handle_client_message(
    state: &AppState,
    tx: &mpsc::UnboundedSender<Outbound>,
    session: &mut Option<SessionId>,
    message: ClientMessage,
) -> bool {
    match (message, session.clone()) {
        (ClientMessage::Ping, _) => {
            send_direct(tx, &ServerMessage::Pong);
        }
        (
            ClientMessage::Join {
                name,
                room,
                key,
                group,
                role,
            },
            None,
        ) => {
            let request = JoinRequest {
                name,
                room,
                key,
                group,
                role,
            };
            match state.registry.join(request, tx.clone()).await {
                Ok(joined) => {
                    *session = Some(joined.session_id);
                }
                Err(RelayError::AuthFailed(reason)) => {
                    send_direct(tx, &ServerMessage::AuthFailed { reason });
                    let _ = tx.send(Outbound::Close);
                    return false;
                }
                Err(e) => {
                    tracing::error!("Join failed: {}", e);
                    let _ = tx.send(Outbound::Close);
                    return false;
                }
            }
        }
        (ClientMessage::Join { .. }, Some(session_id)) => {
            tracing::warn!("Session {} sent a second join, ignoring", session_id);
        }
        (ClientMessage::MuteChanged { muted }, Some(session_id)) => {
            if let Err(e) = state.registry.set_mute(&session_id, muted).await {
                tracing::debug!("Mute update dropped: {}", e);
            }
        }
        (ClientMessage::Signal { target_id, payload }, Some(session_id)) => {
            if let Err(e) = state.registry.route(&session_id, &target_id, payload).await {
                tracing::debug!("Signal from {} dropped: {}", session_id, e);
            }
        }
        (ClientMessage::Leave, Some(session_id)) => {
            state.registry.leave(&session_id).await;
            let _ = tx.send(Outbound::Close);
            return false;
        }
        (other, None) => {
            tracing::debug!("Ignoring {:?} before join", other);
        }
    }
    true
}
