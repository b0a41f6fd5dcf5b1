// src/handlers/ws.rs

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::{
    state::AppState,
    utils::{
        jwt::authenticate,
        sessions::{Principal, ServerMessage},
    },
};

/// Messages a client may send on `/ws/session`.
#[derive(Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Auth {
        #[serde(default)]
        token: Option<String>,
    },
    Ping,
}

fn parse_client_message(text: &str) -> Result<ClientMessage, &'static str> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|_| "Invalid message format")?;
    serde_json::from_value(value).map_err(|_| "Unknown message type")
}

/// Upgrades to the session channel.
///
/// The socket is anonymous until it sends `{"type":"auth","token":...}`.
pub async fn session_socket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let conn_id = state.sessions.next_connection_id();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let mut principal: Option<Principal> = None;

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                };

                let (reply, close) = match parse_client_message(text.as_str()) {
                    Ok(ClientMessage::Ping) => (ServerMessage::Pong, false),
                    Ok(ClientMessage::Auth { token }) => {
                        match authenticate_socket(&state, token, conn_id, &tx, &mut principal).await {
                            Ok(reply) => (reply, false),
                            Err(reply) => (reply, true),
                        }
                    }
                    Err(message) => (ServerMessage::error(message), false),
                };

                if send(&mut socket, &reply).await.is_err() || close {
                    break;
                }
            }
            Some(pushed) = rx.recv() => {
                let terminal = pushed.is_terminal();
                if send(&mut socket, &pushed).await.is_err() || terminal {
                    if let Some(p) = principal {
                        tracing::info!("Closing session socket for {} {}", p.user_type, p.id);
                    }
                    break;
                }
            }
        }
    }

    if let Some(p) = principal {
        state.sessions.unregister(p, conn_id).await;
    }
    let _ = socket.send(Message::Close(None)).await;
}

/// Validates the token and binds this connection to its principal.
///
/// `Err` carries the error to send before closing.
async fn authenticate_socket(
    state: &AppState,
    token: Option<String>,
    conn_id: u64,
    tx: &mpsc::UnboundedSender<ServerMessage>,
    principal: &mut Option<Principal>,
) -> Result<ServerMessage, ServerMessage> {
    let token = token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ServerMessage::error("No token provided"))?;

    let claims = authenticate(&state.pool, &state.config.jwt_secret, token.trim())
        .await
        .map_err(|_| ServerMessage::error("Invalid session"))?;
    let authed = claims
        .principal()
        .map_err(|_| ServerMessage::error("Invalid session"))?;

    if let Some(previous) = principal.replace(authed) {
        if previous != authed {
            state.sessions.unregister(previous, conn_id).await;
        }
    }

    if state
        .sessions
        .register(authed, claims.sid, conn_id, tx.clone())
        .await
    {
        tracing::info!(
            "Replaced session socket for {} {}",
            authed.user_type,
            authed.id
        );
    }

    Ok(ServerMessage::AuthSuccess {
        user_id: authed.id.to_string(),
        user_type: authed.user_type,
    })
}

async fn send(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!("Failed to encode socket message: {:?}", e);
            return Ok(());
        }
    };
    socket.send(Message::Text(text.into())).await
}
