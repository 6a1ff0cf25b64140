pub mod handlers;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use futures::stream::SplitSink;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::{AppState, MatchNotice, ParticipantSeed, SessionHandle};
use crate::types::ParticipantId;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Opaque identity reference, shown at reveal only with consent
    pub user: Option<String>,
    pub alias: Option<String>,
    /// Reconnect: rebind to an existing session
    pub session: Option<String>,
    pub participant: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    tracing::info!(
        "WebSocket connection request: alias={:?}, session={:?}",
        params.alias,
        params.session
    );

    ws.on_upgrade(move |socket| handle_socket(socket, params, state))
}

type WsSender = SplitSink<WebSocket, Message>;

async fn send_json(sender: &mut WsSender, msg: &ServerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::error!("Failed to serialize server message: {}", e);
            true
        }
    }
}

/// Handle one WebSocket connection through its whole life: a lobby phase
/// (enqueue, create or join) followed by a bound phase attached to one
/// session actor.
async fn handle_socket(socket: WebSocket, params: WsQuery, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    let welcome = ServerMessage::Welcome {
        protocol: "1.0".to_string(),
        server_now: chrono::Utc::now(),
    };
    if !send_json(&mut sender, &welcome).await {
        return;
    }

    let seed = ParticipantSeed {
        user_ref: params.user.clone(),
        alias: params
            .alias
            .clone()
            .filter(|a| !a.trim().is_empty())
            .unwrap_or_else(random_alias),
    };

    // Reconnects skip the lobby and rebind straight to their session
    let bound = match (&params.session, &params.participant) {
        (Some(session_id), Some(participant_id)) => {
            match state.session(session_id).await {
                Some(handle) => Some((handle, participant_id.clone())),
                None => {
                    let err = ServerMessage::from_error(&crate::error::GameError::NotFound);
                    let _ = send_json(&mut sender, &err).await;
                    None
                }
            }
        }
        _ => lobby(&mut sender, &mut receiver, &state, seed).await,
    };

    let Some((handle, participant_id)) = bound else {
        return;
    };

    bound_phase(sender, receiver, handle, participant_id).await;
}

/// Lobby phase: wait for the client to pick a pairing path, then return the
/// bound session. Queued clients keep the socket open while waiting for a
/// partner.
async fn lobby(
    sender: &mut WsSender,
    receiver: &mut futures::stream::SplitStream<WebSocket>,
    state: &Arc<AppState>,
    seed: ParticipantSeed,
) -> Option<(SessionHandle, ParticipantId)> {
    // Populated once the client enters the quick-match pool
    let mut match_rx: Option<mpsc::UnboundedReceiver<MatchNotice>> = None;

    loop {
        tokio::select! {
            notice = async {
                match &mut match_rx {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                let notice = notice?;
                let handle = state.session(&notice.session_id).await?;
                return Some((handle, notice.participant_id));
            }

            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        let msg = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(msg) => msg,
                            Err(e) => {
                                tracing::error!("Failed to parse client message: {}", e);
                                let error = ServerMessage::Error {
                                    code: "PARSE_ERROR".to_string(),
                                    msg: format!("Invalid message format: {}", e),
                                };
                                if !send_json(sender, &error).await {
                                    return None;
                                }
                                continue;
                            }
                        };

                        match msg {
                            ClientMessage::EnqueueQuick => {
                                if match_rx.is_some() {
                                    continue;
                                }
                                let (tx, rx) = mpsc::unbounded_channel();
                                state.enqueue_quick(seed.clone(), tx).await;
                                match_rx = Some(rx);
                                if !send_json(sender, &ServerMessage::Queued).await {
                                    return None;
                                }
                            }
                            ClientMessage::CreatePrivate => {
                                let (notice, handle) = state.create_private(seed.clone()).await;
                                return Some((handle, notice.participant_id));
                            }
                            ClientMessage::JoinPrivate { code } => {
                                match state.join_private(&code, seed.clone()).await {
                                    Ok((joined, handle)) => {
                                        return Some((handle, joined.participant_id));
                                    }
                                    Err(e) => {
                                        if !send_json(sender, &ServerMessage::from_error(&e)).await {
                                            return None;
                                        }
                                    }
                                }
                            }
                            ClientMessage::Leave => return None,
                            other => {
                                tracing::debug!("Ignoring pre-session message: {:?}", other);
                                let error = ServerMessage::Error {
                                    code: "NOT_IN_SESSION".to_string(),
                                    msg: "Join or create a session first".to_string(),
                                };
                                if !send_json(sender, &error).await {
                                    return None;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return None,
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            return None;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        return None;
                    }
                }
            }
        }
    }
}

/// Bound phase: forward session broadcasts, dispatch client messages to the
/// actor, keep presence current.
async fn bound_phase(
    mut sender: WsSender,
    mut receiver: futures::stream::SplitStream<WebSocket>,
    handle: SessionHandle,
    participant_id: ParticipantId,
) {
    // Subscribe before the snapshot so no event between the two is lost
    let mut events = handle.subscribe();

    let snapshot = match handle.snapshot(participant_id.clone()).await {
        Ok(s) => s,
        Err(e) => {
            let _ = send_json(&mut sender, &ServerMessage::from_error(&e)).await;
            return;
        }
    };

    let joined = ServerMessage::Joined {
        session_id: handle.id.clone(),
        participant_id: participant_id.clone(),
        role: snapshot.you,
        invite_code: handle.invite_code.clone(),
    };
    if !send_json(&mut sender, &joined).await {
        return;
    }
    if !send_json(&mut sender, &ServerMessage::Snapshot { snapshot }).await {
        return;
    }

    handle.presence(participant_id.clone(), true);

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(msg) => {
                        if !send_json(&mut sender, &msg).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Missed events are unrecoverable individually; a
                        // fresh snapshot restores a consistent view
                        tracing::warn!(session = %handle.id, skipped, "subscriber lagged, resyncing");
                        match handle.snapshot(participant_id.clone()).await {
                            Ok(snapshot) => {
                                if !send_json(&mut sender, &ServerMessage::Snapshot { snapshot }).await {
                                    break;
                                }
                            }
                            Err(e) => {
                                let _ = send_json(&mut sender, &ServerMessage::from_error(&e)).await;
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        let _ = send_json(&mut sender, &ServerMessage::SessionExpired).await;
                        break;
                    }
                }
            }

            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(ClientMessage::Leave) => {
                                handle.leave(participant_id.clone());
                                break;
                            }
                            Ok(msg) => {
                                if let Some(response) =
                                    handlers::handle_message(msg, &handle, &participant_id).await
                                {
                                    if !send_json(&mut sender, &response).await {
                                        break;
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::error!("Failed to parse client message: {}", e);
                                let error = ServerMessage::Error {
                                    code: "PARSE_ERROR".to_string(),
                                    msg: format!("Invalid message format: {}", e),
                                };
                                if !send_json(&mut sender, &error).await {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    handle.presence(participant_id, false);
    tracing::info!(session = %handle.id, "WebSocket connection closed");
}

/// Anonymous two-word alias for clients that did not pick one
fn random_alias() -> String {
    petname::petname(2, "-").unwrap_or_else(|| "nameless-stylist".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_alias_is_two_words() {
        let alias = random_alias();
        assert_eq!(alias.split('-').count(), 2);
    }

    #[test]
    fn ws_query_fields_are_optional() {
        let query: WsQuery = serde_json::from_value(serde_json::json!({
            "alias": "otter",
            "session": "abc",
            "participant": "def",
        }))
        .unwrap();
        assert_eq!(query.alias.as_deref(), Some("otter"));
        assert_eq!(query.session.as_deref(), Some("abc"));
        assert_eq!(query.participant.as_deref(), Some("def"));
        assert!(query.user.is_none());
    }
}
