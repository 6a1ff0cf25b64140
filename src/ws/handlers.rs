//! WebSocket message dispatch for a client already bound to a session.
//!
//! Mutations go through the session handle and are answered directly on the
//! caller's socket; everything both participants should see arrives via the
//! session broadcast instead, so replies here stay caller-private.

use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::SessionHandle;
use crate::types::ParticipantId;

/// Handle a client message and return the optional direct reply
pub async fn handle_message(
    msg: ClientMessage,
    handle: &SessionHandle,
    participant_id: &ParticipantId,
) -> Option<ServerMessage> {
    match msg {
        ClientMessage::SubmitDesign {
            round_no,
            target,
            choices,
        } => {
            match handle
                .submit(participant_id.clone(), round_no, target, choices)
                .await
            {
                Ok(design) => Some(ServerMessage::DesignAccepted { design }),
                Err(e) => Some(ServerMessage::from_error(&e)),
            }
        }

        ClientMessage::SetConsent { consent } => {
            // Success is observed via the ConsentUpdated broadcast
            match handle.set_consent(participant_id.clone(), consent).await {
                Ok(()) => None,
                Err(e) => Some(ServerMessage::from_error(&e)),
            }
        }

        ClientMessage::React { vote, reaction } => {
            // The updated tally goes out as a broadcast to both sides
            match handle.react(participant_id.clone(), vote, reaction).await {
                Ok(_) => None,
                Err(e) => Some(ServerMessage::from_error(&e)),
            }
        }

        ClientMessage::Resync => match handle.snapshot(participant_id.clone()).await {
            Ok(snapshot) => Some(ServerMessage::Snapshot { snapshot }),
            Err(e) => Some(ServerMessage::from_error(&e)),
        },

        // Pairing messages are only valid before binding; Leave is handled
        // by the connection loop itself
        ClientMessage::EnqueueQuick
        | ClientMessage::CreatePrivate
        | ClientMessage::JoinPrivate { .. } => Some(ServerMessage::Error {
            code: "ALREADY_IN_SESSION".to_string(),
            msg: "Already bound to a session".to_string(),
        }),

        ClientMessage::Leave => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{AppState, ParticipantSeed};
    use std::sync::Arc;
    use crate::types::{Role, StyleChoice};

    fn seed(alias: &str) -> ParticipantSeed {
        ParticipantSeed {
            user_ref: None,
            alias: alias.to_string(),
        }
    }

    #[tokio::test]
    async fn pairing_messages_are_rejected_once_bound() {
        let state = Arc::new(AppState::default());
        let (notice, handle) = state.create_private(seed("alice")).await;

        let reply = handle_message(
            ClientMessage::EnqueueQuick,
            &handle,
            &notice.participant_id,
        )
        .await;
        match reply {
            Some(ServerMessage::Error { code, .. }) => assert_eq!(code, "ALREADY_IN_SESSION"),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn submit_replies_with_accepted_design() {
        let state = Arc::new(AppState::default());
        let (notice, handle) = state.create_private(seed("alice")).await;
        let code = handle.invite_code.clone().unwrap();
        state.join_private(&code, seed("bob")).await.unwrap();

        let reply = handle_message(
            ClientMessage::SubmitDesign {
                round_no: 1,
                target: Role::B,
                choices: vec![StyleChoice {
                    category: "attire".into(),
                    option: "jacket".into(),
                    value: "denim".into(),
                }],
            },
            &handle,
            &notice.participant_id,
        )
        .await;
        match reply {
            Some(ServerMessage::DesignAccepted { design }) => {
                assert_eq!(design.key().round_no, 1);
                assert_eq!(design.key().target, Role::B);
            }
            other => panic!("expected accepted design, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn react_before_reveal_is_an_error() {
        let state = Arc::new(AppState::default());
        let (notice, handle) = state.create_private(seed("alice")).await;
        let code = handle.invite_code.clone().unwrap();
        state.join_private(&code, seed("bob")).await.unwrap();

        let reply = handle_message(
            ClientMessage::React {
                vote: Some(crate::types::VoteValue::Tie),
                reaction: None,
            },
            &handle,
            &notice.participant_id,
        )
        .await;
        match reply {
            Some(ServerMessage::Error { code, .. }) => assert_eq!(code, "NOT_REVEALED"),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn resync_returns_viewer_snapshot() {
        let state = Arc::new(AppState::default());
        let (notice, handle) = state.create_private(seed("alice")).await;

        let reply = handle_message(ClientMessage::Resync, &handle, &notice.participant_id).await;
        match reply {
            Some(ServerMessage::Snapshot { snapshot }) => {
                assert_eq!(snapshot.you, Role::A);
                assert!(snapshot.my_designs.is_empty());
            }
            other => panic!("expected snapshot, got {:?}", other),
        }
    }
}
