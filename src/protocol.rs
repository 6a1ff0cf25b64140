use crate::error::GameError;
use crate::types::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join the quick-match FIFO pool
    EnqueueQuick,
    /// Create a private session and receive an invite code
    CreatePrivate,
    /// Join a private session by invite code
    JoinPrivate {
        code: String,
    },
    SubmitDesign {
        round_no: u32,
        target: Role,
        choices: Vec<StyleChoice>,
    },
    /// Allow or withdraw showing real identity at reveal
    SetConsent {
        consent: bool,
    },
    /// Post-reveal vote and/or emoji reaction
    React {
        vote: Option<VoteValue>,
        reaction: Option<ReactionKind>,
    },
    /// Request a full current-state snapshot (reconnect support)
    Resync,
    Leave,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        protocol: String,
        server_now: DateTime<Utc>,
    },
    /// Caller is waiting in the quick-match pool
    Queued,
    /// Sent directly to a client once it is bound to a session.
    /// `participant_id` doubles as the caller's credential and is never
    /// broadcast.
    Joined {
        session_id: SessionId,
        participant_id: ParticipantId,
        role: Role,
        invite_code: Option<String>,
    },
    /// Full current state; always sent before incremental deltas resume
    Snapshot {
        snapshot: SessionSnapshot,
    },
    /// Both participants are bound and round 1 is running
    SessionStarted {
        participants: Vec<ParticipantInfo>,
        round: RoundInfo,
        server_now: DateTime<Utc>,
    },
    RoundStarted {
        round: RoundInfo,
        server_now: DateTime<Utc>,
    },
    RoundTick {
        round_no: u32,
        remaining_seconds: u64,
    },
    RoundEnded {
        round_no: u32,
        ended_at: DateTime<Utc>,
    },
    /// Direct reply to the submitting designer (choices included)
    DesignAccepted {
        design: Design,
    },
    /// Broadcast progress without revealing any choices: only who has
    /// submitted for the round so far
    DesignProgress {
        round_no: u32,
        submitted: Vec<Role>,
    },
    /// The renderer finished an image for this design; the rendered URL is
    /// deliberately absent (the target must not see it before reveal)
    DesignRendered {
        round_no: u32,
        designer: Role,
    },
    ConsentUpdated {
        role: Role,
        consent: bool,
    },
    PresenceUpdate {
        role: Role,
        connected: bool,
    },
    Reveal {
        payload: RevealPayload,
    },
    Tally {
        tally: TallyInfo,
    },
    SessionCompleted,
    SessionExpired,
    Error {
        code: String,
        msg: String,
    },
}

impl ServerMessage {
    pub fn from_error(err: &GameError) -> Self {
        ServerMessage::Error {
            code: err.code().to_string(),
            msg: err.to_string(),
        }
    }
}

/// Public participant info; carries no ids so one client can never
/// impersonate the other
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantInfo {
    pub role: Role,
    pub alias: String,
    pub consent: bool,
    pub connected: bool,
}

impl From<&Participant> for ParticipantInfo {
    fn from(p: &Participant) -> Self {
        Self {
            role: p.role,
            alias: p.alias.clone(),
            consent: p.consent,
            connected: p.connected,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundInfo {
    pub number: u32,
    pub topic: RoundTopic,
    pub deadline: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl From<&Round> for RoundInfo {
    fn from(r: &Round) -> Self {
        Self {
            number: r.number,
            topic: r.topic,
            deadline: r.deadline,
            ended_at: r.ended_at,
        }
    }
}

/// Identity fields shown at reveal. `user_ref` is only present when the
/// participant consented; the alias is always available.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityInfo {
    pub alias: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_ref: Option<UserRef>,
}

/// One (round, target) cell of the reveal grid. A round is never silently
/// absent: timeouts produce an entry with `missing: true`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevealEntry {
    pub round_no: u32,
    pub topic: RoundTopic,
    pub missing: bool,
    pub design: Option<Design>,
}

/// Everything that was chosen for one participant, ordered by round
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantReveal {
    pub target: Role,
    pub identity: IdentityInfo,
    pub entries: Vec<RevealEntry>,
}

/// The single consistent reveal state, aggregated exactly once per session
/// and returned verbatim to late/reconnecting clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RevealPayload {
    pub session_id: SessionId,
    pub generated_at: DateTime<Utc>,
    pub looks: Vec<ParticipantReveal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionCount {
    pub kind: ReactionKind,
    pub count: u32,
}

/// Post-reveal tally: one counted vote per participant, reactions accumulate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TallyInfo {
    pub a: u32,
    pub b: u32,
    pub tie: u32,
    pub reactions: Vec<ReactionCount>,
}

/// Viewer-specific state snapshot. `my_designs` only ever contains designs
/// the viewer authored; inbound designs appear exclusively via `reveal`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub you: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invite_code: Option<String>,
    pub participants: Vec<ParticipantInfo>,
    pub current_round: Option<RoundInfo>,
    /// Designers who have submitted for the current round (no contents)
    pub submitted: Vec<Role>,
    pub my_designs: Vec<Design>,
    pub reveal: Option<RevealPayload>,
    pub tally: Option<TallyInfo>,
    pub server_now: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_messages_use_snake_case_tags() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"t":"join_private","code":"ABC123"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::JoinPrivate { code } if code == "ABC123"));
    }

    #[test]
    fn submit_design_round_trips() {
        let msg = ClientMessage::SubmitDesign {
            round_no: 2,
            target: Role::B,
            choices: vec![StyleChoice {
                category: "hair".into(),
                option: "color".into(),
                value: "copper".into(),
            }],
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""t":"submit_design""#));
        assert!(json.contains(r#""target":"B""#));
    }

    #[test]
    fn error_message_carries_wire_code() {
        let msg = ServerMessage::from_error(&GameError::AlreadyFull);
        match msg {
            ServerMessage::Error { code, .. } => assert_eq!(code, "ALREADY_FULL"),
            _ => panic!("expected error message"),
        }
    }

    #[test]
    fn identity_omits_user_ref_without_consent() {
        let identity = IdentityInfo {
            alias: "brave-otter".into(),
            user_ref: None,
        };
        let json = serde_json::to_string(&identity).unwrap();
        assert!(!json.contains("user_ref"));
    }
}
