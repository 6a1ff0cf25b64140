use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque ID types for type safety
pub type SessionId = String;
pub type ParticipantId = String;
/// Stable reference into the external identity provider (opaque to us)
pub type UserRef = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Private session with one bound participant, waiting for the invitee
    Waiting,
    /// Quick-match pair bound but round 1 not yet started
    Matching,
    Active,
    Reveal,
    Completed,
    Expired,
}

/// Participant role, assigned at session creation and immutable after.
/// First-in (or the private session creator) is always A.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Role {
    A,
    B,
}

impl Role {
    pub fn other(self) -> Role {
        match self {
            Role::A => Role::B,
            Role::B => Role::A,
        }
    }

    pub const BOTH: [Role; 2] = [Role::A, Role::B];
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoundTopic {
    Attire,
    Hair,
    Location,
}

/// Fixed topic order for the three rounds.
pub const ROUND_TOPICS: [RoundTopic; 3] = [RoundTopic::Attire, RoundTopic::Hair, RoundTopic::Location];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VoteValue {
    A,
    B,
    Tie,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ReactionKind {
    Heart,
    Fire,
    Laugh,
    Wow,
    Clap,
}

pub const REACTION_KINDS: [ReactionKind; 5] = [
    ReactionKind::Heart,
    ReactionKind::Fire,
    ReactionKind::Laugh,
    ReactionKind::Wow,
    ReactionKind::Clap,
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    /// Time limit per styling round
    pub round_seconds: u32,
    /// Number of rounds per session (topics are fixed, so at most 3)
    pub rounds: u32,
    /// Post-reveal window before the session auto-completes
    pub post_reveal_seconds: u32,
    /// Fixed session TTL; all data is inaccessible after this
    pub session_ttl_hours: i64,
    /// Grace period before a disconnected quick-match waiter is evicted
    pub queue_grace_seconds: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            round_seconds: 90,
            rounds: 3,
            post_reveal_seconds: 120,
            session_ttl_hours: 24,
            queue_grace_seconds: 30,
        }
    }
}

impl GameConfig {
    /// Load config from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
        }

        let defaults = Self::default();
        let mut config = Self {
            round_seconds: parsed("ROUND_SECONDS").unwrap_or(defaults.round_seconds),
            rounds: parsed("ROUNDS").unwrap_or(defaults.rounds),
            post_reveal_seconds: parsed("POST_REVEAL_SECONDS")
                .unwrap_or(defaults.post_reveal_seconds),
            session_ttl_hours: parsed("SESSION_TTL_HOURS").unwrap_or(defaults.session_ttl_hours),
            queue_grace_seconds: parsed("QUEUE_GRACE_SECONDS")
                .unwrap_or(defaults.queue_grace_seconds),
        };
        // Topics are a fixed three-entry set
        config.rounds = config.rounds.clamp(1, ROUND_TOPICS.len() as u32);
        config
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    /// Session-scoped id, also the caller's credential for this session
    pub id: ParticipantId,
    /// Stable identity reference; None for anonymous play
    pub user_ref: Option<UserRef>,
    pub role: Role,
    /// Display alias, independent of real identity
    pub alias: String,
    /// Whether real identity may be shown at reveal; mutable until reveal fires
    pub consent: bool,
    /// Connection state, for UX only; never blocks the state machine
    pub connected: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub number: u32,
    pub topic: RoundTopic,
    pub started_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Round {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// One styling decision within a design (e.g. category "top", option
/// "jacket", value "#8b0000 leather")
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StyleChoice {
    pub category: String,
    pub option: String,
    pub value: String,
}

/// Ledger key: at most one design exists per (round, designer, target)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DesignKey {
    pub round_no: u32,
    pub designer: Role,
    pub target: Role,
}

/// The core blind unit: what one participant chose for the other in one
/// round. Never visible to its target before reveal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Design {
    pub round_no: u32,
    pub designer: Role,
    pub target: Role,
    pub choices: Vec<StyleChoice>,
    /// Produced asynchronously by the external style renderer; stays None
    /// when rendering is deferred or fails
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Design {
    pub fn key(&self) -> DesignKey {
        DesignKey {
            round_no: self.round_no,
            designer: self.designer,
            target: self.target,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub participant_id: ParticipantId,
    pub value: VoteValue,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reaction {
    pub participant_id: ParticipantId,
    pub kind: ReactionKind,
    pub ts: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_other_flips() {
        assert_eq!(Role::A.other(), Role::B);
        assert_eq!(Role::B.other(), Role::A);
    }

    #[test]
    fn default_config_matches_product_constants() {
        let config = GameConfig::default();
        assert_eq!(config.round_seconds, 90);
        assert_eq!(config.rounds, 3);
        assert_eq!(config.session_ttl_hours, 24);
    }

    #[test]
    fn topics_cover_all_rounds() {
        assert_eq!(ROUND_TOPICS.len() as u32, GameConfig::default().rounds);
    }

    #[test]
    fn status_serializes_screaming_snake() {
        let json = serde_json::to_string(&SessionStatus::Reveal).unwrap();
        assert_eq!(json, "\"REVEAL\"");
    }
}
