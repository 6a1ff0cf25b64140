use std::time::Duration;

/// Result type for game operations
pub type GameResult<T> = Result<T, GameError>;

/// Recoverable errors reported synchronously to the calling client.
/// None of these corrupt session state.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum GameError {
    #[error("invite code or session not found")]
    NotFound,

    #[error("session already has two participants")]
    AlreadyFull,

    #[error("round {0} is not the current round")]
    StaleRound(u32),

    #[error("round {0} closed before the submission arrived")]
    RoundClosed(u32),

    #[error("a designer cannot style themselves")]
    InvalidTarget,

    #[error("this game is no longer active")]
    SessionExpired,

    #[error("reveal has not happened yet")]
    NotRevealed,

    #[error("reveal has already fired")]
    RevealLocked,

    #[error("style renderer unavailable: {0}")]
    RendererUnavailable(String),
}

impl GameError {
    /// Stable wire code for the client
    pub fn code(&self) -> &'static str {
        match self {
            GameError::NotFound => "NOT_FOUND",
            GameError::AlreadyFull => "ALREADY_FULL",
            GameError::StaleRound(_) => "STALE_ROUND",
            GameError::RoundClosed(_) => "ROUND_CLOSED",
            GameError::InvalidTarget => "INVALID_TARGET",
            GameError::SessionExpired => "SESSION_EXPIRED",
            GameError::NotRevealed => "NOT_REVEALED",
            GameError::RevealLocked => "REVEAL_LOCKED",
            GameError::RendererUnavailable(_) => "RENDERER_UNAVAILABLE",
        }
    }
}

/// Errors from the external style renderer. Never fatal to a round: the
/// design persists without an image and the reveal shows a placeholder.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("render request failed: {0}")]
    Request(String),

    #[error("render request timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid renderer configuration: {0}")]
    Config(String),

    #[error("render response parsing failed: {0}")]
    Parse(String),
}

pub type RenderResult<T> = Result<T, RenderError>;
