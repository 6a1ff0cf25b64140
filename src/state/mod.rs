mod design;
mod matchmaking;
mod reaction;
mod reveal;
pub mod session;

pub use matchmaking::{MatchNotice, QuickWaiter};
pub use session::{JoinedSession, ParticipantSeed, SessionCommand, SessionState};

use crate::error::{GameError, GameResult};
use crate::protocol::{ServerMessage, SessionSnapshot, TallyInfo};
use crate::render::StyleRenderer;
use crate::types::*;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, RwLock};

/// Shared application state: the session registry and the quick-match pool.
/// Per-session state itself is owned exclusively by each session's actor;
/// the registry only hands out handles.
pub struct AppState {
    pub sessions: RwLock<HashMap<SessionId, SessionHandle>>,
    pub queue: Mutex<VecDeque<QuickWaiter>>,
    pub renderer: Option<Arc<dyn StyleRenderer>>,
    pub config: GameConfig,
}

impl AppState {
    pub fn new(config: GameConfig, renderer: Option<Arc<dyn StyleRenderer>>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            renderer,
            config,
        }
    }

    pub async fn session(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Look up a waiting/active session by invite code. Expired sessions
    /// are invisible here, so their codes are free for reuse.
    pub async fn session_by_code(&self, code: &str) -> Option<SessionHandle> {
        let now = Utc::now();
        self.sessions
            .read()
            .await
            .values()
            .find(|h| h.invite_code.as_deref() == Some(code) && now < h.expires_at)
            .cloned()
    }

    pub(crate) async fn insert_session(&self, handle: SessionHandle) {
        self.sessions
            .write()
            .await
            .insert(handle.id.clone(), handle);
    }

    pub async fn remove_session(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.write().await.remove(session_id)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(GameConfig::default(), None)
    }
}

/// Client-side handle to a session actor. Mutations are enqueued on the
/// actor's command channel and replied to over oneshots, so callers never
/// block on another client's I/O.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    pub id: SessionId,
    pub invite_code: Option<String>,
    pub commands: mpsc::UnboundedSender<SessionCommand>,
    pub events: broadcast::Sender<ServerMessage>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<ServerMessage> {
        self.events.subscribe()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<GameResult<T>>) -> SessionCommand,
    ) -> GameResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(make(reply_tx))
            .map_err(|_| GameError::SessionExpired)?;
        reply_rx.await.map_err(|_| GameError::SessionExpired)?
    }

    pub async fn join(&self, seed: ParticipantSeed) -> GameResult<JoinedSession> {
        self.request(|reply| SessionCommand::Join { seed, reply })
            .await
    }

    pub async fn submit(
        &self,
        participant_id: ParticipantId,
        round_no: u32,
        target: Role,
        choices: Vec<StyleChoice>,
    ) -> GameResult<Design> {
        self.request(|reply| SessionCommand::Submit {
            participant_id,
            round_no,
            target,
            choices,
            reply,
        })
        .await
    }

    pub async fn set_consent(
        &self,
        participant_id: ParticipantId,
        consent: bool,
    ) -> GameResult<()> {
        self.request(|reply| SessionCommand::SetConsent {
            participant_id,
            consent,
            reply,
        })
        .await
    }

    pub async fn react(
        &self,
        participant_id: ParticipantId,
        vote: Option<VoteValue>,
        reaction: Option<ReactionKind>,
    ) -> GameResult<TallyInfo> {
        self.request(|reply| SessionCommand::React {
            participant_id,
            vote,
            reaction,
            reply,
        })
        .await
    }

    pub async fn snapshot(&self, participant_id: ParticipantId) -> GameResult<SessionSnapshot> {
        self.request(|reply| SessionCommand::Snapshot {
            participant_id,
            reply,
        })
        .await
    }

    pub fn presence(&self, participant_id: ParticipantId, connected: bool) {
        let _ = self.commands.send(SessionCommand::Presence {
            participant_id,
            connected,
        });
    }

    pub fn leave(&self, participant_id: ParticipantId) {
        let _ = self.commands.send(SessionCommand::Leave { participant_id });
    }

    pub fn expire(&self) {
        let _ = self.commands.send(SessionCommand::Expire);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(alias: &str) -> ParticipantSeed {
        ParticipantSeed {
            user_ref: None,
            alias: alias.to_string(),
        }
    }

    #[tokio::test]
    async fn registry_round_trip() {
        let state = AppState::default();
        let (notice, _handle) = state.create_private(seed("alice")).await;

        let found = state.session(&notice.session_id).await;
        assert!(found.is_some());
        assert_eq!(state.session_count().await, 1);

        state.remove_session(&notice.session_id).await;
        assert!(state.session(&notice.session_id).await.is_none());
    }

    #[tokio::test]
    async fn code_lookup_skips_expired_sessions() {
        let state = AppState::default();
        let (notice, handle) = state.create_private(seed("alice")).await;
        let code = handle.invite_code.clone().unwrap();

        assert!(state.session_by_code(&code).await.is_some());

        // Force the handle's deadline into the past
        {
            let mut sessions = state.sessions.write().await;
            let entry = sessions.get_mut(&notice.session_id).unwrap();
            entry.expires_at = Utc::now() - chrono::Duration::seconds(1);
        }
        assert!(state.session_by_code(&code).await.is_none());
    }

    #[tokio::test]
    async fn handle_snapshot_reaches_the_actor() {
        let state = AppState::default();
        let (notice, handle) = state.create_private(seed("alice")).await;

        let snapshot = handle.snapshot(notice.participant_id.clone()).await.unwrap();
        assert_eq!(snapshot.session_id, notice.session_id);
        assert_eq!(snapshot.status, SessionStatus::Waiting);
        assert_eq!(snapshot.you, Role::A);
    }
}
