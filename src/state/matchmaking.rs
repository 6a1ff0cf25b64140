//! Matchmaking: the quick-match FIFO pool and private invite codes.
//!
//! Pairing is atomic with respect to the queue mutex: a waiting entry is
//! popped exactly once, so nobody can be matched into two sessions. Waiters
//! whose connection is gone are skipped at pairing time and swept out after
//! a grace period, so a phantom never gets paired.

use super::session::{self, JoinedSession, ParticipantSeed, SessionState};
use super::{AppState, SessionHandle};
use crate::error::{GameError, GameResult};
use crate::types::{ParticipantId, Role, SessionId};
use chrono::Utc;
use rand::Rng;
use std::time::Instant;
use tokio::sync::mpsc;

/// Safe character set for invite codes (excludes 0/O, 1/I/L to avoid confusion)
const CODE_CHARS: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
const CODE_LENGTH: usize = 6;

fn generate_invite_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_CHARS[rng.random_range(0..CODE_CHARS.len())] as char)
        .collect()
}

/// Sent to a queued client once it has been bound into a session
#[derive(Debug, Clone)]
pub struct MatchNotice {
    pub session_id: SessionId,
    pub participant_id: ParticipantId,
    pub role: Role,
}

/// One entry in the quick-match pool
pub struct QuickWaiter {
    pub seed: ParticipantSeed,
    pub notify: mpsc::UnboundedSender<MatchNotice>,
    pub enqueued_at: Instant,
}

impl QuickWaiter {
    fn is_gone(&self) -> bool {
        self.notify.is_closed()
    }
}

impl AppState {
    /// Place a caller in the quick-match pool and pair greedily. Whenever
    /// two live waiters are present, the two longest-waiting are bound into
    /// a new session, first-in as role A.
    pub async fn enqueue_quick(
        &self,
        seed: ParticipantSeed,
        notify: mpsc::UnboundedSender<MatchNotice>,
    ) {
        self.queue.lock().await.push_back(QuickWaiter {
            seed,
            notify,
            enqueued_at: Instant::now(),
        });
        self.try_pair().await;
    }

    /// Drain the pool in pairs. Popping happens under the queue mutex, so a
    /// waiter is consumed exactly once even with concurrent enqueues.
    async fn try_pair(&self) {
        loop {
            let (first, second) = {
                let mut queue = self.queue.lock().await;
                // Never pair a waiter whose connection is already gone, but
                // do not consume it either: eviction after the grace period
                // is the only removal path for stale entries
                let live: Vec<usize> = queue
                    .iter()
                    .enumerate()
                    .filter(|(_, w)| !w.is_gone())
                    .map(|(i, _)| i)
                    .take(2)
                    .collect();
                if live.len() < 2 {
                    return;
                }
                // Remove the later index first so the earlier one stays valid
                let Some(second) = queue.remove(live[1]) else { return };
                let Some(first) = queue.remove(live[0]) else { return };
                (first, second)
            };

            let now = Utc::now();
            let (state, a_id, b_id) = SessionState::new_pair(
                first.seed.clone(),
                second.seed.clone(),
                self.config.clone(),
                now,
            );
            let session_id = state.id.clone();
            let handle = session::spawn(state, self.renderer.clone());
            self.insert_session(handle).await;
            tracing::info!(session = %session_id, "quick match paired");

            for (waiter, participant_id, role) in
                [(first, a_id, Role::A), (second, b_id, Role::B)]
            {
                let notice = MatchNotice {
                    session_id: session_id.clone(),
                    participant_id,
                    role,
                };
                if waiter.notify.send(notice).is_err() {
                    // Disconnected between popping and notifying; their
                    // side of the session simply times out round by round
                    tracing::warn!(session = %session_id, ?role, "paired waiter vanished");
                }
            }
        }
    }

    /// Create a private session with a collision-checked invite code;
    /// the creator is bound as role A and the session waits for role B.
    pub async fn create_private(&self, seed: ParticipantSeed) -> (MatchNotice, SessionHandle) {
        // Codes only collide with active sessions; expired ones are invisible
        let code = loop {
            let candidate = generate_invite_code();
            if self.session_by_code(&candidate).await.is_none() {
                break candidate;
            }
        };

        let (state, participant_id) =
            SessionState::new_private(code, seed, self.config.clone(), Utc::now());
        let session_id = state.id.clone();
        let handle = session::spawn(state, self.renderer.clone());
        self.insert_session(handle.clone()).await;
        tracing::info!(session = %session_id, "private session created");

        (
            MatchNotice {
                session_id,
                participant_id,
                role: Role::A,
            },
            handle,
        )
    }

    /// Join a waiting private session by invite code. Binds role B and
    /// starts round 1.
    pub async fn join_private(
        &self,
        code: &str,
        seed: ParticipantSeed,
    ) -> GameResult<(JoinedSession, SessionHandle)> {
        let handle = self
            .session_by_code(code)
            .await
            .ok_or(GameError::NotFound)?;
        let joined = handle.join(seed).await.map_err(|e| match e {
            // A dead actor behind a known code reads as a missing session
            GameError::SessionExpired => GameError::NotFound,
            other => other,
        })?;
        Ok((joined, handle))
    }

    /// Evict waiters whose connection has been gone beyond the grace period
    pub async fn evict_stale_waiters(&self) {
        let grace = std::time::Duration::from_secs(self.config.queue_grace_seconds);
        let mut queue = self.queue.lock().await;
        let before = queue.len();
        queue.retain(|w| !(w.is_gone() && w.enqueued_at.elapsed() >= grace));
        let evicted = before - queue.len();
        if evicted > 0 {
            tracing::debug!(evicted, "evicted stale quick-match waiters");
        }
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }
}
