use crate::state::AppState;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

/// Spawn a background task that hard-stops sessions past their TTL and
/// drops registry entries whose actor has already exited.
pub fn spawn_expiry_sweeper(state: Arc<AppState>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(60)).await;
            sweep_sessions(&state).await;
        }
    });
}

/// Spawn a background task that clears abandoned quick-match waiters
pub fn spawn_queue_sweeper(state: Arc<AppState>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(10)).await;
            state.evict_stale_waiters().await;
        }
    });
}

async fn sweep_sessions(state: &AppState) {
    let now = Utc::now();
    let stale: Vec<_> = {
        let sessions = state.sessions.read().await;
        sessions
            .values()
            .filter(|h| now >= h.expires_at || h.commands.is_closed())
            .cloned()
            .collect()
    };

    if stale.is_empty() {
        return;
    }

    for handle in &stale {
        // The actor flushes pending replies with an expiry error before exiting;
        // a closed channel means it is already gone
        handle.expire();
        state.remove_session(&handle.id).await;
        tracing::info!(session = %handle.id, "swept expired session");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ParticipantSeed;

    fn seed(alias: &str) -> ParticipantSeed {
        ParticipantSeed {
            user_ref: None,
            alias: alias.to_string(),
        }
    }

    #[tokio::test]
    async fn sweep_removes_sessions_past_ttl() {
        let state = Arc::new(AppState::default());
        let (notice, _handle) = state.create_private(seed("alice")).await;

        // Fresh session survives a sweep
        sweep_sessions(&state).await;
        assert_eq!(state.session_count().await, 1);

        {
            let mut sessions = state.sessions.write().await;
            let entry = sessions.get_mut(&notice.session_id).unwrap();
            entry.expires_at = Utc::now() - chrono::Duration::seconds(1);
        }
        sweep_sessions(&state).await;
        assert_eq!(state.session_count().await, 0);
    }

    #[tokio::test]
    async fn sweep_removes_dead_actors() {
        let state = Arc::new(AppState::default());
        let (notice, handle) = state.create_private(seed("alice")).await;

        // Expire shuts the actor down; its registry entry is then reaped
        handle.expire();
        // Give the actor task a chance to observe the command and exit
        for _ in 0..50 {
            if handle.commands.is_closed() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        sweep_sessions(&state).await;
        assert!(state.session(&notice.session_id).await.is_none());
    }
}
