//! Cancelable round countdown.
//!
//! Each active round owns exactly one timer task. It emits one tick per
//! second (for synchronized client countdowns) and a single expiry event,
//! then exits. The session actor cancels it when the round closes early;
//! a late event for an already-closed round is simply ignored there.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    Tick {
        round_no: u32,
        remaining_seconds: u64,
    },
    Expired {
        round_no: u32,
    },
}

pub struct RoundTimer {
    handle: JoinHandle<()>,
}

impl RoundTimer {
    /// Spawn a countdown for the given round. Events are delivered through
    /// `tx`; if the receiver is gone the task stops on its own.
    pub fn spawn(round_no: u32, duration: Duration, tx: mpsc::UnboundedSender<TimerEvent>) -> Self {
        let handle = tokio::spawn(async move {
            let deadline = Instant::now() + duration;
            let mut tick = tokio::time::interval(Duration::from_secs(1));
            // The first interval tick fires immediately; skip it
            tick.tick().await;

            loop {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {
                        let _ = tx.send(TimerEvent::Expired { round_no });
                        return;
                    }
                    _ = tick.tick() => {
                        let remaining_seconds =
                            deadline.saturating_duration_since(Instant::now()).as_secs();
                        if tx
                            .send(TimerEvent::Tick { round_no, remaining_seconds })
                            .is_err()
                        {
                            return;
                        }
                    }
                }
            }
        });

        Self { handle }
    }

    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for RoundTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn emits_ticks_then_expiry() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _timer = RoundTimer::spawn(1, Duration::from_secs(3), tx);

        let mut ticks = 0;
        loop {
            match rx.recv().await.expect("timer channel closed early") {
                TimerEvent::Tick { round_no, .. } => {
                    assert_eq!(round_no, 1);
                    ticks += 1;
                }
                TimerEvent::Expired { round_no } => {
                    assert_eq!(round_no, 1);
                    break;
                }
            }
        }
        assert!(ticks >= 2, "expected intermediate ticks, got {ticks}");
        // Nothing after expiry
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timer = RoundTimer::spawn(2, Duration::from_secs(90), tx);

        // Let one tick through, then cancel
        assert!(matches!(
            rx.recv().await,
            Some(TimerEvent::Tick { round_no: 2, .. })
        ));
        timer.cancel();
        drop(timer);

        // The sender side is gone, so the channel drains and closes
        while let Some(event) = rx.recv().await {
            assert!(
                !matches!(event, TimerEvent::Expired { .. }),
                "canceled timer must not expire"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn remaining_seconds_counts_down() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _timer = RoundTimer::spawn(3, Duration::from_secs(5), tx);

        let mut last = u64::MAX;
        while let Some(event) = rx.recv().await {
            match event {
                TimerEvent::Tick { remaining_seconds, .. } => {
                    assert!(remaining_seconds < last);
                    last = remaining_seconds;
                }
                TimerEvent::Expired { .. } => break,
            }
        }
    }
}
