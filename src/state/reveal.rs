//! Reveal aggregation: merge both sides' designs into one consistent
//! payload, exactly once per session.
//!
//! The payload has a stable shape: every (round, target) cell exists even
//! when a round timed out with nothing submitted, flagged `missing: true`.
//! Consent governs identity disclosure only; styling choices are always
//! revealed.

use super::session::SessionState;
use crate::protocol::{IdentityInfo, ParticipantReveal, RevealEntry, RevealPayload};
use crate::types::*;
use chrono::{DateTime, Utc};

impl SessionState {
    /// Build the reveal payload from whatever the ledger holds. Pure with
    /// respect to session state; `enter_reveal` is the guarded entry point.
    pub fn aggregate_reveal(&self, now: DateTime<Utc>) -> RevealPayload {
        let looks = Role::BOTH
            .iter()
            .map(|&target| {
                let identity = self
                    .participant_by_role(target)
                    .map(|p| IdentityInfo {
                        alias: p.alias.clone(),
                        // Without consent only the alias is disclosed
                        user_ref: p.consent.then(|| p.user_ref.clone()).flatten(),
                    })
                    .unwrap_or(IdentityInfo {
                        alias: String::new(),
                        user_ref: None,
                    });

                let entries = self
                    .rounds
                    .iter()
                    .map(|round| {
                        let design = self
                            .designs
                            .get(&DesignKey {
                                round_no: round.number,
                                designer: target.other(),
                                target,
                            })
                            .cloned();
                        RevealEntry {
                            round_no: round.number,
                            topic: round.topic,
                            missing: design.is_none(),
                            design,
                        }
                    })
                    .collect();

                ParticipantReveal {
                    target,
                    identity,
                    entries,
                }
            })
            .collect();

        RevealPayload {
            session_id: self.id.clone(),
            generated_at: now,
            looks,
        }
    }

    /// Transition to reveal and aggregate, exactly once. A second caller
    /// (timeout and late-completion racing) gets `None` and must not
    /// broadcast. The stored payload is returned verbatim for any later
    /// snapshot, which is what makes a repeated fetch byte-identical.
    pub fn enter_reveal(&mut self, now: DateTime<Utc>) -> Option<RevealPayload> {
        if self.status != SessionStatus::Active || self.reveal.is_some() {
            return None;
        }
        let payload = self.aggregate_reveal(now);
        self.reveal = Some(payload.clone());
        self.status = SessionStatus::Reveal;
        Some(payload)
    }

    pub fn reveal_payload(&self) -> Option<&RevealPayload> {
        self.reveal.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::super::session::{ParticipantSeed, SessionState};
    use crate::types::*;
    use chrono::Utc;

    fn seed(alias: &str, user_ref: Option<&str>) -> ParticipantSeed {
        ParticipantSeed {
            user_ref: user_ref.map(str::to_string),
            alias: alias.to_string(),
        }
    }

    fn choice(value: &str) -> Vec<StyleChoice> {
        vec![StyleChoice {
            category: "attire".into(),
            option: "style".into(),
            value: value.into(),
        }]
    }

    /// Play all three rounds through, submitting via the given closure
    fn play_through(
        session: &mut SessionState,
        mut submit_round: impl FnMut(&mut SessionState, u32),
    ) {
        let now = Utc::now();
        for number in 1..=3 {
            submit_round(session, number);
            if let Some(close) = session.close_round(number, now) {
                if let Some(next) = close.next {
                    session.begin_round(next, now);
                }
            }
        }
    }

    fn full_game() -> SessionState {
        let now = Utc::now();
        let (mut session, _, _) = SessionState::new_pair(
            seed("alice", Some("user-1")),
            seed("bob", Some("user-2")),
            GameConfig::default(),
            now,
        );
        session.activate(now);
        play_through(&mut session, |s, n| {
            s.submit(Role::A, n, Role::B, choice("for-b"), Utc::now()).unwrap();
            s.submit(Role::B, n, Role::A, choice("for-a"), Utc::now()).unwrap();
        });
        session
    }

    #[test]
    fn payload_has_stable_three_by_two_shape() {
        let mut session = full_game();
        let payload = session.enter_reveal(Utc::now()).unwrap();

        assert_eq!(payload.looks.len(), 2);
        for look in &payload.looks {
            assert_eq!(look.entries.len(), 3);
            assert!(look.entries.iter().all(|e| !e.missing));
            let numbers: Vec<u32> = look.entries.iter().map(|e| e.round_no).collect();
            assert_eq!(numbers, vec![1, 2, 3]);
        }
    }

    #[test]
    fn missing_rounds_get_placeholders() {
        let now = Utc::now();
        let (mut session, _, _) = SessionState::new_pair(
            seed("alice", None),
            seed("bob", None),
            GameConfig::default(),
            now,
        );
        session.activate(now);
        // Only A ever submits, and only in round 1; every other cell timed out
        play_through(&mut session, |s, n| {
            if n == 1 {
                s.submit(Role::A, 1, Role::B, choice("only-one"), Utc::now()).unwrap();
            }
        });

        let payload = session.enter_reveal(Utc::now()).unwrap();
        let for_b = payload.looks.iter().find(|l| l.target == Role::B).unwrap();
        let for_a = payload.looks.iter().find(|l| l.target == Role::A).unwrap();

        assert!(!for_b.entries[0].missing);
        assert!(for_b.entries[1].missing && for_b.entries[1].design.is_none());
        assert!(for_a.entries.iter().all(|e| e.missing));
        // A round is never silently absent
        assert_eq!(for_a.entries.len(), 3);
    }

    #[test]
    fn aggregation_is_idempotent_and_byte_identical() {
        let mut session = full_game();
        let now = Utc::now();

        let first = session.enter_reveal(now).expect("first trigger aggregates");
        // Simulated race: the second trigger must not re-aggregate
        assert!(session.enter_reveal(now).is_none());

        let stored = session.reveal_payload().unwrap();
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(stored).unwrap()
        );
    }

    #[test]
    fn consent_gates_identity_not_outcome() {
        let now = Utc::now();
        let mut session = full_game();
        let a_id = session.participant_by_role(Role::A).unwrap().id.clone();
        session.set_consent(&a_id, true).unwrap();

        let payload = session.enter_reveal(now).unwrap();
        let for_a = payload.looks.iter().find(|l| l.target == Role::A).unwrap();
        let for_b = payload.looks.iter().find(|l| l.target == Role::B).unwrap();

        // A consented: real reference disclosed. B did not: alias only.
        assert_eq!(for_a.identity.user_ref.as_deref(), Some("user-1"));
        assert!(for_b.identity.user_ref.is_none());
        assert_eq!(for_b.identity.alias, "bob");
        // Styling choices are revealed either way
        assert!(for_b.entries.iter().all(|e| e.design.is_some()));
    }
}
