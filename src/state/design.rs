//! Submission ledger: at most one design per (round, designer, target),
//! and the blind-visibility rule enforced at the data-access boundary.
//!
//! A read of designs targeting role R is only permitted for the designer
//! who authored them, or for anyone once the session reached reveal. This
//! is the most important invariant in the system; the UI never gets a
//! chance to leak what it was never handed.

use super::session::SessionState;
use crate::error::{GameError, GameResult};
use crate::types::*;
use chrono::{DateTime, Utc};

impl SessionState {
    /// Upsert a design for (current round, designer, target). Resubmission
    /// before the round closes replaces the prior design entirely.
    /// Returns the stored design and whether the round is now complete.
    pub fn submit(
        &mut self,
        designer: Role,
        round_no: u32,
        target: Role,
        choices: Vec<StyleChoice>,
        now: DateTime<Utc>,
    ) -> GameResult<(Design, bool)> {
        if self.status == SessionStatus::Expired {
            return Err(GameError::SessionExpired);
        }
        if designer == target {
            return Err(GameError::InvalidTarget);
        }
        if self.status != SessionStatus::Active {
            return Err(GameError::StaleRound(round_no));
        }
        let round = self
            .current_round()
            .filter(|r| r.number == round_no)
            .ok_or(GameError::StaleRound(round_no))?;
        // The timer is authoritative: late submissions are rejected, never
        // silently accepted
        if round.ended_at.is_some() || now > round.deadline {
            return Err(GameError::RoundClosed(round_no));
        }

        let design = Design {
            round_no,
            designer,
            target,
            choices,
            image_url: None,
            created_at: now,
        };
        self.designs.insert(design.key(), design.clone());

        Ok((design, self.round_complete(round_no)))
    }

    /// A round is complete once both roles have a design targeting the
    /// other side
    pub fn round_complete(&self, round_no: u32) -> bool {
        Role::BOTH.iter().all(|role| {
            self.designs.contains_key(&DesignKey {
                round_no,
                designer: *role,
                target: role.other(),
            })
        })
    }

    /// Designers who have submitted for the given round
    pub fn submitted_roles(&self, round_no: u32) -> Vec<Role> {
        Role::BOTH
            .iter()
            .copied()
            .filter(|role| {
                self.designs.contains_key(&DesignKey {
                    round_no,
                    designer: *role,
                    target: role.other(),
                })
            })
            .collect()
    }

    /// Designs the viewer authored, ordered by round. A subset of the
    /// visibility predicate in every phase, so snapshots cannot bypass it.
    pub fn authored_designs(&self, viewer: Role) -> Vec<Design> {
        let mut designs: Vec<Design> = self
            .designs_visible_to(viewer)
            .into_iter()
            .filter(|d| d.designer == viewer)
            .collect();
        designs.sort_by_key(|d| d.round_no);
        designs
    }

    /// The query-time visibility predicate: before reveal a viewer sees
    /// exactly the designs they authored, afterwards everything.
    pub fn designs_visible_to(&self, viewer: Role) -> Vec<Design> {
        let revealed = matches!(
            self.status,
            SessionStatus::Reveal | SessionStatus::Completed
        );
        let mut designs: Vec<Design> = self
            .designs
            .values()
            .filter(|d| revealed || d.designer == viewer)
            .cloned()
            .collect();
        designs.sort_by_key(|d| (d.round_no, d.designer != viewer));
        designs
    }

    /// Attach a late-arriving rendered image. Lost renders (round gone,
    /// design overwritten after the render started) are dropped silently.
    pub fn attach_render(&mut self, round_no: u32, designer: Role, image_url: String) -> bool {
        let key = DesignKey {
            round_no,
            designer,
            target: designer.other(),
        };
        match self.designs.get_mut(&key) {
            Some(design) => {
                design.image_url = Some(image_url);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::session::{ParticipantSeed, SessionState};
    use crate::error::GameError;
    use crate::types::*;
    use chrono::{Duration as ChronoDuration, Utc};

    fn seed(alias: &str) -> ParticipantSeed {
        ParticipantSeed {
            user_ref: None,
            alias: alias.to_string(),
        }
    }

    fn active_session() -> SessionState {
        let (mut session, _, _) =
            SessionState::new_pair(seed("alice"), seed("bob"), GameConfig::default(), Utc::now());
        session.activate(Utc::now());
        session
    }

    fn choice(value: &str) -> Vec<StyleChoice> {
        vec![StyleChoice {
            category: "attire".into(),
            option: "style".into(),
            value: value.into(),
        }]
    }

    #[test]
    fn resubmission_overwrites_not_appends() {
        let mut session = active_session();
        let now = Utc::now();

        session.submit(Role::A, 1, Role::B, choice("vintage"), now).unwrap();
        session.submit(Role::A, 1, Role::B, choice("goth"), now).unwrap();

        assert_eq!(session.designs.len(), 1);
        let stored = session.authored_designs(Role::A);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].choices[0].value, "goth");
    }

    #[test]
    fn self_targeting_is_rejected() {
        let mut session = active_session();
        let result = session.submit(Role::A, 1, Role::A, choice("x"), Utc::now());
        assert_eq!(result.unwrap_err(), GameError::InvalidTarget);
    }

    #[test]
    fn submissions_for_non_current_rounds_are_stale() {
        let mut session = active_session();
        let now = Utc::now();

        assert_eq!(
            session.submit(Role::A, 2, Role::B, choice("x"), now).unwrap_err(),
            GameError::StaleRound(2)
        );

        session.close_round(1, now).unwrap();
        session.begin_round(2, now);
        assert_eq!(
            session.submit(Role::A, 1, Role::B, choice("x"), now).unwrap_err(),
            GameError::StaleRound(1)
        );
    }

    #[test]
    fn late_submission_rejected_round_closed() {
        let mut session = active_session();
        let past_deadline = session.current_round().unwrap().deadline
            + ChronoDuration::seconds(1);

        let result = session.submit(Role::A, 1, Role::B, choice("x"), past_deadline);
        assert_eq!(result.unwrap_err(), GameError::RoundClosed(1));
    }

    #[test]
    fn both_designs_complete_the_round() {
        let mut session = active_session();
        let now = Utc::now();

        let (_, complete) = session.submit(Role::A, 1, Role::B, choice("x"), now).unwrap();
        assert!(!complete);
        assert_eq!(session.submitted_roles(1), vec![Role::A]);

        let (_, complete) = session.submit(Role::B, 1, Role::A, choice("y"), now).unwrap();
        assert!(complete);
        assert_eq!(session.submitted_roles(1), vec![Role::A, Role::B]);
    }

    #[test]
    fn blind_visibility_until_reveal() {
        let mut session = active_session();
        let now = Utc::now();
        session.submit(Role::A, 1, Role::B, choice("secret"), now).unwrap();

        // B authored nothing, so B sees nothing; never more than authored
        assert!(session.designs_visible_to(Role::B).is_empty());
        assert!(session.authored_designs(Role::B).is_empty());
        // The designer always sees their own work
        assert_eq!(session.designs_visible_to(Role::A).len(), 1);
        assert_eq!(session.authored_designs(Role::A).len(), 1);

        for number in 1..=3 {
            if let Some(close) = session.close_round(number, now) {
                if let Some(next) = close.next {
                    session.begin_round(next, now);
                }
            }
        }
        session.enter_reveal(now);

        // Post-reveal, the full design including choices becomes visible
        let visible = session.designs_visible_to(Role::B);
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].choices[0].value, "secret");
        // Authored stays viewer-scoped even after reveal
        assert!(session.authored_designs(Role::B).is_empty());
    }

    #[test]
    fn visible_count_equals_authored_count_pre_reveal() {
        let mut session = active_session();
        let now = Utc::now();
        session.submit(Role::A, 1, Role::B, choice("a1"), now).unwrap();
        session.submit(Role::B, 1, Role::A, choice("b1"), now).unwrap();
        session.close_round(1, now).unwrap();
        session.begin_round(2, now);
        session.submit(Role::A, 2, Role::B, choice("a2"), now).unwrap();

        for role in Role::BOTH {
            assert_eq!(
                session.designs_visible_to(role).len(),
                session.authored_designs(role).len()
            );
        }
    }

    #[test]
    fn attach_render_sets_image_once_design_exists() {
        let mut session = active_session();
        let now = Utc::now();

        assert!(!session.attach_render(1, Role::A, "http://img/1".into()));

        session.submit(Role::A, 1, Role::B, choice("x"), now).unwrap();
        assert!(session.attach_render(1, Role::A, "http://img/1".into()));
        let design = session.authored_designs(Role::A).remove(0);
        assert_eq!(design.image_url.as_deref(), Some("http://img/1"));
    }
}
