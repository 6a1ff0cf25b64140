//! Post-reveal reaction and vote collection.
//!
//! One counted vote per participant for the single "overall winner" slot
//! (upsert semantics); emoji reactions accumulate freely.

use super::session::SessionState;
use crate::error::{GameError, GameResult};
use crate::protocol::{ReactionCount, TallyInfo};
use crate::types::*;
use chrono::{DateTime, Utc};

impl SessionState {
    /// Record a vote and/or a reaction. Valid from reveal until expiry.
    pub fn react(
        &mut self,
        participant_id: &str,
        vote: Option<VoteValue>,
        reaction: Option<ReactionKind>,
        now: DateTime<Utc>,
    ) -> GameResult<TallyInfo> {
        if self.status == SessionStatus::Expired {
            return Err(GameError::SessionExpired);
        }
        if !matches!(
            self.status,
            SessionStatus::Reveal | SessionStatus::Completed
        ) {
            return Err(GameError::NotRevealed);
        }
        // Validates the author belongs to this session
        self.role_of(participant_id)?;

        if let Some(value) = vote {
            self.votes.insert(
                participant_id.to_string(),
                Vote {
                    participant_id: participant_id.to_string(),
                    value,
                    ts: now,
                },
            );
        }
        if let Some(kind) = reaction {
            self.reactions.push(Reaction {
                participant_id: participant_id.to_string(),
                kind,
                ts: now,
            });
        }

        Ok(self.tally())
    }

    /// Current tally: vote counts per value plus reaction counts
    pub fn tally(&self) -> TallyInfo {
        let mut tally = TallyInfo::default();
        for vote in self.votes.values() {
            match vote.value {
                VoteValue::A => tally.a += 1,
                VoteValue::B => tally.b += 1,
                VoteValue::Tie => tally.tie += 1,
            }
        }
        tally.reactions = REACTION_KINDS
            .iter()
            .filter_map(|&kind| {
                let count = self.reactions.iter().filter(|r| r.kind == kind).count() as u32;
                (count > 0).then_some(ReactionCount { kind, count })
            })
            .collect();
        tally
    }
}
