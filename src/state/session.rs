//! Per-session actor and state machine.
//!
//! Every session is one tokio task that owns its `SessionState` and
//! serializes all mutations through an mpsc command channel. Round timers
//! feed events into the same task, so a timer firing and a "both designs
//! submitted" event racing to close a round are resolved sequentially:
//! whichever is applied first wins, the other sees the round already
//! closed and becomes a no-op.

use super::SessionHandle;
use crate::error::{GameError, GameResult};
use crate::protocol::{
    ParticipantInfo, RevealPayload, RoundInfo, ServerMessage, SessionSnapshot, TallyInfo,
};
use crate::render::{RenderRequest, StyleRenderer};
use crate::timer::{RoundTimer, TimerEvent};
use crate::types::*;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};

/// Timeout for a single render call; failures only cost the image
const RENDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Identity material for a participant about to be bound
#[derive(Debug, Clone)]
pub struct ParticipantSeed {
    pub user_ref: Option<UserRef>,
    pub alias: String,
}

/// Direct reply for a successful bind
#[derive(Debug, Clone)]
pub struct JoinedSession {
    pub session_id: SessionId,
    pub participant_id: ParticipantId,
    pub role: Role,
}

#[derive(Debug)]
pub enum SessionCommand {
    Join {
        seed: ParticipantSeed,
        reply: oneshot::Sender<GameResult<JoinedSession>>,
    },
    Submit {
        participant_id: ParticipantId,
        round_no: u32,
        target: Role,
        choices: Vec<StyleChoice>,
        reply: oneshot::Sender<GameResult<Design>>,
    },
    SetConsent {
        participant_id: ParticipantId,
        consent: bool,
        reply: oneshot::Sender<GameResult<()>>,
    },
    React {
        participant_id: ParticipantId,
        vote: Option<VoteValue>,
        reaction: Option<ReactionKind>,
        reply: oneshot::Sender<GameResult<TallyInfo>>,
    },
    Snapshot {
        participant_id: ParticipantId,
        reply: oneshot::Sender<GameResult<SessionSnapshot>>,
    },
    Presence {
        participant_id: ParticipantId,
        connected: bool,
    },
    Leave {
        participant_id: ParticipantId,
    },
    RenderComplete {
        round_no: u32,
        designer: Role,
        image_url: String,
    },
    /// Post-reveal window elapsed
    CompleteWindow,
    /// TTL hard stop, always wins over queued work
    Expire,
}

/// Outcome of a single-winner round close
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundClose {
    pub round_no: u32,
    pub ended_at: DateTime<Utc>,
    /// Round to start next, or None when the session moves to reveal
    pub next: Option<u32>,
}

/// One game's full state. Owned exclusively by its session actor; all
/// methods are synchronous and never block.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub id: SessionId,
    pub status: SessionStatus,
    pub invite_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub participants: Vec<Participant>,
    pub rounds: Vec<Round>,
    pub designs: HashMap<DesignKey, Design>,
    pub votes: HashMap<ParticipantId, Vote>,
    pub reactions: Vec<Reaction>,
    pub reveal: Option<RevealPayload>,
    pub departed: HashSet<Role>,
    pub config: GameConfig,
}

impl SessionState {
    fn new(
        invite_code: Option<String>,
        config: GameConfig,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ulid::Ulid::new().to_string(),
            status: SessionStatus::Waiting,
            invite_code,
            created_at: now,
            expires_at: now + ChronoDuration::hours(config.session_ttl_hours),
            participants: Vec::new(),
            rounds: Vec::new(),
            designs: HashMap::new(),
            votes: HashMap::new(),
            reactions: Vec::new(),
            reveal: None,
            departed: HashSet::new(),
            config,
        }
    }

    /// Private session: creator is bound as role A, waiting for the invitee
    pub fn new_private(
        invite_code: String,
        creator: ParticipantSeed,
        config: GameConfig,
        now: DateTime<Utc>,
    ) -> (Self, ParticipantId) {
        let mut session = Self::new(Some(invite_code), config, now);
        let id = session.add_participant(creator, Role::A);
        (session, id)
    }

    /// Quick-match session: both participants bound, first-in is A.
    /// Starts in `matching`; the actor activates it on startup.
    pub fn new_pair(
        first: ParticipantSeed,
        second: ParticipantSeed,
        config: GameConfig,
        now: DateTime<Utc>,
    ) -> (Self, ParticipantId, ParticipantId) {
        let mut session = Self::new(None, config, now);
        let a = session.add_participant(first, Role::A);
        let b = session.add_participant(second, Role::B);
        session.status = SessionStatus::Matching;
        (session, a, b)
    }

    fn add_participant(&mut self, seed: ParticipantSeed, role: Role) -> ParticipantId {
        let participant = Participant {
            id: ulid::Ulid::new().to_string(),
            user_ref: seed.user_ref,
            role,
            alias: seed.alias,
            consent: false,
            connected: true,
        };
        let id = participant.id.clone();
        self.participants.push(participant);
        id
    }

    pub fn participant(&self, participant_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.id == participant_id)
    }

    pub fn participant_by_role(&self, role: Role) -> Option<&Participant> {
        self.participants.iter().find(|p| p.role == role)
    }

    pub fn role_of(&self, participant_id: &str) -> GameResult<Role> {
        self.participant(participant_id)
            .map(|p| p.role)
            .ok_or(GameError::NotFound)
    }

    /// Bind the second participant (role B) into a waiting private session
    pub fn bind_second(
        &mut self,
        seed: ParticipantSeed,
        now: DateTime<Utc>,
    ) -> GameResult<ParticipantId> {
        if self.participants.len() >= 2 {
            return Err(GameError::AlreadyFull);
        }
        if self.status != SessionStatus::Waiting {
            return Err(GameError::NotFound);
        }
        let id = self.add_participant(seed, Role::B);
        self.activate(now);
        Ok(id)
    }

    /// Transition table for session status; `expired` is reachable from
    /// anywhere via the TTL sweep.
    pub fn is_valid_transition(from: SessionStatus, to: SessionStatus) -> bool {
        use SessionStatus::*;

        match (from, to) {
            (Waiting, Active) => true,
            (Matching, Active) => true,
            (Active, Reveal) => true,
            (Reveal, Completed) => true,
            (_, Expired) => true,
            _ => false,
        }
    }

    fn transition(&mut self, to: SessionStatus) -> bool {
        if Self::is_valid_transition(self.status, to) {
            self.status = to;
            true
        } else {
            // Prevented structurally; reaching this is a bug, not a game state
            tracing::error!(
                session = %self.id,
                "invalid status transition {:?} -> {:?}",
                self.status,
                to
            );
            false
        }
    }

    /// Both participants bound: start the game at round 1
    pub fn activate(&mut self, now: DateTime<Utc>) {
        if self.transition(SessionStatus::Active) {
            self.begin_round(1, now);
        }
    }

    pub fn begin_round(&mut self, number: u32, now: DateTime<Utc>) -> Round {
        let topic = ROUND_TOPICS[(number as usize - 1).min(ROUND_TOPICS.len() - 1)];
        let round = Round {
            number,
            topic,
            started_at: now,
            deadline: now + ChronoDuration::seconds(self.config.round_seconds as i64),
            ended_at: None,
        };
        self.rounds.push(round.clone());
        round
    }

    pub fn current_round(&self) -> Option<&Round> {
        self.rounds.last()
    }

    /// Close a round: the single-winner compare-and-swap of the engine.
    /// Exactly one caller per round observes `Some`; a racing timer expiry
    /// or late completion sees the round already ended and gets `None`.
    pub fn close_round(&mut self, round_no: u32, now: DateTime<Utc>) -> Option<RoundClose> {
        if self.status != SessionStatus::Active {
            return None;
        }
        let total_rounds = self.config.rounds;
        let round = self.rounds.last_mut()?;
        if round.number != round_no || round.ended_at.is_some() {
            return None;
        }
        // Freeze the end time; on a timer-expiry close this is the deadline
        // plus scheduling slack only
        round.ended_at = Some(now);
        Some(RoundClose {
            round_no,
            ended_at: now,
            next: (round_no < total_rounds).then_some(round_no + 1),
        })
    }

    pub fn check_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == SessionStatus::Expired || now >= self.expires_at
    }

    pub fn expire(&mut self) {
        self.transition(SessionStatus::Expired);
    }

    /// Complete the session after the post-reveal window (or both leaving)
    pub fn complete(&mut self) -> bool {
        self.status == SessionStatus::Reveal && self.transition(SessionStatus::Completed)
    }

    /// Consent governs identity disclosure at reveal and is locked once
    /// reveal fires
    pub fn set_consent(&mut self, participant_id: &str, consent: bool) -> GameResult<Role> {
        if !matches!(
            self.status,
            SessionStatus::Waiting | SessionStatus::Matching | SessionStatus::Active
        ) {
            return Err(GameError::RevealLocked);
        }
        let participant = self
            .participants
            .iter_mut()
            .find(|p| p.id == participant_id)
            .ok_or(GameError::NotFound)?;
        participant.consent = consent;
        Ok(participant.role)
    }

    pub fn mark_presence(&mut self, participant_id: &str, connected: bool) -> Option<Role> {
        let participant = self
            .participants
            .iter_mut()
            .find(|p| p.id == participant_id)?;
        participant.connected = connected;
        Some(participant.role)
    }

    pub fn mark_departed(&mut self, participant_id: &str) -> Option<Role> {
        let role = self.mark_presence(participant_id, false)?;
        self.departed.insert(role);
        Some(role)
    }

    pub fn all_departed(&self) -> bool {
        !self.participants.is_empty()
            && self.participants.iter().all(|p| self.departed.contains(&p.role))
    }

    /// Viewer-specific snapshot; never includes designs the viewer did not
    /// author, except through the reveal payload
    pub fn snapshot_for(
        &self,
        participant_id: &str,
        now: DateTime<Utc>,
    ) -> GameResult<SessionSnapshot> {
        let viewer = self.role_of(participant_id)?;
        let current = self.current_round();

        Ok(SessionSnapshot {
            session_id: self.id.clone(),
            status: self.status,
            you: viewer,
            invite_code: self.invite_code.clone(),
            participants: self.participants.iter().map(ParticipantInfo::from).collect(),
            current_round: current.map(RoundInfo::from),
            submitted: current
                .map(|r| self.submitted_roles(r.number))
                .unwrap_or_default(),
            my_designs: self.authored_designs(viewer),
            reveal: self.reveal.clone(),
            tally: matches!(
                self.status,
                SessionStatus::Reveal | SessionStatus::Completed
            )
            .then(|| self.tally()),
            server_now: now,
            expires_at: self.expires_at,
        })
    }
}

/// Spawn the actor for a session and return its handle
pub fn spawn(
    session: SessionState,
    renderer: Option<Arc<dyn StyleRenderer>>,
) -> SessionHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (event_tx, _) = broadcast::channel(256);

    let handle = SessionHandle {
        id: session.id.clone(),
        invite_code: session.invite_code.clone(),
        commands: cmd_tx.clone(),
        events: event_tx.clone(),
        created_at: session.created_at,
        expires_at: session.expires_at,
    };

    let actor = SessionActor {
        session,
        cmd_rx,
        cmd_tx,
        events: event_tx,
        renderer,
        round_timer: None,
    };
    tokio::spawn(actor.run());

    handle
}

struct SessionActor {
    session: SessionState,
    cmd_rx: mpsc::UnboundedReceiver<SessionCommand>,
    /// Kept for render callbacks and the post-reveal window task
    cmd_tx: mpsc::UnboundedSender<SessionCommand>,
    events: broadcast::Sender<ServerMessage>,
    renderer: Option<Arc<dyn StyleRenderer>>,
    round_timer: Option<RoundTimer>,
}

impl SessionActor {
    async fn run(mut self) {
        let (timer_tx, mut timer_rx) = mpsc::unbounded_channel();

        // Quick-match sessions arrive fully paired but not yet running
        if self.session.status == SessionStatus::Matching {
            self.start_game(Utc::now(), &timer_tx);
        }

        loop {
            tokio::select! {
                Some(cmd) = self.cmd_rx.recv() => {
                    let now = Utc::now();
                    if self.session.check_expired(now) {
                        self.expire_with_pending(cmd);
                        break;
                    }
                    if !self.handle_command(cmd, now, &timer_tx) {
                        break;
                    }
                }
                Some(event) = timer_rx.recv() => {
                    let now = Utc::now();
                    if self.session.check_expired(now) {
                        self.expire_now();
                        break;
                    }
                    self.handle_timer(event, now, &timer_tx);
                }
                else => break,
            }
        }

        tracing::debug!(session = %self.session.id, "session actor stopped");
    }

    fn broadcast(&self, msg: ServerMessage) {
        // Ignore send errors (no receivers connected is fine)
        let _ = self.events.send(msg);
    }

    fn expire_now(&mut self) {
        self.session.expire();
        if let Some(timer) = self.round_timer.take() {
            timer.cancel();
        }
        self.broadcast(ServerMessage::SessionExpired);
        tracing::info!(session = %self.session.id, "session expired");
    }

    /// Expiry always wins: reject whatever was queued, then stop
    fn expire_with_pending(&mut self, cmd: SessionCommand) {
        match cmd {
            // Joining a dead session looks like a missing invite code
            SessionCommand::Join { reply, .. } => {
                let _ = reply.send(Err(GameError::NotFound));
            }
            SessionCommand::Submit { reply, .. } => {
                let _ = reply.send(Err(GameError::SessionExpired));
            }
            SessionCommand::SetConsent { reply, .. } => {
                let _ = reply.send(Err(GameError::SessionExpired));
            }
            SessionCommand::React { reply, .. } => {
                let _ = reply.send(Err(GameError::SessionExpired));
            }
            SessionCommand::Snapshot { reply, .. } => {
                let _ = reply.send(Err(GameError::SessionExpired));
            }
            SessionCommand::Presence { .. }
            | SessionCommand::Leave { .. }
            | SessionCommand::RenderComplete { .. }
            | SessionCommand::CompleteWindow
            | SessionCommand::Expire => {}
        }
        self.expire_now();
    }

    fn start_round_timer(&mut self, round: &Round, timer_tx: &mpsc::UnboundedSender<TimerEvent>) {
        if let Some(previous) = self.round_timer.take() {
            previous.cancel();
        }
        self.round_timer = Some(RoundTimer::spawn(
            round.number,
            Duration::from_secs(self.session.config.round_seconds as u64),
            timer_tx.clone(),
        ));
    }

    /// Both participants bound: activate, announce, start round 1's timer
    fn start_game(&mut self, now: DateTime<Utc>, timer_tx: &mpsc::UnboundedSender<TimerEvent>) {
        self.session.activate(now);
        let round = match self.session.current_round() {
            Some(r) => r.clone(),
            None => return,
        };
        self.start_round_timer(&round, timer_tx);
        self.broadcast(ServerMessage::SessionStarted {
            participants: self
                .session
                .participants
                .iter()
                .map(ParticipantInfo::from)
                .collect(),
            round: RoundInfo::from(&round),
            server_now: now,
        });
        tracing::info!(session = %self.session.id, "session active, round 1 running");
    }

    fn handle_command(
        &mut self,
        cmd: SessionCommand,
        now: DateTime<Utc>,
        timer_tx: &mpsc::UnboundedSender<TimerEvent>,
    ) -> bool {
        match cmd {
            SessionCommand::Join { seed, reply } => {
                let result = self.session.bind_second(seed, now).map(|participant_id| {
                    JoinedSession {
                        session_id: self.session.id.clone(),
                        participant_id,
                        role: Role::B,
                    }
                });
                let joined = result.is_ok();
                let _ = reply.send(result);
                if joined {
                    // activate() already ran inside bind_second; announce
                    // and arm the round 1 timer
                    if let Some(round) = self.session.current_round().cloned() {
                        self.start_round_timer(&round, timer_tx);
                        self.broadcast(ServerMessage::SessionStarted {
                            participants: self
                                .session
                                .participants
                                .iter()
                                .map(ParticipantInfo::from)
                                .collect(),
                            round: RoundInfo::from(&round),
                            server_now: now,
                        });
                    }
                }
            }

            SessionCommand::Submit {
                participant_id,
                round_no,
                target,
                choices,
                reply,
            } => {
                let result = self
                    .session
                    .role_of(&participant_id)
                    .and_then(|designer| {
                        self.session.submit(designer, round_no, target, choices, now)
                    });
                match result {
                    Ok((design, round_complete)) => {
                        let _ = reply.send(Ok(design.clone()));
                        self.broadcast(ServerMessage::DesignProgress {
                            round_no,
                            submitted: self.session.submitted_roles(round_no),
                        });
                        self.spawn_render(&design);
                        if round_complete {
                            self.close_round(round_no, now, timer_tx);
                        }
                    }
                    Err(err) => {
                        let _ = reply.send(Err(err));
                    }
                }
            }

            SessionCommand::SetConsent {
                participant_id,
                consent,
                reply,
            } => match self.session.set_consent(&participant_id, consent) {
                Ok(role) => {
                    let _ = reply.send(Ok(()));
                    self.broadcast(ServerMessage::ConsentUpdated { role, consent });
                }
                Err(err) => {
                    let _ = reply.send(Err(err));
                }
            },

            SessionCommand::React {
                participant_id,
                vote,
                reaction,
                reply,
            } => match self.session.react(&participant_id, vote, reaction, now) {
                Ok(tally) => {
                    let _ = reply.send(Ok(tally.clone()));
                    self.broadcast(ServerMessage::Tally { tally });
                }
                Err(err) => {
                    let _ = reply.send(Err(err));
                }
            },

            SessionCommand::Snapshot {
                participant_id,
                reply,
            } => {
                let _ = reply.send(self.session.snapshot_for(&participant_id, now));
            }

            SessionCommand::Presence {
                participant_id,
                connected,
            } => {
                if let Some(role) = self.session.mark_presence(&participant_id, connected) {
                    self.broadcast(ServerMessage::PresenceUpdate { role, connected });
                }
            }

            SessionCommand::Leave { participant_id } => {
                if let Some(role) = self.session.mark_departed(&participant_id) {
                    self.broadcast(ServerMessage::PresenceUpdate {
                        role,
                        connected: false,
                    });
                    // Mid-game, the remaining participant's timers keep
                    // running; only a post-reveal mutual exit ends early
                    if self.session.all_departed() && self.session.complete() {
                        self.broadcast(ServerMessage::SessionCompleted);
                    }
                }
            }

            SessionCommand::RenderComplete {
                round_no,
                designer,
                image_url,
            } => {
                if self.session.attach_render(round_no, designer, image_url) {
                    self.broadcast(ServerMessage::DesignRendered { round_no, designer });
                }
            }

            SessionCommand::CompleteWindow => {
                if self.session.complete() {
                    self.broadcast(ServerMessage::SessionCompleted);
                }
            }

            SessionCommand::Expire => {
                self.expire_now();
                return false;
            }
        }
        true
    }

    fn handle_timer(
        &mut self,
        event: TimerEvent,
        now: DateTime<Utc>,
        timer_tx: &mpsc::UnboundedSender<TimerEvent>,
    ) {
        match event {
            TimerEvent::Tick {
                round_no,
                remaining_seconds,
            } => {
                let current = self
                    .session
                    .current_round()
                    .filter(|r| r.number == round_no && r.is_open());
                if self.session.status == SessionStatus::Active && current.is_some() {
                    self.broadcast(ServerMessage::RoundTick {
                        round_no,
                        remaining_seconds,
                    });
                }
            }
            TimerEvent::Expired { round_no } => {
                self.close_round(round_no, now, timer_tx);
            }
        }
    }

    /// Advance past a closed round; a no-op when someone else already won
    /// the close
    fn close_round(
        &mut self,
        round_no: u32,
        now: DateTime<Utc>,
        timer_tx: &mpsc::UnboundedSender<TimerEvent>,
    ) {
        let Some(close) = self.session.close_round(round_no, now) else {
            return;
        };
        if let Some(timer) = self.round_timer.take() {
            timer.cancel();
        }
        self.broadcast(ServerMessage::RoundEnded {
            round_no,
            ended_at: close.ended_at,
        });

        match close.next {
            Some(next) => {
                let round = self.session.begin_round(next, now);
                self.start_round_timer(&round, timer_tx);
                self.broadcast(ServerMessage::RoundStarted {
                    round: RoundInfo::from(&round),
                    server_now: now,
                });
            }
            None => {
                // Last round done: aggregate and reveal exactly once
                if let Some(payload) = self.session.enter_reveal(now) {
                    self.broadcast(ServerMessage::Reveal { payload });
                    let window =
                        Duration::from_secs(self.session.config.post_reveal_seconds as u64);
                    let tx = self.cmd_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(window).await;
                        let _ = tx.send(SessionCommand::CompleteWindow);
                    });
                }
            }
        }
    }

    fn spawn_render(&self, design: &Design) {
        let Some(renderer) = self.renderer.clone() else {
            return;
        };
        let Some(topic) = self
            .session
            .rounds
            .iter()
            .find(|r| r.number == design.round_no)
            .map(|r| r.topic)
        else {
            return;
        };

        let request = RenderRequest {
            topic,
            choices: design.choices.clone(),
            timeout: RENDER_TIMEOUT,
        };
        let tx = self.cmd_tx.clone();
        let round_no = design.round_no;
        let designer = design.designer;
        let session_id = self.session.id.clone();

        tokio::spawn(async move {
            match renderer.render(request).await {
                Ok(image) => {
                    let _ = tx.send(SessionCommand::RenderComplete {
                        round_no,
                        designer,
                        image_url: image.image_url,
                    });
                }
                Err(e) => {
                    // Non-fatal: the design persists without an image and
                    // the reveal shows a placeholder
                    let err = GameError::RendererUnavailable(e.to_string());
                    tracing::warn!(session = %session_id, round_no, "{err}");
                }
            }
        });
    }
}
