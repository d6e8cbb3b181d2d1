//! Session and presence management.
//!
//! Tracks who is in the match, which of them is host, and routes incoming
//! tank packets to the right [`EntityPredictor`]. All inbound traffic arrives
//! as one [`SessionEvent`] enum through the dispatch queue and is handled on
//! the logic tick; outbound lifecycle changes queue up as [`SessionNotice`]s
//! for the presentation layer to drain.
//!
//! Participants live in an ordered map so iteration (advancing, spawning,
//! election) is the same on every peer.

use std::{collections::BTreeMap, time::Duration};

use bytes::Bytes;
use tanknet_shared::{
    codec::{MalformedPacket, WireSnapshot},
    config::{HostPolicy, SessionTunables, TankConfig},
    kinematics::{KinematicParams, KinematicState},
    math::Vec2,
    net::{MatchId, OpCode, Presence, SessionId},
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{input::ControlSource, predictor::EntityPredictor};

/// Horizontal inset of the spawn points from the screen edges.
const SPAWN_INSET_X: f32 = 32.0;

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not in a match and not looking for one.
    Disconnected,
    /// Matchmaking ticket submitted, waiting to be matched.
    AwaitingMatch,
    /// Joined a match; participants are live.
    InMatch,
}

/// Everything the transport can tell the session. Queued from transport
/// callbacks and handled on the logic tick.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Matchmaking finished and the match was joined.
    Matched {
        match_id: MatchId,
        local: Presence,
        presences: Vec<Presence>,
    },
    /// Peers joined and/or left the current match.
    PresenceChanged {
        joins: Vec<Presence>,
        leaves: Vec<Presence>,
    },
    /// A peer's match-state message.
    MatchState {
        match_id: MatchId,
        sender: Presence,
        opcode: i64,
        payload: Bytes,
    },
    /// The host published new session tunables.
    TunablesReplicated(SessionTunables),
}

/// A match member, local or remote.
#[derive(Debug, Clone, PartialEq)]
pub enum Participant {
    /// Driven by a controller on this machine.
    Local { control: ControlSource },
    /// Driven by packets from `presence`, recorded when it joined `match_id`.
    Remote { presence: Presence, match_id: MatchId },
}

impl Participant {
    pub fn is_local(&self) -> bool {
        matches!(self, Participant::Local { .. })
    }
}

/// A participant and the tank it owns.
#[derive(Debug, Clone)]
pub struct ParticipantEntry {
    pub participant: Participant,
    pub predictor: EntityPredictor,
}

/// Where a newly spawned tank starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnSlot {
    pub index: usize,
    pub position: Vec2,
    /// Alternates between -1 and 1 with each assignment.
    pub bounce_direction: i8,
}

/// Lifecycle notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    SpawnedLocal { session_id: SessionId, slot: SpawnSlot },
    SpawnedRemote { session_id: SessionId, slot: SpawnSlot },
    Removed { session_id: SessionId },
    HostChanged { host: Option<SessionId> },
}

/// Why an event was dropped without effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// No match is active.
    NotInMatch,
    /// The sender is not (or no longer) a participant.
    UnknownParticipant,
    /// The sender's identity or match does not match what was recorded.
    IdentityMismatch,
    /// Opcode not consumed by the netcode.
    UnhandledOpcode(i64),
    /// Older than the last packet applied for that participant.
    Stale,
    /// Tunables echoed back to the host that owns them.
    HostOwned,
}

/// Result of handling one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Applied,
    Discarded(DiscardReason),
}

/// Timing context for packets handled this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReceiveClock {
    /// Our game clock, in seconds.
    pub local_time: f32,
    /// Estimated one-way latency to peers.
    pub latency: Duration,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("only the host may change session tunables")]
    NotHost,
    #[error(transparent)]
    Malformed(#[from] MalformedPacket),
}

/// Which end of the ordering to elect from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pick {
    Greatest,
    Least,
}

fn elect<'a>(candidates: impl Iterator<Item = &'a SessionId>, pick: Pick) -> Option<SessionId> {
    let chosen = match pick {
        Pick::Greatest => candidates.max(),
        Pick::Least => candidates.min(),
    };
    chosen.cloned()
}

/// Session-wide participant registry and packet router.
pub struct SessionManager {
    config: TankConfig,
    params: KinematicParams,
    tunables: SessionTunables,
    state: SessionState,

    match_id: MatchId,
    host: Option<SessionId>,
    local: Option<Presence>,
    participants: BTreeMap<SessionId, ParticipantEntry>,

    spawn_points: [Vec2; 2],
    next_spawn: usize,
    bounce_direction: i8,

    notices: Vec<SessionNotice>,
    /// Peers joined since the host last published its tunables.
    replication_due: bool,
}

impl SessionManager {
    pub fn new(config: TankConfig) -> Self {
        let bounds = config.world;
        let params = KinematicParams {
            bounds,
            ..KinematicParams::default()
        };
        Self {
            tunables: config.tunables,
            params,
            state: SessionState::Disconnected,
            match_id: MatchId::default(),
            host: None,
            local: None,
            participants: BTreeMap::new(),
            spawn_points: [
                Vec2::new(SPAWN_INSET_X, bounds.height / 2.0),
                Vec2::new(bounds.width - SPAWN_INSET_X, bounds.height / 2.0),
            ],
            next_spawn: 0,
            bounce_direction: -1,
            notices: Vec::new(),
            replication_due: false,
            config,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn match_id(&self) -> &MatchId {
        &self.match_id
    }

    pub fn host(&self) -> Option<&SessionId> {
        self.host.as_ref()
    }

    pub fn local_presence(&self) -> Option<&Presence> {
        self.local.as_ref()
    }

    pub fn local_session(&self) -> Option<&SessionId> {
        self.local.as_ref().map(|p| &p.session_id)
    }

    pub fn is_host(&self) -> bool {
        matches!((&self.host, self.local_session()), (Some(h), Some(l)) if h == l)
    }

    pub fn tunables(&self) -> &SessionTunables {
        &self.tunables
    }

    pub fn participant(&self, id: &SessionId) -> Option<&ParticipantEntry> {
        self.participants.get(id)
    }

    pub fn participants(&self) -> impl Iterator<Item = (&SessionId, &ParticipantEntry)> {
        self.participants.iter()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// State to draw for `id` this frame.
    pub fn display_state(&self, id: &SessionId) -> Option<&KinematicState> {
        self.participants.get(id).map(|e| e.predictor.display())
    }

    /// Predictor of the locally controlled tank, if spawned.
    pub fn local_predictor_mut(&mut self) -> Option<&mut EntityPredictor> {
        let id = self.local.as_ref()?.session_id.clone();
        self.participants
            .get_mut(&id)
            .filter(|e| e.participant.is_local())
            .map(|e| &mut e.predictor)
    }

    /// Takes queued lifecycle notices.
    pub fn drain_notices(&mut self) -> Vec<SessionNotice> {
        std::mem::take(&mut self.notices)
    }

    /// Tunables the host owes peers that joined since the last call. Always
    /// `None` on guests.
    pub fn take_pending_replication(&mut self) -> Option<SessionTunables> {
        let due = std::mem::take(&mut self.replication_due);
        (due && self.is_host()).then_some(self.tunables)
    }

    /// Marks a matchmaking request as outstanding.
    pub fn begin_matchmaking(&mut self) {
        if self.state == SessionState::Disconnected {
            self.state = SessionState::AwaitingMatch;
            info!("Awaiting match");
        }
    }

    /// Replaces the tunables. Fails for everyone but the host.
    pub fn set_tunables(&mut self, tunables: SessionTunables) -> Result<(), SessionError> {
        self.update_tunables(|t| *t = tunables).map(|_| ())
    }

    /// Applies a host-side change to the tunables and returns the result for
    /// replication. Fails for everyone but the host.
    pub fn update_tunables(
        &mut self,
        change: impl FnOnce(&mut SessionTunables),
    ) -> Result<SessionTunables, SessionError> {
        if !self.is_host() {
            return Err(SessionError::NotHost);
        }
        change(&mut self.tunables);
        info!(tunables = ?self.tunables, "Host updated tunables");
        Ok(self.tunables)
    }

    /// Routes one inbound event. Malformed packets are returned as errors;
    /// everything else that cannot be applied is discarded.
    pub fn handle_event(
        &mut self,
        event: SessionEvent,
        clock: ReceiveClock,
    ) -> Result<Dispatch, SessionError> {
        let dispatch = match event {
            SessionEvent::Matched {
                match_id,
                local,
                presences,
            } => self.on_matched(match_id, local, presences),
            SessionEvent::PresenceChanged { joins, leaves } => self.on_presence(joins, leaves),
            SessionEvent::MatchState {
                match_id,
                sender,
                opcode,
                payload,
            } => self.on_match_state(&match_id, &sender, opcode, &payload, clock)?,
            SessionEvent::TunablesReplicated(tunables) => self.on_tunables(tunables),
        };

        if let Dispatch::Discarded(reason) = dispatch {
            debug!(?reason, "Discarded session event");
        }
        Ok(dispatch)
    }

    /// Per-tick prediction and smoothing for every remote tank.
    pub fn advance_remotes(&mut self) {
        let frames = self.tunables.frames_between_packets;
        let prediction = self.tunables.enable_prediction;
        for entry in self.participants.values_mut() {
            if !entry.participant.is_local() {
                entry.predictor.advance(frames, prediction);
            }
        }
    }

    /// Drops every participant and resets identifiers. Safe to call in any state.
    pub fn teardown(&mut self) {
        for session_id in std::mem::take(&mut self.participants).into_keys() {
            self.notices.push(SessionNotice::Removed { session_id });
        }
        if self.host.take().is_some() {
            self.notices.push(SessionNotice::HostChanged { host: None });
        }
        self.match_id = MatchId::default();
        self.local = None;
        self.tunables = self.config.tunables;
        self.next_spawn = 0;
        self.bounce_direction = -1;
        self.replication_due = false;
        if self.state != SessionState::Disconnected {
            info!("Session torn down");
        }
        self.state = SessionState::Disconnected;
    }

    fn on_matched(&mut self, match_id: MatchId, local: Presence, mut presences: Vec<Presence>) -> Dispatch {
        if self.state == SessionState::InMatch {
            warn!(old = %self.match_id, new = %match_id, "Matched while in a match; replacing it");
            self.teardown();
        }

        info!(%match_id, local = %local.session_id, peers = presences.len(), "Matched");

        if !presences.iter().any(|p| p.session_id == local.session_id) {
            presences.push(local.clone());
        }
        // Same spawn order on every peer.
        presences.sort_by(|a, b| a.session_id.cmp(&b.session_id));

        self.match_id = match_id;
        self.local = Some(local);
        self.state = SessionState::InMatch;

        for presence in presences {
            self.spawn(presence);
        }

        self.host = elect(self.participants.keys(), Pick::Greatest);
        info!(host = ?self.host, "Host elected");
        self.notices.push(SessionNotice::HostChanged {
            host: self.host.clone(),
        });

        Dispatch::Applied
    }

    fn on_presence(&mut self, mut joins: Vec<Presence>, leaves: Vec<Presence>) -> Dispatch {
        if self.state != SessionState::InMatch {
            return Dispatch::Discarded(DiscardReason::NotInMatch);
        }

        joins.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        let mut joined_remote = false;
        for presence in joins {
            joined_remote |= self.spawn(presence);
        }
        if joined_remote && self.is_host() {
            self.replication_due = true;
        }

        let mut host_left = false;
        for presence in leaves {
            host_left |= self.host.as_ref() == Some(&presence.session_id);
            self.remove(&presence.session_id);
        }

        if host_left {
            let pick = match self.config.host_policy {
                HostPolicy::Greatest => Pick::Greatest,
                HostPolicy::GreatestThenLeast => Pick::Least,
            };
            self.host = elect(self.participants.keys(), pick);
            info!(host = ?self.host, "Host left; re-elected");
            self.notices.push(SessionNotice::HostChanged {
                host: self.host.clone(),
            });
        }

        Dispatch::Applied
    }

    fn on_match_state(
        &mut self,
        match_id: &MatchId,
        sender: &Presence,
        opcode: i64,
        payload: &[u8],
        clock: ReceiveClock,
    ) -> Result<Dispatch, SessionError> {
        if self.state != SessionState::InMatch {
            return Ok(Dispatch::Discarded(DiscardReason::NotInMatch));
        }

        let Some(entry) = self.participants.get_mut(&sender.session_id) else {
            return Ok(Dispatch::Discarded(DiscardReason::UnknownParticipant));
        };

        match &entry.participant {
            Participant::Remote {
                presence,
                match_id: joined,
            } if presence == sender && joined == match_id => {}
            _ => return Ok(Dispatch::Discarded(DiscardReason::IdentityMismatch)),
        }

        match OpCode::from_i64(opcode) {
            Some(OpCode::TankState) => {}
            _ => return Ok(Dispatch::Discarded(DiscardReason::UnhandledOpcode(opcode))),
        }

        let snapshot = WireSnapshot::decode(payload, self.config.wire_format)?;

        if self.config.drop_stale_snapshots && entry.predictor.is_stale(snapshot.send_time) {
            return Ok(Dispatch::Discarded(DiscardReason::Stale));
        }

        entry.predictor.on_remote_snapshot(
            &snapshot,
            clock.local_time,
            clock.latency,
            self.tunables.enable_prediction,
            self.tunables.enable_smoothing,
        );
        Ok(Dispatch::Applied)
    }

    fn on_tunables(&mut self, tunables: SessionTunables) -> Dispatch {
        if self.is_host() {
            return Dispatch::Discarded(DiscardReason::HostOwned);
        }
        if self.tunables != tunables {
            info!(?tunables, "Adopted host tunables");
        }
        self.tunables = tunables;
        Dispatch::Applied
    }

    /// Returns true if a remote participant was added.
    fn spawn(&mut self, presence: Presence) -> bool {
        if self.participants.contains_key(&presence.session_id) {
            return false;
        }

        let slot = self.next_spawn_slot();
        let predictor = EntityPredictor::new(KinematicState::spawned_at(slot.position), self.params)
            .with_clock_window(self.config.clock_window)
            .with_tick_seconds(self.config.tick_seconds());

        let session_id = presence.session_id.clone();
        let is_local = self.local_session() == Some(&session_id);

        let participant = if is_local {
            self.notices.push(SessionNotice::SpawnedLocal {
                session_id: session_id.clone(),
                slot,
            });
            Participant::Local {
                control: ControlSource::default(),
            }
        } else {
            self.notices.push(SessionNotice::SpawnedRemote {
                session_id: session_id.clone(),
                slot,
            });
            Participant::Remote {
                presence,
                match_id: self.match_id.clone(),
            }
        };

        info!(session = %session_id, local = is_local, slot = slot.index, "Spawned participant");
        self.participants.insert(
            session_id,
            ParticipantEntry {
                participant,
                predictor,
            },
        );
        !is_local
    }

    fn remove(&mut self, session_id: &SessionId) {
        if self.participants.remove(session_id).is_some() {
            info!(session = %session_id, "Removed participant");
            self.notices.push(SessionNotice::Removed {
                session_id: session_id.clone(),
            });
        }
    }

    fn next_spawn_slot(&mut self) -> SpawnSlot {
        let index = self.next_spawn;
        self.next_spawn = (self.next_spawn + 1) % self.spawn_points.len();
        self.bounce_direction = -self.bounce_direction;
        SpawnSlot {
            index,
            position: self.spawn_points[index],
            bounce_direction: self.bounce_direction,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn presence(id: &str) -> Presence {
        Presence::new(id, format!("user-{id}"), format!("name-{id}"))
    }

    fn clock() -> ReceiveClock {
        ReceiveClock {
            local_time: 1.0,
            latency: Duration::ZERO,
        }
    }

    fn matched(local: &str, ids: &[&str]) -> SessionEvent {
        SessionEvent::Matched {
            match_id: MatchId::new("m1"),
            local: presence(local),
            presences: ids.iter().map(|id| presence(id)).collect(),
        }
    }

    fn session_with(local: &str, ids: &[&str]) -> SessionManager {
        let mut s = SessionManager::new(TankConfig::default());
        s.begin_matchmaking();
        s.handle_event(matched(local, ids), clock()).unwrap();
        s
    }

    fn tank_state(sender: &str, x: f32) -> SessionEvent {
        let snap = WireSnapshot {
            send_time: 1.0,
            position: Vec2::new(x, 100.0),
            ..WireSnapshot::default()
        };
        SessionEvent::MatchState {
            match_id: MatchId::new("m1"),
            sender: presence(sender),
            opcode: OpCode::TankState.as_i64(),
            payload: snap.encode_binary(),
        }
    }

    #[test]
    fn matched_elects_greatest_and_spawns_one_local() {
        let mut s = session_with("alpha", &["alpha", "bravo"]);
        assert_eq!(s.state(), SessionState::InMatch);
        assert_eq!(s.host(), Some(&SessionId::from("bravo")));
        assert!(!s.is_host());

        let locals = s.participants().filter(|(_, e)| e.participant.is_local()).count();
        assert_eq!(locals, 1);
        assert!(s.participant(&"alpha".into()).unwrap().participant.is_local());

        let notices = s.drain_notices();
        assert!(matches!(&notices[0], SessionNotice::SpawnedLocal { session_id, .. } if session_id.as_str() == "alpha"));
        assert!(matches!(&notices[1], SessionNotice::SpawnedRemote { session_id, .. } if session_id.as_str() == "bravo"));
        assert!(s.drain_notices().is_empty());
    }

    #[test]
    fn local_missing_from_presences_is_still_spawned() {
        let s = session_with("zulu", &["alpha"]);
        assert_eq!(s.participant_count(), 2);
        assert!(s.is_host());
    }

    #[test]
    fn spawn_slots_round_robin_and_flip_bounce() {
        let mut s = session_with("a", &["a", "b"]);
        s.handle_event(
            SessionEvent::PresenceChanged {
                joins: vec![presence("c")],
                leaves: Vec::new(),
            },
            clock(),
        )
        .unwrap();

        let slots: Vec<SpawnSlot> = s
            .drain_notices()
            .into_iter()
            .filter_map(|n| match n {
                SessionNotice::SpawnedLocal { slot, .. } | SessionNotice::SpawnedRemote { slot, .. } => Some(slot),
                _ => None,
            })
            .collect();
        assert_eq!(slots.iter().map(|s| s.index).collect::<Vec<_>>(), [0, 1, 0]);
        assert_eq!(slots.iter().map(|s| s.bounce_direction).collect::<Vec<_>>(), [1, -1, 1]);
        assert_eq!(slots[0].position, Vec2::new(32.0, 226.0));
        assert_eq!(slots[1].position, Vec2::new(768.0, 226.0));
        assert_eq!(s.display_state(&"a".into()).unwrap().position, Vec2::new(32.0, 226.0));
    }

    #[test]
    fn duplicate_join_is_ignored() {
        let mut s = session_with("a", &["a", "b"]);
        s.drain_notices();
        s.handle_event(
            SessionEvent::PresenceChanged {
                joins: vec![presence("b")],
                leaves: Vec::new(),
            },
            clock(),
        )
        .unwrap();
        assert_eq!(s.participant_count(), 2);
        assert!(s.drain_notices().is_empty());
    }

    #[test]
    fn host_leaving_reelects_from_remaining() {
        let mut s = session_with("a", &["a", "b", "c"]);
        assert_eq!(s.host(), Some(&SessionId::from("c")));

        s.handle_event(
            SessionEvent::PresenceChanged {
                joins: Vec::new(),
                leaves: vec![presence("c")],
            },
            clock(),
        )
        .unwrap();
        assert_eq!(s.host(), Some(&SessionId::from("b")));
        assert!(s.participant(&"c".into()).is_none());
        assert!(s
            .drain_notices()
            .contains(&SessionNotice::Removed { session_id: "c".into() }));
    }

    #[test]
    fn asymmetric_policy_reelects_least() {
        let config = TankConfig {
            host_policy: HostPolicy::GreatestThenLeast,
            ..TankConfig::default()
        };
        let mut s = SessionManager::new(config);
        s.handle_event(matched("b", &["a", "b", "c"]), clock()).unwrap();
        assert_eq!(s.host(), Some(&SessionId::from("c")));

        s.handle_event(
            SessionEvent::PresenceChanged {
                joins: Vec::new(),
                leaves: vec![presence("c")],
            },
            clock(),
        )
        .unwrap();
        assert_eq!(s.host(), Some(&SessionId::from("a")));
    }

    #[test]
    fn non_host_leaving_keeps_host() {
        let mut s = session_with("a", &["a", "b", "c"]);
        s.handle_event(
            SessionEvent::PresenceChanged {
                joins: Vec::new(),
                leaves: vec![presence("b")],
            },
            clock(),
        )
        .unwrap();
        assert_eq!(s.host(), Some(&SessionId::from("c")));
    }

    #[test]
    fn state_from_unknown_session_mutates_nothing() {
        let mut s = session_with("a", &["a", "b"]);
        let before: Vec<KinematicState> = s.participants().map(|(_, e)| *e.predictor.simulation()).collect();

        let outcome = s.handle_event(tank_state("ghost", 500.0), clock()).unwrap();
        assert_eq!(outcome, Dispatch::Discarded(DiscardReason::UnknownParticipant));

        let after: Vec<KinematicState> = s.participants().map(|(_, e)| *e.predictor.simulation()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn state_with_wrong_identity_is_discarded() {
        let mut s = session_with("a", &["a", "b"]);

        let mut impostor = tank_state("b", 500.0);
        if let SessionEvent::MatchState { sender, .. } = &mut impostor {
            sender.user_id = "someone-else".into();
        }
        assert_eq!(
            s.handle_event(impostor, clock()).unwrap(),
            Dispatch::Discarded(DiscardReason::IdentityMismatch)
        );

        let mut old_match = tank_state("b", 500.0);
        if let SessionEvent::MatchState { match_id, .. } = &mut old_match {
            *match_id = MatchId::new("m0");
        }
        assert_eq!(
            s.handle_event(old_match, clock()).unwrap(),
            Dispatch::Discarded(DiscardReason::IdentityMismatch)
        );

        // Our own echo never drives the local tank.
        assert_eq!(
            s.handle_event(tank_state("a", 500.0), clock()).unwrap(),
            Dispatch::Discarded(DiscardReason::IdentityMismatch)
        );
        assert_eq!(s.display_state(&"b".into()).unwrap().position, Vec2::new(768.0, 226.0));
    }

    #[test]
    fn tank_state_reaches_remote_predictor() {
        let mut s = session_with("a", &["a", "b"]);
        assert_eq!(s.handle_event(tank_state("b", 500.0), clock()).unwrap(), Dispatch::Applied);

        let entry = s.participant(&"b".into()).unwrap();
        assert_eq!(entry.predictor.simulation().position, Vec2::new(500.0, 100.0));
        assert_eq!(entry.predictor.smoothing(), 1.0);
    }

    #[test]
    fn gameplay_opcodes_are_not_consumed() {
        let mut s = session_with("a", &["a", "b"]);
        for opcode in [2, 3, 4, 99] {
            let mut ev = tank_state("b", 500.0);
            if let SessionEvent::MatchState { opcode: op, .. } = &mut ev {
                *op = opcode;
            }
            assert_eq!(
                s.handle_event(ev, clock()).unwrap(),
                Dispatch::Discarded(DiscardReason::UnhandledOpcode(opcode))
            );
        }
    }

    #[test]
    fn malformed_packet_is_surfaced_without_mutation() {
        let mut s = session_with("a", &["a", "b"]);
        let mut ev = tank_state("b", 500.0);
        if let SessionEvent::MatchState { payload, .. } = &mut ev {
            *payload = payload.slice(..40);
        }
        let err = s.handle_event(ev, clock()).unwrap_err();
        assert_eq!(
            err,
            SessionError::Malformed(MalformedPacket::Truncated {
                expected: 44,
                actual: 40
            })
        );
        assert_eq!(s.display_state(&"b".into()).unwrap().position, Vec2::new(768.0, 226.0));
    }

    #[test]
    fn stale_packets_dropped_when_configured() {
        let config = TankConfig {
            drop_stale_snapshots: true,
            ..TankConfig::default()
        };
        let mut s = SessionManager::new(config);
        s.handle_event(matched("a", &["a", "b"]), clock()).unwrap();

        let newer = WireSnapshot {
            send_time: 2.0,
            ..WireSnapshot::default()
        };
        let older = WireSnapshot {
            send_time: 1.5,
            ..WireSnapshot::default()
        };
        for (snap, expected) in [
            (newer, Dispatch::Applied),
            (older, Dispatch::Discarded(DiscardReason::Stale)),
        ] {
            let ev = SessionEvent::MatchState {
                match_id: MatchId::new("m1"),
                sender: presence("b"),
                opcode: 1,
                payload: snap.encode_binary(),
            };
            assert_eq!(s.handle_event(ev, clock()).unwrap(), expected);
        }
    }

    #[test]
    fn only_host_changes_tunables() {
        let mut guest = session_with("a", &["a", "b"]);
        assert_eq!(
            guest.update_tunables(|t| t.enable_prediction = false),
            Err(SessionError::NotHost)
        );
        assert!(guest.tunables().enable_prediction);

        let mut host = session_with("b", &["a", "b"]);
        let t = host.update_tunables(|t| t.cycle_send_rate()).unwrap();
        assert_eq!(t.frames_between_packets, 3);

        assert_eq!(guest.set_tunables(SessionTunables::default()), Err(SessionError::NotHost));

        // Guests adopt replicated values; the host ignores its own echo.
        assert_eq!(
            guest.handle_event(SessionEvent::TunablesReplicated(t), clock()).unwrap(),
            Dispatch::Applied
        );
        assert_eq!(guest.tunables().frames_between_packets, 3);
        assert_eq!(
            host.handle_event(SessionEvent::TunablesReplicated(SessionTunables::default()), clock())
                .unwrap(),
            Dispatch::Discarded(DiscardReason::HostOwned)
        );
        assert_eq!(host.tunables().frames_between_packets, 3);
    }

    #[test]
    fn host_owes_tunables_to_late_joiners() {
        let join = |id: &str| SessionEvent::PresenceChanged {
            joins: vec![presence(id)],
            leaves: Vec::new(),
        };

        let mut host = session_with("b", &["a", "b"]);
        assert_eq!(host.take_pending_replication(), None);
        host.update_tunables(|t| t.cycle_send_rate()).unwrap();

        host.handle_event(join("c"), clock()).unwrap();
        let owed = host.take_pending_replication().expect("join should trigger replication");
        assert_eq!(owed.frames_between_packets, 3);
        assert_eq!(host.take_pending_replication(), None);

        // A repeated join spawns nothing, so nothing is owed.
        host.handle_event(join("c"), clock()).unwrap();
        assert_eq!(host.take_pending_replication(), None);

        let mut guest = session_with("a", &["a", "b"]);
        guest.handle_event(join("c"), clock()).unwrap();
        assert_eq!(guest.take_pending_replication(), None);
    }

    #[test]
    fn events_outside_a_match_are_discarded() {
        let mut s = SessionManager::new(TankConfig::default());
        assert_eq!(
            s.handle_event(tank_state("b", 1.0), clock()).unwrap(),
            Dispatch::Discarded(DiscardReason::NotInMatch)
        );
        assert_eq!(
            s.handle_event(
                SessionEvent::PresenceChanged {
                    joins: vec![presence("b")],
                    leaves: Vec::new()
                },
                clock()
            )
            .unwrap(),
            Dispatch::Discarded(DiscardReason::NotInMatch)
        );
        assert_eq!(s.participant_count(), 0);
    }

    #[test]
    fn teardown_resets_everything_and_is_idempotent() {
        let mut s = session_with("a", &["a", "b"]);
        s.drain_notices();
        s.teardown();

        assert_eq!(s.state(), SessionState::Disconnected);
        assert_eq!(s.participant_count(), 0);
        assert!(s.match_id().is_empty());
        assert!(s.host().is_none());
        assert!(s.local_session().is_none());
        assert_eq!(s.drain_notices().len(), 3);

        s.teardown();
        assert_eq!(s.state(), SessionState::Disconnected);
        assert!(s.drain_notices().is_empty());
    }

    #[test]
    fn remote_advance_leaves_local_alone() {
        let mut s = session_with("a", &["a", "b"]);
        s.handle_event(tank_state("b", 500.0), clock()).unwrap();
        let local_before = *s.display_state(&"a".into()).unwrap();

        s.advance_remotes();
        assert_eq!(*s.display_state(&"a".into()).unwrap(), local_before);
        assert!(s.participant(&"b".into()).unwrap().predictor.smoothing() < 1.0);
    }
}
