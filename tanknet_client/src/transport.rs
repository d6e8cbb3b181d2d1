//! Relay transport seam.
//!
//! The relay service (matchmaking, presence, match-state fan-out) lives
//! outside this crate. [`MatchTransport`] is everything the client needs from
//! it. [`LoopbackHub`] is an in-process relay used by the demo binary and the
//! integration tests; it can simulate the latency and loss of a real network.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use anyhow::bail;
use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use tanknet_shared::{
    config::{NetworkQuality, SessionTunables},
    net::{MatchId, OpCode, Presence, SessionId},
};
use tracing::{debug, info, trace};

use crate::{dispatch::DispatchHandle, session::SessionEvent};

/// Outbound half of the relay connection.
#[async_trait]
pub trait MatchTransport: Send + Sync {
    /// Broadcasts a match-state message to the other members of `match_id`.
    async fn send_match_state(&self, match_id: &MatchId, opcode: OpCode, payload: Bytes) -> anyhow::Result<()>;

    /// Leaves `match_id`. Peers see a presence leave.
    async fn leave_match(&self, match_id: &MatchId) -> anyhow::Result<()>;

    /// Publishes host-owned tunables to the other members.
    async fn replicate_tunables(&self, match_id: &MatchId, tunables: &SessionTunables) -> anyhow::Result<()>;

    /// Measured round-trip time to the relay, or zero when unknown.
    fn round_trip_time(&self) -> Duration;
}

#[derive(Debug)]
struct Peer {
    presence: Presence,
    handle: DispatchHandle,
    match_id: Option<MatchId>,
}

#[derive(Debug, Default)]
struct HubState {
    peers: BTreeMap<SessionId, Peer>,
    quality: NetworkQuality,
}

impl HubState {
    fn members<'a>(&'a self, match_id: &'a MatchId) -> impl Iterator<Item = &'a Peer> + 'a {
        self.peers
            .values()
            .filter(move |p| p.match_id.as_ref() == Some(match_id))
    }

    fn is_member(&self, session_id: &SessionId, match_id: &MatchId) -> bool {
        self.peers
            .get(session_id)
            .is_some_and(|p| p.match_id.as_ref() == Some(match_id))
    }
}

/// In-process relay. Cheap to clone; clones share the same peers.
#[derive(Debug, Clone, Default)]
pub struct LoopbackHub {
    state: Arc<Mutex<HubState>>,
}

impl LoopbackHub {
    pub fn new(quality: NetworkQuality) -> Self {
        let hub = Self::default();
        hub.set_quality(quality);
        hub
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn quality(&self) -> NetworkQuality {
        self.lock().quality
    }

    pub fn set_quality(&self, quality: NetworkQuality) {
        self.lock().quality = quality;
    }

    /// Registers a peer whose inbound events go to `handle`.
    pub fn connect(&self, presence: Presence, handle: DispatchHandle) -> LoopbackTransport {
        info!(session = %presence.session_id, user = %presence.username, "Peer connected to loopback relay");
        self.lock().peers.insert(
            presence.session_id.clone(),
            Peer {
                presence: presence.clone(),
                handle,
                match_id: None,
            },
        );
        LoopbackTransport {
            hub: self.clone(),
            presence,
            fail_leaves: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Puts every connected, unmatched peer into `match_id` and tells each
    /// of them. Returns how many peers were matched.
    pub fn matchmake(&self, match_id: MatchId) -> usize {
        let mut state = self.lock();

        let mut matched = Vec::new();
        for peer in state.peers.values_mut().filter(|p| p.match_id.is_none()) {
            peer.match_id = Some(match_id.clone());
            matched.push(peer.presence.clone());
        }

        for presence in &matched {
            if let Some(peer) = state.peers.get(&presence.session_id) {
                peer.handle.enqueue(SessionEvent::Matched {
                    match_id: match_id.clone(),
                    local: presence.clone(),
                    presences: matched.clone(),
                });
            }
        }

        info!(%match_id, peers = matched.len(), "Loopback match formed");
        matched.len()
    }

    /// Adds a connected, unmatched peer to a running match. The joiner gets
    /// `Matched` with every member; existing members see a presence join.
    pub fn join_match(&self, session_id: &SessionId, match_id: &MatchId) -> anyhow::Result<()> {
        let mut state = self.lock();
        let joiner = match state.peers.get_mut(session_id) {
            Some(peer) if peer.match_id.is_none() => {
                peer.match_id = Some(match_id.clone());
                peer.presence.clone()
            }
            Some(_) => bail!("{session_id} is already in a match"),
            None => bail!("{session_id} is not connected"),
        };

        let members: Vec<Presence> = state.members(match_id).map(|p| p.presence.clone()).collect();
        for peer in state.members(match_id) {
            if peer.presence.session_id == *session_id {
                peer.handle.enqueue(SessionEvent::Matched {
                    match_id: match_id.clone(),
                    local: joiner.clone(),
                    presences: members.clone(),
                });
            } else {
                peer.handle.enqueue(SessionEvent::PresenceChanged {
                    joins: vec![joiner.clone()],
                    leaves: Vec::new(),
                });
            }
        }

        info!(session = %session_id, %match_id, "Peer joined loopback match");
        Ok(())
    }
}

/// One peer's connection to a [`LoopbackHub`].
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    hub: LoopbackHub,
    presence: Presence,
    fail_leaves: Arc<AtomicBool>,
}

impl LoopbackTransport {
    pub fn presence(&self) -> &Presence {
        &self.presence
    }

    /// Makes subsequent `leave_match` calls fail, as a dropped relay
    /// connection would.
    pub fn fail_leaves(&self, fail: bool) {
        self.fail_leaves.store(fail, Ordering::Relaxed);
    }
}

/// Delivers `event` after the simulated delay, or drops it to simulate loss.
fn deliver_lossy(handle: &DispatchHandle, event: SessionEvent, quality: NetworkQuality) {
    let loss = quality.packet_loss();
    if loss > 0.0 && rand::thread_rng().gen_bool(loss) {
        trace!("Simulated packet loss");
        return;
    }

    let delay = quality.simulated_latency();
    if delay.is_zero() {
        handle.enqueue(event);
        return;
    }

    match tokio::runtime::Handle::try_current() {
        Ok(rt) => {
            let handle = handle.clone();
            rt.spawn(async move {
                tokio::time::sleep(delay).await;
                handle.enqueue(event);
            });
        }
        Err(_) => {
            handle.enqueue(event);
        }
    }
}

#[async_trait]
impl MatchTransport for LoopbackTransport {
    async fn send_match_state(&self, match_id: &MatchId, opcode: OpCode, payload: Bytes) -> anyhow::Result<()> {
        let state = self.hub.lock();
        if !state.is_member(&self.presence.session_id, match_id) {
            bail!("{} is not in match {match_id}", self.presence.session_id);
        }

        for peer in state
            .members(match_id)
            .filter(|p| p.presence.session_id != self.presence.session_id)
        {
            let event = SessionEvent::MatchState {
                match_id: match_id.clone(),
                sender: self.presence.clone(),
                opcode: opcode.as_i64(),
                payload: payload.clone(),
            };
            deliver_lossy(&peer.handle, event, state.quality);
        }
        Ok(())
    }

    async fn leave_match(&self, match_id: &MatchId) -> anyhow::Result<()> {
        if self.fail_leaves.load(Ordering::Relaxed) {
            bail!("relay rejected leave for match {match_id}");
        }

        let mut state = self.hub.lock();
        if !state.is_member(&self.presence.session_id, match_id) {
            bail!("{} is not in match {match_id}", self.presence.session_id);
        }
        if let Some(peer) = state.peers.get_mut(&self.presence.session_id) {
            peer.match_id = None;
        }

        for peer in state.members(match_id) {
            peer.handle.enqueue(SessionEvent::PresenceChanged {
                joins: Vec::new(),
                leaves: vec![self.presence.clone()],
            });
        }
        debug!(session = %self.presence.session_id, %match_id, "Left loopback match");
        Ok(())
    }

    async fn replicate_tunables(&self, match_id: &MatchId, tunables: &SessionTunables) -> anyhow::Result<()> {
        let mut state = self.hub.lock();
        if !state.is_member(&self.presence.session_id, match_id) {
            bail!("{} is not in match {match_id}", self.presence.session_id);
        }
        state.quality = tunables.network_quality;

        for peer in state
            .members(match_id)
            .filter(|p| p.presence.session_id != self.presence.session_id)
        {
            peer.handle.enqueue(SessionEvent::TunablesReplicated(*tunables));
        }
        Ok(())
    }

    fn round_trip_time(&self) -> Duration {
        Duration::ZERO
    }
}
