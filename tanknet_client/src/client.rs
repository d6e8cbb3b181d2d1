//! Client driver.
//!
//! The client owns:
//! - The session manager (participants, host, tunables)
//! - The dispatch queue transport callbacks feed into
//! - The outbound transport
//! - The fixed-rate local clock and send cadence
//!
//! Everything runs from [`TankClient::tick`]; nothing here blocks on the
//! network.

use std::{sync::Arc, time::Duration};

use tanknet_shared::{
    config::{SessionTunables, TankConfig},
    kinematics::KinematicState,
    net::{OpCode, SessionId},
};
use tracing::{debug, info, warn};

use crate::{
    dispatch::{DispatchHandle, DispatchQueue},
    input::InputState,
    session::{Dispatch, ReceiveClock, SessionError, SessionManager, SessionNotice, SessionState},
    transport::MatchTransport,
};

/// What happened during one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// A tank packet went out this tick.
    pub sent: bool,
    pub applied: usize,
    pub discarded: usize,
    pub malformed: usize,
}

/// Tears the session down when dropped, so leaving a match always finishes
/// locally even if the leave request fails or is cancelled.
struct TeardownGuard<'a> {
    session: &'a mut SessionManager,
}

impl Drop for TeardownGuard<'_> {
    fn drop(&mut self) {
        self.session.teardown();
    }
}

/// High-level tank client.
pub struct TankClient {
    config: TankConfig,
    session: SessionManager,
    queue: DispatchQueue,
    transport: Arc<dyn MatchTransport>,

    tick: u64,
    frames_since_send: u32,
    local_time: f32,
}

impl TankClient {
    /// Creates a client. `queue` must be the queue whose handle the transport
    /// delivers into.
    pub fn new(config: TankConfig, queue: DispatchQueue, transport: Arc<dyn MatchTransport>) -> Self {
        Self {
            session: SessionManager::new(config.clone()),
            config,
            queue,
            transport,
            tick: 0,
            frames_since_send: 0,
            local_time: 0.0,
        }
    }

    pub fn config(&self) -> &TankConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn is_host(&self) -> bool {
        self.session.is_host()
    }

    pub fn tunables(&self) -> &SessionTunables {
        self.session.tunables()
    }

    pub fn local_session(&self) -> Option<&SessionId> {
        self.session.local_session()
    }

    pub fn display_state(&self, id: &SessionId) -> Option<&KinematicState> {
        self.session.display_state(id)
    }

    pub fn dispatch_handle(&self) -> DispatchHandle {
        self.queue.handle()
    }

    pub fn drain_notices(&mut self) -> Vec<SessionNotice> {
        self.session.drain_notices()
    }

    /// Game clock in seconds.
    pub fn local_time(&self) -> f32 {
        self.local_time
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn begin_matchmaking(&mut self) {
        self.session.begin_matchmaking();
    }

    /// One-way latency to assume for incoming packets.
    pub fn estimated_latency(&self) -> Duration {
        let simulated = self.session.tunables().network_quality.simulated_latency();
        let estimate = simulated + self.transport.round_trip_time() / 2;
        if estimate.is_zero() {
            self.config.fallback_latency()
        } else {
            estimate
        }
    }

    /// Runs one fixed logic frame.
    pub async fn tick(&mut self, input: InputState) -> TickReport {
        let mut report = TickReport::default();

        let frames_between_packets = self.session.tunables().frames_between_packets.max(1);
        self.frames_since_send += 1;
        let send_now = self.frames_since_send >= frames_between_packets;
        if send_now {
            self.frames_since_send = 0;
        }

        // Local tank.
        let control = input.control();
        let local_time = self.local_time;
        let wire_format = self.config.wire_format;
        let outgoing = self.session.local_predictor_mut().and_then(|predictor| {
            predictor.update_local(control.movement, control.turret);
            send_now.then(|| predictor.write_snapshot(local_time).encode(wire_format))
        });

        if let Some(payload) = outgoing {
            let match_id = self.session.match_id().clone();
            match self
                .transport
                .send_match_state(&match_id, OpCode::TankState, payload)
                .await
            {
                Ok(()) => report.sent = true,
                Err(e) => warn!(error = %e, "Failed to send tank state"),
            }
        }

        // Inbound events, in arrival order.
        let clock = ReceiveClock {
            local_time,
            latency: self.estimated_latency(),
        };
        for event in self.queue.drain() {
            match self.session.handle_event(event, clock) {
                Ok(Dispatch::Applied) => report.applied += 1,
                Ok(Dispatch::Discarded(_)) => report.discarded += 1,
                Err(e) => {
                    warn!(error = %e, "Dropped malformed packet");
                    report.malformed += 1;
                }
            }
        }

        // Peers that joined mid-match start from the host's tunables.
        if let Some(tunables) = self.session.take_pending_replication() {
            let match_id = self.session.match_id().clone();
            if let Err(e) = self.transport.replicate_tunables(&match_id, &tunables).await {
                warn!(error = %e, "Failed to replicate tunables to joiners");
            }
        }

        // Remote tanks.
        self.session.advance_remotes();

        self.local_time += self.config.tick_seconds();
        self.tick += 1;
        report
    }

    /// Leaves the current match. The session is torn down whether or not the
    /// relay accepts the leave. Safe to call when not in a match.
    pub async fn quit_match(&mut self) {
        let match_id = self.session.match_id().clone();
        let guard = TeardownGuard {
            session: &mut self.session,
        };

        if !match_id.is_empty() {
            info!(%match_id, "Leaving match");
            if let Err(e) = self.transport.leave_match(&match_id).await {
                warn!(error = %e, %match_id, "Leave request failed; tearing down locally");
            }
        }

        drop(guard);

        // Anything still queued belongs to the match we just left.
        let stale = self.queue.drain().len();
        if stale > 0 {
            debug!(stale, "Discarded events from previous match");
        }
        self.frames_since_send = 0;
    }

    /// Applies a host-only change and replicates the result to peers.
    pub async fn change_tunables(
        &mut self,
        change: impl FnOnce(&mut SessionTunables),
    ) -> Result<SessionTunables, SessionError> {
        let tunables = self.session.update_tunables(change)?;
        let match_id = self.session.match_id().clone();
        if let Err(e) = self.transport.replicate_tunables(&match_id, &tunables).await {
            warn!(error = %e, "Failed to replicate tunables");
        }
        Ok(tunables)
    }

    pub async fn cycle_network_quality(&mut self) -> Result<SessionTunables, SessionError> {
        self.change_tunables(|t| t.network_quality = t.network_quality.next())
            .await
    }

    pub async fn cycle_send_rate(&mut self) -> Result<SessionTunables, SessionError> {
        self.change_tunables(SessionTunables::cycle_send_rate).await
    }

    pub async fn toggle_prediction(&mut self) -> Result<SessionTunables, SessionError> {
        self.change_tunables(|t| t.enable_prediction = !t.enable_prediction)
            .await
    }

    pub async fn toggle_smoothing(&mut self) -> Result<SessionTunables, SessionError> {
        self.change_tunables(|t| t.enable_smoothing = !t.enable_smoothing)
            .await
    }

    /// Executes a console command.
    pub async fn exec_command(&mut self, line: &str) -> anyhow::Result<Vec<String>> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(&command) = tokens.first() else {
            return Ok(Vec::new());
        };

        let changed = match command {
            "status" => {
                let mut out = Vec::new();
                out.push(format!("State: {:?}", self.session.state()));
                out.push(format!("Match: {}", self.session.match_id()));
                out.push(format!("Host: {:?} (local host: {})", self.session.host(), self.is_host()));
                out.push(format!("Tick: {}", self.tick));
                out.push(format!("Participants: {}", self.session.participant_count()));
                out.push(format!("Tunables: {:?}", self.tunables()));
                out.push(format!("Estimated latency: {:?}", self.estimated_latency()));
                return Ok(out);
            }
            "quality" => self.cycle_network_quality().await,
            "sendrate" => self.cycle_send_rate().await,
            "predict" => self.toggle_prediction().await,
            "smooth" => self.toggle_smoothing().await,
            "quit" | "leave" => {
                self.quit_match().await;
                return Ok(vec!["Left match".to_string()]);
            }
            other => anyhow::bail!("unknown command: {other}"),
        };

        match changed {
            Ok(t) => Ok(vec![format!("Tunables: {t:?}")]),
            Err(SessionError::NotHost) => Ok(vec!["Only the host can change match options".to_string()]),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackHub;
    use tanknet_shared::{
        config::NetworkQuality,
        math::Vec2,
        net::{MatchId, Presence},
    };

    fn client(hub: &LoopbackHub, id: &str) -> TankClient {
        let queue = DispatchQueue::new();
        let transport = hub.connect(Presence::new(id, id, id), queue.handle());
        TankClient::new(TankConfig::default(), queue, Arc::new(transport))
    }

    #[tokio::test]
    async fn sends_every_nth_tick() {
        let hub = LoopbackHub::new(NetworkQuality::Perfect);
        let mut a = client(&hub, "a");
        hub.matchmake(MatchId::new("m"));

        let mut sent = Vec::new();
        for _ in 0..12 {
            sent.push(a.tick(InputState::default()).await.sent);
        }
        // First tick only handles the match event; nobody is spawned yet.
        let sends: Vec<usize> = sent.iter().enumerate().filter(|(_, s)| **s).map(|(i, _)| i).collect();
        assert_eq!(sends, [5, 11]);
    }

    #[tokio::test]
    async fn fallback_latency_when_transport_reports_none() {
        let hub = LoopbackHub::new(NetworkQuality::Perfect);
        let mut a = client(&hub, "a");
        assert_eq!(a.estimated_latency(), Duration::from_millis(100));

        hub.matchmake(MatchId::new("m"));
        a.tick(InputState::default()).await;
        a.change_tunables(|t| t.network_quality = NetworkQuality::Perfect)
            .await
            .unwrap();
        assert_eq!(a.estimated_latency(), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn local_tank_moves_with_input() {
        let hub = LoopbackHub::new(NetworkQuality::Perfect);
        let mut a = client(&hub, "a");
        hub.matchmake(MatchId::new("m"));
        a.tick(InputState::default()).await;

        let id = SessionId::from("a");
        let start = *a.display_state(&id).unwrap();
        for _ in 0..60 {
            a.tick(InputState::new(Vec2::new(0.0, 1.0), Vec2::ZERO)).await;
        }
        let end = *a.display_state(&id).unwrap();
        assert!(end.position.y < start.position.y, "tank should drive up the screen");
        assert!((a.local_time() - 61.0 / 60.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn quit_is_idempotent_and_resets() {
        let hub = LoopbackHub::new(NetworkQuality::Perfect);
        let mut a = client(&hub, "a");
        hub.matchmake(MatchId::new("m"));
        a.tick(InputState::default()).await;
        assert_eq!(a.state(), SessionState::InMatch);

        a.quit_match().await;
        assert_eq!(a.state(), SessionState::Disconnected);
        a.quit_match().await;
        assert_eq!(a.state(), SessionState::Disconnected);
        assert!(!a.tick(InputState::default()).await.sent);
    }

    #[tokio::test]
    async fn console_commands() -> anyhow::Result<()> {
        let hub = LoopbackHub::new(NetworkQuality::Perfect);
        let mut a = client(&hub, "a");
        let mut b = client(&hub, "b");
        hub.matchmake(MatchId::new("m"));
        a.tick(InputState::default()).await;
        b.tick(InputState::default()).await;

        assert!(b.is_host());
        assert_eq!(
            a.exec_command("sendrate").await?,
            ["Only the host can change match options"]
        );
        b.exec_command("sendrate").await?;
        assert_eq!(b.tunables().frames_between_packets, 3);

        a.tick(InputState::default()).await;
        assert_eq!(a.tunables().frames_between_packets, 3);

        assert!(a.exec_command("status").await?.len() > 3);
        assert!(a.exec_command("bogus").await.is_err());
        assert!(a.exec_command("   ").await?.is_empty());
        Ok(())
    }
}
