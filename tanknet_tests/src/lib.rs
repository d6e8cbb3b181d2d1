//! Helpers shared by the integration tests.

use std::sync::Arc;

use tanknet_client::{input::InputState, DispatchHandle, DispatchQueue, LoopbackHub, LoopbackTransport, TankClient};
use tanknet_shared::{config::TankConfig, kinematics::KinematicState, math::Vec2, net::{Presence, SessionId}};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

pub fn presence(id: &str) -> Presence {
    Presence::new(id, format!("user-{id}"), format!("Tank {id}"))
}

/// A client plus a second handle to its transport and inbound queue.
pub struct TestPeer {
    pub id: SessionId,
    pub client: TankClient,
    pub transport: LoopbackTransport,
    pub inbox: DispatchHandle,
}

impl TestPeer {
    pub fn join(hub: &LoopbackHub, id: &str, config: TankConfig) -> Self {
        let queue = DispatchQueue::new();
        let inbox = queue.handle();
        let transport = hub.connect(presence(id), queue.handle());
        let mut client = TankClient::new(config, queue, Arc::new(transport.clone()));
        client.begin_matchmaking();
        Self {
            id: SessionId::from(id),
            client,
            transport,
            inbox,
        }
    }

    /// How this peer currently draws `other`'s tank.
    pub fn sees(&self, other: &TestPeer) -> Option<KinematicState> {
        self.client.display_state(&other.id).copied()
    }

    /// `self`'s own tank.
    pub fn own(&self) -> Option<KinematicState> {
        self.client.display_state(&self.id).copied()
    }
}

pub fn drive(movement: Vec2) -> InputState {
    InputState::new(movement, Vec2::ZERO)
}

/// Ticks `mover` with `input` and every other peer idle, `n` times, in order.
pub async fn run_ticks(mover: &mut TestPeer, others: &mut [&mut TestPeer], input: InputState, n: usize) {
    for _ in 0..n {
        mover.client.tick(input).await;
        for peer in others.iter_mut() {
            peer.client.tick(InputState::default()).await;
        }
    }
}
