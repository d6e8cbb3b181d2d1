//! Prediction and smoothing.
//!
//! Every networked tank keeps three copies of its kinematic state:
//! - `simulation`: best estimate of where the tank really is. Local tanks
//!   step it from their own inputs; remote tanks have it overwritten by each
//!   packet and then extrapolated forward.
//! - `previous`: what was on screen when the last packet landed. It is the
//!   start point of the blend that hides the jump.
//! - `display`: what gets drawn, blended from `previous` toward `simulation`
//!   as the smoothing ratio decays from 1 to 0.

use std::time::Duration;

use tanknet_shared::{
    codec::WireSnapshot,
    kinematics::{step, ControlInput, KinematicParams, KinematicState},
    math::{lerp_angle, Vec2},
    rolling_average::{RollingAverage, DEFAULT_CAPACITY},
};
use tracing::{trace, warn};

/// Length of one prediction tick.
pub const PREDICTION_TICK_SECONDS: f32 = 1.0 / 60.0;

/// Upper bound on catch-up steps for a single packet.
pub const MAX_CATCH_UP_TICKS: u32 = 600;

/// Residue of the smoothing ratio, relative to one tick's decay, that is
/// treated as finished.
const DECAY_SNAP: f32 = 1e-3;

/// Prediction/smoothing state for one networked tank.
#[derive(Debug, Clone)]
pub struct EntityPredictor {
    simulation: KinematicState,
    previous: KinematicState,
    display: KinematicState,

    input: ControlInput,
    params: KinematicParams,

    /// Blend weight of `previous` in `display`; 1 right after a packet, 0 when settled.
    smoothing: f32,

    /// Rolling average of `local_time - send_time` over recent packets.
    clock_delta: RollingAverage,
    last_send_time: Option<f32>,
    tick_seconds: f32,
}

impl EntityPredictor {
    /// Creates a predictor with all three states set to `initial`.
    pub fn new(initial: KinematicState, params: KinematicParams) -> Self {
        Self {
            simulation: initial,
            previous: initial,
            display: initial,
            input: ControlInput::default(),
            params,
            smoothing: 0.0,
            clock_delta: RollingAverage::new(DEFAULT_CAPACITY),
            last_send_time: None,
            tick_seconds: PREDICTION_TICK_SECONDS,
        }
    }

    /// Replaces the clock-delta window with one spanning `packets` packets.
    pub fn with_clock_window(mut self, packets: usize) -> Self {
        self.clock_delta = RollingAverage::new(packets);
        self
    }

    /// Overrides the catch-up tick length.
    pub fn with_tick_seconds(mut self, seconds: f32) -> Self {
        if seconds > 0.0 {
            self.tick_seconds = seconds;
        }
        self
    }

    pub fn display(&self) -> &KinematicState {
        &self.display
    }

    pub fn simulation(&self) -> &KinematicState {
        &self.simulation
    }

    pub fn previous(&self) -> &KinematicState {
        &self.previous
    }

    pub fn input(&self) -> &ControlInput {
        &self.input
    }

    pub fn smoothing(&self) -> f32 {
        self.smoothing
    }

    pub fn last_send_time(&self) -> Option<f32> {
        self.last_send_time
    }

    /// Steps a locally controlled tank. The owner always sees its own truth,
    /// so nothing is smoothed.
    pub fn update_local(&mut self, movement: Vec2, turret: Vec2) {
        self.input = ControlInput { movement, turret };
        self.simulation = step(&self.simulation, &self.input, &self.params);
        self.display = self.simulation;
    }

    /// Packet describing this (local) tank as of `send_time`.
    pub fn write_snapshot(&self, send_time: f32) -> WireSnapshot {
        WireSnapshot::new(send_time, &self.simulation, &self.input)
    }

    /// True when `send_time` predates the last packet applied.
    pub fn is_stale(&self, send_time: f32) -> bool {
        self.last_send_time.is_some_and(|last| send_time < last)
    }

    /// Applies an authoritative packet for a remote tank.
    ///
    /// `local_time` is our game clock when the packet is read and
    /// `estimated_latency` the transport's average one-way delay. Returns the
    /// number of catch-up steps run.
    pub fn on_remote_snapshot(
        &mut self,
        snapshot: &WireSnapshot,
        local_time: f32,
        estimated_latency: Duration,
        enable_prediction: bool,
        enable_smoothing: bool,
    ) -> u32 {
        if enable_smoothing {
            self.previous = self.display;
            self.smoothing = 1.0;
        } else {
            self.smoothing = 0.0;
        }

        self.simulation = snapshot.state();
        self.input = snapshot.input();
        self.last_send_time = Some(snapshot.send_time);

        if enable_prediction {
            self.catch_up(local_time, snapshot.send_time, estimated_latency)
        } else {
            0
        }
    }

    /// Replays `simulation` forward by however long the packet was in flight.
    ///
    /// The transport's latency is an average. Comparing this packet's clock
    /// delta against the rolling mean of recent deltas tells how much earlier
    /// or later than usual it arrived, without the clocks being synchronized.
    fn catch_up(&mut self, local_time: f32, send_time: f32, estimated_latency: Duration) -> u32 {
        let delta = local_time - send_time;
        self.clock_delta.add_value(delta);
        let deviation = delta - self.clock_delta.average_value();

        let mut latency = estimated_latency.as_secs_f32() + deviation;
        let mut ticks = 0;
        while latency >= self.tick_seconds && ticks < MAX_CATCH_UP_TICKS {
            self.simulation = step(&self.simulation, &self.input, &self.params);
            latency -= self.tick_seconds;
            ticks += 1;
        }

        if ticks == MAX_CATCH_UP_TICKS {
            warn!(latency, deviation, "catch-up capped; remaining latency dropped");
        }
        trace!(delta, deviation, ticks, "applied prediction catch-up");
        ticks
    }

    /// Per-tick update for a remote tank, whether or not a packet arrived.
    pub fn advance(&mut self, frames_between_packets: u32, enable_prediction: bool) {
        // Decay so the blend completes just as the next packet is due.
        let decay = 1.0 / frames_between_packets.max(1) as f32;
        self.smoothing = if self.smoothing - decay > decay * DECAY_SNAP {
            self.smoothing - decay
        } else {
            0.0
        };

        if enable_prediction {
            self.simulation = step(&self.simulation, &self.input, &self.params);

            // Keep both ends of the blend moving so it doesn't look frozen.
            if self.smoothing > 0.0 {
                self.previous = step(&self.previous, &self.input, &self.params);
            }
        }

        self.display = if self.smoothing > 0.0 {
            blend(&self.simulation, &self.previous, self.smoothing)
        } else {
            self.simulation
        };
    }
}

/// Interpolates from `to` (t = 0) toward `from` (t = 1).
fn blend(to: &KinematicState, from: &KinematicState, t: f32) -> KinematicState {
    KinematicState {
        position: to.position.lerp(from.position, t),
        velocity: to.velocity.lerp(from.velocity, t),
        body_rotation: lerp_angle(to.body_rotation, from.body_rotation, t),
        turret_rotation: lerp_angle(to.turret_rotation, from.turret_rotation, t),
    }
}
