//! Tank kinematics.
//!
//! A single deterministic step function drives every copy of tank state:
//! the locally controlled tank, the prediction of a remote tank between
//! packets, and the catch-up replay applied when a delayed packet arrives.

use std::f32::consts::PI;

use serde::{Deserialize, Serialize};

use crate::math::{wrap_angle, Vec2};

/// Size of the playfield positions are clamped into.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldBounds {
    pub width: f32,
    pub height: f32,
}

impl WorldBounds {
    pub fn max(self) -> Vec2 {
        Vec2::new(self.width, self.height)
    }
}

impl Default for WorldBounds {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 452.0,
        }
    }
}

/// Per-tick tuning constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KinematicParams {
    /// Radians per tick the hull may turn.
    pub body_turn_rate: f32,
    /// Radians per tick the turret may turn.
    pub turret_turn_rate: f32,
    /// Forward acceleration at perfect alignment.
    pub thrust: f32,
    /// Velocity multiplier applied after integration.
    pub friction: f32,
    pub bounds: WorldBounds,
}

impl Default for KinematicParams {
    fn default() -> Self {
        Self {
            body_turn_rate: 0.01,
            turret_turn_rate: 0.03,
            thrust: 0.3,
            friction: 0.9,
            bounds: WorldBounds::default(),
        }
    }
}

/// Kinematic state of one tank.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct KinematicState {
    pub position: Vec2,
    pub velocity: Vec2,
    pub body_rotation: f32,
    pub turret_rotation: f32,
}

impl KinematicState {
    /// A stationary tank at `position`, hull and turret facing up the screen.
    pub fn spawned_at(position: Vec2) -> Self {
        Self {
            position,
            velocity: Vec2::ZERO,
            body_rotation: -PI / 2.0,
            turret_rotation: -PI / 2.0,
        }
    }
}

/// Control inputs in stick space: x right, y up.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ControlInput {
    pub movement: Vec2,
    pub turret: Vec2,
}

/// Screen-space heading of a stick vector. Stick y is inverted against screen y.
pub fn heading_of(target: Vec2) -> f32 {
    (-target.y).atan2(target.x)
}

/// Rotates `rotation` toward the heading of `target` by at most `turn_rate`,
/// taking the shorter way round. A zero target leaves the rotation alone.
pub fn turn_to_face(rotation: f32, target: Vec2, turn_rate: f32) -> f32 {
    if target == Vec2::ZERO {
        return rotation;
    }

    let angle = heading_of(target);
    let difference = wrap_angle(rotation - angle);
    let turn = turn_rate.clamp(0.0, PI);

    if difference.abs() <= turn {
        wrap_angle(angle)
    } else if difference < 0.0 {
        wrap_angle(rotation + turn)
    } else {
        wrap_angle(rotation - turn)
    }
}

/// Advances `state` by one tick under `input`.
pub fn step(state: &KinematicState, input: &ControlInput, params: &KinematicParams) -> KinematicState {
    let mut next = *state;

    next.body_rotation = turn_to_face(state.body_rotation, input.movement, params.body_turn_rate);
    next.turret_rotation =
        turn_to_face(state.turret_rotation, input.turret, params.turret_turn_rate);

    let forward = Vec2::from_angle(next.body_rotation);
    let desired = Vec2::new(input.movement.x, -input.movement.y);
    let alignment = forward.dot(desired);

    // Thrust ramps in with the square of alignment; nothing while facing away.
    if alignment > 0.0 {
        next.velocity += forward * (alignment * alignment * params.thrust);
    }

    next.position += next.velocity;
    next.velocity *= params.friction;
    next.position = next.position.clamp(Vec2::ZERO, params.bounds.max());

    next
}
