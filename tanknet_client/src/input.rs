//! Input handling.
//!
//! Device polling belongs to the host application. This module only shapes
//! sampled sticks into the per-tick control input a local tank is stepped with.

use serde::{Deserialize, Serialize};
use tanknet_shared::{kinematics::ControlInput, math::Vec2};

/// Which local controller drives a tank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct ControlSource(pub u8);

/// User input state at a moment in time, in stick space (y up).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputState {
    pub movement: Vec2,
    pub turret: Vec2,
}

impl InputState {
    pub fn new(movement: Vec2, turret: Vec2) -> Self {
        Self { movement, turret }
    }

    /// Scales each stick down to unit length; shorter vectors pass through.
    pub fn normalized(self) -> Self {
        Self {
            movement: clamp_unit(self.movement),
            turret: clamp_unit(self.turret),
        }
    }

    pub fn control(self) -> ControlInput {
        let n = self.normalized();
        ControlInput {
            movement: n.movement,
            turret: n.turret,
        }
    }
}

fn clamp_unit(v: Vec2) -> Vec2 {
    if v.len_sq() > 1.0 {
        v.normalize_or_zero()
    } else {
        v
    }
}
