//! Tank state packet codec.
//!
//! Two encodings of the same [`WireSnapshot`]:
//! - Binary: 44 bytes, eleven little-endian `f32`s, no prefix and no version.
//!   Changing the field order breaks the wire.
//! - Text: a flat JSON object of decimal strings, one key per scalar.
//!
//! Decimal strings use Rust's shortest round-trip float formatting, so text
//! normally reproduces the exact bits; peers that format floats differently
//! may lose precision, which is accepted.

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    kinematics::{ControlInput, KinematicState},
    math::Vec2,
};

/// Size of an encoded binary snapshot.
pub const SNAPSHOT_LEN: usize = 44;

/// Keys of the textual form, in wire order.
pub const TEXT_KEYS: [&str; 11] = [
    "totalSeconds",
    "position.x",
    "position.y",
    "velocity.x",
    "velocity.y",
    "tankRotation",
    "turretRotation",
    "tankInput.x",
    "tankInput.y",
    "turretInput.x",
    "turretInput.y",
];

/// Rejected packet. Nothing is applied when decoding fails.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MalformedPacket {
    #[error("binary snapshot needs {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("textual snapshot is missing key `{0}`")]
    MissingKey(&'static str),
    #[error("textual snapshot key `{key}` holds non-numeric value `{value}`")]
    NotANumber { key: &'static str, value: String },
    #[error("textual snapshot is not a flat string map: {0}")]
    NotAMap(String),
}

/// Which encoding a session puts on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    #[default]
    Binary,
    Text,
}

/// One tank's state as sent by its owner.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WireSnapshot {
    /// Sender's game clock when the packet was written, in seconds.
    pub send_time: f32,
    pub position: Vec2,
    pub velocity: Vec2,
    pub body_rotation: f32,
    pub turret_rotation: f32,
    pub movement_input: Vec2,
    pub turret_input: Vec2,
}

impl WireSnapshot {
    pub fn new(send_time: f32, state: &KinematicState, input: &ControlInput) -> Self {
        Self {
            send_time,
            position: state.position,
            velocity: state.velocity,
            body_rotation: state.body_rotation,
            turret_rotation: state.turret_rotation,
            movement_input: input.movement,
            turret_input: input.turret,
        }
    }

    pub fn state(&self) -> KinematicState {
        KinematicState {
            position: self.position,
            velocity: self.velocity,
            body_rotation: self.body_rotation,
            turret_rotation: self.turret_rotation,
        }
    }

    pub fn input(&self) -> ControlInput {
        ControlInput {
            movement: self.movement_input,
            turret: self.turret_input,
        }
    }

    fn fields(&self) -> [f32; 11] {
        [
            self.send_time,
            self.position.x,
            self.position.y,
            self.velocity.x,
            self.velocity.y,
            self.body_rotation,
            self.turret_rotation,
            self.movement_input.x,
            self.movement_input.y,
            self.turret_input.x,
            self.turret_input.y,
        ]
    }

    fn from_fields(f: [f32; 11]) -> Self {
        Self {
            send_time: f[0],
            position: Vec2::new(f[1], f[2]),
            velocity: Vec2::new(f[3], f[4]),
            body_rotation: f[5],
            turret_rotation: f[6],
            movement_input: Vec2::new(f[7], f[8]),
            turret_input: Vec2::new(f[9], f[10]),
        }
    }

    /// Encodes in the given wire format.
    pub fn encode(&self, format: WireFormat) -> Bytes {
        match format {
            WireFormat::Binary => self.encode_binary(),
            WireFormat::Text => Bytes::from(self.encode_text()),
        }
    }

    pub fn decode(buf: &[u8], format: WireFormat) -> Result<Self, MalformedPacket> {
        match format {
            WireFormat::Binary => Self::decode_binary(buf),
            WireFormat::Text => Self::decode_text(buf),
        }
    }

    pub fn encode_binary(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(SNAPSHOT_LEN);
        for v in self.fields() {
            buf.put_f32_le(v);
        }
        buf.freeze()
    }

    pub fn decode_binary(mut buf: &[u8]) -> Result<Self, MalformedPacket> {
        if buf.len() < SNAPSHOT_LEN {
            return Err(MalformedPacket::Truncated {
                expected: SNAPSHOT_LEN,
                actual: buf.len(),
            });
        }
        let mut fields = [0.0_f32; 11];
        for slot in fields.iter_mut() {
            *slot = buf.get_f32_le();
        }
        Ok(Self::from_fields(fields))
    }

    pub fn encode_text(&self) -> String {
        let map: BTreeMap<&str, String> = TEXT_KEYS
            .iter()
            .zip(self.fields())
            .map(|(k, v)| (*k, v.to_string()))
            .collect();
        // A map of strings to strings always serializes.
        serde_json::to_string(&map).unwrap_or_default()
    }

    pub fn decode_text(buf: &[u8]) -> Result<Self, MalformedPacket> {
        let map: BTreeMap<String, String> =
            serde_json::from_slice(buf).map_err(|e| MalformedPacket::NotAMap(e.to_string()))?;

        let mut fields = [0.0_f32; 11];
        for (slot, key) in fields.iter_mut().zip(TEXT_KEYS) {
            let raw = map.get(key).ok_or(MalformedPacket::MissingKey(key))?;
            *slot = raw
                .trim()
                .parse::<f32>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| MalformedPacket::NotANumber {
                    key,
                    value: raw.clone(),
                })?;
        }
        Ok(Self::from_fields(fields))
    }
}
