//! Networking primitives.
//!
//! Identifiers and opcodes shared by every peer in a match. The relay that
//! actually moves bytes lives behind the client's transport seam.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque per-connection identifier assigned by the relay.
///
/// Ordering is lexicographic on the underlying string; host election
/// depends on it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        SessionId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        SessionId(s.to_string())
    }
}

/// Identifier of a running match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct MatchId(pub String);

impl MatchId {
    pub fn new(id: impl Into<String>) -> Self {
        MatchId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A peer as reported by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Presence {
    pub session_id: SessionId,
    pub user_id: String,
    pub username: String,
}

impl Presence {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            session_id: SessionId::new(session_id),
            user_id: user_id.into(),
            username: username.into(),
        }
    }
}

/// Match-state opcodes. Only [`OpCode::TankState`] is consumed by the netcode;
/// the rest belong to gameplay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i64)]
pub enum OpCode {
    TankState = 1,
    Scored = 2,
    Respawned = 3,
    NewRound = 4,
}

impl OpCode {
    pub fn from_i64(v: i64) -> Option<Self> {
        match v {
            1 => Some(OpCode::TankState),
            2 => Some(OpCode::Scored),
            3 => Some(OpCode::Respawned),
            4 => Some(OpCode::NewRound),
            _ => None,
        }
    }

    pub fn as_i64(self) -> i64 {
        self as i64
    }
}
