//! Configuration system.
//!
//! Loads match configuration from JSON strings/files. Every field has a
//! default, so a partial file only overrides what it names.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{codec::WireFormat, kinematics::WorldBounds, rolling_average::DEFAULT_CAPACITY};

/// Simulated link quality, chosen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NetworkQuality {
    /// 100 ms latency, 10% packet loss.
    #[default]
    Typical,
    /// 200 ms latency, 20% packet loss.
    Poor,
    /// No added latency or loss.
    Perfect,
}

impl NetworkQuality {
    pub fn simulated_latency(self) -> Duration {
        match self {
            NetworkQuality::Typical => Duration::from_millis(100),
            NetworkQuality::Poor => Duration::from_millis(200),
            NetworkQuality::Perfect => Duration::ZERO,
        }
    }

    pub fn packet_loss(self) -> f64 {
        match self {
            NetworkQuality::Typical => 0.1,
            NetworkQuality::Poor => 0.2,
            NetworkQuality::Perfect => 0.0,
        }
    }

    pub fn next(self) -> Self {
        match self {
            NetworkQuality::Typical => NetworkQuality::Poor,
            NetworkQuality::Poor => NetworkQuality::Perfect,
            NetworkQuality::Perfect => NetworkQuality::Typical,
        }
    }
}

/// How a new host is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HostPolicy {
    /// Greatest session id, both at match start and after the host leaves.
    #[default]
    Greatest,
    /// Greatest session id at match start, least when re-electing.
    GreatestThenLeast,
}

/// Session-wide options only the host may change. Peers receive them through
/// property replication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTunables {
    pub network_quality: NetworkQuality,
    /// Ticks between outgoing tank packets.
    pub frames_between_packets: u32,
    pub enable_prediction: bool,
    pub enable_smoothing: bool,
}

impl SessionTunables {
    /// Steps the send rate through 6 → 3 → 1 → 6.
    pub fn cycle_send_rate(&mut self) {
        self.frames_between_packets = match self.frames_between_packets {
            6 => 3,
            3 => 1,
            _ => 6,
        };
    }
}

impl Default for SessionTunables {
    fn default() -> Self {
        Self {
            network_quality: NetworkQuality::default(),
            frames_between_packets: 6,
            enable_prediction: true,
            enable_smoothing: true,
        }
    }
}

/// Root configuration for a tank client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TankConfig {
    /// Fixed logic tick rate.
    pub tick_hz: u32,
    /// Starting tunables; the host may change them during a match.
    pub tunables: SessionTunables,
    pub world: WorldBounds,
    /// Number of packets the clock-delta average spans.
    pub clock_window: usize,
    /// Latency assumed when the transport reports none.
    pub fallback_latency_ms: u64,
    pub wire_format: WireFormat,
    pub host_policy: HostPolicy,
    /// Drop tank packets older than the last one applied for that peer.
    pub drop_stale_snapshots: bool,
    pub player_name: String,
}

impl Default for TankConfig {
    fn default() -> Self {
        Self {
            tick_hz: 60,
            tunables: SessionTunables::default(),
            world: WorldBounds::default(),
            clock_window: DEFAULT_CAPACITY,
            fallback_latency_ms: 50,
            wire_format: WireFormat::default(),
            host_policy: HostPolicy::default(),
            drop_stale_snapshots: false,
            player_name: "Player".to_string(),
        }
    }
}

impl TankConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Reads and parses a JSON config file.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Length of one logic tick in seconds.
    pub fn tick_seconds(&self) -> f32 {
        1.0 / self.tick_hz.max(1) as f32
    }

    pub fn fallback_latency(&self) -> Duration {
        Duration::from_millis(self.fallback_latency_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = TankConfig::from_json_str(r#"{ "tick_hz": 30, "wire_format": "text" }"#).unwrap();
        assert_eq!(cfg.tick_hz, 30);
        assert_eq!(cfg.wire_format, WireFormat::Text);
        assert_eq!(cfg.tunables.frames_between_packets, 6);
        assert_eq!(cfg.world.width, 800.0);
        assert_eq!(cfg.clock_window, 100);
    }

    #[test]
    fn send_rate_cycles() {
        let mut t = SessionTunables::default();
        let mut seen = Vec::new();
        for _ in 0..4 {
            t.cycle_send_rate();
            seen.push(t.frames_between_packets);
        }
        assert_eq!(seen, [3, 1, 6, 3]);
    }

    #[test]
    fn network_quality_cycles_through_all() {
        let q = NetworkQuality::Typical;
        assert_eq!(q.next().next().next(), q);
        assert_eq!(NetworkQuality::Poor.simulated_latency(), Duration::from_millis(200));
        assert_eq!(NetworkQuality::Perfect.packet_loss(), 0.0);
    }
}
