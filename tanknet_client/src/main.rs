//! Loopback demo binary.
//!
//! Usage:
//!   cargo run -p tanknet_client -- [--ticks 600] [--quality typical|poor|perfect]
//!       [--send-every 6] [--no-prediction] [--no-smoothing] [--text] [--config tank.json]
//!
//! Two clients join one match over the in-process relay. The first drives in
//! a circle; the second idles and reports where it sees the first tank.

use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tanknet_client::{input::InputState, DispatchQueue, LoopbackHub, TankClient};
use tanknet_shared::{
    codec::WireFormat,
    config::{NetworkQuality, TankConfig},
    math::Vec2,
    net::{MatchId, Presence},
};
use tokio::time::Instant;
use tracing::info;

struct Args {
    ticks: u64,
    config: Option<PathBuf>,
    quality: Option<NetworkQuality>,
    send_every: Option<u32>,
    no_prediction: bool,
    no_smoothing: bool,
    text: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut out = Args {
        ticks: 600,
        config: None,
        quality: None,
        send_every: None,
        no_prediction: false,
        no_smoothing: false,
        text: false,
    };
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--ticks" if i + 1 < args.len() => {
                out.ticks = args[i + 1].parse().context("parse --ticks")?;
                i += 2;
            }
            "--config" if i + 1 < args.len() => {
                out.config = Some(PathBuf::from(&args[i + 1]));
                i += 2;
            }
            "--quality" if i + 1 < args.len() => {
                out.quality = Some(match args[i + 1].as_str() {
                    "typical" => NetworkQuality::Typical,
                    "poor" => NetworkQuality::Poor,
                    "perfect" => NetworkQuality::Perfect,
                    other => anyhow::bail!("unknown quality {other:?}"),
                });
                i += 2;
            }
            "--send-every" if i + 1 < args.len() => {
                out.send_every = Some(args[i + 1].parse().context("parse --send-every")?);
                i += 2;
            }
            "--no-prediction" => {
                out.no_prediction = true;
                i += 1;
            }
            "--no-smoothing" => {
                out.no_smoothing = true;
                i += 1;
            }
            "--text" => {
                out.text = true;
                i += 1;
            }
            _ => i += 1,
        }
    }
    Ok(out)
}

fn build_config(args: &Args) -> anyhow::Result<TankConfig> {
    let mut cfg = match &args.config {
        Some(path) => TankConfig::load(path).with_context(|| format!("load config {}", path.display()))?,
        None => TankConfig::default(),
    };
    if let Some(q) = args.quality {
        cfg.tunables.network_quality = q;
    }
    if let Some(n) = args.send_every {
        cfg.tunables.frames_between_packets = n.max(1);
    }
    if args.no_prediction {
        cfg.tunables.enable_prediction = false;
    }
    if args.no_smoothing {
        cfg.tunables.enable_smoothing = false;
    }
    if args.text {
        cfg.wire_format = WireFormat::Text;
    }
    Ok(cfg)
}

fn join(hub: &LoopbackHub, cfg: &TankConfig, id: &str, name: &str) -> TankClient {
    let queue = DispatchQueue::new();
    let transport = hub.connect(Presence::new(id, format!("user-{id}"), name), queue.handle());
    let mut client = TankClient::new(cfg.clone(), queue, Arc::new(transport));
    client.begin_matchmaking();
    client
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args()?;
    let cfg = build_config(&args)?;
    info!(
        quality = ?cfg.tunables.network_quality,
        send_every = cfg.tunables.frames_between_packets,
        prediction = cfg.tunables.enable_prediction,
        smoothing = cfg.tunables.enable_smoothing,
        format = ?cfg.wire_format,
        "Starting loopback demo"
    );

    let hub = LoopbackHub::new(cfg.tunables.network_quality);
    let mut driver = join(&hub, &cfg, "session-a", &cfg.player_name);
    let mut observer = join(&hub, &cfg, "session-b", "Observer");
    hub.matchmake(MatchId::new("loopback"));

    let tick_interval = Duration::from_secs_f32(cfg.tick_seconds());
    let mut next_tick = Instant::now();

    for tick in 0..args.ticks {
        let phase = tick as f32 / cfg.tick_hz.max(1) as f32;
        let circle = InputState::new(Vec2::from_angle(phase), Vec2::new(1.0, 0.0));

        driver.tick(circle).await;
        let report = observer.tick(InputState::default()).await;

        if tick % u64::from(cfg.tick_hz.max(1)) == 0 {
            if let Some(id) = driver.local_session().cloned() {
                let truth = driver.display_state(&id).map(|s| s.position);
                let seen = observer.display_state(&id).map(|s| s.position);
                info!(
                    tick,
                    ?truth,
                    ?seen,
                    applied = report.applied,
                    latency = ?observer.estimated_latency(),
                    "Driver tank"
                );
            }
        }

        next_tick += tick_interval;
        tokio::time::sleep_until(next_tick).await;
    }

    driver.quit_match().await;
    observer.tick(InputState::default()).await;
    observer.quit_match().await;
    info!("Demo finished");

    Ok(())
}
