use anyhow::Context;
use motion_arcade::replay::{ReplayCamera, ReplayDetector};
use motion_arcade::{ArcadeSession, FrameBus, GameConfig, GameEvent};
use std::env;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // --- 1. Argument Parsing ---
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        println!("Usage: motion_arcade <recording.jsonl> [config.toml]");
        return Ok(());
    }
    let recording = Path::new(&args[1]);
    let config = GameConfig::load_or_default(args.get(2).map(Path::new)).context("loading config")?;

    // --- 2. Collaborators ---
    let detector = ReplayDetector::from_path(recording).with_context(|| format!("reading {}", recording.display()))?;
    let camera = ReplayCamera::new(
        config.arcade.canvas_width as u32,
        config.arcade.canvas_height as u32,
        config.arcade.frame_interval_ms,
    );
    let bus = FrameBus::default();
    let mut events = bus.subscribe_events();

    // --- 3. Play One Session ---
    let session = ArcadeSession::new(config, Some(Arc::new(detector)), Arc::new(camera), bus);
    session.start().await.context("starting session")?;

    loop {
        match events.recv().await {
            Ok(GameEvent::Scored { score, .. }) => info!(score = score, "score"),
            Ok(GameEvent::Ended { final_score, reason }) => {
                println!("Final score: {final_score} ({reason:?})");
                break;
            }
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
    Ok(())
}
