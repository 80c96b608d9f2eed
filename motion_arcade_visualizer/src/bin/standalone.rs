use motion_arcade::replay::{ReplayCamera, ReplayDetector};
use motion_arcade::{ArcadeSession, GameConfig};
use motion_arcade_visualizer::{ControlHandle, FrameBus, ServerConfig, drive_session, start_server};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Bind address, recording and config from env or defaults
    let bind = std::env::var("MA_BIND").unwrap_or_else(|_| "127.0.0.1:3001".to_string());
    let config = GameConfig::load_or_default(std::env::var("MA_CONFIG").ok().map(PathBuf::from).as_deref())?;
    let detector = match std::env::var("MA_RECORDING") {
        Ok(path) => ReplayDetector::from_path(&PathBuf::from(path))?,
        Err(_) => ReplayDetector::new(Vec::new()),
    };
    let camera = ReplayCamera::new(
        config.arcade.canvas_width as u32,
        config.arcade.canvas_height as u32,
        config.arcade.frame_interval_ms,
    );

    let bus = FrameBus::new(4);
    let session = Arc::new(ArcadeSession::new(config, Some(Arc::new(detector)), Arc::new(camera), bus.clone()));
    let (control, control_rx) = ControlHandle::channel(8);
    tokio::spawn(drive_session(session, control_rx));

    let handle = start_server(bus, ServerConfig { bind_addr: bind }, control).await?;
    // Park forever
    handle.await.ok();
    Ok(())
}
