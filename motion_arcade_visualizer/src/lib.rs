use std::sync::Arc;

use motion_arcade::ArcadeSession;
use tokio::sync::mpsc;
use tracing::{info, warn};

pub use motion_arcade::render::{FrameBus, GameEvent, RenderFrame};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
}

/// Commands the input collaborator can send to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Start,
    Stop,
}

#[derive(Clone)]
pub struct ControlHandle {
    pub control_tx: mpsc::Sender<ControlCommand>,
}

impl ControlHandle {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ControlCommand>) {
        let (control_tx, control_rx) = mpsc::channel(capacity.max(1));
        (Self { control_tx }, control_rx)
    }
}

/// Applies control commands to `session` until every `ControlHandle` is dropped.
pub async fn drive_session(session: Arc<ArcadeSession>, mut control_rx: mpsc::Receiver<ControlCommand>) {
    while let Some(command) = control_rx.recv().await {
        match command {
            ControlCommand::Start => {
                if let Err(e) = session.start().await {
                    warn!(error = %e, "start rejected");
                }
            }
            ControlCommand::Stop => {
                if !session.stop() {
                    info!("stop ignored, nothing playing");
                }
            }
        }
    }
}

#[cfg(feature = "web")]
pub async fn start_server(bus: FrameBus, cfg: ServerConfig, control: ControlHandle) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
    use axum::{Router, http::StatusCode, response::Html, routing::get, routing::post};
    use futures_util::{SinkExt, StreamExt};
    use serde::Serialize;
    use tokio::sync::broadcast::error::RecvError;

    const INDEX_HTML: &str = r#"<!doctype html>
<html><body>
<h2>Motion Arcade</h2>
<div style="margin: 8px 0; display:flex; gap:12px; align-items:center;">
  <button id="btn-start">Start</button>
  <button id="btn-stop">Stop</button>
  <span id="hud" style="font-family:monospace"></span>
</div>
<canvas id="stage" width="640" height="480" style="border:1px solid #444"></canvas>
<script>
const ctx = document.getElementById('stage').getContext('2d');
const hud = document.getElementById('hud');
document.getElementById('btn-start').onclick = () => fetch('/control/start', { method: 'POST' });
document.getElementById('btn-stop').onclick = () => fetch('/control/stop', { method: 'POST' });
const ws = new WebSocket((location.protocol === 'https:' ? 'wss://' : 'ws://') + location.host + '/ws/frames');
ws.onmessage = (ev) => {
  const msg = JSON.parse(ev.data);
  if (msg.type === 'event') { if (msg.data.event === 'ended') hud.textContent = 'Final score: ' + msg.data.final_score; return; }
  const f = msg.data;
  ctx.clearRect(0, 0, 640, 480);
  for (const o of f.objects) {
    ctx.fillStyle = o.color;
    if (o.shape.kind === 'block') ctx.fillRect(o.position.x, o.position.y, o.shape.width, o.shape.height);
    else { ctx.beginPath(); ctx.arc(o.position.x, o.position.y, o.shape.radius, 0, 2 * Math.PI); ctx.fill(); }
  }
  ctx.strokeStyle = '#00ff00';
  for (const s of f.skeletons) {
    for (const [a, b] of s.lines) { ctx.beginPath(); ctx.moveTo(s.points[a].x, s.points[a].y); ctx.lineTo(s.points[b].x, s.points[b].y); ctx.stroke(); }
  }
  ctx.fillStyle = '#FFD700'; ctx.font = 'bold 30px Arial';
  for (const p of f.popups) ctx.fillText('+' + p.award, p.at.x, p.at.y);
  hud.style.color = f.hud.status.color;
  hud.textContent = 'Score: ' + (f.hud.score ?? '-') + '  Time: ' + (f.hud.time_left ?? '-') + '  ' + f.hud.status.text;
};
</script>
</body></html>"#;

    #[derive(Serialize)]
    #[serde(tag = "type", content = "data", rename_all = "snake_case")]
    enum Outgoing<'a> {
        Frame(&'a RenderFrame),
        Event(&'a GameEvent),
    }

    async fn ws_conn(socket: WebSocket, bus: FrameBus) {
        let mut frames_rx = bus.subscribe_frames();
        let mut events_rx = bus.subscribe_events();
        let (mut ws_tx, mut ws_rx) = socket.split();

        loop {
            let text = tokio::select! {
                frame = frames_rx.recv() => match frame {
                    Ok(frame) => serde_json::to_string(&Outgoing::Frame(&frame)),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                },
                event = events_rx.recv() => match event {
                    Ok(event) => serde_json::to_string(&Outgoing::Event(&event)),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "websocket client lagging on events");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                },
                incoming = ws_rx.next() => match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => continue,
                },
            };

            match text {
                Ok(text) => {
                    if ws_tx.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %e, "frame not serializable"),
            }
        }
    }

    let bus_ws = bus.clone();
    let app = Router::new()
        .route("/", get(|| async { Html(INDEX_HTML) }))
        .route("/healthz", get(|| async { "ok" }))
        .route(
            "/ws/frames",
            get(move |ws: WebSocketUpgrade| {
                let bus = bus_ws.clone();
                async move { ws.on_upgrade(move |socket| ws_conn(socket, bus)) }
            }),
        )
        .route(
            "/control/start",
            post({
                let tx = control.control_tx.clone();
                move || {
                    let tx = tx.clone();
                    async move {
                        match tx.send(ControlCommand::Start).await {
                            Ok(()) => StatusCode::NO_CONTENT,
                            Err(_) => StatusCode::SERVICE_UNAVAILABLE,
                        }
                    }
                }
            }),
        )
        .route(
            "/control/stop",
            post({
                let tx = control.control_tx.clone();
                move || {
                    let tx = tx.clone();
                    async move {
                        match tx.send(ControlCommand::Stop).await {
                            Ok(()) => StatusCode::NO_CONTENT,
                            Err(_) => StatusCode::SERVICE_UNAVAILABLE,
                        }
                    }
                }
            }),
        );

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    info!(addr = %cfg.bind_addr, "visualizer server listening");
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "visualizer server stopped");
        }
    });

    Ok(server)
}

#[cfg(not(feature = "web"))]
pub async fn start_server(_bus: FrameBus, _cfg: ServerConfig, _control: ControlHandle) -> anyhow::Result<tokio::task::JoinHandle<()>> {
    Err(anyhow::anyhow!("web feature not enabled for motion_arcade_visualizer"))
}
