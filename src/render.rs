// THEORY:
// The engine never draws. Once per frame it hands the rendering collaborator a
// self-contained `RenderFrame`: skeleton points and lines in canvas pixels, the
// live game objects, any score popups from this frame, and the HUD values. Game
// lifecycle moments (start, jump, score, tick, end) go out separately as
// `GameEvent`s.
//
// Both streams are published on a `FrameBus` of broadcast channels. Publishing
// never blocks and never fails the game: with no subscriber the frame is simply
// dropped, and a slow subscriber lags instead of stalling the frame loop.

use crate::core_modules::game_object::{GameObject, Hit, ScreenPoint};
use crate::core_modules::landmark::Landmark;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// A status message with the color it is shown in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusLine {
    pub text: String,
    pub color: String,
}

impl StatusLine {
    pub const GREEN: &'static str = "#00ff00";
    pub const YELLOW: &'static str = "#ffff00";
    pub const RED: &'static str = "#ff0000";
    pub const NEUTRAL: &'static str = "#000000";

    pub fn new(text: impl Into<String>, color: &str) -> Self {
        Self {
            text: text.into(),
            color: color.to_string(),
        }
    }

    pub fn neutral(text: impl Into<String>) -> Self {
        Self::new(text, Self::NEUTRAL)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(text, Self::RED)
    }

    /// "N%" colored by how close the match is.
    pub fn for_score(score: u32) -> Self {
        let color = if score > 80 {
            Self::GREEN
        } else if score > 50 {
            Self::YELLOW
        } else {
            Self::RED
        };
        Self::new(format!("{score}%"), color)
    }
}

impl Default for StatusLine {
    fn default() -> Self {
        Self::neutral("")
    }
}

/// Maps a normalized landmark onto the canvas, optionally mirrored like a selfie view.
pub fn to_screen(landmark: &Landmark, canvas: (f64, f64), mirror_x: bool) -> ScreenPoint {
    let x = if mirror_x { 1.0 - landmark.x } else { landmark.x };
    ScreenPoint::new(x * canvas.0, landmark.y * canvas.1)
}

/// Drawable points and connection lines of one hand or pose.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Skeleton {
    pub points: Vec<ScreenPoint>,
    /// Index pairs into `points`.
    pub lines: Vec<(usize, usize)>,
}

impl Skeleton {
    /// Builds a skeleton, keeping only connections whose endpoints exist.
    pub fn from_landmarks(landmarks: &[Landmark], connections: &[(usize, usize)], canvas: (f64, f64), mirror_x: bool) -> Self {
        let points: Vec<ScreenPoint> = landmarks.iter().map(|l| to_screen(l, canvas, mirror_x)).collect();
        let lines = connections
            .iter()
            .copied()
            .filter(|&(a, b)| a < points.len() && b < points.len())
            .collect();
        Self { points, lines }
    }
}

/// Scalar UI values.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Hud {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_left: Option<u32>,
    pub status: StatusLine,
}

/// Everything needed to draw one frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RenderFrame {
    pub timestamp_ms: u64,
    pub skeletons: Vec<Skeleton>,
    pub objects: Vec<GameObject>,
    /// Hits scored this frame, drawn as "+award" at `Hit::at`.
    pub popups: Vec<Hit>,
    pub hud: Hud,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    TimeUp,
    Stopped,
    CameraFailed,
}

/// Discrete game lifecycle moments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GameEvent {
    Started { duration_secs: u32 },
    Jump { height: f64 },
    Scored { hit: Hit, score: u32 },
    Tick { time_left: u32 },
    Ended { final_score: u32, reason: EndReason },
}

/// Broadcast fan-out of render frames and game events.
#[derive(Clone)]
pub struct FrameBus {
    pub frames_tx: broadcast::Sender<RenderFrame>,
    pub events_tx: broadcast::Sender<GameEvent>,
}

impl FrameBus {
    pub fn new(capacity: usize) -> Self {
        let (frames_tx, _) = broadcast::channel::<RenderFrame>(capacity.max(1));
        let (events_tx, _) = broadcast::channel::<GameEvent>(capacity.max(1) * 8);
        Self { frames_tx, events_tx }
    }

    pub fn publish_frame(&self, frame: RenderFrame) {
        let _ = self.frames_tx.send(frame);
    }

    pub fn publish_event(&self, event: GameEvent) {
        let _ = self.events_tx.send(event);
    }

    pub fn subscribe_frames(&self) -> broadcast::Receiver<RenderFrame> {
        self.frames_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<GameEvent> {
        self.events_tx.subscribe()
    }
}

impl Default for FrameBus {
    fn default() -> Self {
        Self::new(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::landmark::HAND_CONNECTIONS;

    #[test]
    fn score_colors_follow_thresholds() {
        assert_eq!(StatusLine::for_score(81).color, StatusLine::GREEN);
        assert_eq!(StatusLine::for_score(80).color, StatusLine::YELLOW);
        assert_eq!(StatusLine::for_score(51).color, StatusLine::YELLOW);
        assert_eq!(StatusLine::for_score(50).color, StatusLine::RED);
        assert_eq!(StatusLine::for_score(73).text, "73%");
    }

    #[test]
    fn screen_mapping_mirrors_x_only() {
        let l = Landmark::new(0.25, 0.5, 0.9);
        assert_eq!(to_screen(&l, (640.0, 480.0), true), ScreenPoint::new(480.0, 240.0));
        assert_eq!(to_screen(&l, (640.0, 480.0), false), ScreenPoint::new(160.0, 240.0));
    }

    #[test]
    fn skeleton_drops_dangling_connections() {
        let landmarks = vec![Landmark::new(0.5, 0.5, 0.0); 3];
        let skeleton = Skeleton::from_landmarks(&landmarks, &HAND_CONNECTIONS, (640.0, 480.0), true);
        assert_eq!(skeleton.points.len(), 3);
        assert!(skeleton.lines.iter().all(|&(a, b)| a < 3 && b < 3));
    }

    #[test]
    fn events_serialize_with_tag() {
        let json = serde_json::to_string(&GameEvent::Ended {
            final_score: 30,
            reason: EndReason::TimeUp,
        })
        .unwrap();
        assert_eq!(json, r#"{"event":"ended","final_score":30,"reason":"time_up"}"#);
    }

    #[tokio::test]
    async fn bus_delivers_to_subscribers_and_tolerates_none() {
        let bus = FrameBus::new(2);
        bus.publish_event(GameEvent::Tick { time_left: 5 });

        let mut rx = bus.subscribe_events();
        bus.publish_event(GameEvent::Tick { time_left: 4 });
        assert_eq!(rx.recv().await.unwrap(), GameEvent::Tick { time_left: 4 });
    }
}
