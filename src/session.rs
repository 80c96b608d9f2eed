// THEORY:
// The `session` module is the top-level controller of the arcade games. It owns
// one `GameState` and drives it through Idle -> Playing -> Ended -> Idle.
//
// Key architectural principles:
// 1.  **Three Independent Clocks**: A playing session runs three recurring tasks:
//     the frame loop (poll camera, kick off detection, publish a render frame),
//     the one-second countdown, and the spawner. They interleave in any order.
// 2.  **Liveness Check First**: Every tick begins by asking whether its session is
//     still live and stops itself if not. `GameState` carries a generation number
//     and is replaced wholesale when a session starts, so a late tick from an old
//     session can never touch a new one.
// 3.  **Detection Never Blocks the Loop**: Pose detection runs in its own task. At
//     most one detection is in flight; a frame that arrives meanwhile is drawn with
//     the last known pose. A failed detection is logged and treated as "no pose".
// 4.  **One Ending**: The countdown reaching zero and an explicit stop both go
//     through `finish`, which flips `is_playing` under the lock. Whoever gets
//     there first ends the session; the other is a no-op. The camera is released
//     on every exit path, including dropping the session.

use crate::config::{ArcadeMode, GameConfig};
use crate::core_modules::camera::{Camera, CameraLease, VideoFrame};
use crate::core_modules::detector::LandmarkDetector;
use crate::core_modules::game_object::{EntityField, GameObject, Hit, ScreenPoint, Spawner};
use crate::core_modules::landmark::{Detection, Landmark, LandmarkSequence, POSE_CONNECTIONS, POSE_LANDMARK_COUNT, pose};
use crate::core_modules::motion::{ActionDetector, JumpDetector};
use crate::render::{EndReason, FrameBus, GameEvent, Hud, RenderFrame, Skeleton, StatusLine, to_screen};
use crate::scheduler::{Tick, spawn_recurring};
use crate::{Error, Result, lock};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Idle,
    Playing,
    Ended,
}

/// The mutable state of one session. Replaced wholesale, never reset in place.
pub struct GameState {
    /// Incremented every time the state is replaced.
    generation: u64,
    pub phase: SessionPhase,
    pub score: u32,
    pub time_left: u32,
    pub is_playing: bool,
    pub field: EntityField,
    jump: JumpDetector,
    action: ActionDetector,
    spawner: Spawner,
    /// Last pose the detector reported, drawn until a newer one arrives.
    pose: Option<LandmarkSequence>,
    /// Hits scored since the last render frame.
    popups: Vec<Hit>,
    detection_in_flight: bool,
    started_at: Instant,
}

impl GameState {
    fn new(generation: u64, config: &GameConfig, spawner: Spawner, phase: SessionPhase) -> Self {
        let playing = phase == SessionPhase::Playing;
        Self {
            generation,
            phase,
            score: 0,
            time_left: config.arcade.duration_secs,
            is_playing: playing,
            field: EntityField::new(spawner.capacity()),
            jump: JumpDetector::new(&config.motion),
            action: ActionDetector::new(&config.motion),
            spawner,
            pose: None,
            popups: Vec::new(),
            detection_in_flight: false,
            started_at: Instant::now(),
        }
    }

    fn is_live(&self, generation: u64) -> bool {
        self.generation == generation && self.is_playing
    }

    fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    /// Runs the motion classifier and the collision pass over one detected pose.
    fn observe_pose(&mut self, landmarks: &[Landmark], config: &GameConfig) -> Vec<GameEvent> {
        let mut events = Vec::new();
        self.pose = Some(landmarks.to_vec());

        if landmarks.len() < POSE_LANDMARK_COUNT {
            debug!(points = landmarks.len(), "partial pose ignored");
            return events;
        }

        let now_ms = self.elapsed_ms();
        let canvas = (config.arcade.canvas_width, config.arcade.canvas_height);
        let mirror = config.arcade.mirror_x;

        let nose = landmarks[pose::NOSE];
        let left_ankle = landmarks[pose::LEFT_ANKLE];
        let right_ankle = landmarks[pose::RIGHT_ANKLE];
        let foot = Landmark::new((left_ankle.x + right_ankle.x) / 2.0, (left_ankle.y + right_ankle.y) / 2.0, 0.0);

        if self.action.observe(foot.y) {
            debug!(foot_y = foot.y, "foot action");
        }
        if let Some(jump) = self.jump.observe(nose.y, now_ms) {
            self.action.mark();
            events.push(GameEvent::Jump { height: jump.height });
        }

        let hits = match config.arcade.mode {
            ArcadeMode::Blocks => {
                let foot = to_screen(&foot, canvas, mirror);
                self.field.collide_blocks(foot, &mut self.action, &config.blocks)
            }
            ArcadeMode::Circles => {
                let limbs: Vec<ScreenPoint> = pose::LIMB_ANCHORS
                    .iter()
                    .map(|&i| to_screen(&landmarks[i], canvas, mirror))
                    .collect();
                self.field.collide_circles(&limbs, &config.circles)
            }
        };

        for hit in hits {
            self.score += hit.award;
            info!(object = hit.object_id, score = self.score, "scored");
            self.popups.push(hit);
            events.push(GameEvent::Scored { hit, score: self.score });
        }
        events
    }

    fn render_frame(&mut self, config: &GameConfig) -> RenderFrame {
        let canvas = (config.arcade.canvas_width, config.arcade.canvas_height);
        let skeletons = self
            .pose
            .iter()
            .map(|p| Skeleton::from_landmarks(p, &POSE_CONNECTIONS, canvas, config.arcade.mirror_x))
            .collect();
        let status = if self.is_playing && self.jump.is_calibrating() {
            StatusLine::neutral("Calibrating...")
        } else {
            StatusLine::default()
        };

        RenderFrame {
            timestamp_ms: self.elapsed_ms(),
            skeletons,
            objects: self.field.objects().cloned().collect(),
            popups: std::mem::take(&mut self.popups),
            hud: Hud {
                score: Some(self.score),
                time_left: Some(self.time_left),
                status,
            },
        }
    }
}

/// A read-only view of the session for callers and tests.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub phase: SessionPhase,
    pub score: u32,
    pub time_left: u32,
    pub is_playing: bool,
    pub objects: Vec<GameObject>,
    pub has_action: bool,
    pub is_jumping: bool,
}

struct SessionShared {
    config: Arc<GameConfig>,
    state: Mutex<GameState>,
    camera: Mutex<CameraLease>,
    bus: FrameBus,
}

impl SessionShared {
    fn is_live(&self, generation: u64) -> bool {
        lock(&self.state).is_live(generation)
    }

    fn release_camera(&self) {
        lock(&self.camera).release();
    }

    fn frame_tick(self: &Arc<Self>, generation: u64, detector: &Arc<dyn LandmarkDetector>) -> Tick {
        if !self.is_live(generation) {
            return Tick::Stop;
        }
        let frame = lock(&self.camera).poll_frame();

        let render = {
            let mut state = lock(&self.state);
            if !state.is_live(generation) {
                return Tick::Stop;
            }
            if let Some(frame) = frame {
                if !state.detection_in_flight {
                    state.detection_in_flight = true;
                    self.spawn_detection(generation, detector.clone(), frame);
                }
            }
            state.render_frame(&self.config)
        };

        self.bus.publish_frame(render);
        Tick::Continue
    }

    fn spawn_detection(self: &Arc<Self>, generation: u64, detector: Arc<dyn LandmarkDetector>, frame: VideoFrame) {
        let shared = self.clone();
        tokio::spawn(async move {
            let detection = match detector.detect_for_video(&frame.image, frame.timestamp_ms).await {
                Ok(detection) => Some(detection),
                Err(e) => {
                    warn!(error = %e, timestamp_ms = frame.timestamp_ms, "pose detection failed, frame skipped");
                    None
                }
            };
            shared.apply_detection(generation, detection);
        });
    }

    fn apply_detection(&self, generation: u64, detection: Option<Detection>) {
        let events = {
            let mut state = lock(&self.state);
            if state.generation != generation {
                return;
            }
            state.detection_in_flight = false;
            if !state.is_playing {
                return;
            }
            match detection.as_ref().and_then(Detection::primary) {
                Some(landmarks) => state.observe_pose(landmarks, &self.config),
                None => Vec::new(),
            }
        };

        for event in events {
            self.bus.publish_event(event);
        }
    }

    fn countdown_tick(&self, generation: u64) -> Tick {
        let time_left = {
            let mut state = lock(&self.state);
            if !state.is_live(generation) {
                return Tick::Stop;
            }
            state.time_left = state.time_left.saturating_sub(1);
            state.time_left
        };

        self.bus.publish_event(GameEvent::Tick { time_left });
        if time_left == 0 {
            self.finish(generation, EndReason::TimeUp);
            return Tick::Stop;
        }
        Tick::Continue
    }

    fn spawn_tick(&self, generation: u64) -> Tick {
        let mut state = lock(&self.state);
        if !state.is_live(generation) {
            return Tick::Stop;
        }
        let now_ms = state.elapsed_ms();
        let object = state.spawner.spawn(now_ms);
        debug!(object = object.id, x = object.position.x, y = object.position.y, "spawned");
        if let Some(evicted) = state.field.push(object) {
            debug!(object = evicted.id, "oldest object evicted");
        }
        Tick::Continue
    }

    /// Ends the session of `generation`. Returns false if it had already ended.
    fn finish(&self, generation: u64, reason: EndReason) -> bool {
        let final_score = {
            let mut state = lock(&self.state);
            if !state.is_live(generation) {
                return false;
            }
            state.is_playing = false;
            state.phase = SessionPhase::Ended;
            state.score
        };

        self.release_camera();
        info!(final_score = final_score, ?reason, "session ended");
        self.bus.publish_event(GameEvent::Ended { final_score, reason });
        true
    }
}

/// The arcade session controller.
pub struct ArcadeSession {
    detector: Option<Arc<dyn LandmarkDetector>>,
    camera: Arc<dyn Camera>,
    shared: Arc<SessionShared>,
    seed: Option<u64>,
    start_lock: tokio::sync::Mutex<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ArcadeSession {
    /// `detector` is `None` while the model is still loading; `start` is refused until then.
    pub fn new(config: GameConfig, detector: Option<Arc<dyn LandmarkDetector>>, camera: Arc<dyn Camera>, bus: FrameBus) -> Self {
        let config = Arc::new(config);
        let spawner = Self::make_spawner(&config, None);
        let state = GameState::new(0, &config, spawner, SessionPhase::Idle);
        Self {
            detector,
            camera,
            shared: Arc::new(SessionShared {
                config,
                state: Mutex::new(state),
                camera: Mutex::new(CameraLease::empty()),
                bus,
            }),
            seed: None,
            start_lock: tokio::sync::Mutex::new(()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Makes object placement reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Supplies the detector once it has finished loading.
    pub fn set_detector(&mut self, detector: Arc<dyn LandmarkDetector>) {
        self.detector = Some(detector);
    }

    fn make_spawner(config: &GameConfig, seed: Option<u64>) -> Spawner {
        let canvas = (config.arcade.canvas_width, config.arcade.canvas_height);
        let mode = config.arcade.mode;
        match seed {
            Some(seed) => Spawner::seeded(mode, config.blocks.clone(), config.circles.clone(), canvas, seed),
            None => Spawner::new(mode, config.blocks.clone(), config.circles.clone(), canvas),
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.shared.config
    }

    pub fn bus(&self) -> &FrameBus {
        &self.shared.bus
    }

    pub fn phase(&self) -> SessionPhase {
        lock(&self.shared.state).phase
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = lock(&self.shared.state);
        SessionSnapshot {
            phase: state.phase,
            score: state.score,
            time_left: state.time_left,
            is_playing: state.is_playing,
            objects: state.field.objects().cloned().collect(),
            has_action: state.action.has_action(),
            is_jumping: state.jump.is_jumping(),
        }
    }

    /// Acquires the camera, replaces the game state and starts the three recurring tasks.
    pub async fn start(&self) -> Result<()> {
        let Some(detector) = self.detector.clone() else {
            warn!("start refused, detector not ready");
            return Err(Error::DetectorUnavailable);
        };
        let _starting = self.start_lock.lock().await;
        if lock(&self.shared.state).is_playing {
            return Err(Error::AlreadyPlaying);
        }

        let stream = match self.camera.open().await {
            Ok(stream) => stream,
            Err(e) => {
                error!(error = %e, "camera acquisition failed");
                self.shared.release_camera();
                let final_score = {
                    let mut state = lock(&self.shared.state);
                    state.phase = SessionPhase::Ended;
                    state.score
                };
                self.shared.bus.publish_event(GameEvent::Ended {
                    final_score,
                    reason: EndReason::CameraFailed,
                });
                return Err(match e {
                    Error::CameraAcquisitionFailed(_) => e,
                    other => Error::CameraAcquisitionFailed(other.to_string()),
                });
            }
        };
        *lock(&self.shared.camera) = CameraLease::new(stream);

        let config = self.shared.config.clone();
        let generation = {
            let mut state = lock(&self.shared.state);
            let generation = state.generation + 1;
            let spawner = Self::make_spawner(&config, self.seed);
            *state = GameState::new(generation, &config, spawner, SessionPhase::Playing);
            generation
        };
        info!(
            generation = generation,
            mode = ?config.arcade.mode,
            duration_secs = config.arcade.duration_secs,
            "session started"
        );
        self.shared.bus.publish_event(GameEvent::Started {
            duration_secs: config.arcade.duration_secs,
        });

        let spawn_period = Duration::from_millis(match config.arcade.mode {
            ArcadeMode::Blocks => config.blocks.spawn_interval_ms,
            ArcadeMode::Circles => config.circles.spawn_interval_ms,
        });

        let frame = {
            let shared = self.shared.clone();
            spawn_recurring(
                "frame",
                Duration::from_millis(config.arcade.frame_interval_ms),
                MissedTickBehavior::Skip,
                move || shared.frame_tick(generation, &detector),
            )
        };
        let countdown = {
            let shared = self.shared.clone();
            spawn_recurring("countdown", Duration::from_secs(1), MissedTickBehavior::Burst, move || {
                shared.countdown_tick(generation)
            })
        };
        let spawner = {
            let shared = self.shared.clone();
            spawn_recurring("spawn", spawn_period, MissedTickBehavior::Skip, move || shared.spawn_tick(generation))
        };

        let mut tasks = lock(&self.tasks);
        tasks.retain(|t| !t.is_finished());
        tasks.extend([frame, countdown, spawner]);
        Ok(())
    }

    /// Ends the current session early. Returns false when nothing was playing.
    pub fn stop(&self) -> bool {
        let generation = lock(&self.shared.state).generation;
        self.shared.finish(generation, EndReason::Stopped)
    }

    /// Leaves the game screen: ends any running session and returns to Idle.
    ///
    /// Waits for a `start` that is still acquiring the camera, then tears that
    /// session down too.
    pub async fn leave(&self) {
        let _starting = self.start_lock.lock().await;
        self.stop();
        self.shared.release_camera();
        let mut state = lock(&self.shared.state);
        let generation = state.generation + 1;
        let spawner = Self::make_spawner(&self.shared.config, self.seed);
        *state = GameState::new(generation, &self.shared.config, spawner, SessionPhase::Idle);
        debug!(generation = generation, "session idle");
    }
}

impl Drop for ArcadeSession {
    fn drop(&mut self) {
        self.stop();
        self.shared.release_camera();
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::camera::CameraStream;
    use crate::core_modules::detector::RunningMode;
    use futures::FutureExt;
    use futures::future::BoxFuture;
    use image::DynamicImage;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StillDetector;

    impl LandmarkDetector for StillDetector {
        fn detect<'a>(&'a self, _image: &'a DynamicImage) -> BoxFuture<'a, Result<Detection>> {
            async { Ok(Detection::empty()) }.boxed()
        }

        fn detect_for_video<'a>(&'a self, _frame: &'a DynamicImage, _ts: u64) -> BoxFuture<'a, Result<Detection>> {
            async { Err(Error::Detection("model hiccup".to_string())) }.boxed()
        }

        fn set_running_mode(&self, _mode: RunningMode) -> BoxFuture<'_, Result<()>> {
            async { Ok(()) }.boxed()
        }
    }

    struct BlankStream {
        stops: Arc<AtomicUsize>,
        next_ts: u64,
    }

    impl CameraStream for BlankStream {
        fn poll_frame(&mut self) -> Option<VideoFrame> {
            self.next_ts += 16;
            Some(VideoFrame {
                image: Arc::new(DynamicImage::new_rgb8(4, 4)),
                timestamp_ms: self.next_ts,
            })
        }

        fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct TestCamera {
        works: bool,
        open_delay: Duration,
        stops: Arc<AtomicUsize>,
    }

    impl Camera for TestCamera {
        fn open(&self) -> BoxFuture<'_, Result<Box<dyn CameraStream>>> {
            let works = self.works;
            let delay = self.open_delay;
            let stops = self.stops.clone();
            async move {
                tokio::time::sleep(delay).await;
                if works {
                    Ok(Box::new(BlankStream { stops, next_ts: 0 }) as Box<dyn CameraStream>)
                } else {
                    Err(Error::CameraAcquisitionFailed("permission denied".to_string()))
                }
            }
            .boxed()
        }
    }

    fn session(detector: bool, camera_works: bool) -> (ArcadeSession, Arc<AtomicUsize>) {
        slow_camera_session(detector, camera_works, Duration::ZERO)
    }

    fn slow_camera_session(detector: bool, camera_works: bool, open_delay: Duration) -> (ArcadeSession, Arc<AtomicUsize>) {
        let stops = Arc::new(AtomicUsize::new(0));
        let camera = Arc::new(TestCamera {
            works: camera_works,
            open_delay,
            stops: stops.clone(),
        });
        let detector = detector.then(|| Arc::new(StillDetector) as Arc<dyn LandmarkDetector>);
        let session = ArcadeSession::new(GameConfig::default(), detector, camera, FrameBus::default()).with_seed(1);
        (session, stops)
    }

    #[tokio::test(start_paused = true)]
    async fn start_without_detector_is_refused() {
        let (session, _) = session(false, true);
        assert!(matches!(session.start().await, Err(Error::DetectorUnavailable)));
        assert_eq!(session.phase(), SessionPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn camera_failure_ends_without_playing() {
        let (session, _) = session(true, false);
        let mut events = session.bus().subscribe_events();
        assert!(matches!(session.start().await, Err(Error::CameraAcquisitionFailed(_))));
        let snapshot = session.snapshot();
        assert_eq!(snapshot.phase, SessionPhase::Ended);
        assert!(!snapshot.is_playing);

        match events.try_recv() {
            Ok(GameEvent::Ended { final_score, reason }) => {
                assert_eq!(final_score, 0);
                assert_eq!(reason, EndReason::CameraFailed);
            }
            other => panic!("expected an ended event, got {other:?}"),
        }
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_while_playing_is_refused() {
        let (session, _) = session(true, true);
        session.start().await.unwrap();
        assert!(matches!(session.start().await, Err(Error::AlreadyPlaying)));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_releases_camera_once() {
        let (session, stops) = session(true, true);
        session.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(session.stop());
        assert!(!session.stop());
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert_eq!(session.phase(), SessionPhase::Ended);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_detection_errors_do_not_stop_the_loop() {
        let (session, _) = session(true, true);
        let mut frames = session.bus().subscribe_frames();
        session.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(session.snapshot().is_playing);
        // Dozens of frames went out; the small bus may report them as lagged.
        assert!(!matches!(frames.try_recv(), Err(tokio::sync::broadcast::error::TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn spawner_fills_field_up_to_capacity() {
        let (session, _) = session(true, true);
        session.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(2000 * 8 + 100)).await;
        let snapshot = session.snapshot();
        assert_eq!(snapshot.objects.len(), 6);
        assert_eq!(snapshot.objects[0].id, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn leave_returns_to_idle_with_fresh_state() {
        let (session, stops) = session(true, true);
        session.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2100)).await;

        session.leave().await;
        let snapshot = session.snapshot();
        assert_eq!(snapshot.phase, SessionPhase::Idle);
        assert_eq!(snapshot.time_left, 60);
        assert!(snapshot.objects.is_empty());
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn leave_waits_for_a_start_still_opening_the_camera() {
        let (session, stops) = slow_camera_session(true, true, Duration::from_millis(500));

        let leaving = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            session.leave().await;
        };
        let (started, ()) = tokio::join!(session.start(), leaving);
        started.unwrap();

        let snapshot = session.snapshot();
        assert_eq!(snapshot.phase, SessionPhase::Idle);
        assert!(!snapshot.is_playing);
        assert_eq!(stops.load(Ordering::SeqCst), 1);

        // Tasks of the torn down session must not revive it.
        tokio::time::sleep(Duration::from_secs(3)).await;
        let snapshot = session.snapshot();
        assert_eq!(snapshot.phase, SessionPhase::Idle);
        assert_eq!(snapshot.time_left, 60);
        assert!(snapshot.objects.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_a_playing_session_releases_the_camera() {
        let (session, stops) = session(true, true);
        session.start().await.unwrap();
        drop(session);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }
}
