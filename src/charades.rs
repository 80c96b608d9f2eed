// THEORY:
// The `charades` module is the hand-matching game. A reference image is turned
// into a `TargetSet` once, then every webcam frame is graded against it.
//
// Key architectural principles:
// 1.  **One Model, Two Modes**: The same hand detector serves the still target
//     image and the live video. Loading a target switches it to image mode, the
//     webcam loop switches it back to video mode, and `ModeSwitch` makes each
//     switch complete before detection in the new mode starts.
// 2.  **Drop, Don't Queue**: While a target is loading, the processing flag is up
//     and webcam predictions are skipped outright. The next frame tries again.
//     Nothing is buffered, so a slow target load never produces a backlog.
// 3.  **All or Nothing Targets**: A load either replaces the whole target set or
//     clears it. The status line says which, and gameplay carries on either way.
// 4.  **One Loop per Enable**: Every `enable_webcam` starts a new run epoch. A
//     prediction loop only keeps going while its own epoch is current, and it
//     holds the game weakly, so dropping the game or toggling the webcam never
//     leaves an orphaned loop polling a released camera.

use crate::config::CharadesConfig;
use crate::core_modules::camera::{Camera, CameraLease};
use crate::core_modules::detector::{DetectorFactory, DetectorOptions, LandmarkDetector, ModeSwitch, RunningMode, init_detector};
use crate::core_modules::hand_matcher::{MatchResult, match_hands};
use crate::core_modules::landmark::HAND_CONNECTIONS;
use crate::core_modules::target::{ImageSource, TargetCarousel, TargetSet, TargetStore, extract_target};
use crate::render::{FrameBus, Hud, RenderFrame, Skeleton, StatusLine};
use crate::{Error, Result, lock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Lowers the processing flag when a target load finishes, however it finishes.
struct ProcessingGuard<'a>(&'a AtomicBool);

impl<'a> ProcessingGuard<'a> {
    fn raise(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for ProcessingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct CharadesGame {
    config: CharadesConfig,
    switch: ModeSwitch,
    targets: TargetStore,
    carousel: Mutex<TargetCarousel>,
    /// Serializes target loads so the last requested image wins.
    load_lock: tokio::sync::Mutex<()>,
    processing: AtomicBool,
    status: Mutex<StatusLine>,
    camera: Arc<dyn Camera>,
    lease: Mutex<CameraLease>,
    webcam_running: AtomicBool,
    /// Bumped on every enable; a loop from an older epoch exits.
    webcam_epoch: AtomicU64,
    bus: FrameBus,
}

impl CharadesGame {
    /// `detector` must be a hand detector currently in image mode.
    pub fn new(config: CharadesConfig, detector: Arc<dyn LandmarkDetector>, camera: Arc<dyn Camera>, sources: Vec<ImageSource>, bus: FrameBus) -> Self {
        Self {
            config,
            switch: ModeSwitch::new(detector, RunningMode::Image),
            targets: TargetStore::new(),
            carousel: Mutex::new(TargetCarousel::new(sources)),
            load_lock: tokio::sync::Mutex::new(()),
            processing: AtomicBool::new(false),
            status: Mutex::new(StatusLine::neutral("0%")),
            camera,
            lease: Mutex::new(CameraLease::empty()),
            webcam_running: AtomicBool::new(false),
            webcam_epoch: AtomicU64::new(0),
            bus,
        }
    }

    /// Creates the hand detector through `factory` and loads the first target.
    pub async fn init(factory: &dyn DetectorFactory, config: CharadesConfig, camera: Arc<dyn Camera>, sources: Vec<ImageSource>, bus: FrameBus) -> Result<Self> {
        let options = DetectorOptions::hands(config.num_hands, config.min_confidence);
        let detector = init_detector(factory, options).await?;
        let game = Self::new(config, detector, camera, sources, bus);
        if let Err(e) = game.reload_target().await {
            warn!(error = %e, "initial target did not load");
        }
        Ok(game)
    }

    pub fn status(&self) -> StatusLine {
        lock(&self.status).clone()
    }

    fn set_status(&self, status: StatusLine) {
        *lock(&self.status) = status;
    }

    pub fn targets(&self) -> Arc<TargetSet> {
        self.targets.snapshot()
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    pub fn webcam_running(&self) -> bool {
        self.webcam_running.load(Ordering::SeqCst)
    }

    pub async fn running_mode(&self) -> RunningMode {
        self.switch.mode().await
    }

    /// Extracts hands from `source` and replaces the target set, or clears it on failure.
    pub async fn load_target(&self, source: &ImageSource) -> Result<usize> {
        let _serial = self.load_lock.lock().await;
        let _processing = ProcessingGuard::raise(&self.processing);

        let outcome = match self.switch.ensure(RunningMode::Image).await {
            Ok(()) => extract_target(self.switch.detector().as_ref(), source, self.config.upscale_min_dimension).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(set) => {
                let hands = set.len();
                self.targets.replace(set);
                self.set_status(StatusLine::neutral(format!("Ready ({hands} hand(s))")));
                Ok(hands)
            }
            Err(e) => {
                error!(error = %e, "target not loaded");
                self.targets.clear();
                let text = match &e {
                    Error::NoLandmarksFound { .. } => "Error: No hand in target".to_string(),
                    Error::CrossOriginBlocked => "Error: Image cross-origin blocked".to_string(),
                    other => format!("Error: {other}"),
                };
                self.set_status(StatusLine::error(text));
                Err(e)
            }
        }
    }

    /// Loads the carousel's current image.
    pub async fn reload_target(&self) -> Result<usize> {
        let source = lock(&self.carousel).current().cloned();
        match source {
            Some(source) => self.load_target(&source).await,
            None => {
                self.targets.clear();
                self.set_status(StatusLine::neutral("No target"));
                Ok(0)
            }
        }
    }

    pub async fn next_target(&self) -> Result<usize> {
        lock(&self.carousel).next();
        self.reload_target().await
    }

    pub async fn previous_target(&self) -> Result<usize> {
        lock(&self.carousel).previous();
        self.reload_target().await
    }

    /// Acquires the camera and starts the prediction loop.
    pub async fn enable_webcam(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        if self.webcam_running() {
            return Err(Error::AlreadyPlaying);
        }
        let stream = match self.camera.open().await {
            Ok(stream) => stream,
            Err(e) => {
                error!(error = %e, "webcam acquisition failed");
                self.disable_webcam();
                return Err(e);
            }
        };
        *lock(&self.lease) = CameraLease::new(stream);
        let epoch = self.webcam_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.webcam_running.store(true, Ordering::SeqCst);
        info!(epoch = epoch, "webcam enabled");
        Ok(self.spawn_predict_loop(epoch))
    }

    /// Stops the prediction loop and releases the camera.
    pub fn disable_webcam(&self) {
        self.webcam_running.store(false, Ordering::SeqCst);
        lock(&self.lease).release();
    }

    /// Leaves the game screen: stops the webcam and forgets the loaded target.
    pub fn leave(&self) {
        self.disable_webcam();
        self.targets.clear();
        self.set_status(StatusLine::neutral("0%"));
        debug!("charades left");
    }

    fn is_current_run(&self, epoch: u64) -> bool {
        self.webcam_running() && self.webcam_epoch.load(Ordering::SeqCst) == epoch
    }

    /// Flips the webcam on or off. Returns the loop handle when it was turned on.
    pub async fn toggle_webcam(self: &Arc<Self>) -> Result<Option<JoinHandle<()>>> {
        if self.webcam_running() {
            self.disable_webcam();
            Ok(None)
        } else {
            self.enable_webcam().await.map(Some)
        }
    }

    fn spawn_predict_loop(self: &Arc<Self>, epoch: u64) -> JoinHandle<()> {
        let game: Weak<Self> = Arc::downgrade(self);
        let period = Duration::from_millis(self.config.frame_interval_ms);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                // Strong only for the duration of one prediction.
                let Some(game) = game.upgrade() else {
                    break;
                };
                if !game.is_current_run(epoch) {
                    break;
                }
                game.predict_frame().await;
            }
            debug!(epoch = epoch, "prediction loop stopped");
        })
    }

    /// Grades one webcam frame against the target set.
    ///
    /// Returns `None` when the frame was skipped: no webcam, a target load in
    /// progress, no new frame, a detection error, or nothing to compare.
    pub async fn predict_frame(&self) -> Option<MatchResult> {
        if !self.webcam_running() || self.is_processing() {
            return None;
        }
        let frame = lock(&self.lease).poll_frame()?;

        if let Err(e) = self.switch.ensure(RunningMode::Video).await {
            warn!(error = %e, "could not switch detector to video mode");
            return None;
        }
        if self.is_processing() {
            return None;
        }

        let detection = match self.switch.detector().detect_for_video(&frame.image, frame.timestamp_ms).await {
            Ok(detection) => detection,
            Err(e) => {
                warn!(error = %e, "hand detection failed, frame skipped");
                return None;
            }
        };

        let current = detection.hands();
        let targets = self.targets.snapshot();
        let (status, result) = if targets.is_empty() {
            (StatusLine::neutral("No target"), None)
        } else if current.is_empty() {
            (StatusLine::neutral("Waiting for hands..."), None)
        } else {
            let result = match_hands(targets.hands(), &current, self.config.scoring);
            debug!(per_target = ?result.per_target, total = result.total, "hands graded");
            (StatusLine::for_score(result.total), Some(result))
        };
        self.set_status(status.clone());

        let canvas = (f64::from(frame.image.width()), f64::from(frame.image.height()));
        self.bus.publish_frame(RenderFrame {
            timestamp_ms: frame.timestamp_ms,
            skeletons: current
                .iter()
                .map(|hand| Skeleton::from_landmarks(&hand.landmarks, &HAND_CONNECTIONS, canvas, false))
                .collect(),
            objects: Vec::new(),
            popups: Vec::new(),
            hud: Hud {
                score: result.as_ref().map(|r| r.total),
                time_left: None,
                status,
            },
        });
        result
    }
}

impl Drop for CharadesGame {
    fn drop(&mut self) {
        self.disable_webcam();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::camera::{CameraStream, VideoFrame};
    use crate::core_modules::landmark::{Detection, Landmark};
    use futures::FutureExt;
    use futures::future::BoxFuture;
    use image::DynamicImage;
    use std::sync::atomic::AtomicUsize;

    fn open_hand(shift: f64) -> Vec<Landmark> {
        (0..21)
            .map(|i| {
                let finger = (i / 4) as f64;
                let joint = (i % 4) as f64;
                Landmark::new(0.3 + shift + finger * 0.05, 0.8 - joint * 0.08 - finger * 0.01, 0.0)
            })
            .collect()
    }

    /// Reports one fixed hand for stills and `live` hands for video.
    struct ScriptedDetector {
        target: Option<Vec<Landmark>>,
        live: Vec<Vec<Landmark>>,
        video_calls: AtomicUsize,
        mode_switches: Mutex<Vec<RunningMode>>,
    }

    impl LandmarkDetector for ScriptedDetector {
        fn detect<'a>(&'a self, _image: &'a DynamicImage) -> BoxFuture<'a, Result<Detection>> {
            let landmarks = self.target.clone().into_iter().collect();
            async move {
                Ok(Detection {
                    landmarks,
                    handedness: vec![Some("Left".to_string())],
                })
            }
            .boxed()
        }

        fn detect_for_video<'a>(&'a self, _frame: &'a DynamicImage, _ts: u64) -> BoxFuture<'a, Result<Detection>> {
            self.video_calls.fetch_add(1, Ordering::SeqCst);
            let landmarks = self.live.clone();
            async move {
                Ok(Detection {
                    landmarks,
                    handedness: Vec::new(),
                })
            }
            .boxed()
        }

        fn set_running_mode(&self, mode: RunningMode) -> BoxFuture<'_, Result<()>> {
            self.mode_switches.lock().unwrap().push(mode);
            async { Ok(()) }.boxed()
        }
    }

    struct FrameEveryPoll {
        ts: u64,
        stops: Arc<AtomicUsize>,
    }

    impl CameraStream for FrameEveryPoll {
        fn poll_frame(&mut self) -> Option<VideoFrame> {
            self.ts += 33;
            Some(VideoFrame {
                image: Arc::new(DynamicImage::new_rgb8(640, 480)),
                timestamp_ms: self.ts,
            })
        }

        fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Webcam {
        stops: Arc<AtomicUsize>,
    }

    impl Camera for Webcam {
        fn open(&self) -> BoxFuture<'_, Result<Box<dyn CameraStream>>> {
            let stops = self.stops.clone();
            async move { Ok(Box::new(FrameEveryPoll { ts: 0, stops }) as Box<dyn CameraStream>) }.boxed()
        }
    }

    fn make_game(target: Option<Vec<Landmark>>, live: Vec<Vec<Landmark>>) -> (Arc<CharadesGame>, Arc<ScriptedDetector>) {
        let (game, detector, _) = counted_game(target, live);
        (game, detector)
    }

    /// Like `make_game`, plus a count of camera stream stops.
    fn counted_game(target: Option<Vec<Landmark>>, live: Vec<Vec<Landmark>>) -> (Arc<CharadesGame>, Arc<ScriptedDetector>, Arc<AtomicUsize>) {
        let stops = Arc::new(AtomicUsize::new(0));
        let detector = Arc::new(ScriptedDetector {
            target,
            live,
            video_calls: AtomicUsize::new(0),
            mode_switches: Mutex::new(Vec::new()),
        });
        let source = ImageSource::Decoded(Arc::new(DynamicImage::new_rgb8(320, 240)));
        let camera = Arc::new(Webcam { stops: stops.clone() });
        let game = CharadesGame::new(CharadesConfig::default(), detector.clone(), camera, vec![source], FrameBus::default());
        (Arc::new(game), detector, stops)
    }

    async fn enable(game: &Arc<CharadesGame>) {
        // The loop is aborted so tests drive frames by hand.
        let handle = game.enable_webcam().await.unwrap();
        handle.abort();
    }

    #[tokio::test]
    async fn loaded_target_reports_hand_count() {
        let (game, _) = make_game(Some(open_hand(0.0)), Vec::new());
        assert_eq!(game.reload_target().await.unwrap(), 1);
        assert_eq!(game.status(), StatusLine::neutral("Ready (1 hand(s))"));
        assert_eq!(game.targets().hands()[0].handedness.as_deref(), Some("Left"));
    }

    #[tokio::test]
    async fn target_without_hands_clears_the_set() {
        let (game, _) = make_game(None, Vec::new());
        assert!(matches!(game.reload_target().await, Err(Error::NoLandmarksFound { attempts: 3 })));
        assert!(game.targets().is_empty());
        assert_eq!(game.status(), StatusLine::error("Error: No hand in target"));
        assert!(!game.is_processing());
    }

    #[tokio::test]
    async fn restricted_target_has_its_own_message() {
        let (game, _) = make_game(Some(open_hand(0.0)), Vec::new());
        game.reload_target().await.unwrap();

        let source = ImageSource::Restricted {
            origin: "https://elsewhere.example".to_string(),
        };
        assert!(matches!(game.load_target(&source).await, Err(Error::CrossOriginBlocked)));
        assert!(game.targets().is_empty());
        assert_eq!(game.status().text, "Error: Image cross-origin blocked");
        assert!(!game.is_processing());
    }

    #[tokio::test]
    async fn matching_pose_scores_full_marks() {
        let (game, _) = make_game(Some(open_hand(0.0)), vec![open_hand(0.2)]);
        game.reload_target().await.unwrap();
        enable(&game).await;

        let result = game.predict_frame().await.unwrap();
        assert_eq!(result.total, 100);
        assert_eq!(game.status(), StatusLine::new("100%", StatusLine::GREEN));
        assert_eq!(game.running_mode().await, RunningMode::Video);
    }

    #[tokio::test]
    async fn status_explains_missing_target_or_hands() {
        let (game, _) = make_game(None, vec![open_hand(0.0)]);
        enable(&game).await;
        assert!(game.predict_frame().await.is_none());
        assert_eq!(game.status().text, "No target");

        let (game, _) = make_game(Some(open_hand(0.0)), Vec::new());
        game.reload_target().await.unwrap();
        enable(&game).await;
        assert!(game.predict_frame().await.is_none());
        assert_eq!(game.status().text, "Waiting for hands...");
    }

    #[tokio::test]
    async fn predictions_are_dropped_while_a_target_loads() {
        let (game, detector) = make_game(Some(open_hand(0.0)), vec![open_hand(0.0)]);
        enable(&game).await;

        game.processing.store(true, Ordering::SeqCst);
        assert!(game.predict_frame().await.is_none());
        assert_eq!(detector.video_calls.load(Ordering::SeqCst), 0);

        game.processing.store(false, Ordering::SeqCst);
        game.predict_frame().await;
        assert_eq!(detector.video_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn loading_a_target_switches_back_to_image_mode() {
        let (game, detector) = make_game(Some(open_hand(0.0)), vec![open_hand(0.0)]);
        enable(&game).await;
        game.predict_frame().await;
        game.next_target().await.unwrap();

        assert_eq!(*detector.mode_switches.lock().unwrap(), vec![RunningMode::Video, RunningMode::Image]);
        assert_eq!(game.running_mode().await, RunningMode::Image);
    }

    #[tokio::test]
    async fn toggling_off_stops_predictions() {
        let (game, _) = make_game(Some(open_hand(0.0)), vec![open_hand(0.0)]);
        enable(&game).await;
        assert!(game.toggle_webcam().await.unwrap().is_none());
        assert!(!game.webcam_running());
        assert!(game.predict_frame().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_the_game_releases_the_camera() {
        let (game, detector, stops) = counted_game(Some(open_hand(0.0)), vec![open_hand(0.0)]);
        game.reload_target().await.unwrap();
        let predictions = game.enable_webcam().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(detector.video_calls.load(Ordering::SeqCst) > 0);

        drop(game);
        predictions.await.unwrap();
        assert_eq!(stops.load(Ordering::SeqCst), 1);

        let calls = detector.video_calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(detector.video_calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test(start_paused = true)]
    async fn re_enabling_retires_the_previous_loop() {
        let (game, detector, stops) = counted_game(Some(open_hand(0.0)), vec![open_hand(0.0)]);
        let first = game.enable_webcam().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        game.disable_webcam();
        let second = game.enable_webcam().await.unwrap();

        tokio::time::sleep(Duration::from_millis(1600)).await;
        assert!(first.is_finished());
        assert!(!second.is_finished());
        assert_eq!(stops.load(Ordering::SeqCst), 1);

        // One loop at a 16 ms period, not two.
        let calls = detector.video_calls.load(Ordering::SeqCst);
        assert!((95..=110).contains(&calls), "{calls} video detections");

        game.disable_webcam();
        second.await.unwrap();
        assert_eq!(stops.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn leave_stops_the_webcam_and_forgets_the_target() {
        let (game, _, stops) = counted_game(Some(open_hand(0.0)), vec![open_hand(0.0)]);
        game.reload_target().await.unwrap();
        let predictions = game.enable_webcam().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        game.leave();
        predictions.await.unwrap();
        assert!(!game.webcam_running());
        assert!(game.targets().is_empty());
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert!(game.predict_frame().await.is_none());
    }
}
