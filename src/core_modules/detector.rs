// THEORY:
// The `detector` module is the seam between the engine and the pose/hand model.
// The model itself is a black box; the engine only needs "give me landmarks for
// this image" plus the ability to flip the model between single-image and video
// running modes.
//
// Key architectural principles:
// 1.  **Object-Safe Collaborator**: `LandmarkDetector` returns boxed futures so a
//     session can hold an `Arc<dyn LandmarkDetector>` and share it across tasks.
// 2.  **Explicit Running Mode**: Image and video detection are different modes of
//     the same model and switching is itself asynchronous. `ModeSwitch` remembers
//     the current mode and serializes switches so two callers never race a
//     half-applied switch.
// 3.  **Delegate Fallback**: Bootstrapping first asks for a GPU-delegated model
//     and quietly retries on the CPU. Only when both fail is the detector
//     reported unavailable.

use crate::core_modules::landmark::Detection;
use crate::{Error, Result};
use futures::future::BoxFuture;
use image::DynamicImage;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Detector operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunningMode {
    /// Independent still images.
    Image,
    /// A timestamped stream of video frames.
    Video,
}

/// Compute backend requested from the detector factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delegate {
    Gpu,
    Cpu,
}

/// Options handed to a `DetectorFactory`.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorOptions {
    pub delegate: Delegate,
    pub running_mode: RunningMode,
    /// Maximum number of hands or poses to report.
    pub max_results: u32,
    pub min_detection_confidence: f32,
    pub min_presence_confidence: f32,
    pub min_tracking_confidence: f32,
}

impl DetectorOptions {
    /// Two-hand detector with permissive thresholds, starting in image mode.
    pub fn hands(max_hands: u32, min_confidence: f32) -> Self {
        Self {
            delegate: Delegate::Gpu,
            running_mode: RunningMode::Image,
            max_results: max_hands,
            min_detection_confidence: min_confidence,
            min_presence_confidence: min_confidence,
            min_tracking_confidence: min_confidence,
        }
    }

    /// Single-pose detector in video mode.
    pub fn pose() -> Self {
        Self {
            delegate: Delegate::Gpu,
            running_mode: RunningMode::Video,
            max_results: 1,
            min_detection_confidence: 0.5,
            min_presence_confidence: 0.5,
            min_tracking_confidence: 0.5,
        }
    }
}

/// A pose or hand landmark model.
pub trait LandmarkDetector: Send + Sync {
    /// Detects landmarks in a still image. Valid in `RunningMode::Image`.
    fn detect<'a>(&'a self, image: &'a DynamicImage) -> BoxFuture<'a, Result<Detection>>;

    /// Detects landmarks in a video frame. Valid in `RunningMode::Video`.
    fn detect_for_video<'a>(&'a self, frame: &'a DynamicImage, timestamp_ms: u64) -> BoxFuture<'a, Result<Detection>>;

    /// Reconfigures the model. Must complete before detection in the new mode.
    fn set_running_mode(&self, mode: RunningMode) -> BoxFuture<'_, Result<()>>;
}

/// Builds detectors.
pub trait DetectorFactory: Send + Sync {
    fn create(&self, options: DetectorOptions) -> BoxFuture<'_, Result<Arc<dyn LandmarkDetector>>>;
}

/// Creates a detector, preferring the GPU delegate and falling back to the CPU.
pub async fn init_detector(factory: &dyn DetectorFactory, options: DetectorOptions) -> Result<Arc<dyn LandmarkDetector>> {
    let gpu = DetectorOptions {
        delegate: Delegate::Gpu,
        ..options.clone()
    };
    match factory.create(gpu).await {
        Ok(detector) => {
            info!("landmark detector ready (gpu)");
            return Ok(detector);
        }
        Err(e) => warn!(error = %e, "gpu delegate failed, retrying on cpu"),
    }

    let cpu = DetectorOptions {
        delegate: Delegate::Cpu,
        ..options
    };
    match factory.create(cpu).await {
        Ok(detector) => {
            info!("landmark detector ready (cpu)");
            Ok(detector)
        }
        Err(e) => {
            error!(error = %e, "landmark detector could not be created");
            Err(Error::DetectorUnavailable)
        }
    }
}

/// A detector plus the running mode it is currently configured for.
pub struct ModeSwitch {
    detector: Arc<dyn LandmarkDetector>,
    mode: Mutex<RunningMode>,
}

impl ModeSwitch {
    pub fn new(detector: Arc<dyn LandmarkDetector>, initial: RunningMode) -> Self {
        Self {
            detector,
            mode: Mutex::new(initial),
        }
    }

    pub fn detector(&self) -> &Arc<dyn LandmarkDetector> {
        &self.detector
    }

    pub async fn mode(&self) -> RunningMode {
        *self.mode.lock().await
    }

    /// Switches the detector to `mode` if it is not already there.
    pub async fn ensure(&self, mode: RunningMode) -> Result<()> {
        let mut current = self.mode.lock().await;
        if *current != mode {
            self.detector.set_running_mode(mode).await?;
            *current = mode;
            info!(?mode, "detector running mode switched");
        }
        Ok(())
    }
}
