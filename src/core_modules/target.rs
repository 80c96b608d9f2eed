// THEORY:
// The `target` module turns a reference image into the set of hands a player is
// graded against, and keeps that set safe to read from the frame loop while a
// new one is being loaded.
//
// Key architectural principles:
// 1.  **Persistent Fallbacks**: Detectors sometimes miss a hand in a perfectly
//     good still image. Extraction retries on an RGBA copy, the image as decoded,
//     and an upscaled copy before giving up. A failing attempt is logged and the
//     next one runs.
// 2.  **Atomic Replacement**: The `TargetStore` hands out `Arc` snapshots. A load
//     builds a complete `TargetSet` off to the side and swaps it in with one write;
//     a failed load swaps in the empty set. Readers never see a half-filled set.
// 3.  **Unreadable Pixels Are Distinct**: An image whose pixels cannot be read
//     (a cross-origin restriction) fails before the detector is ever called and
//     is reported with its own message.

use crate::core_modules::detector::LandmarkDetector;
use crate::core_modules::landmark::{DetectedHand, Detection};
use crate::{Error, Result};
use image::DynamicImage;
use image::imageops::FilterType;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Where a reference image comes from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    /// Already decoded pixels.
    Decoded(Arc<DynamicImage>),
    /// Encoded bytes (PNG, JPEG, ...).
    Encoded(Arc<[u8]>),
    /// An image file on disk.
    File(PathBuf),
    /// An image whose pixels the host refuses to expose.
    Restricted { origin: String },
}

impl ImageSource {
    /// Decodes the pixels, failing with `CrossOriginBlocked` for restricted images.
    pub fn read_pixels(&self) -> Result<Arc<DynamicImage>> {
        match self {
            ImageSource::Decoded(image) => Ok(image.clone()),
            ImageSource::Encoded(bytes) => Ok(Arc::new(image::load_from_memory(bytes)?)),
            ImageSource::File(path) => Ok(Arc::new(image::open(path)?)),
            ImageSource::Restricted { origin } => {
                warn!(%origin, "reference image pixels are not readable");
                Err(Error::CrossOriginBlocked)
            }
        }
    }
}

/// The reference hands of the current target image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetSet {
    hands: Vec<DetectedHand>,
}

impl TargetSet {
    pub fn new(hands: Vec<DetectedHand>) -> Self {
        Self { hands }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn hands(&self) -> &[DetectedHand] {
        &self.hands
    }

    pub fn len(&self) -> usize {
        self.hands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hands.is_empty()
    }
}

impl From<Detection> for TargetSet {
    fn from(detection: Detection) -> Self {
        Self::new(detection.hands())
    }
}

/// Shared holder of the current target set.
#[derive(Debug, Default)]
pub struct TargetStore {
    current: RwLock<Arc<TargetSet>>,
}

impl TargetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current set. Cheap; the returned snapshot never changes.
    pub fn snapshot(&self) -> Arc<TargetSet> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn replace(&self, set: TargetSet) {
        let set = Arc::new(set);
        match self.current.write() {
            Ok(mut guard) => *guard = set,
            Err(poisoned) => *poisoned.into_inner() = set,
        }
    }

    pub fn clear(&self) {
        self.replace(TargetSet::empty());
    }
}

/// Runs the detector over `source`, retrying with fallback renditions.
///
/// The detector must already be in image mode.
pub async fn extract_target(detector: &dyn LandmarkDetector, source: &ImageSource, upscale_min_dimension: u32) -> Result<TargetSet> {
    let image = source.read_pixels()?;
    debug!(width = image.width(), height = image.height(), "extracting target hands");

    let total = Rendition::ORDER.len();
    for (i, rendition) in Rendition::ORDER.into_iter().enumerate() {
        // Built only once the previous attempt came back empty.
        let candidate = rendition.build(&image, upscale_min_dimension);
        let label = rendition.label();
        match detector.detect(&candidate).await {
            Ok(detection) if !detection.is_empty() => {
                let set = TargetSet::from(detection);
                info!(hands = set.len(), attempt = label, "target hands loaded");
                return Ok(set);
            }
            Ok(_) => warn!(attempt = label, "no hands in target rendition ({}/{})", i + 1, total),
            Err(e) => warn!(attempt = label, error = %e, "target detection attempt failed"),
        }
    }

    Err(Error::NoLandmarksFound { attempts: total })
}

/// The image variants tried in turn when extracting target hands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rendition {
    Rgba,
    Original,
    Upscaled,
}

impl Rendition {
    const ORDER: [Rendition; 3] = [Rendition::Rgba, Rendition::Original, Rendition::Upscaled];

    fn label(self) -> &'static str {
        match self {
            Rendition::Rgba => "rgba",
            Rendition::Original => "original",
            Rendition::Upscaled => "upscaled",
        }
    }

    fn build(self, image: &DynamicImage, upscale_min_dimension: u32) -> DynamicImage {
        match self {
            Rendition::Rgba => DynamicImage::ImageRgba8(image.to_rgba8()),
            Rendition::Original => image.clone(),
            Rendition::Upscaled => {
                let width = image.width().max(1).saturating_mul(2).max(upscale_min_dimension);
                let height = image.height().max(1).saturating_mul(2).max(upscale_min_dimension);
                image.resize_exact(width, height, FilterType::Triangle)
            }
        }
    }
}

/// An ordered list of reference images with a wrapping cursor.
#[derive(Debug, Clone)]
pub struct TargetCarousel {
    sources: Vec<ImageSource>,
    index: usize,
}

impl TargetCarousel {
    pub fn new(sources: Vec<ImageSource>) -> Self {
        Self { sources, index: 0 }
    }

    pub fn current(&self) -> Option<&ImageSource> {
        self.sources.get(self.index)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn next(&mut self) -> Option<&ImageSource> {
        if !self.sources.is_empty() {
            self.index = (self.index + 1) % self.sources.len();
        }
        self.current()
    }

    pub fn previous(&mut self) -> Option<&ImageSource> {
        if !self.sources.is_empty() {
            self.index = (self.index + self.sources.len() - 1) % self.sources.len();
        }
        self.current()
    }
}
