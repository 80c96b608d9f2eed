//! Headless collaborators for driving games from a recording.
//!
//! A recording is a JSON-lines file with one `Detection` per line. The
//! `ReplayDetector` hands them out in order, one per detection call, and reports
//! nothing once the recording runs out. The `ReplayCamera` produces blank frames
//! on a fixed cadence so the frame loop has something to detect on.

use crate::core_modules::camera::{Camera, CameraStream, VideoFrame};
use crate::core_modules::detector::{LandmarkDetector, RunningMode};
use crate::core_modules::landmark::Detection;
use crate::{Result, lock};
use futures::FutureExt;
use futures::future::BoxFuture;
use image::DynamicImage;
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Plays back recorded detections.
pub struct ReplayDetector {
    queue: Mutex<VecDeque<Detection>>,
    mode: Mutex<RunningMode>,
}

impl ReplayDetector {
    pub fn new(detections: impl IntoIterator<Item = Detection>) -> Self {
        Self {
            queue: Mutex::new(detections.into_iter().collect()),
            mode: Mutex::new(RunningMode::Video),
        }
    }

    /// Parses a JSON-lines recording. Blank lines are skipped.
    pub fn from_reader(reader: impl Read) -> Result<Self> {
        let mut detections = Vec::new();
        for line in BufReader::new(reader).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            detections.push(serde_json::from_str::<Detection>(&line)?);
        }
        info!(frames = detections.len(), "recording loaded");
        Ok(Self::new(detections))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        Self::from_reader(std::fs::File::open(path)?)
    }

    pub fn remaining(&self) -> usize {
        lock(&self.queue).len()
    }

    pub fn mode(&self) -> RunningMode {
        *lock(&self.mode)
    }

    fn next_detection(&self) -> Detection {
        lock(&self.queue).pop_front().unwrap_or_default()
    }
}

impl LandmarkDetector for ReplayDetector {
    fn detect<'a>(&'a self, _image: &'a DynamicImage) -> BoxFuture<'a, Result<Detection>> {
        let detection = self.next_detection();
        async move { Ok(detection) }.boxed()
    }

    fn detect_for_video<'a>(&'a self, _frame: &'a DynamicImage, _timestamp_ms: u64) -> BoxFuture<'a, Result<Detection>> {
        let detection = self.next_detection();
        async move { Ok(detection) }.boxed()
    }

    fn set_running_mode(&self, mode: RunningMode) -> BoxFuture<'_, Result<()>> {
        *lock(&self.mode) = mode;
        debug!(?mode, "replay detector mode set");
        async { Ok(()) }.boxed()
    }
}

/// Writes detections as a JSON-lines recording.
pub fn write_recording(mut writer: impl Write, detections: &[Detection]) -> Result<()> {
    for detection in detections {
        serde_json::to_writer(&mut writer, detection)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// A camera whose frames are blank images with steadily advancing timestamps.
pub struct ReplayCamera {
    width: u32,
    height: u32,
    frame_interval_ms: u64,
}

impl ReplayCamera {
    pub fn new(width: u32, height: u32, frame_interval_ms: u64) -> Self {
        Self {
            width,
            height,
            frame_interval_ms,
        }
    }
}

impl Camera for ReplayCamera {
    fn open(&self) -> BoxFuture<'_, Result<Box<dyn CameraStream>>> {
        let stream = ReplayStream {
            image: Arc::new(DynamicImage::new_rgb8(self.width, self.height)),
            frame_interval_ms: self.frame_interval_ms,
            next_timestamp_ms: 0,
            stopped: false,
        };
        async move { Ok(Box::new(stream) as Box<dyn CameraStream>) }.boxed()
    }
}

struct ReplayStream {
    image: Arc<DynamicImage>,
    frame_interval_ms: u64,
    next_timestamp_ms: u64,
    stopped: bool,
}

impl CameraStream for ReplayStream {
    fn poll_frame(&mut self) -> Option<VideoFrame> {
        if self.stopped || self.image.width() == 0 || self.image.height() == 0 {
            return None;
        }
        let frame = VideoFrame {
            image: self.image.clone(),
            timestamp_ms: self.next_timestamp_ms,
        };
        self.next_timestamp_ms += self.frame_interval_ms;
        Some(frame)
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}
