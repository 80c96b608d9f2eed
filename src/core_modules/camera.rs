// THEORY:
// Camera capture is an external collaborator. The engine opens a stream when a
// session starts, polls it for fresh frames, and must stop it on every exit path:
// an explicit stop, the countdown running out, leaving the screen, or a failed
// acquisition. A leaked stream keeps the user's camera indicator lit.
//
// `CameraLease` ties the stream to a scope. Releasing it stops every track, and
// dropping it does the same, so an early return or a panic in a task cannot leak
// an open camera.

use crate::Result;
use futures::future::BoxFuture;
use image::DynamicImage;
use std::sync::Arc;
use tracing::info;

/// One captured video frame.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub image: Arc<DynamicImage>,
    /// Capture time on the stream's own clock.
    pub timestamp_ms: u64,
}

/// A source of camera streams.
pub trait Camera: Send + Sync {
    /// Acquires the camera. Fails with `Error::CameraAcquisitionFailed`.
    fn open(&self) -> BoxFuture<'_, Result<Box<dyn CameraStream>>>;
}

/// An open camera stream.
pub trait CameraStream: Send {
    /// The newest frame, or `None` when nothing new arrived since the last poll
    /// or the stream has no valid dimensions yet.
    fn poll_frame(&mut self) -> Option<VideoFrame>;

    /// Stops every track of the stream. Idempotent.
    fn stop(&mut self);
}

/// Scoped ownership of an open camera stream.
#[derive(Default)]
pub struct CameraLease {
    stream: Option<Box<dyn CameraStream>>,
}

impl CameraLease {
    pub fn new(stream: Box<dyn CameraStream>) -> Self {
        Self { stream: Some(stream) }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn poll_frame(&mut self) -> Option<VideoFrame> {
        self.stream.as_mut().and_then(|s| s.poll_frame())
    }

    /// Stops the stream. Returns true when a stream was actually open.
    pub fn release(&mut self) -> bool {
        match self.stream.take() {
            Some(mut stream) => {
                stream.stop();
                info!("camera released");
                true
            }
            None => false,
        }
    }
}

impl Drop for CameraLease {
    fn drop(&mut self) {
        self.release();
    }
}
