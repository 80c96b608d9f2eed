// THEORY:
// This file is the entry point of the `motion_arcade` library crate: a landmark
// matching and game-state engine for webcam motion games.
//
// The pose/hand detector and the camera are external collaborators, reached only
// through the traits in `core_modules::detector` and `core_modules::camera`. On
// top of them sit two games:
// - `charades`: grade the player's hands against the hands of a reference image.
// - `session`: arcade play where jumps and foot actions step on blocks or limbs
//   touch circles under a countdown.
//
// The pure geometry (normalization, similarity, hand matching), the temporal
// classifier and the game object lifecycle live in `core_modules` and know
// nothing about tasks or clocks. Everything a renderer needs leaves through the
// `render::FrameBus`.

pub mod charades;
pub mod config;
pub mod core_modules;
pub mod render;
pub mod replay;
pub mod scheduler;
pub mod session;

use std::sync::{Mutex, MutexGuard};

pub use charades::CharadesGame;
pub use config::GameConfig;
pub use render::{FrameBus, GameEvent, RenderFrame};
pub use session::{ArcadeSession, SessionPhase, SessionSnapshot};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("landmark detector is not ready")]
    DetectorUnavailable,
    #[error("no hands found after {attempts} detection attempts")]
    NoLandmarksFound { attempts: usize },
    #[error("image cross-origin blocked")]
    CrossOriginBlocked,
    #[error("camera acquisition failed: {0}")]
    CameraAcquisitionFailed(String),
    #[error("detection failed: {0}")]
    Detection(String),
    #[error("a session is already playing")]
    AlreadyPlaying,
    #[error("invalid config: {0}")]
    Config(String),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Locks `mutex`, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
