// THEORY:
// The `similarity` scorer grades how closely a live hand matches a reference
// hand on a 0..=100 scale.
//
// Both sequences are normalized, then compared index by index over the range
// they share. The mean planar distance `d` maps linearly onto the score:
// `d == 0` is a perfect 100 and `d >= MAX_MEAN_DISTANCE` bottoms out at 0.
//
// The charades game also compares against a horizontally mirrored copy of the
// live hand and keeps the better of the two. A webcam preview is usually
// mirrored and players freely swap hands, so a left hand copying a right-hand
// reference should still score. The legacy single-hand mode skips the mirror.

use crate::core_modules::landmark::Landmark;
use crate::core_modules::normalizer::normalize;
use serde::{Deserialize, Serialize};

/// Mean landmark distance (in normalized units) at which the score reaches 0.
pub const MAX_MEAN_DISTANCE: f64 = 0.5;

/// Which comparisons the scorer performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMode {
    /// Direct comparison only.
    Direct,
    /// Best of the direct and the horizontally mirrored comparison.
    #[default]
    MirrorTolerant,
}

/// Scores two raw landmark sequences with the given mode.
pub fn score(target: &[Landmark], current: &[Landmark], mode: ScoringMode) -> u32 {
    if target.is_empty() || current.is_empty() {
        return 0;
    }

    let norm_target = normalize(target);
    let norm_current = normalize(current);

    let direct = compare_normalized(&norm_target, &norm_current);
    let best = match mode {
        ScoringMode::Direct => direct,
        ScoringMode::MirrorTolerant => {
            let mirrored = mirror(&norm_current);
            direct.max(compare_normalized(&norm_target, &mirrored))
        }
    };

    best.round().clamp(0.0, 100.0) as u32
}

/// Unrounded score of two already-normalized sequences.
pub fn compare_normalized(a: &[Landmark], b: &[Landmark]) -> f64 {
    let len = a.len().min(b.len());
    if len == 0 {
        return 0.0;
    }

    let total: f64 = a.iter().zip(b).map(|(p, q)| p.distance_2d(q)).sum();
    let mean = total / len as f64;

    ((1.0 - mean / MAX_MEAN_DISTANCE) * 100.0).clamp(0.0, 100.0)
}

/// Negates x on every landmark.
pub fn mirror(landmarks: &[Landmark]) -> Vec<Landmark> {
    landmarks
        .iter()
        .map(|l| Landmark {
            x: -l.x,
            y: l.y,
            z: l.z,
        })
        .collect()
}
