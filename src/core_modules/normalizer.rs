// THEORY:
// The `normalizer` removes everything from a landmark sequence that should not
// influence a pose comparison: where the hand sits in the frame and how large it
// appears. What remains is shape.
//
// The anchor joint (the wrist, index 0) is moved to the origin and the whole
// sequence is scaled so the joint farthest from the anchor lies on the unit
// circle. Depth is dropped entirely; detector depth is noisy enough to swamp the
// planar signal.
//
// The function is total. Empty input gives empty output and a collapsed sequence
// (every point on the anchor) comes back centered but unscaled.

use crate::core_modules::landmark::{Landmark, hand};

/// Translates `landmarks` so the wrist is the origin and scales them to unit
/// maximum extent. Z is zeroed.
pub fn normalize(landmarks: &[Landmark]) -> Vec<Landmark> {
    let Some(anchor) = landmarks.get(hand::WRIST) else {
        return Vec::new();
    };

    let centered: Vec<Landmark> = landmarks
        .iter()
        .map(|l| Landmark {
            x: finite_or_zero(l.x - anchor.x),
            y: finite_or_zero(l.y - anchor.y),
            z: 0.0,
        })
        .collect();

    let max_dist = centered
        .iter()
        .map(|l| (l.x * l.x + l.y * l.y).sqrt())
        .fold(0.0_f64, f64::max);

    if max_dist == 0.0 {
        return centered;
    }

    centered
        .into_iter()
        .map(|l| Landmark {
            x: l.x / max_dist,
            y: l.y / max_dist,
            z: 0.0,
        })
        .collect()
}

// Malformed detector output (NaN coordinates) collapses onto the anchor.
fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() { v } else { 0.0 }
}
