// THEORY:
// The `landmark` module holds the raw vocabulary of the engine: the points a pose
// or hand detector emits and the fixed anatomical meaning of their indices.
//
// Key architectural principles:
// 1.  **Dumb Data**: A `Landmark` is a plain, copyable value. It never changes
//     after the detector produced it; every later stage builds new sequences.
// 2.  **Order Is Meaning**: A `LandmarkSequence` is positional. Index 0 of a hand
//     is always the wrist, index 27 of a pose is always the left ankle. Nothing
//     in the crate sorts or filters these vectors.
// 3.  **Frame Scoped**: `Detection` and `DetectedHand` describe a single detector
//     call. Only the target set outlives the frame it came from.

use serde::{Deserialize, Serialize};

/// Number of landmarks in a hand skeleton.
pub const HAND_LANDMARK_COUNT: usize = 21;
/// Number of landmarks in a full body pose.
pub const POSE_LANDMARK_COUNT: usize = 33;

/// Pose landmark indices used by the arcade games.
pub mod pose {
    pub const NOSE: usize = 0;
    pub const LEFT_WRIST: usize = 15;
    pub const RIGHT_WRIST: usize = 16;
    pub const LEFT_ANKLE: usize = 27;
    pub const RIGHT_ANKLE: usize = 28;

    /// The four limb anchors tested against circles, in check order.
    pub const LIMB_ANCHORS: [usize; 4] = [LEFT_WRIST, RIGHT_WRIST, LEFT_ANKLE, RIGHT_ANKLE];
}

/// Hand landmark indices.
pub mod hand {
    pub const WRIST: usize = 0;
}

/// Bone pairs for drawing a hand skeleton.
pub const HAND_CONNECTIONS: [(usize, usize); 21] = [
    (0, 1), (1, 2), (2, 3), (3, 4),
    (0, 5), (5, 6), (6, 7), (7, 8),
    (5, 9), (9, 10), (10, 11), (11, 12),
    (9, 13), (13, 14), (14, 15), (15, 16),
    (13, 17), (17, 18), (18, 19), (19, 20),
    (0, 17),
];

/// Bone pairs for drawing a body pose skeleton.
pub const POSE_CONNECTIONS: [(usize, usize); 21] = [
    (0, 1), (1, 2), (2, 3), (3, 7),
    (0, 4), (4, 5), (5, 6), (6, 8),
    (9, 10),
    (11, 12),
    (11, 13), (13, 15),
    (12, 14), (14, 16),
    (11, 23), (12, 24),
    (23, 24),
    (23, 25), (25, 27),
    (24, 26), (26, 28),
];

/// A single detector point in normalized image space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmark {
    /// Horizontal position, 0.0 at the left edge and 1.0 at the right edge.
    pub x: f64,
    /// Vertical position, 0.0 at the top and 1.0 at the bottom.
    pub y: f64,
    /// Detector depth estimate. Carried through but never used for scoring.
    #[serde(default)]
    pub z: f64,
}

impl Landmark {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Planar distance to another landmark, ignoring depth.
    pub fn distance_2d(&self, other: &Landmark) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// An ordered landmark list whose indices carry anatomical meaning.
pub type LandmarkSequence = Vec<Landmark>;

/// One hand found by a detector call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DetectedHand {
    pub landmarks: LandmarkSequence,
    /// "Left" / "Right" when the detector reports it.
    pub handedness: Option<String>,
}

impl DetectedHand {
    pub fn new(landmarks: LandmarkSequence) -> Self {
        Self {
            landmarks,
            handedness: None,
        }
    }
}

/// The raw output of one detector call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Detection {
    /// One sequence per detected hand or pose.
    #[serde(default)]
    pub landmarks: Vec<LandmarkSequence>,
    /// Optional label per sequence, aligned by index with `landmarks`.
    #[serde(default)]
    pub handedness: Vec<Option<String>>,
}

impl Detection {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }

    /// Pairs every landmark sequence with its handedness label, if any.
    pub fn hands(&self) -> Vec<DetectedHand> {
        self.landmarks
            .iter()
            .enumerate()
            .map(|(i, landmarks)| DetectedHand {
                landmarks: landmarks.clone(),
                handedness: self.handedness.get(i).cloned().flatten(),
            })
            .collect()
    }

    /// The first pose, which is the only one the arcade games track.
    pub fn primary(&self) -> Option<&LandmarkSequence> {
        self.landmarks.first()
    }
}
