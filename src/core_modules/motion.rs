// THEORY:
// The `motion` module is the temporal classifier of the arcade games. It turns
// two noisy scalar streams taken from the player's pose into discrete events the
// game logic can act on.
//
// Key architectural principles:
// 1.  **Adaptive Baseline**: The `JumpDetector` does not assume where the player
//     stands. It spends a short learning window averaging head height into a
//     `MotionBaseline`, then measures every later sample against that learned
//     neutral position. This mirrors the learning phase of a statistical
//     change detector: no verdicts until the model of "normal" exists.
// 2.  **Debounce by Cooldown**: Once a jump fires it stays "in flight" for a fixed
//     cooldown. While airborne the player keeps exceeding the threshold on every
//     frame, and without the cooldown one physical jump would score many times.
//     When the cooldown resolves, the baseline is re-anchored to wherever the
//     player is standing now.
// 3.  **Sticky Action Flag**: The `ActionDetector` watches frame-to-frame foot
//     movement and latches a flag. The flag is only cleared by `take`, which the
//     block collision pass calls exactly once per successful hit, so standing
//     still on a spawn zone cannot farm points.
// 4.  **Caller-Supplied Time**: Timestamps come in as milliseconds from the
//     caller. The classifier never reads a clock, which keeps it deterministic.

use crate::config::MotionConfig;

/// Running estimate of the player's neutral vertical position.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MotionBaseline {
    pub running_mean: f64,
    pub sample_count: u32,
}

impl MotionBaseline {
    fn absorb(&mut self, value: f64) {
        self.sample_count += 1;
        self.running_mean += (value - self.running_mean) / self.sample_count as f64;
    }

    fn reanchor(&mut self, value: f64) {
        self.running_mean = value;
    }
}

/// A detected jump.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JumpEvent {
    /// Caller timestamp of the triggering sample.
    pub at_ms: u64,
    /// How far above the baseline the sample was, in normalized frame height.
    pub height: f64,
}

/// Detects jumps from a per-frame head height stream.
#[derive(Debug, Clone)]
pub struct JumpDetector {
    calibration_samples: u32,
    threshold: f64,
    cooldown_ms: u64,
    baseline: MotionBaseline,
    /// Start time of the jump currently in flight.
    in_flight_since: Option<u64>,
}

impl JumpDetector {
    pub fn new(config: &MotionConfig) -> Self {
        Self {
            calibration_samples: config.calibration_samples,
            threshold: config.jump_threshold,
            cooldown_ms: config.jump_cooldown_ms,
            baseline: MotionBaseline::default(),
            in_flight_since: None,
        }
    }

    /// Feeds one head-height sample. Returns a jump when one starts on this sample.
    pub fn observe(&mut self, y: f64, now_ms: u64) -> Option<JumpEvent> {
        if !y.is_finite() {
            return None;
        }

        if self.is_calibrating() {
            self.baseline.absorb(y);
            return None;
        }

        let delta = self.baseline.running_mean - y;
        let mut event = None;

        if delta > self.threshold && self.in_flight_since.is_none() {
            self.in_flight_since = Some(now_ms);
            event = Some(JumpEvent {
                at_ms: now_ms,
                height: delta,
            });
        }

        if let Some(started) = self.in_flight_since {
            if now_ms.saturating_sub(started) > self.cooldown_ms {
                self.in_flight_since = None;
                self.baseline.reanchor(y);
            }
        }

        event
    }

    pub fn is_calibrating(&self) -> bool {
        self.baseline.sample_count < self.calibration_samples
    }

    pub fn is_jumping(&self) -> bool {
        self.in_flight_since.is_some()
    }

    pub fn baseline(&self) -> MotionBaseline {
        self.baseline
    }
}

/// Latches a flag whenever the foot moves more than a threshold between frames.
#[derive(Debug, Clone)]
pub struct ActionDetector {
    threshold: f64,
    previous: Option<f64>,
    has_action: bool,
}

impl ActionDetector {
    pub fn new(config: &MotionConfig) -> Self {
        Self {
            threshold: config.action_threshold,
            previous: None,
            has_action: false,
        }
    }

    /// Feeds one foot-height sample. Returns true when this sample qualified as motion.
    pub fn observe(&mut self, foot_y: f64) -> bool {
        if !foot_y.is_finite() {
            return false;
        }

        let moved = self
            .previous
            .is_some_and(|prev| (foot_y - prev).abs() > self.threshold);
        self.previous = Some(foot_y);

        if moved {
            self.has_action = true;
        }
        moved
    }

    /// Sets the flag without a foot sample (a jump counts as an action).
    pub fn mark(&mut self) {
        self.has_action = true;
    }

    pub fn has_action(&self) -> bool {
        self.has_action
    }

    /// Reads and clears the flag.
    pub fn take(&mut self) -> bool {
        std::mem::take(&mut self.has_action)
    }
}
