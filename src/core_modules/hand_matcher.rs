// THEORY:
// The `hand_matcher` solves a tiny data association problem: a reference image
// may show up to two hands and the webcam may see up to two hands, and each
// reference hand must be graded against the live hand that resembles it most.
//
// Key architectural principles:
// 1.  **Greedy, Target-Major**: Targets are visited in order. Each one claims the
//     best still-unclaimed live hand. Ties keep the first hand seen. This is a
//     local assignment, not a globally optimal one; with at most two hands per
//     side the difference is negligible and the result is deterministic.
// 2.  **Exclusive Claims**: A live hand scores against at most one target. A
//     target whose best candidate scores 0 claims nothing and scores 0.
// 3.  **Flat Aggregation**: The overall score is the rounded mean over targets, so
//     a missing hand halves a two-hand score instead of being ignored.

use crate::core_modules::landmark::DetectedHand;
use crate::core_modules::similarity::{self, ScoringMode};
use std::collections::HashSet;

/// Per-target scores plus their aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MatchResult {
    /// One score per target hand, in target order.
    pub per_target: Vec<u32>,
    /// For each target, the index of the live hand it claimed.
    pub assignments: Vec<Option<usize>>,
    /// Rounded mean of `per_target`; 0 when there are no targets.
    pub total: u32,
}

/// Greedily assigns `current` hands to `targets` and scores each pair.
pub fn match_hands(targets: &[DetectedHand], current: &[DetectedHand], mode: ScoringMode) -> MatchResult {
    let mut used: HashSet<usize> = HashSet::new();
    let mut per_target = Vec::with_capacity(targets.len());
    let mut assignments = Vec::with_capacity(targets.len());

    for target in targets {
        let mut best_score = 0;
        let mut best_index: Option<usize> = None;

        for (ci, hand) in current.iter().enumerate() {
            if used.contains(&ci) {
                continue;
            }
            let s = similarity::score(&target.landmarks, &hand.landmarks, mode);
            if s > best_score {
                best_score = s;
                best_index = Some(ci);
            }
        }

        if let Some(ci) = best_index {
            used.insert(ci);
        }
        per_target.push(best_score);
        assignments.push(best_index);
    }

    let total = if per_target.is_empty() {
        0
    } else {
        let sum: u32 = per_target.iter().sum();
        (sum as f64 / per_target.len() as f64).round() as u32
    };

    MatchResult {
        per_target,
        assignments,
        total,
    }
}
