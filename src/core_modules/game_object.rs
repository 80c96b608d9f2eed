// THEORY:
// The `game_object` module owns the short lives of the things a player chases:
// blocks on the floor and circles in the air.
//
// Key architectural principles:
// 1.  **Birth**: The `Spawner` creates one object per spawn tick from a small
//     palette of lanes, positions and colors. Randomness comes from a seedable
//     generator so a session can be replayed exactly.
// 2.  **Bounded Queue**: The `EntityField` is a FIFO with a hard capacity. When a
//     spawn overflows it the oldest object is dropped. There is no recency
//     tracking; an object that was never touched has no reuse value.
// 3.  **Death by Collision**: A collision pass deactivates every object the player
//     reaches and reports a `Hit` for it. An object is inert the moment it is
//     deactivated, so it can never score twice in one pass.
// 4.  **Purge, Not Tombstones**: Every collision pass ends by dropping inactive
//     objects. Between passes the field only ever holds live objects.

use crate::config::{ArcadeMode, BlockConfig, CircleConfig};
use crate::core_modules::motion::ActionDetector;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// A point in canvas pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: f64,
    pub y: f64,
}

impl ScreenPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &ScreenPoint) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Shape-specific extent of a game object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Shape {
    /// `position` is the top-left corner.
    Block { width: f64, height: f64 },
    /// `position` is the center.
    Circle { radius: f64 },
}

/// A transient on-screen target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameObject {
    /// Unique within a session.
    pub id: u64,
    pub position: ScreenPoint,
    pub shape: Shape,
    pub color: String,
    /// Cleared by a collision. Inactive objects are purged at the end of the pass.
    pub active: bool,
    /// Session time the object was spawned at.
    pub created_at_ms: u64,
}

impl GameObject {
    pub fn center(&self) -> ScreenPoint {
        match self.shape {
            Shape::Block { width, height } => {
                ScreenPoint::new(self.position.x + width / 2.0, self.position.y + height / 2.0)
            }
            Shape::Circle { .. } => self.position,
        }
    }
}

/// A scored collision, reported so the renderer can acknowledge it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    pub object_id: u64,
    /// Where to draw the acknowledgment.
    pub at: ScreenPoint,
    pub award: u32,
}

/// Creates new game objects for one arcade mode.
pub struct Spawner {
    mode: ArcadeMode,
    blocks: BlockConfig,
    circles: CircleConfig,
    canvas_width: f64,
    canvas_height: f64,
    rng: StdRng,
    next_id: u64,
}

impl Spawner {
    pub fn new(mode: ArcadeMode, blocks: BlockConfig, circles: CircleConfig, canvas: (f64, f64)) -> Self {
        Self::with_rng(mode, blocks, circles, canvas, StdRng::from_entropy())
    }

    /// A spawner whose placement sequence is fully determined by `seed`.
    pub fn seeded(mode: ArcadeMode, blocks: BlockConfig, circles: CircleConfig, canvas: (f64, f64), seed: u64) -> Self {
        Self::with_rng(mode, blocks, circles, canvas, StdRng::seed_from_u64(seed))
    }

    fn with_rng(mode: ArcadeMode, blocks: BlockConfig, circles: CircleConfig, canvas: (f64, f64), rng: StdRng) -> Self {
        Self {
            mode,
            blocks,
            circles,
            canvas_width: canvas.0,
            canvas_height: canvas.1,
            rng,
            next_id: 0,
        }
    }

    pub fn mode(&self) -> ArcadeMode {
        self.mode
    }

    /// Spawn period for this spawner's mode.
    pub fn interval_ms(&self) -> u64 {
        match self.mode {
            ArcadeMode::Blocks => self.blocks.spawn_interval_ms,
            ArcadeMode::Circles => self.circles.spawn_interval_ms,
        }
    }

    /// Live-set capacity for this spawner's mode.
    pub fn capacity(&self) -> usize {
        match self.mode {
            ArcadeMode::Blocks => self.blocks.capacity,
            ArcadeMode::Circles => self.circles.capacity,
        }
    }

    pub fn spawn(&mut self, now_ms: u64) -> GameObject {
        let id = self.next_id;
        self.next_id += 1;

        match self.mode {
            ArcadeMode::Blocks => {
                let x = self.blocks.lanes.choose(&mut self.rng).copied().unwrap_or(0.0);
                let y = self.canvas_height - self.blocks.height;
                GameObject {
                    id,
                    position: ScreenPoint::new(x, y),
                    shape: Shape::Block {
                        width: self.blocks.width,
                        height: self.blocks.height,
                    },
                    color: pick_color(&self.blocks.palette, &mut self.rng),
                    active: true,
                    created_at_ms: now_ms,
                }
            }
            ArcadeMode::Circles => {
                let margin = self.circles.edge_margin;
                let x = sample_axis(&mut self.rng, margin, self.canvas_width - margin);
                let y = sample_axis(&mut self.rng, margin, self.canvas_height - margin);
                GameObject {
                    id,
                    position: ScreenPoint::new(x, y),
                    shape: Shape::Circle {
                        radius: self.circles.radius,
                    },
                    color: pick_color(&self.circles.palette, &mut self.rng),
                    active: true,
                    created_at_ms: now_ms,
                }
            }
        }
    }
}

fn pick_color(palette: &[String], rng: &mut StdRng) -> String {
    palette.choose(rng).cloned().unwrap_or_else(|| "#FFFFFF".to_string())
}

// Uniform in [lo, hi]; collapses to the midpoint when the range is inverted.
fn sample_axis(rng: &mut StdRng, lo: f64, hi: f64) -> f64 {
    if lo < hi { rng.gen_range(lo..=hi) } else { (lo + hi) / 2.0 }
}

/// The live set of game objects for one session.
#[derive(Debug, Clone)]
pub struct EntityField {
    objects: VecDeque<GameObject>,
    capacity: usize,
}

impl EntityField {
    pub fn new(capacity: usize) -> Self {
        Self {
            objects: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Appends `object`, evicting and returning the oldest one when over capacity.
    pub fn push(&mut self, object: GameObject) -> Option<GameObject> {
        self.objects.push_back(object);
        if self.objects.len() > self.capacity {
            self.objects.pop_front()
        } else {
            None
        }
    }

    /// Block collision pass. Only runs while the action flag is set; each hit
    /// consumes the flag, so one motion scores at most one block.
    pub fn collide_blocks(&mut self, foot: ScreenPoint, action: &mut ActionDetector, config: &BlockConfig) -> Vec<Hit> {
        let mut hits = Vec::new();

        for object in self.objects.iter_mut() {
            if !action.has_action() {
                break;
            }
            if !object.active {
                continue;
            }
            let Shape::Block { width, height } = object.shape else {
                continue;
            };

            let center = object.center();
            let distance_x = (foot.x - center.x).abs();
            let distance_y = (foot.y - center.y).abs();

            if distance_x < width / 2.0 + config.margin_x && distance_y < height / 2.0 + config.margin_y {
                debug!(
                    block = object.id,
                    distance_x = distance_x,
                    distance_y = distance_y,
                    "block stepped on"
                );
                object.active = false;
                action.take();
                hits.push(Hit {
                    object_id: object.id,
                    at: object.position,
                    award: config.award,
                });
            }
        }

        self.purge();
        hits
    }

    /// Circle collision pass. Any limb within reach scores the circle once.
    pub fn collide_circles(&mut self, limbs: &[ScreenPoint], config: &CircleConfig) -> Vec<Hit> {
        let mut hits = Vec::new();

        for object in self.objects.iter_mut() {
            if !object.active {
                continue;
            }
            let Shape::Circle { radius } = object.shape else {
                continue;
            };

            let center = object.center();
            if limbs.iter().any(|limb| limb.distance(&center) < radius + config.tolerance) {
                debug!(circle = object.id, "circle touched");
                object.active = false;
                hits.push(Hit {
                    object_id: object.id,
                    at: center,
                    award: config.award,
                });
            }
        }

        self.purge();
        hits
    }

    /// Drops every inactive object.
    pub fn purge(&mut self) {
        self.objects.retain(|o| o.active);
    }

    pub fn objects(&self) -> impl Iterator<Item = &GameObject> {
        self.objects.iter()
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MotionConfig;

    fn block_at(id: u64, x: f64, y: f64) -> GameObject {
        GameObject {
            id,
            position: ScreenPoint::new(x, y),
            shape: Shape::Block { width: 80.0, height: 40.0 },
            color: "#FF6B6B".to_string(),
            active: true,
            created_at_ms: 0,
        }
    }

    fn circle_at(id: u64, x: f64, y: f64) -> GameObject {
        GameObject {
            id,
            position: ScreenPoint::new(x, y),
            shape: Shape::Circle { radius: 40.0 },
            color: "#4ECDC4".to_string(),
            active: true,
            created_at_ms: 0,
        }
    }

    fn armed_action() -> ActionDetector {
        let mut action = ActionDetector::new(&MotionConfig::default());
        action.mark();
        action
    }

    #[test]
    fn stepping_on_block_scores_and_purges_it() {
        let mut field = EntityField::new(6);
        field.push(block_at(0, 200.0, 440.0));
        let mut action = armed_action();

        let hits = field.collide_blocks(ScreenPoint::new(220.0, 450.0), &mut action, &BlockConfig::default());

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].award, 10);
        assert_eq!(hits[0].at, ScreenPoint::new(200.0, 440.0));
        assert!(!action.has_action());
        assert!(field.is_empty());
    }

    #[test]
    fn block_needs_a_preceding_action() {
        let mut field = EntityField::new(6);
        field.push(block_at(0, 200.0, 440.0));
        let mut action = ActionDetector::new(&MotionConfig::default());

        let hits = field.collide_blocks(ScreenPoint::new(240.0, 460.0), &mut action, &BlockConfig::default());
        assert!(hits.is_empty());
        assert_eq!(field.len(), 1);
    }

    #[test]
    fn block_tolerance_is_per_axis() {
        let config = BlockConfig::default();
        let mut field = EntityField::new(6);
        field.push(block_at(0, 200.0, 440.0));

        // Center is (240, 460); horizontal reach 60, vertical reach 50.
        let mut action = armed_action();
        assert!(field.collide_blocks(ScreenPoint::new(300.0, 460.0), &mut action, &config).is_empty());
        assert!(field.collide_blocks(ScreenPoint::new(240.0, 410.0), &mut action, &config).is_empty());
        // Inside both axes but far on the diagonal still counts.
        assert_eq!(field.collide_blocks(ScreenPoint::new(299.0, 411.0), &mut action, &config).len(), 1);
    }

    #[test]
    fn one_action_scores_one_block() {
        let mut field = EntityField::new(6);
        field.push(block_at(0, 200.0, 440.0));
        field.push(block_at(1, 220.0, 440.0));
        let mut action = armed_action();

        let hits = field.collide_blocks(ScreenPoint::new(250.0, 460.0), &mut action, &BlockConfig::default());
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].object_id, 0);
        assert_eq!(field.len(), 1);
    }

    #[test]
    fn circle_scores_once_even_with_several_limbs_inside() {
        let mut field = EntityField::new(5);
        field.push(circle_at(0, 100.0, 100.0));
        field.push(circle_at(1, 500.0, 300.0));

        let limbs = [
            ScreenPoint::new(110.0, 100.0),
            ScreenPoint::new(90.0, 105.0),
            ScreenPoint::new(0.0, 0.0),
            ScreenPoint::new(640.0, 480.0),
        ];
        let hits = field.collide_circles(&limbs, &CircleConfig::default());

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].object_id, 0);
        assert_eq!(hits[0].at, ScreenPoint::new(100.0, 100.0));
        assert_eq!(field.len(), 1);
    }

    #[test]
    fn circle_reach_is_radius_plus_tolerance() {
        let config = CircleConfig::default();
        let mut field = EntityField::new(5);
        field.push(circle_at(0, 100.0, 100.0));

        assert!(field.collide_circles(&[ScreenPoint::new(160.0, 100.0)], &config).is_empty());
        assert_eq!(field.collide_circles(&[ScreenPoint::new(159.0, 100.0)], &config).len(), 1);
    }

    #[test]
    fn overflow_evicts_oldest() {
        let mut field = EntityField::new(6);
        for id in 0..6 {
            assert!(field.push(block_at(id, 160.0, 440.0)).is_none());
        }
        let evicted = field.push(block_at(6, 160.0, 440.0)).expect("eviction");
        assert_eq!(evicted.id, 0);
        assert_eq!(field.len(), 6);
        assert_eq!(field.objects().next().map(|o| o.id), Some(1));
    }

    #[test]
    fn spawned_blocks_sit_on_the_floor_in_a_lane() {
        let config = BlockConfig::default();
        let mut spawner = Spawner::seeded(ArcadeMode::Blocks, config.clone(), CircleConfig::default(), (640.0, 480.0), 7);
        assert_eq!(spawner.interval_ms(), 2000);
        assert_eq!(spawner.capacity(), 6);

        for i in 0..20 {
            let block = spawner.spawn(i * 2000);
            assert_eq!(block.id, i);
            assert_eq!(block.position.y, 440.0);
            assert!(config.lanes.contains(&block.position.x));
            assert!(config.palette.contains(&block.color));
            assert!(block.active);
        }
    }

    #[test]
    fn spawned_circles_respect_edge_margin() {
        let config = CircleConfig::default();
        let mut spawner = Spawner::seeded(ArcadeMode::Circles, BlockConfig::default(), config.clone(), (640.0, 480.0), 11);
        assert_eq!(spawner.interval_ms(), 1500);

        for i in 0..50 {
            let circle = spawner.spawn(i);
            assert!((60.0..=580.0).contains(&circle.position.x));
            assert!((60.0..=420.0).contains(&circle.position.y));
            assert_eq!(circle.shape, Shape::Circle { radius: config.radius });
        }
    }

    #[test]
    fn same_seed_gives_same_sequence() {
        let make = || Spawner::seeded(ArcadeMode::Circles, BlockConfig::default(), CircleConfig::default(), (640.0, 480.0), 3);
        let (mut a, mut b) = (make(), make());
        for i in 0..10 {
            assert_eq!(a.spawn(i), b.spawn(i));
        }
    }
}
