//! Game configuration.
//!
//! Every tunable of the engine lives here with its default. A config file only
//! needs the fields it overrides; everything else falls back to `Default`.

use crate::core_modules::similarity::ScoringMode;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub arcade: ArcadeConfig,
    pub motion: MotionConfig,
    pub blocks: BlockConfig,
    pub circles: CircleConfig,
    pub charades: CharadesConfig,
}

/// Which arcade variant a session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArcadeMode {
    /// Step on blocks spawned along the floor.
    #[default]
    Blocks,
    /// Touch circles with wrists or ankles.
    Circles,
}

/// Session-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArcadeConfig {
    pub mode: ArcadeMode,
    /// Countdown length in seconds.
    pub duration_secs: u32,
    /// Canvas size in pixels. Landmarks are mapped onto it.
    pub canvas_width: f64,
    pub canvas_height: f64,
    /// Frame loop period.
    pub frame_interval_ms: u64,
    /// Mirror landmark x when mapping to the canvas, like a selfie preview.
    pub mirror_x: bool,
}

impl Default for ArcadeConfig {
    fn default() -> Self {
        Self {
            mode: ArcadeMode::Blocks,
            duration_secs: 60,
            canvas_width: 640.0,
            canvas_height: 480.0,
            frame_interval_ms: 16,
            mirror_x: true,
        }
    }
}

/// Jump and action classifier thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Samples averaged into the baseline before jumps are detected.
    pub calibration_samples: u32,
    /// Rise above the baseline (normalized frame height) that counts as a jump.
    pub jump_threshold: f64,
    /// Time a jump stays in flight before the baseline re-anchors.
    pub jump_cooldown_ms: u64,
    /// Frame-to-frame foot movement (normalized) that counts as an action.
    pub action_threshold: f64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            calibration_samples: 30,
            jump_threshold: 0.3,
            jump_cooldown_ms: 500,
            action_threshold: 0.05,
        }
    }
}

/// Block mode spawning and collision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockConfig {
    pub width: f64,
    pub height: f64,
    pub spawn_interval_ms: u64,
    /// Live blocks kept before the oldest is evicted.
    pub capacity: usize,
    pub award: u32,
    /// Extra horizontal tolerance beyond half the width.
    pub margin_x: f64,
    /// Extra vertical tolerance beyond half the height.
    pub margin_y: f64,
    /// Left edges of the spawn lanes. Blocks sit on the canvas floor.
    pub lanes: Vec<f64>,
    pub palette: Vec<String>,
}

impl Default for BlockConfig {
    fn default() -> Self {
        Self {
            width: 80.0,
            height: 40.0,
            spawn_interval_ms: 2000,
            capacity: 6,
            award: 10,
            margin_x: 20.0,
            margin_y: 30.0,
            lanes: vec![160.0, 240.0, 320.0, 400.0],
            palette: default_palette(),
        }
    }
}

/// Circle mode spawning and collision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircleConfig {
    pub radius: f64,
    pub spawn_interval_ms: u64,
    pub capacity: usize,
    pub award: u32,
    /// Extra reach beyond the radius for a limb to count as touching.
    pub tolerance: f64,
    /// Minimum distance between a circle center and the canvas edge.
    pub edge_margin: f64,
    pub palette: Vec<String>,
}

impl Default for CircleConfig {
    fn default() -> Self {
        Self {
            radius: 40.0,
            spawn_interval_ms: 1500,
            capacity: 5,
            award: 10,
            tolerance: 20.0,
            edge_margin: 60.0,
            palette: default_palette(),
        }
    }
}

/// Hand matching game settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CharadesConfig {
    pub scoring: ScoringMode,
    /// Hands the detector is asked to find.
    pub num_hands: u32,
    /// Detection, presence and tracking confidence floor.
    pub min_confidence: f32,
    /// Minimum side of the upscaled target fallback image.
    pub upscale_min_dimension: u32,
    pub frame_interval_ms: u64,
}

impl Default for CharadesConfig {
    fn default() -> Self {
        Self {
            scoring: ScoringMode::MirrorTolerant,
            num_hands: 2,
            min_confidence: 0.1,
            upscale_min_dimension: 800,
            frame_interval_ms: 16,
        }
    }
}

fn default_palette() -> Vec<String> {
    ["#FF6B6B", "#4ECDC4", "#45B7D1", "#FFA07A", "#98D8C8"]
        .iter()
        .map(|c| c.to_string())
        .collect()
}

impl GameConfig {
    /// Checks every value is usable. Returns the first offending field.
    pub fn validate(&self) -> Result<()> {
        let arcade = &self.arcade;
        if arcade.duration_secs == 0 {
            return Err(Error::Config("arcade.duration_secs must be > 0".to_string()));
        }
        if arcade.canvas_width <= 0.0 || arcade.canvas_height <= 0.0 {
            return Err(Error::Config(format!(
                "canvas must have a positive size, got {}x{}",
                arcade.canvas_width, arcade.canvas_height
            )));
        }
        if arcade.frame_interval_ms == 0 || self.charades.frame_interval_ms == 0 {
            return Err(Error::Config("frame_interval_ms must be > 0".to_string()));
        }

        let motion = &self.motion;
        if motion.jump_threshold <= 0.0 || motion.action_threshold <= 0.0 {
            return Err(Error::Config(format!(
                "motion thresholds must be positive, got jump={} action={}",
                motion.jump_threshold, motion.action_threshold
            )));
        }

        let blocks = &self.blocks;
        if blocks.capacity == 0 || blocks.spawn_interval_ms == 0 {
            return Err(Error::Config("blocks.capacity and blocks.spawn_interval_ms must be > 0".to_string()));
        }
        if blocks.width <= 0.0 || blocks.height <= 0.0 {
            return Err(Error::Config("block size must be positive".to_string()));
        }
        if blocks.lanes.is_empty() || blocks.palette.is_empty() {
            return Err(Error::Config("blocks need at least one lane and one color".to_string()));
        }

        let circles = &self.circles;
        if circles.capacity == 0 || circles.spawn_interval_ms == 0 {
            return Err(Error::Config("circles.capacity and circles.spawn_interval_ms must be > 0".to_string()));
        }
        if circles.radius <= 0.0 || circles.palette.is_empty() {
            return Err(Error::Config("circles need a positive radius and at least one color".to_string()));
        }

        if self.charades.num_hands == 0 {
            return Err(Error::Config("charades.num_hands must be > 0".to_string()));
        }
        Ok(())
    }

    /// Loads and validates a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when given, otherwise the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }
}
