pub mod camera;
pub mod detector;
pub mod game_object;
pub mod hand_matcher;
pub mod landmark;
pub mod motion;
pub mod normalizer;
pub mod similarity;
pub mod target;
