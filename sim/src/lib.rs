//! `sim` — Scenario simulator: ground-plane targets, camera detections, replay.

pub mod camera_sim;
pub mod replay;
pub mod scenarios;
pub mod target;

pub use camera_sim::{CameraSimulator, GroundTruthFrame, SimCamera};
pub use replay::{load_replay, save_replay, ReplayLog};
pub use scenarios::{Scenario, ScenarioKind};
pub use target::{MotionSpec, Target};
