//! `tracker_core` — Multi-camera multi-object tracking coordinator.
//!
//! # Module layout
//! - [`types`]          — IDs, boxes, detections, frame batches
//! - [`error`]          — Configuration errors and contract violations
//! - [`config`]         — Top-level tunables and validation
//! - [`kf`]             — Constant-velocity box Kalman filter
//! - [`track`]          — Local track struct and lifecycle states
//! - [`track_manager`]  — Birth / confirmation / loss / removal rules
//! - [`gating`]         — IoU gating into a sparse bipartite graph
//! - [`association`]    — Connected components, Hungarian solver
//! - [`camera_tracker`] — Per-camera tracker contract and the SORT-style tracker
//! - [`reid`]           — Cross-camera appearance correlator and identity table
//! - [`orchestrator`]   — One synchronized cycle across all cameras
//! - [`publish`]        — Result publisher interface and JSON-lines sink
//! - [`metrics`]        — Cycle counters, fusion purity / ID switches

pub mod association;
pub mod camera_tracker;
pub mod config;
pub mod error;
pub mod gating;
pub mod kf;
pub mod metrics;
pub mod orchestrator;
pub mod publish;
pub mod reid;
pub mod track;
pub mod track_manager;
pub mod types;

pub use camera_tracker::{CameraTracker, CameraTrackerConfig, SortTracker, TrackOutput};
pub use config::TrackingConfig;
pub use error::{ContractViolation, TrackingError};
pub use orchestrator::{CameraResult, CycleOutput, TrackingOrchestrator};
pub use publish::{JsonLinesPublisher, ResultPublisher};
pub use reid::{ReidConfig, ReidCorrelator};
pub use track::{LocalTrack, TrackState};
pub use types::{
    BBox, CameraFrame, CameraId, Detection, Embedding, FrameBatch, GlobalId, GlobalRef,
    LocalTrackId,
};
