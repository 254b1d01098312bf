//! Tunables for the whole coordinator.
//!
//! No value here is canonical: callers are expected to supply their own
//! operating point (typically from a JSON file loaded by the CLI). Defaults
//! only make the types convenient to construct in tests.

use crate::{
    camera_tracker::CameraTrackerConfig,
    error::{Result, TrackingError},
    reid::ReidConfig,
};
use serde::{Deserialize, Serialize};

/// Top-level configuration surface.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Number of cameras N; camera ids are `0..N`
    pub camera_count: usize,
    /// Run cross-camera fusion after each cycle
    pub reid_enabled: bool,
    /// Seconds a camera frame may trail the batch timestamp before it is stale
    pub max_frame_lag: f64,
    /// Update per-camera trackers on the rayon pool
    pub parallel: bool,
    /// Per-camera tracker tunables (shared by all cameras)
    pub tracker: CameraTrackerConfig,
    /// Cross-camera correlator tunables
    pub reid: ReidConfig,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            camera_count: 2,
            reid_enabled: true,
            max_frame_lag: 0.5,
            parallel: true,
            tracker: CameraTrackerConfig::default(),
            reid: ReidConfig::default(),
        }
    }
}

fn invalid(msg: impl Into<String>) -> TrackingError {
    TrackingError::Configuration(msg.into())
}

impl TrackingConfig {
    /// Reject configurations the coordinator cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.camera_count == 0 {
            return Err(invalid("camera_count must be at least 1"));
        }
        if !self.max_frame_lag.is_finite() || self.max_frame_lag < 0.0 {
            return Err(invalid("max_frame_lag must be finite and non-negative"));
        }
        self.tracker.validate()?;
        self.reid.validate()?;
        // Trackers keep the history the correlator averages over.
        if self.reid.embedding_window > self.tracker.embedding_window {
            return Err(invalid(format!(
                "reid.embedding_window ({}) exceeds tracker.embedding_window ({})",
                self.reid.embedding_window, self.tracker.embedding_window
            )));
        }
        Ok(())
    }

    /// Parse from JSON and validate.
    pub fn from_json(text: &str) -> Result<Self> {
        let cfg: TrackingConfig =
            serde_json::from_str(text).map_err(|e| invalid(format!("malformed config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

pub(crate) fn check_unit_interval(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(format!("{name} must lie in [0, 1], got {value}")))
    }
}

pub(crate) fn check_positive(name: &str, value: usize) -> Result<()> {
    if value == 0 {
        Err(invalid(format!("{name} must be positive")))
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
