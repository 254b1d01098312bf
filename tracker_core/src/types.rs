//! Fundamental types used across the entire workspace.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Appearance embedding produced by the external detector / ReID head.
pub type Embedding = DVector<f64>;

// ---------------------------------------------------------------------------
// Identifier types: newtype wrappers so IDs are never confused at compile time
// ---------------------------------------------------------------------------

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct CameraId(pub u32);

/// Camera-scoped track identifier. Unique only within one camera's tracker.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct LocalTrackId(pub u64);

/// System-wide identity shared by local tracks judged to be the same object.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct GlobalId(pub u64);

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{}", self.0)
    }
}

impl fmt::Display for LocalTrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "G{}", self.0)
    }
}

/// Key of a local track anywhere in the system.
pub type TrackKey = (CameraId, LocalTrackId);

/// Identity published for one track: either a resolved global identity or the
/// pass-through `(camera, local)` pair when no global link is available.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GlobalRef {
    Global(GlobalId),
    Local {
        camera_id: CameraId,
        local_id: LocalTrackId,
    },
}

impl GlobalRef {
    pub fn local(camera_id: CameraId, local_id: LocalTrackId) -> Self {
        GlobalRef::Local { camera_id, local_id }
    }

    /// The resolved global id, if any.
    pub fn global(&self) -> Option<GlobalId> {
        match self {
            GlobalRef::Global(id) => Some(*id),
            GlobalRef::Local { .. } => None,
        }
    }
}

impl fmt::Display for GlobalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GlobalRef::Global(id) => write!(f, "{id}"),
            GlobalRef::Local { camera_id, local_id } => write!(f, "{camera_id}/{local_id}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Bounding box
// ---------------------------------------------------------------------------

/// Axis-aligned box in image pixels: top-left corner plus size.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl BBox {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    /// Build from center + size.
    pub fn from_center(cx: f64, cy: f64, w: f64, h: f64) -> Self {
        Self {
            x: cx - w / 2.0,
            y: cy - h / 2.0,
            w,
            h,
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    pub fn area(&self) -> f64 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    /// Corners as [x1, y1, x2, y2].
    pub fn to_tlbr(&self) -> [f64; 4] {
        [self.x, self.y, self.x + self.w, self.y + self.h]
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.w.is_finite() && self.h.is_finite()
    }

    /// Intersection over union, 0 for disjoint or degenerate boxes.
    pub fn iou(&self, other: &BBox) -> f64 {
        let [ax1, ay1, ax2, ay2] = self.to_tlbr();
        let [bx1, by1, bx2, by2] = other.to_tlbr();
        let iw = (ax2.min(bx2) - ax1.max(bx1)).max(0.0);
        let ih = (ay2.min(by2) - ay1.max(by1)).max(0.0);
        let inter = iw * ih;
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

// ---------------------------------------------------------------------------
// Detection / frames
// ---------------------------------------------------------------------------

/// One frame's raw candidate object, as produced by the external detector.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Detection {
    pub camera_id: CameraId,
    pub bbox: BBox,
    pub label: String,
    /// Detector confidence in [0, 1]
    pub confidence: f64,
    /// Appearance embedding; `None` when the ReID head produced nothing.
    pub embedding: Option<Embedding>,
}

/// Detections from one camera for one cycle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CameraFrame {
    pub camera_id: CameraId,
    /// Capture time of the frame (seconds)
    pub timestamp: f64,
    pub detections: Vec<Detection>,
}

/// Synchronized set of camera frames for a single orchestration cycle.
///
/// A camera absent from `frames` did not deliver within the configured wait
/// and is treated as having zero detections.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FrameBatch {
    /// Monotonic cycle number
    pub cycle: u64,
    /// Reference time of the cycle (seconds)
    pub timestamp: f64,
    pub frames: Vec<CameraFrame>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn iou_identical_and_disjoint() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        assert_abs_diff_eq!(a.iou(&a), 1.0, epsilon = 1e-12);
        let b = BBox::new(20.0, 20.0, 5.0, 5.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn iou_half_overlap() {
        let a = BBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BBox::new(5.0, 0.0, 10.0, 10.0);
        // inter = 50, union = 150
        assert_abs_diff_eq!(a.iou(&b), 1.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn center_roundtrip() {
        let b = BBox::from_center(50.0, 40.0, 20.0, 10.0);
        assert_eq!(b.to_tlbr(), [40.0, 35.0, 60.0, 45.0]);
        assert_eq!(b.center(), (50.0, 40.0));
    }

    #[test]
    fn global_ref_display() {
        assert_eq!(GlobalRef::Global(GlobalId(7)).to_string(), "G7");
        let l = GlobalRef::local(CameraId(1), LocalTrackId(3));
        assert_eq!(l.to_string(), "C1/L3");
        assert_eq!(l.global(), None);
    }
}
