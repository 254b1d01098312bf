//! Per-camera tracker: the [`CameraTracker`] contract consumed by the
//! orchestrator, and [`SortTracker`], a Kalman + Hungarian implementation.
//!
//! # Processing steps per cycle
//! 1. Predict all live tracks one cycle ahead
//! 2. IoU-gate every (track, detection) pair into a sparse bipartite graph
//! 3. Partition the graph into connected components (union-find)
//! 4. Solve each component with the Hungarian algorithm (in parallel)
//! 5. Update matched tracks (KF update + embedding history)
//! 6. Register hits/misses on the track manager
//! 7. Birth tentative tracks for confident unmatched detections
//! 8. Prune removed tracks

use crate::{
    association::{hungarian_solve, partition_components},
    config::{check_positive, check_unit_interval},
    error::{ContractViolation, Result},
    gating::build_graph,
    kf::{BoxKalmanFilter, BoxKfConfig},
    track::{LocalTrack, TrackState},
    track_manager::{LifecycleConfig, TrackManager},
    types::{BBox, CameraId, Detection, LocalTrackId},
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::trace;

/// Cost placed on non-gated cells of the assignment matrix. Real costs are
/// 1 − IoU and therefore never exceed 1.
const NO_EDGE_COST: f64 = 1.0e3;

/// Contract of a single camera's tracker.
///
/// `update` is stateful and idempotent per cycle: calling it again with a
/// cycle number it has already processed changes nothing. `tracks` returns
/// the current ordered snapshot and `output` the published view of it.
pub trait CameraTracker: Send {
    fn camera_id(&self) -> CameraId;

    fn update(&mut self, cycle: u64, detections: &[Detection]);

    fn tracks(&self) -> &[LocalTrack];

    /// Highest cycle `update` has accepted, `None` before the first one.
    fn last_cycle(&self) -> Option<u64>;

    /// Published boxes, labels and local ids: the confirmed tracks in
    /// snapshot order.
    fn output(&self) -> TrackOutput {
        let mut out = TrackOutput::default();
        for t in self.tracks().iter().filter(|t| t.is_confirmed()) {
            out.bboxes.push(t.bbox);
            out.labels.push(t.label.clone());
            out.local_ids.push(t.id);
        }
        out
    }
}

/// One tracker's published output as parallel sequences.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrackOutput {
    pub bboxes: Vec<BBox>,
    pub labels: Vec<String>,
    pub local_ids: Vec<LocalTrackId>,
}

impl TrackOutput {
    pub fn len(&self) -> usize {
        self.local_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.local_ids.is_empty()
    }

    /// The three sequences must be equally long and every box finite.
    pub fn validate(&self, camera: CameraId) -> std::result::Result<(), ContractViolation> {
        let n = self.bboxes.len();
        if self.labels.len() != n || self.local_ids.len() != n {
            return Err(ContractViolation::LengthMismatch {
                camera,
                bboxes: n,
                labels: self.labels.len(),
                ids: self.local_ids.len(),
            });
        }
        if let Some((_, &local_id)) = self
            .bboxes
            .iter()
            .zip(&self.local_ids)
            .find(|(b, _)| !b.is_finite())
        {
            return Err(ContractViolation::NonFiniteBox { camera, local_id });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Configuration for [`SortTracker`].
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraTrackerConfig {
    /// Minimum IoU for a (track, detection) pair to be considered
    pub min_iou: f64,
    /// Minimum detection confidence to birth a new track
    pub track_thresh: f64,
    /// Embeddings kept per track (Q)
    pub embedding_window: usize,
    pub kf: BoxKfConfig,
    pub lifecycle: LifecycleConfig,
}

impl Default for CameraTrackerConfig {
    fn default() -> Self {
        Self {
            min_iou: 0.2,
            track_thresh: 0.5,
            embedding_window: 10,
            kf: BoxKfConfig::default(),
            lifecycle: LifecycleConfig::default(),
        }
    }
}

impl CameraTrackerConfig {
    pub fn validate(&self) -> Result<()> {
        check_unit_interval("min_iou", self.min_iou)?;
        check_unit_interval("track_thresh", self.track_thresh)?;
        check_positive("tracker.embedding_window", self.embedding_window)?;
        self.lifecycle.validate()
    }
}

// ---------------------------------------------------------------------------
// SortTracker
// ---------------------------------------------------------------------------

/// Kalman + Hungarian tracker for one camera.
pub struct SortTracker {
    camera_id: CameraId,
    config: CameraTrackerConfig,
    kf: BoxKalmanFilter,
    track_manager: TrackManager,
    tracks: Vec<LocalTrack>,
    last_cycle: Option<u64>,
}

impl SortTracker {
    pub fn new(camera_id: CameraId, config: CameraTrackerConfig) -> Self {
        let kf = BoxKalmanFilter::new(config.kf.clone());
        let track_manager = TrackManager::new(config.lifecycle.clone());
        Self {
            camera_id,
            config,
            kf,
            track_manager,
            tracks: Vec::new(),
            last_cycle: None,
        }
    }

    pub fn config(&self) -> &CameraTrackerConfig {
        &self.config
    }

    /// Reset: clear all tracks. Ids keep increasing.
    pub fn reset(&mut self) {
        self.tracks.clear();
        self.last_cycle = None;
    }

    fn step(&mut self, detections: &[Detection]) {
        // Step 1: predict
        let kf = &self.kf;
        self.tracks.par_iter_mut().for_each(|track| {
            let (s, c) = kf.predict(&track.kf_state, &track.kf_cov);
            track.kf_state = s;
            track.kf_cov = c;
            track.age = track.age.saturating_add(1);
            track.sync_bbox();
        });

        // Steps 2-4: gate, partition, assign
        let graph = build_graph(&self.tracks, detections, self.config.min_iou);
        let components = partition_components(&graph);
        let assignments: Vec<_> = components
            .par_iter()
            .map(|comp| hungarian_solve(comp, NO_EDGE_COST))
            .collect();

        let mut matched_tracks = HashSet::new();
        let mut matched_dets = HashSet::new();

        // Step 5-6: update matched tracks, register hits
        let window = self.config.embedding_window;
        for (ti, di) in assignments.iter().flat_map(|a| a.pairs.iter().copied()) {
            let det = &detections[di];
            let track = &mut self.tracks[ti];
            let (s, c) = self.kf.update(&track.kf_state, &track.kf_cov, &det.bbox);
            track.kf_state = s;
            track.kf_cov = c;
            track.sync_bbox();
            track.observe_embedding(det.embedding.as_ref(), window);
            self.track_manager.register_hit(track);
            matched_tracks.insert(ti);
            matched_dets.insert(di);
        }

        // Register misses for everything else
        for (ti, track) in self.tracks.iter_mut().enumerate() {
            if !matched_tracks.contains(&ti) {
                self.track_manager.register_miss(track);
            }
        }

        // Step 7: birth
        let mut births = 0usize;
        for (di, det) in detections.iter().enumerate() {
            if matched_dets.contains(&di) || det.confidence < self.config.track_thresh {
                continue;
            }
            let (s, c) = self.kf.initiate(&det.bbox);
            let id = self.track_manager.next_track_id();
            let mut track = LocalTrack::new(self.camera_id, id, det.label.clone(), s, c);
            track.observe_embedding(det.embedding.as_ref(), window);
            // A single-hit requirement confirms at birth.
            if track.hits >= self.track_manager.config.n_init {
                track.state = TrackState::Confirmed;
            }
            self.tracks.push(track);
            births += 1;
        }

        // Step 8: prune
        let removed = TrackManager::prune_removed(&mut self.tracks);
        trace!(
            camera = %self.camera_id,
            matched = matched_tracks.len(),
            births,
            removed,
            live = self.tracks.len(),
            "camera tracker step"
        );
    }
}

impl CameraTracker for SortTracker {
    fn camera_id(&self) -> CameraId {
        self.camera_id
    }

    fn update(&mut self, cycle: u64, detections: &[Detection]) {
        if self.last_cycle.is_some_and(|last| cycle <= last) {
            return;
        }
        self.last_cycle = Some(cycle);
        self.step(detections);
    }

    fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    fn last_cycle(&self) -> Option<u64> {
        self.last_cycle
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;

    fn det(x: f64, y: f64) -> Detection {
        Detection {
            camera_id: CameraId(0),
            bbox: BBox::new(x, y, 40.0, 80.0),
            label: "person".into(),
            confidence: 0.9,
            embedding: Some(DVector::from_element(4, 0.5)),
        }
    }

    fn tracker(n_init: u32, max_age: u32) -> SortTracker {
        SortTracker::new(
            CameraId(0),
            CameraTrackerConfig {
                lifecycle: LifecycleConfig {
                    n_init,
                    max_age,
                    lost_grace: 2,
                },
                ..Default::default()
            },
        )
    }

    #[test]
    fn births_and_follows_targets() {
        let mut t = tracker(3, 5);
        t.update(0, &[det(100.0, 100.0), det(400.0, 100.0)]);
        assert_eq!(t.tracks().len(), 2);

        t.update(1, &[det(102.0, 100.0), det(402.0, 101.0)]);
        assert_eq!(t.tracks().len(), 2, "Existing tracks should absorb detections");
        assert!(t.tracks().iter().all(|tr| tr.hits == 2));
    }

    #[test]
    fn confirms_after_n_init_cycles_not_earlier() {
        let mut t = tracker(3, 5);
        for cycle in 0..2 {
            t.update(cycle, &[det(100.0 + cycle as f64, 100.0)]);
            assert_eq!(t.tracks()[0].state, TrackState::Tentative);
        }
        t.update(2, &[det(102.0, 100.0)]);
        assert_eq!(t.tracks()[0].state, TrackState::Confirmed);
    }

    #[test]
    fn update_is_idempotent_per_cycle() {
        let mut t = tracker(3, 5);
        t.update(0, &[det(100.0, 100.0)]);
        t.update(0, &[det(100.0, 100.0), det(500.0, 100.0)]);
        assert_eq!(t.tracks().len(), 1);
        assert_eq!(t.tracks()[0].hits, 1);
        assert_eq!(t.last_cycle(), Some(0));

        t.reset();
        assert_eq!(t.last_cycle(), None);
    }

    #[test]
    fn output_publishes_confirmed_tracks_only() {
        let mut t = tracker(2, 5);
        t.update(0, &[det(100.0, 100.0)]);
        assert!(t.output().is_empty());
        t.update(1, &[det(101.0, 100.0), det(400.0, 100.0)]);
        let out = t.output();
        assert_eq!(out.len(), 1);
        assert_eq!(out.local_ids, vec![LocalTrackId(0)]);
        assert_eq!(out.labels, vec!["person".to_string()]);
        assert!(out.validate(CameraId(0)).is_ok());
    }

    #[test]
    fn output_validation_rejects_ragged_and_non_finite() {
        let mut out = TrackOutput {
            bboxes: vec![BBox::new(0.0, 0.0, 10.0, 10.0)],
            labels: vec![],
            local_ids: vec![LocalTrackId(3)],
        };
        assert_eq!(
            out.validate(CameraId(1)),
            Err(ContractViolation::LengthMismatch {
                camera: CameraId(1),
                bboxes: 1,
                labels: 0,
                ids: 1
            })
        );
        out.labels.push("car".into());
        out.bboxes[0].w = f64::NAN;
        assert_eq!(
            out.validate(CameraId(1)),
            Err(ContractViolation::NonFiniteBox {
                camera: CameraId(1),
                local_id: LocalTrackId(3)
            })
        );
    }

    #[test]
    fn confirmed_track_coasts_then_is_lost_then_removed() {
        let mut t = tracker(1, 2);
        t.update(0, &[det(100.0, 100.0)]);
        assert_eq!(t.tracks()[0].state, TrackState::Confirmed);

        t.update(1, &[]);
        assert_eq!(t.tracks()[0].state, TrackState::Confirmed);
        t.update(2, &[]);
        assert_eq!(t.tracks()[0].state, TrackState::Lost);
        t.update(3, &[]);
        t.update(4, &[]);
        assert!(t.tracks().is_empty(), "Lost track removed after grace");
    }

    #[test]
    fn low_confidence_detections_do_not_birth() {
        let mut t = tracker(3, 5);
        let mut weak = det(100.0, 100.0);
        weak.confidence = 0.1;
        t.update(0, &[weak]);
        assert!(t.tracks().is_empty());
    }

    #[test]
    fn local_ids_unique_and_not_reused() {
        let mut t = tracker(3, 5);
        t.update(0, &[det(100.0, 100.0)]);
        t.update(1, &[]); // tentative removed
        t.update(2, &[det(100.0, 100.0)]);
        assert_eq!(t.tracks().len(), 1);
        assert_eq!(t.tracks()[0].id, LocalTrackId(1));
    }

    #[test]
    fn missing_embedding_flagged_on_latest_hit() {
        let mut t = tracker(1, 5);
        t.update(0, &[det(100.0, 100.0)]);
        let mut blind = det(101.0, 100.0);
        blind.embedding = None;
        t.update(1, &[blind]);
        let tr = &t.tracks()[0];
        assert!(tr.embedding_missing);
        assert_eq!(tr.embeddings.len(), 1);
    }
}
