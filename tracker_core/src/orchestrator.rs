//! Orchestrator: one full multi-camera cycle for a synchronized frame batch.
//!
//! # Processing steps per batch
//! 1. Reject a cycle number the trackers have already moved past, then route
//!    frames to cameras; reject unknown / duplicate cameras and mis-tagged
//!    detections before any state changes
//! 2. Treat missing or stale frames as zero detections (counted, not raised)
//! 3. Update every camera tracker (optionally in parallel)
//! 4. Barrier, then validate each tracker's snapshot and published output
//! 5. Run the ReID correlator over all fresh snapshots (when enabled)
//! 6. Zip each output with its identities into a [`CameraResult`]
//!
//! The orchestrator keeps no state between cycles beyond its trackers and
//! the correlator.

use crate::{
    camera_tracker::{CameraTracker, SortTracker, TrackOutput},
    config::TrackingConfig,
    error::{ContractViolation, Result, TrackingError},
    metrics::CycleStats,
    reid::{IdentityAssignments, ReidCorrelator},
    track::{LocalTrack, TrackState},
    types::{BBox, CameraFrame, CameraId, Detection, FrameBatch, GlobalRef, LocalTrackId},
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// Published result for one camera: parallel, equally long sequences.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CameraResult {
    pub camera_id: CameraId,
    /// Frame timestamp, or the batch timestamp when the frame was missing
    pub timestamp: f64,
    pub bboxes: Vec<BBox>,
    pub labels: Vec<String>,
    pub global_ids: Vec<GlobalRef>,
    /// Local ids of the published tracks, same order
    pub local_ids: Vec<LocalTrackId>,
}

impl CameraResult {
    pub fn len(&self) -> usize {
        self.bboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bboxes.is_empty()
    }

    /// (bbox, label, identity) triples in published order.
    pub fn iter(&self) -> impl Iterator<Item = (&BBox, &str, GlobalRef)> + '_ {
        self.bboxes
            .iter()
            .zip(self.labels.iter())
            .zip(self.global_ids.iter())
            .map(|((b, l), g)| (b, l.as_str(), *g))
    }
}

/// Everything produced by one completed cycle.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CycleOutput {
    pub cycle: u64,
    pub timestamp: f64,
    /// One entry per camera, ordered by camera id
    pub cameras: Vec<CameraResult>,
    pub stats: CycleStats,
}

impl CycleOutput {
    pub fn camera(&self, camera_id: CameraId) -> Option<&CameraResult> {
        self.cameras.iter().find(|c| c.camera_id == camera_id)
    }

    /// Identity published for a local track, if it was published.
    pub fn identity_of(&self, camera_id: CameraId, local_id: LocalTrackId) -> Option<GlobalRef> {
        let cam = self.camera(camera_id)?;
        let pos = cam.local_ids.iter().position(|&l| l == local_id)?;
        cam.global_ids.get(pos).copied()
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives N camera trackers and the correlator, one batch at a time.
pub struct TrackingOrchestrator<T: CameraTracker = SortTracker> {
    config: TrackingConfig,
    /// Indexed by camera id
    trackers: Vec<T>,
    correlator: Option<ReidCorrelator>,
}

impl TrackingOrchestrator<SortTracker> {
    /// Build with one [`SortTracker`] per camera.
    pub fn new(config: TrackingConfig) -> Result<Self> {
        config.validate()?;
        let trackers = (0..config.camera_count)
            .map(|i| SortTracker::new(CameraId(i as u32), config.tracker.clone()))
            .collect();
        Self::with_trackers(config, trackers)
    }
}

impl<T: CameraTracker> TrackingOrchestrator<T> {
    /// Build with caller-supplied trackers; `trackers[i]` must serve camera `i`.
    pub fn with_trackers(config: TrackingConfig, trackers: Vec<T>) -> Result<Self> {
        config.validate()?;
        if trackers.len() != config.camera_count {
            return Err(TrackingError::Configuration(format!(
                "{} trackers supplied for {} cameras",
                trackers.len(),
                config.camera_count
            )));
        }
        if let Some((i, t)) = trackers
            .iter()
            .enumerate()
            .find(|(i, t)| t.camera_id() != CameraId(*i as u32))
        {
            return Err(TrackingError::Configuration(format!(
                "tracker at slot {i} serves camera {}",
                t.camera_id()
            )));
        }
        let correlator = config
            .reid_enabled
            .then(|| ReidCorrelator::new(config.reid.clone()));
        Ok(Self {
            config,
            trackers,
            correlator,
        })
    }

    pub fn config(&self) -> &TrackingConfig {
        &self.config
    }

    pub fn trackers(&self) -> &[T] {
        &self.trackers
    }

    /// Read-only access to the identity table.
    pub fn correlator(&self) -> Option<&ReidCorrelator> {
        self.correlator.as_ref()
    }

    /// Live (non-removed) local tracks across all cameras.
    pub fn active_track_count(&self) -> usize {
        self.trackers
            .iter()
            .flat_map(|t| t.tracks())
            .filter(|t| t.state != TrackState::Removed)
            .count()
    }

    /// Run one cycle. On error the cycle produces no output at all.
    pub fn process(&mut self, batch: &FrameBatch) -> Result<CycleOutput> {
        let n = self.trackers.len();
        let mut stats = CycleStats::default();

        // Step 1: cycle order, then route and validate frames
        let cycle = batch.cycle;
        if let Some(last) = self.trackers.iter().filter_map(|t| t.last_cycle()).max() {
            if cycle <= last {
                warn!(cycle, last, "cycle not after the last processed one");
                return Err(ContractViolation::NonMonotonicCycle { cycle, last }.into());
            }
        }
        let frames = route_frames(batch, n).map_err(|e| {
            warn!(cycle = batch.cycle, error = %e, "frame batch rejected");
            e
        })?;

        // Step 2: missing / stale cameras
        let mut inputs: Vec<&[Detection]> = Vec::with_capacity(n);
        for (i, frame) in frames.iter().enumerate() {
            let camera = CameraId(i as u32);
            match frame {
                None => {
                    stats.cameras_missing += 1;
                    warn!(cycle = batch.cycle, camera = %camera, "no frame; treating as empty");
                    inputs.push(&[]);
                }
                Some(f) if batch.timestamp - f.timestamp > self.config.max_frame_lag => {
                    stats.cameras_stale += 1;
                    warn!(
                        cycle = batch.cycle,
                        camera = %camera,
                        lag = batch.timestamp - f.timestamp,
                        "stale frame; treating as empty"
                    );
                    inputs.push(&[]);
                }
                Some(f) => inputs.push(&f.detections),
            }
        }
        stats.detections = inputs.iter().map(|d| d.len() as u64).sum();

        // Step 3: per-camera updates; the join is the barrier for step 5
        if self.config.parallel {
            self.trackers
                .par_iter_mut()
                .zip(inputs.par_iter())
                .for_each(|(tracker, dets)| tracker.update(cycle, dets));
        } else {
            for (tracker, dets) in self.trackers.iter_mut().zip(&inputs) {
                tracker.update(cycle, dets);
            }
        }

        // Step 4: snapshot and output contract
        let mut outputs: Vec<TrackOutput> = Vec::with_capacity(n);
        for tracker in &self.trackers {
            let camera = tracker.camera_id();
            validate_snapshot(camera, tracker.tracks())?;
            let output = tracker.output();
            validate_output(camera, tracker.tracks(), &output)?;
            outputs.push(output);
        }

        // Step 5: cross-camera fusion
        let assignments = match self.correlator.as_mut() {
            Some(correlator) => {
                let snapshots: Vec<(CameraId, &[LocalTrack])> = self
                    .trackers
                    .iter()
                    .map(|t| (t.camera_id(), t.tracks()))
                    .collect();
                Some(correlator.update_global(cycle, &snapshots))
            }
            None => None,
        };
        if let Some(a) = &assignments {
            stats.correlation = a.stats;
        }

        // Step 6: assemble
        let mut cameras = Vec::with_capacity(n);
        for ((tracker, frame), output) in self.trackers.iter().zip(&frames).zip(outputs) {
            let timestamp = frame.map_or(batch.timestamp, |f| f.timestamp);
            let result = assemble(tracker.camera_id(), timestamp, output, assignments.as_ref());
            stats.published_tracks += result.len() as u64;
            cameras.push(result);
        }

        debug!(
            cycle,
            detections = stats.detections,
            published = stats.published_tracks,
            degraded = stats.degraded_cameras(),
            "cycle complete"
        );

        Ok(CycleOutput {
            cycle,
            timestamp: batch.timestamp,
            cameras,
            stats,
        })
    }
}

fn route_frames(batch: &FrameBatch, n: usize) -> Result<Vec<Option<&CameraFrame>>> {
    let mut frames: Vec<Option<&CameraFrame>> = vec![None; n];
    for frame in &batch.frames {
        let camera = frame.camera_id;
        let slot = frames
            .get_mut(camera.0 as usize)
            .ok_or(ContractViolation::UnknownCamera { camera })?;
        if slot.is_some() {
            return Err(ContractViolation::DuplicateFrame { camera }.into());
        }
        if let Some(det) = frame.detections.iter().find(|d| d.camera_id != camera) {
            return Err(ContractViolation::CameraMismatch {
                expected: camera,
                found: det.camera_id,
            }
            .into());
        }
        *slot = Some(frame);
    }
    Ok(frames)
}

fn validate_snapshot(camera: CameraId, tracks: &[LocalTrack]) -> Result<()> {
    let mut seen = HashSet::with_capacity(tracks.len());
    for t in tracks {
        if t.camera_id != camera {
            warn!(expected = %camera, found = %t.camera_id, "tracker reported foreign track");
            return Err(ContractViolation::CameraMismatch {
                expected: camera,
                found: t.camera_id,
            }
            .into());
        }
        if !seen.insert(t.id) {
            warn!(camera = %camera, track = %t.id, "tracker reported duplicate id");
            return Err(ContractViolation::DuplicateLocalId {
                camera,
                local_id: t.id,
            }
            .into());
        }
        if t.state != TrackState::Removed && !t.bbox.is_finite() {
            warn!(camera = %camera, track = %t.id, "tracker reported non-finite box");
            return Err(ContractViolation::NonFiniteBox {
                camera,
                local_id: t.id,
            }
            .into());
        }
    }
    Ok(())
}

/// Output sequences must line up and only name live tracks of the snapshot.
fn validate_output(camera: CameraId, tracks: &[LocalTrack], output: &TrackOutput) -> Result<()> {
    output.validate(camera).map_err(|e| {
        warn!(camera = %camera, error = %e, "tracker output rejected");
        e
    })?;
    let mut seen = HashSet::with_capacity(output.len());
    for &local_id in &output.local_ids {
        if !seen.insert(local_id) {
            return Err(ContractViolation::DuplicateLocalId { camera, local_id }.into());
        }
        let live = tracks
            .iter()
            .any(|t| t.id == local_id && t.state != TrackState::Removed);
        if !live {
            warn!(camera = %camera, track = %local_id, "output names unknown track");
            return Err(ContractViolation::UnknownLocalId { camera, local_id }.into());
        }
    }
    Ok(())
}

/// Attach an identity to every published track; tracks without a global
/// assignment keep their local one.
fn assemble(
    camera_id: CameraId,
    timestamp: f64,
    output: TrackOutput,
    assignments: Option<&IdentityAssignments>,
) -> CameraResult {
    let global_ids = output
        .local_ids
        .iter()
        .map(|&id| {
            assignments
                .and_then(|a| a.get(&(camera_id, id)))
                .unwrap_or_else(|| GlobalRef::local(camera_id, id))
        })
        .collect();
    CameraResult {
        camera_id,
        timestamp,
        bboxes: output.bboxes,
        labels: output.labels,
        global_ids,
        local_ids: output.local_ids,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
