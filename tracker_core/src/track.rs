//! Local track: per-camera state, lifecycle status, bounded embedding history.

use crate::{
    kf::{state_to_bbox, BoxCov, BoxState},
    types::{BBox, CameraId, Embedding, LocalTrackId, TrackKey},
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Lifecycle status of a local track.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackState {
    /// Not yet confirmed; may be spurious
    Tentative,
    /// Confirmed: n_init consecutive matched updates
    Confirmed,
    /// Missed for max_age updates; coasting on its prediction
    Lost,
    /// Marked for removal
    Removed,
}

/// A single track owned by one camera's tracker.
#[derive(Clone, Debug)]
pub struct LocalTrack {
    pub camera_id: CameraId,
    /// Camera-scoped identifier
    pub id: LocalTrackId,
    /// Current box (filtered)
    pub bbox: BBox,
    pub label: String,
    pub state: TrackState,
    /// Matched updates since birth (birth counts as the first)
    pub hits: u32,
    /// Consecutive cycles without a matched update
    pub time_since_update: u32,
    /// Cycles since birth
    pub age: u32,
    /// Most recent embeddings (most recent last), bounded by the tracker's window
    pub embeddings: VecDeque<Embedding>,
    /// True when the latest matched detection carried no embedding
    pub embedding_missing: bool,
    /// Motion state [cx, cy, w, h, vcx, vcy, vw, vh]
    pub(crate) kf_state: BoxState,
    pub(crate) kf_cov: BoxCov,
}

impl LocalTrack {
    /// Create a new tentative track from its first detection.
    pub fn new(
        camera_id: CameraId,
        id: LocalTrackId,
        label: String,
        kf_state: BoxState,
        kf_cov: BoxCov,
    ) -> Self {
        Self {
            camera_id,
            id,
            bbox: state_to_bbox(&kf_state),
            label,
            state: TrackState::Tentative,
            hits: 1,
            time_since_update: 0,
            age: 0,
            embeddings: VecDeque::new(),
            embedding_missing: true,
            kf_state,
            kf_cov,
        }
    }

    pub fn key(&self) -> TrackKey {
        (self.camera_id, self.id)
    }

    /// Push an embedding, evicting the oldest beyond `window`.
    pub fn push_embedding(&mut self, embedding: Embedding, window: usize) {
        self.embeddings.push_back(embedding);
        while self.embeddings.len() > window {
            self.embeddings.pop_front();
        }
    }

    /// Record the embedding status of the latest matched detection.
    pub fn observe_embedding(&mut self, embedding: Option<&Embedding>, window: usize) {
        match embedding {
            Some(e) => {
                self.push_embedding(e.clone(), window);
                self.embedding_missing = false;
            }
            None => self.embedding_missing = true,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.state == TrackState::Confirmed
    }

    pub(crate) fn sync_bbox(&mut self) {
        self.bbox = state_to_bbox(&self.kf_state);
    }

    /// Velocity of the box center (pixels per cycle)
    pub fn velocity(&self) -> (f64, f64) {
        (self.kf_state[4], self.kf_state[5])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::DVector;

    fn track() -> LocalTrack {
        LocalTrack::new(
            CameraId(0),
            LocalTrackId(0),
            "person".into(),
            BoxState::zeros(),
            BoxCov::identity(),
        )
    }

    #[test]
    fn embedding_history_is_bounded() {
        let mut t = track();
        for i in 0..10 {
            t.push_embedding(DVector::from_element(4, i as f64), 3);
        }
        assert_eq!(t.embeddings.len(), 3);
        assert_eq!(t.embeddings.front().map(|e| e[0]), Some(7.0));
    }

    #[test]
    fn missing_embedding_keeps_history() {
        let mut t = track();
        t.observe_embedding(Some(&DVector::from_element(4, 1.0)), 5);
        assert!(!t.embedding_missing);
        t.observe_embedding(None, 5);
        assert!(t.embedding_missing);
        assert_eq!(t.embeddings.len(), 1);
    }
}
