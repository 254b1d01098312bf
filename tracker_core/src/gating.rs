//! IoU gating: decides whether a detection is close enough to a predicted
//! track box to be an association candidate.
//!
//! # Gating criterion
//! Accept if labels agree and IoU(track, detection) ≥ `min_iou`.
//! The association cost of an accepted pair is 1 − IoU.

use crate::{
    association::BipartiteGraph,
    track::{LocalTrack, TrackState},
    types::Detection,
};
use rayon::prelude::*;

/// Cost of an accepted pair, `None` when the pair fails the gate.
pub fn iou_gate(track: &LocalTrack, det: &Detection, min_iou: f64) -> Option<f64> {
    if track.label != det.label {
        return None;
    }
    let iou = track.bbox.iou(&det.bbox);
    (iou > 0.0 && iou >= min_iou).then_some(1.0 - iou)
}

/// Gate every live track against every detection (tracks in parallel) and
/// collect the passing pairs into a bipartite graph.
pub fn build_graph(tracks: &[LocalTrack], dets: &[Detection], min_iou: f64) -> BipartiteGraph {
    let edges: Vec<Vec<(usize, usize, f64)>> = tracks
        .par_iter()
        .enumerate()
        .map(|(ti, track)| {
            if track.state == TrackState::Removed {
                return Vec::new();
            }
            dets.iter()
                .enumerate()
                .filter_map(|(di, det)| iou_gate(track, det, min_iou).map(|c| (ti, di, c)))
                .collect()
        })
        .collect();

    let mut graph = BipartiteGraph::new(tracks.len(), dets.len());
    for (ti, di, cost) in edges.into_iter().flatten() {
        graph.add_edge(ti, di, cost);
    }
    graph
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kf::{BoxKalmanFilter, BoxKfConfig};
    use crate::types::{BBox, CameraId, LocalTrackId};

    fn track_at(bbox: BBox, label: &str) -> LocalTrack {
        let kf = BoxKalmanFilter::new(BoxKfConfig::default());
        let (s, c) = kf.initiate(&bbox);
        LocalTrack::new(CameraId(0), LocalTrackId(0), label.into(), s, c)
    }

    fn det(bbox: BBox, label: &str) -> Detection {
        Detection {
            camera_id: CameraId(0),
            bbox,
            label: label.into(),
            confidence: 0.9,
            embedding: None,
        }
    }

    #[test]
    fn overlapping_same_label_passes() {
        let t = track_at(BBox::new(0.0, 0.0, 10.0, 10.0), "person");
        let cost = iou_gate(&t, &det(BBox::new(1.0, 0.0, 10.0, 10.0), "person"), 0.3);
        assert!(cost.is_some_and(|c| c < 0.3));
    }

    #[test]
    fn label_mismatch_or_low_iou_fails() {
        let t = track_at(BBox::new(0.0, 0.0, 10.0, 10.0), "person");
        assert!(iou_gate(&t, &det(BBox::new(0.0, 0.0, 10.0, 10.0), "car"), 0.3).is_none());
        assert!(iou_gate(&t, &det(BBox::new(8.0, 8.0, 10.0, 10.0), "person"), 0.3).is_none());
    }

    #[test]
    fn graph_contains_only_gated_pairs() {
        let tracks = vec![
            track_at(BBox::new(0.0, 0.0, 10.0, 10.0), "person"),
            track_at(BBox::new(100.0, 100.0, 10.0, 10.0), "person"),
        ];
        let dets = vec![
            det(BBox::new(101.0, 100.0, 10.0, 10.0), "person"),
            det(BBox::new(500.0, 500.0, 10.0, 10.0), "person"),
        ];
        let g = build_graph(&tracks, &dets, 0.3);
        assert_eq!(g.edges.len(), 1);
        assert_eq!((g.edges[0].track_idx, g.edges[0].det_idx), (1, 0));
    }
}
