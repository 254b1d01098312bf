//! Track lifecycle management: birth, confirmation, demotion, removal.
//!
//! # Track Management Policy
//! - **Birth**: each unmatched detection above the confidence threshold
//!   spawns a tentative track (birth counts as the first hit).
//! - **Confirmation**: tentative → confirmed once `n_init` hits are reached.
//!   A tentative track that misses once is removed, so the hits are always
//!   consecutive.
//! - **Demotion**: confirmed → lost after `max_age` consecutive misses.
//! - **Removal**: lost → removed after a further `lost_grace` misses.
//! - **Recovery**: a lost track that is matched again is confirmed.

use crate::{
    config::check_positive,
    error::Result,
    track::{LocalTrack, TrackState},
    types::LocalTrackId,
};
use serde::{Deserialize, Serialize};

/// Configuration for track lifecycle policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Consecutive hits required for confirmation
    pub n_init: u32,
    /// Consecutive misses before a confirmed track is demoted to lost
    pub max_age: u32,
    /// Further misses before a lost track is removed
    pub lost_grace: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            n_init: 3,
            max_age: 30,
            lost_grace: 30,
        }
    }
}

impl LifecycleConfig {
    pub fn validate(&self) -> Result<()> {
        check_positive("n_init", self.n_init as usize)?;
        check_positive("max_age", self.max_age as usize)?;
        Ok(())
    }
}

/// Applies lifecycle transitions and hands out local ids for one camera.
#[derive(Clone, Debug)]
pub struct TrackManager {
    pub config: LifecycleConfig,
    next_id: u64,
}

impl TrackManager {
    pub fn new(config: LifecycleConfig) -> Self {
        Self { config, next_id: 0 }
    }

    /// Next camera-scoped id. Ids are monotonic and never handed out twice.
    pub fn next_track_id(&mut self) -> LocalTrackId {
        let id = LocalTrackId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Call after a track received an update (hit). Update status if needed.
    pub fn register_hit(&self, track: &mut LocalTrack) {
        track.time_since_update = 0;
        track.hits = track.hits.saturating_add(1);
        match track.state {
            TrackState::Tentative if track.hits >= self.config.n_init => {
                track.state = TrackState::Confirmed;
            }
            TrackState::Lost => track.state = TrackState::Confirmed,
            _ => {}
        }
    }

    /// Call after a track received no update (miss).
    pub fn register_miss(&self, track: &mut LocalTrack) {
        track.time_since_update = track.time_since_update.saturating_add(1);
        let misses = track.time_since_update;
        track.state = match track.state {
            TrackState::Tentative => TrackState::Removed,
            TrackState::Confirmed if misses >= self.config.max_age => TrackState::Lost,
            TrackState::Lost
                if misses >= self.config.max_age.saturating_add(self.config.lost_grace) =>
            {
                TrackState::Removed
            }
            s => s,
        };
    }

    /// Remove all removed tracks. Returns count of pruned tracks.
    pub fn prune_removed(tracks: &mut Vec<LocalTrack>) -> usize {
        let before = tracks.len();
        tracks.retain(|t| t.state != TrackState::Removed);
        before - tracks.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kf::{BoxCov, BoxState};
    use crate::types::CameraId;

    fn new_track(id: u64) -> LocalTrack {
        LocalTrack::new(
            CameraId(0),
            LocalTrackId(id),
            "person".into(),
            BoxState::zeros(),
            BoxCov::identity(),
        )
    }

    #[test]
    fn tentative_confirms_after_n_init_hits() {
        let mgr = TrackManager::new(LifecycleConfig {
            n_init: 3,
            ..Default::default()
        });
        // Birth counts as first hit
        let mut track = new_track(0);
        assert_eq!(track.hits, 1);

        mgr.register_hit(&mut track); // hits = 2
        assert_eq!(track.state, TrackState::Tentative, "Not confirmed at hit 2");
        mgr.register_hit(&mut track); // hits = 3
        assert_eq!(track.state, TrackState::Confirmed);
    }

    #[test]
    fn tentative_removed_after_one_miss() {
        let mgr = TrackManager::new(LifecycleConfig::default());
        let mut track = new_track(0);
        mgr.register_miss(&mut track);
        assert_eq!(track.state, TrackState::Removed);
    }

    #[test]
    fn confirmed_lost_then_removed() {
        let mgr = TrackManager::new(LifecycleConfig {
            max_age: 3,
            lost_grace: 2,
            ..Default::default()
        });
        let mut track = LocalTrack {
            state: TrackState::Confirmed,
            ..new_track(0)
        };

        mgr.register_miss(&mut track);
        mgr.register_miss(&mut track);
        assert_eq!(track.state, TrackState::Confirmed, "Survives brief misses");
        mgr.register_miss(&mut track); // 3 misses
        assert_eq!(track.state, TrackState::Lost);
        mgr.register_miss(&mut track); // 4
        assert_eq!(track.state, TrackState::Lost);
        mgr.register_miss(&mut track); // 5 = max_age + grace
        assert_eq!(track.state, TrackState::Removed);
    }

    #[test]
    fn lost_recovers_on_hit() {
        let mgr = TrackManager::new(LifecycleConfig::default());
        let mut track = LocalTrack {
            state: TrackState::Lost,
            time_since_update: 31,
            ..new_track(0)
        };
        mgr.register_hit(&mut track);
        assert_eq!(track.state, TrackState::Confirmed);
        assert_eq!(track.time_since_update, 0);
    }

    #[test]
    fn ids_are_monotonic() {
        let mut mgr = TrackManager::new(LifecycleConfig::default());
        let a = mgr.next_track_id();
        let b = mgr.next_track_id();
        assert!(b > a);
    }

    #[test]
    fn prune_removed_removes_correctly() {
        let mut tracks = vec![
            LocalTrack { state: TrackState::Confirmed, ..new_track(0) },
            LocalTrack { state: TrackState::Removed, ..new_track(1) },
            LocalTrack { state: TrackState::Tentative, ..new_track(2) },
        ];
        let count = TrackManager::prune_removed(&mut tracks);
        assert_eq!(count, 1);
        assert_eq!(tracks.len(), 2);
        assert!(tracks.iter().all(|t| t.state != TrackState::Removed));
    }
}
