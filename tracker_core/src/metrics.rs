//! Observability counters and identity-quality metrics.
//!
//! - [`CycleStats`]: what happened in one orchestration cycle (degraded
//!   cameras, missing embeddings, identity churn).
//! - [`RunCounters`]: caller-side accumulation of cycle stats.
//! - [`FusionMetrics`]: ground-truth evaluation of published global ids
//!   (purity, id switches, fragmentation).

use crate::{reid::CorrelationStats, types::GlobalRef};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Counters for a single cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleStats {
    /// Cameras without a frame in the batch
    pub cameras_missing: u64,
    /// Cameras whose frame trailed the batch by more than the allowed lag
    pub cameras_stale: u64,
    /// Detections fed to all trackers
    pub detections: u64,
    /// Tracks published across all cameras
    pub published_tracks: u64,
    pub correlation: CorrelationStats,
}

impl CycleStats {
    pub fn degraded_cameras(&self) -> u64 {
        self.cameras_missing + self.cameras_stale
    }
}

/// Running totals over many cycles.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunCounters {
    pub cycles: u64,
    /// Cycles aborted on a contract violation
    pub aborted_cycles: u64,
    /// Cycles with at least one degraded camera
    pub degraded_cycles: u64,
    pub cameras_missing: u64,
    pub cameras_stale: u64,
    pub detections: u64,
    pub published_tracks: u64,
    pub correlation: CorrelationStats,
}

impl RunCounters {
    pub fn record(&mut self, stats: &CycleStats) {
        self.cycles += 1;
        if stats.degraded_cameras() > 0 {
            self.degraded_cycles += 1;
        }
        self.cameras_missing += stats.cameras_missing;
        self.cameras_stale += stats.cameras_stale;
        self.detections += stats.detections;
        self.published_tracks += stats.published_tracks;
        self.correlation.accumulate(&stats.correlation);
    }

    pub fn record_abort(&mut self) {
        self.aborted_cycles += 1;
    }

    /// Link/unlink events per completed cycle.
    pub fn churn_rate(&self) -> f64 {
        if self.cycles == 0 {
            0.0
        } else {
            self.correlation.churn() as f64 / self.cycles as f64
        }
    }
}

/// One published track paired with the ground-truth target that produced it.
#[derive(Clone, Debug)]
pub struct TruthAssociation {
    pub identity: GlobalRef,
    pub target_id: u64,
}

/// Accumulated identity-quality statistics.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FusionMetrics {
    pub n_frames: u64,
    /// Published (track, target) observations
    pub n_observations: u64,
    /// Times a target's dominant identity changed between frames
    pub id_switches: u64,
    /// Frames where one target appeared under more than one identity
    pub fragmented: u64,
    /// identity → target → observation count
    #[serde(skip)]
    votes: HashMap<GlobalRef, HashMap<u64, u64>>,
    /// target → last dominant identity
    #[serde(skip)]
    last_identity: HashMap<u64, GlobalRef>,
}

impl FusionMetrics {
    /// Accumulate one cycle's published tracks (all cameras).
    pub fn accumulate(&mut self, associations: &[TruthAssociation]) {
        self.n_frames += 1;

        let mut per_target: HashMap<u64, Vec<GlobalRef>> = HashMap::new();
        for a in associations {
            self.n_observations += 1;
            *self
                .votes
                .entry(a.identity)
                .or_default()
                .entry(a.target_id)
                .or_default() += 1;
            per_target.entry(a.target_id).or_default().push(a.identity);
        }

        for (target, ids) in per_target {
            let distinct: HashSet<GlobalRef> = ids.iter().copied().collect();
            if distinct.len() > 1 {
                self.fragmented += 1;
            }
            // Prefer a resolved global id as the target's identity this frame.
            let dominant = ids
                .iter()
                .copied()
                .min_by_key(|g| (g.global().is_none(), g.global()))
                .unwrap_or(ids[0]);
            if let Some(prev) = self.last_identity.insert(target, dominant) {
                if prev != dominant {
                    self.id_switches += 1;
                }
            }
        }
    }

    /// Fraction of observations whose identity's majority target is correct.
    pub fn purity(&self) -> f64 {
        if self.n_observations == 0 {
            return 1.0;
        }
        let majority: u64 = self
            .votes
            .values()
            .map(|targets| targets.values().copied().max().unwrap_or(0))
            .sum();
        majority as f64 / self.n_observations as f64
    }

    /// Number of distinct identities ever published.
    pub fn identities_seen(&self) -> usize {
        self.votes.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CameraId, GlobalId, LocalTrackId};

    fn g(id: u64) -> GlobalRef {
        GlobalRef::Global(GlobalId(id))
    }

    #[test]
    fn run_counters_accumulate() {
        let mut run = RunCounters::default();
        run.record(&CycleStats {
            cameras_missing: 1,
            correlation: CorrelationStats {
                links_created: 2,
                ..Default::default()
            },
            ..Default::default()
        });
        run.record(&CycleStats::default());
        run.record_abort();
        assert_eq!(run.cycles, 2);
        assert_eq!(run.degraded_cycles, 1);
        assert_eq!(run.aborted_cycles, 1);
        assert!((run.churn_rate() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn perfect_fusion_is_pure_without_switches() {
        let mut m = FusionMetrics::default();
        for _ in 0..5 {
            m.accumulate(&[
                TruthAssociation { identity: g(0), target_id: 7 },
                TruthAssociation { identity: g(0), target_id: 7 },
                TruthAssociation { identity: g(1), target_id: 8 },
            ]);
        }
        assert_eq!(m.purity(), 1.0);
        assert_eq!(m.id_switches, 0);
        assert_eq!(m.fragmented, 0);
        assert_eq!(m.identities_seen(), 2);
    }

    #[test]
    fn false_merge_lowers_purity_and_switch_is_counted() {
        let mut m = FusionMetrics::default();
        m.accumulate(&[
            TruthAssociation { identity: g(0), target_id: 1 },
            TruthAssociation { identity: g(0), target_id: 2 },
        ]);
        assert!((m.purity() - 0.5).abs() < 1e-12);

        m.accumulate(&[TruthAssociation { identity: g(3), target_id: 1 }]);
        assert_eq!(m.id_switches, 1);
    }

    #[test]
    fn unresolved_copy_counts_as_fragmentation() {
        let mut m = FusionMetrics::default();
        m.accumulate(&[
            TruthAssociation { identity: g(0), target_id: 1 },
            TruthAssociation {
                identity: GlobalRef::local(CameraId(1), LocalTrackId(4)),
                target_id: 1,
            },
        ]);
        assert_eq!(m.fragmented, 1);
    }
}
