//! Cross-camera re-identification: resolves which local tracks on different
//! cameras are the same physical object, using appearance only.
//!
//! # Processing steps per cycle ([`ReidCorrelator::update_global`])
//! 1. Refresh presence of every linked track; links whose track vanished or
//!    was removed free their camera slot
//! 2. Filter to confirmed / lost tracks carrying a fresh embedding; the rest
//!    fall back to their local identity for this cycle
//! 3. Build one descriptor per track: normalized mean of the last Q embeddings
//! 4. Revalidate existing links; a link is only broken after its similarity
//!    stayed below τ for `link_timeout` cycles
//! 5. Match unlinked cross-camera pairs greedily by descending similarity,
//!    never below τ, never two tracks of one camera in one identity
//! 6. Give every still-unlinked eligible track a singleton identity
//! 7. Purge identities whose tracks have all been gone for more than T cycles
//!
//! The identity table is owned here and only exposed read-only.

use crate::{
    config::{check_positive, check_unit_interval},
    error::Result,
    track::{LocalTrack, TrackState},
    types::{CameraId, Embedding, GlobalId, GlobalRef, LocalTrackId, TrackKey},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, info};

/// Norm below which a mean embedding is treated as carrying no information.
const MIN_DESCRIPTOR_NORM: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Configuration for the correlator.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReidConfig {
    /// Minimum cosine similarity τ for a cross-camera match
    pub match_threshold: f64,
    /// Embeddings averaged into a descriptor (Q)
    pub embedding_window: usize,
    /// Cycles an identity without live tracks is retained (T)
    pub identity_gc_timeout: u64,
    /// Cycles a link may stay below τ before it is broken
    pub link_timeout: u64,
}

impl Default for ReidConfig {
    fn default() -> Self {
        Self {
            match_threshold: 0.5,
            embedding_window: 10,
            identity_gc_timeout: 30,
            link_timeout: 30,
        }
    }
}

impl ReidConfig {
    pub fn validate(&self) -> Result<()> {
        check_unit_interval("match_threshold", self.match_threshold)?;
        check_positive("reid.embedding_window", self.embedding_window)?;
        check_positive("identity_gc_timeout", self.identity_gc_timeout as usize)?;
        check_positive("link_timeout", self.link_timeout as usize)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Identity table
// ---------------------------------------------------------------------------

/// Link between a global identity and one camera's local track.
#[derive(Clone, Debug, Serialize)]
pub struct IdentityLink {
    pub local_id: LocalTrackId,
    /// Latest similarity to the other members (1.0 for singletons)
    pub similarity: f64,
    pub linked_at: u64,
    /// Last cycle the track was present in its tracker's snapshot
    pub last_seen: u64,
    /// First cycle of the current run of below-τ comparisons
    pub below_since: Option<u64>,
    /// The track left its tracker; the camera slot is free
    pub removed: bool,
}

/// A cross-camera identity.
#[derive(Clone, Debug, Serialize)]
pub struct GlobalIdentity {
    pub id: GlobalId,
    /// At most one link per camera
    pub links: BTreeMap<CameraId, IdentityLink>,
    /// Mean similarity across live links
    pub confidence: f64,
    pub created_at: u64,
    /// Last cycle any linked track was present
    pub last_seen: u64,
}

impl GlobalIdentity {
    fn new(id: GlobalId, cycle: u64) -> Self {
        Self {
            id,
            links: BTreeMap::new(),
            confidence: 1.0,
            created_at: cycle,
            last_seen: cycle,
        }
    }

    /// Live links, by camera.
    pub fn live_links(&self) -> impl Iterator<Item = (CameraId, &IdentityLink)> + '_ {
        self.links
            .iter()
            .filter(|(_, l)| !l.removed)
            .map(|(c, l)| (*c, l))
    }

    pub fn live_cameras(&self) -> BTreeSet<CameraId> {
        self.live_links().map(|(c, _)| c).collect()
    }

    pub fn is_live(&self) -> bool {
        self.live_links().next().is_some()
    }

    /// True when two or more cameras currently contribute a track.
    pub fn is_cross_camera(&self) -> bool {
        self.live_links().nth(1).is_some()
    }

    fn attach(&mut self, camera: CameraId, local_id: LocalTrackId, similarity: f64, cycle: u64) {
        self.links.insert(
            camera,
            IdentityLink {
                local_id,
                similarity,
                linked_at: cycle,
                last_seen: cycle,
                below_since: None,
                removed: false,
            },
        );
        self.last_seen = cycle;
    }
}

/// Counters produced by one correlation pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrelationStats {
    /// Eligible tracks demoted to local identity for lack of an embedding
    pub missing_embeddings: u64,
    /// Tracks joined to another camera's identity
    pub links_created: u64,
    /// Links broken after a full below-τ window
    pub links_broken: u64,
    pub identities_created: u64,
    pub identities_merged: u64,
    pub identities_purged: u64,
}

impl CorrelationStats {
    pub fn accumulate(&mut self, other: &CorrelationStats) {
        self.missing_embeddings += other.missing_embeddings;
        self.links_created += other.links_created;
        self.links_broken += other.links_broken;
        self.identities_created += other.identities_created;
        self.identities_merged += other.identities_merged;
        self.identities_purged += other.identities_purged;
    }

    /// Link/unlink events: the quality signal used to tune τ and timeouts.
    pub fn churn(&self) -> u64 {
        self.links_created + self.links_broken
    }
}

/// Result of [`ReidCorrelator::update_global`].
#[derive(Clone, Debug, Default)]
pub struct IdentityAssignments {
    /// Identity per eligible track; tracks absent here have no global link
    pub assignments: HashMap<TrackKey, GlobalRef>,
    pub stats: CorrelationStats,
}

impl IdentityAssignments {
    pub fn get(&self, key: &TrackKey) -> Option<GlobalRef> {
        self.assignments.get(key).copied()
    }
}

// ---------------------------------------------------------------------------
// Descriptor math
// ---------------------------------------------------------------------------

/// Normalized mean of the newest `window` embeddings sharing the newest one's
/// dimension. `None` when there is nothing usable.
pub fn descriptor<'a, I>(embeddings: I, window: usize) -> Option<Embedding>
where
    I: DoubleEndedIterator<Item = &'a Embedding>,
{
    let mut recent = embeddings.rev();
    let newest = recent.next()?;
    let mut sum = newest.clone();
    let mut n = 1usize;
    for e in recent.filter(|e| e.len() == newest.len()).take(window.saturating_sub(1)) {
        sum += e;
        n += 1;
    }
    let mean = sum / n as f64;
    let norm = mean.norm();
    (norm > MIN_DESCRIPTOR_NORM).then(|| mean / norm)
}

/// Cosine similarity; `None` for mismatched dimensions or null vectors.
pub fn cosine_similarity(a: &Embedding, b: &Embedding) -> Option<f64> {
    if a.len() != b.len() {
        return None;
    }
    let denom = a.norm() * b.norm();
    (denom > MIN_DESCRIPTOR_NORM).then(|| a.dot(b) / denom)
}

struct Candidate {
    key: TrackKey,
    descriptor: Embedding,
}

// ---------------------------------------------------------------------------
// Correlator
// ---------------------------------------------------------------------------

/// Owner of the cross-camera identity table.
pub struct ReidCorrelator {
    config: ReidConfig,
    identities: BTreeMap<GlobalId, GlobalIdentity>,
    /// Live (camera, local) → identity
    index: HashMap<TrackKey, GlobalId>,
    next_id: u64,
    totals: CorrelationStats,
}

impl ReidCorrelator {
    pub fn new(config: ReidConfig) -> Self {
        Self {
            config,
            identities: BTreeMap::new(),
            index: HashMap::new(),
            next_id: 0,
            totals: CorrelationStats::default(),
        }
    }

    pub fn config(&self) -> &ReidConfig {
        &self.config
    }

    /// Identity currently linked to a local track.
    pub fn identity_of(&self, camera: CameraId, local_id: LocalTrackId) -> Option<GlobalId> {
        self.index.get(&(camera, local_id)).copied()
    }

    pub fn identity(&self, id: GlobalId) -> Option<&GlobalIdentity> {
        self.identities.get(&id)
    }

    /// Read-only view of the table, ordered by id.
    pub fn identities(&self) -> impl Iterator<Item = &GlobalIdentity> + '_ {
        self.identities.values()
    }

    /// Entries in the table, including ones awaiting purge.
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Entries with at least one live track.
    pub fn active_len(&self) -> usize {
        self.identities.values().filter(|g| g.is_live()).count()
    }

    /// Cumulative counters since construction.
    pub fn totals(&self) -> &CorrelationStats {
        &self.totals
    }

    /// Drop the whole table. Ids keep increasing.
    pub fn reset(&mut self) {
        self.identities.clear();
        self.index.clear();
    }

    fn allocate(&mut self, cycle: u64) -> GlobalId {
        let id = GlobalId(self.next_id);
        self.next_id += 1;
        self.identities.insert(id, GlobalIdentity::new(id, cycle));
        id
    }

    /// Run one correlation pass over the synchronized snapshots of all cameras.
    pub fn update_global(
        &mut self,
        cycle: u64,
        snapshots: &[(CameraId, &[LocalTrack])],
    ) -> IdentityAssignments {
        let mut out = IdentityAssignments::default();

        // Step 1: presence
        let present: HashSet<TrackKey> = snapshots
            .iter()
            .flat_map(|(_, tracks)| tracks.iter())
            .filter(|t| t.state != TrackState::Removed)
            .map(|t| t.key())
            .collect();
        self.refresh_presence(cycle, &present);

        // Steps 2-3: eligibility + descriptors
        let window = self.config.embedding_window;
        let mut candidates: Vec<Candidate> = Vec::new();
        for track in snapshots.iter().flat_map(|(_, tracks)| tracks.iter()) {
            if !matches!(track.state, TrackState::Confirmed | TrackState::Lost) {
                continue;
            }
            let desc = if track.embedding_missing {
                None
            } else {
                descriptor(track.embeddings.iter(), window)
            };
            match desc {
                Some(descriptor) => candidates.push(Candidate {
                    key: track.key(),
                    descriptor,
                }),
                None => {
                    out.stats.missing_embeddings += 1;
                    out.assignments
                        .insert(track.key(), GlobalRef::local(track.camera_id, track.id));
                }
            }
        }
        let by_key: HashMap<TrackKey, usize> = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| (c.key, i))
            .collect();

        // Step 4: revalidate
        self.revalidate(cycle, &candidates, &by_key, &mut out.stats);

        // Step 5: match unlinked pairs
        self.match_pairs(cycle, &candidates, &mut out.stats);

        // Step 6: singletons
        for cand in &candidates {
            if !self.index.contains_key(&cand.key) {
                let id = self.allocate(cycle);
                if let Some(identity) = self.identities.get_mut(&id) {
                    identity.attach(cand.key.0, cand.key.1, 1.0, cycle);
                }
                self.index.insert(cand.key, id);
                out.stats.identities_created += 1;
            }
        }

        for cand in &candidates {
            if let Some(&id) = self.index.get(&cand.key) {
                out.assignments.insert(cand.key, GlobalRef::Global(id));
            }
        }

        // Step 7: GC
        out.stats.identities_purged = self.collect_garbage(cycle);

        debug!(
            cycle,
            eligible = candidates.len(),
            identities = self.identities.len(),
            active = self.active_len(),
            links_created = out.stats.links_created,
            links_broken = out.stats.links_broken,
            "correlation pass"
        );
        self.totals.accumulate(&out.stats);
        out
    }

    fn refresh_presence(&mut self, cycle: u64, present: &HashSet<TrackKey>) {
        for identity in self.identities.values_mut() {
            for (&camera, link) in identity.links.iter_mut().filter(|(_, l)| !l.removed) {
                let key = (camera, link.local_id);
                if present.contains(&key) {
                    link.last_seen = cycle;
                    identity.last_seen = cycle;
                } else {
                    link.removed = true;
                    self.index.remove(&key);
                }
            }
        }
    }

    fn revalidate(
        &mut self,
        cycle: u64,
        candidates: &[Candidate],
        by_key: &HashMap<TrackKey, usize>,
        stats: &mut CorrelationStats,
    ) {
        let timeout = self.config.link_timeout;
        let tau = self.config.match_threshold;
        let mut detached: Vec<(GlobalId, TrackKey)> = Vec::new();

        for identity in self.identities.values_mut() {
            if !identity.is_cross_camera() {
                continue;
            }
            let members: Vec<(CameraId, usize)> = identity
                .live_links()
                .filter_map(|(c, l)| by_key.get(&(c, l.local_id)).map(|&i| (c, i)))
                .collect();
            if members.len() < 2 {
                continue;
            }

            let mut sims = Vec::with_capacity(members.len());
            for &(camera, i) in &members {
                // No comparable partner (differing descriptor dimensions): leave the link as is.
                let Some(best) = members
                    .iter()
                    .filter(|(c, _)| *c != camera)
                    .filter_map(|&(_, j)| {
                        cosine_similarity(&candidates[i].descriptor, &candidates[j].descriptor)
                    })
                    .reduce(f64::max)
                else {
                    continue;
                };
                if let Some(link) = identity.links.get_mut(&camera) {
                    link.similarity = best;
                    if best >= tau {
                        link.below_since = None;
                    } else {
                        link.below_since.get_or_insert(cycle);
                    }
                }
                sims.push(best);
            }
            if !sims.is_empty() {
                identity.confidence = sims.iter().sum::<f64>() / sims.len() as f64;
            }

            // Break at most down to a singleton, newest link first.
            let mut expired: Vec<(u64, CameraId, LocalTrackId)> = identity
                .live_links()
                .filter(|(_, l)| {
                    l.below_since
                        .is_some_and(|s| cycle.saturating_sub(s) >= timeout)
                })
                .map(|(c, l)| (l.linked_at, c, l.local_id))
                .collect();
            expired.sort_unstable_by(|a, b| b.cmp(a));
            let mut live = identity.live_links().count();
            for (_, camera, local_id) in expired {
                if live < 2 {
                    break;
                }
                identity.links.remove(&camera);
                detached.push((identity.id, (camera, local_id)));
                live -= 1;
            }
        }

        for (id, key) in detached {
            self.index.remove(&key);
            stats.links_broken += 1;
            debug!(identity = %id, camera = %key.0, track = %key.1, "link broken");
        }
    }

    /// Live camera set of a track's identity, or just its own camera.
    fn cameras_of(&self, key: &TrackKey) -> BTreeSet<CameraId> {
        match self.index.get(key).and_then(|id| self.identities.get(id)) {
            Some(identity) => identity.live_cameras(),
            None => BTreeSet::from([key.0]),
        }
    }

    fn match_pairs(&mut self, cycle: u64, candidates: &[Candidate], stats: &mut CorrelationStats) {
        let tau = self.config.match_threshold;
        let mut pairs: Vec<(f64, usize, usize)> = Vec::new();
        for i in 0..candidates.len() {
            for j in (i + 1)..candidates.len() {
                let (a, b) = (&candidates[i], &candidates[j]);
                if a.key.0 == b.key.0 {
                    continue;
                }
                let (ga, gb) = (self.index.get(&a.key), self.index.get(&b.key));
                if ga.is_some() && ga == gb {
                    continue;
                }
                if let Some(sim) = cosine_similarity(&a.descriptor, &b.descriptor) {
                    if sim >= tau {
                        pairs.push((sim, i, j));
                    }
                }
            }
        }
        pairs.sort_by(|x, y| y.0.total_cmp(&x.0).then((x.1, x.2).cmp(&(y.1, y.2))));

        for (sim, i, j) in pairs {
            let (ka, kb) = (candidates[i].key, candidates[j].key);
            let (ga, gb) = (self.index.get(&ka).copied(), self.index.get(&kb).copied());
            if ga.is_some() && ga == gb {
                continue;
            }
            if !self.cameras_of(&ka).is_disjoint(&self.cameras_of(&kb)) {
                continue;
            }
            match (ga, gb) {
                (None, None) => {
                    let id = self.allocate(cycle);
                    if let Some(identity) = self.identities.get_mut(&id) {
                        identity.attach(ka.0, ka.1, sim, cycle);
                        identity.attach(kb.0, kb.1, sim, cycle);
                        identity.confidence = sim;
                    }
                    self.index.insert(ka, id);
                    self.index.insert(kb, id);
                    stats.identities_created += 1;
                    info!(identity = %id, a = ?ka, b = ?kb, sim, "cross-camera identity created");
                }
                (Some(id), None) => self.join(id, kb, sim, cycle),
                (None, Some(id)) => self.join(id, ka, sim, cycle),
                (Some(a), Some(b)) => {
                    self.merge(a.min(b), a.max(b), sim, cycle);
                    stats.identities_merged += 1;
                }
            }
            stats.links_created += 1;
        }
    }

    fn join(&mut self, id: GlobalId, key: TrackKey, sim: f64, cycle: u64) {
        if let Some(identity) = self.identities.get_mut(&id) {
            identity.attach(key.0, key.1, sim, cycle);
            self.index.insert(key, id);
            info!(identity = %id, camera = %key.0, track = %key.1, sim, "track joined identity");
        }
    }

    /// Fold `absorbed` into `survivor`. Camera sets are disjoint.
    fn merge(&mut self, survivor: GlobalId, absorbed: GlobalId, sim: f64, cycle: u64) {
        let Some(gone) = self.identities.remove(&absorbed) else {
            return;
        };
        let Some(keep) = self.identities.get_mut(&survivor) else {
            return;
        };
        for (camera, mut link) in gone.links.into_iter().filter(|(_, l)| !l.removed) {
            link.similarity = sim;
            link.below_since = None;
            self.index.insert((camera, link.local_id), survivor);
            keep.links.insert(camera, link);
        }
        keep.last_seen = cycle;
        info!(survivor = %survivor, absorbed = %absorbed, sim, "identities merged");
    }

    fn collect_garbage(&mut self, cycle: u64) -> u64 {
        let timeout = self.config.identity_gc_timeout;
        let before = self.identities.len();
        self.identities.retain(|id, identity| {
            let keep = identity.is_live() || cycle.saturating_sub(identity.last_seen) <= timeout;
            if !keep {
                info!(identity = %id, "identity purged");
            }
            keep
        });
        (before - self.identities.len()) as u64
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
