//! Track-to-detection assignment for one camera.
//!
//! Gated pairs form a sparse bipartite graph. The graph is split into
//! connected components and each component is solved on its own with a
//! minimum-cost assignment; a pair that never passed the gate is not matched
//! even when the solver parks a row on it.

use nalgebra::DMatrix;
use std::collections::BTreeMap;

/// A gated (track, detection) pair and its cost.
#[derive(Clone, Debug)]
pub struct AssignEdge {
    pub track_idx: usize,
    pub det_idx: usize,
    pub cost: f64,
}

/// Gated pairs between `n_tracks` tracks and `n_dets` detections.
#[derive(Clone, Debug, Default)]
pub struct BipartiteGraph {
    pub edges: Vec<AssignEdge>,
    pub n_tracks: usize,
    pub n_dets: usize,
}

impl BipartiteGraph {
    pub fn new(n_tracks: usize, n_dets: usize) -> Self {
        Self {
            edges: Vec::new(),
            n_tracks,
            n_dets,
        }
    }

    pub fn add_edge(&mut self, track_idx: usize, det_idx: usize, cost: f64) {
        self.edges.push(AssignEdge {
            track_idx,
            det_idx,
            cost,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// Disjoint sets over graph nodes; tracks first, then detections.
struct DisjointSets {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl DisjointSets {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    fn root(&mut self, node: usize) -> usize {
        let mut r = node;
        while self.parent[r] != r {
            r = self.parent[r];
        }
        // Compress the walked path onto the root.
        let mut n = node;
        while self.parent[n] != r {
            let next = self.parent[n];
            self.parent[n] = r;
            n = next;
        }
        r
    }

    fn join(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.root(a), self.root(b));
        if ra == rb {
            return;
        }
        let (big, small) = if self.size[ra] >= self.size[rb] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[small] = big;
        self.size[big] += self.size[small];
    }
}

/// An independent sub-problem: sorted track and detection indices plus the
/// edges between them.
#[derive(Clone, Debug, Default)]
pub struct Component {
    pub track_indices: Vec<usize>,
    pub det_indices: Vec<usize>,
    pub edges: Vec<AssignEdge>,
}

/// Split the graph into connected components, ordered by their first track.
pub fn partition_components(graph: &BipartiteGraph) -> Vec<Component> {
    let mut sets = DisjointSets::new(graph.n_tracks + graph.n_dets);
    for e in &graph.edges {
        sets.join(e.track_idx, graph.n_tracks + e.det_idx);
    }

    let mut grouped: BTreeMap<usize, Component> = BTreeMap::new();
    for e in &graph.edges {
        let comp = grouped.entry(sets.root(e.track_idx)).or_default();
        comp.track_indices.push(e.track_idx);
        comp.det_indices.push(e.det_idx);
        comp.edges.push(e.clone());
    }

    let mut comps: Vec<Component> = grouped
        .into_values()
        .map(|mut c| {
            c.track_indices.sort_unstable();
            c.track_indices.dedup();
            c.det_indices.sort_unstable();
            c.det_indices.dedup();
            c
        })
        .collect();
    comps.sort_by_key(|c| c.track_indices.first().copied());
    comps
}

/// Matched pairs and leftovers of one component, in caller indices.
#[derive(Clone, Debug, Default)]
pub struct Assignment {
    pub pairs: Vec<(usize, usize)>,
    pub unmatched_tracks: Vec<usize>,
    pub unmatched_dets: Vec<usize>,
}

/// Minimum-cost assignment of one component.
///
/// Cells without an edge cost `no_edge_cost`, which must be larger than any
/// gated cost.
pub fn hungarian_solve(component: &Component, no_edge_cost: f64) -> Assignment {
    let tracks = &component.track_indices;
    let dets = &component.det_indices;
    if tracks.is_empty() || dets.is_empty() {
        return Assignment {
            pairs: Vec::new(),
            unmatched_tracks: tracks.clone(),
            unmatched_dets: dets.clone(),
        };
    }

    let n = tracks.len().max(dets.len());
    let mut cost = DMatrix::from_element(n, n, no_edge_cost);
    let mut gated = DMatrix::from_element(n, n, false);
    for e in &component.edges {
        if let (Ok(r), Ok(c)) = (tracks.binary_search(&e.track_idx), dets.binary_search(&e.det_idx)) {
            cost[(r, c)] = e.cost;
            gated[(r, c)] = true;
        }
    }

    let columns = min_cost_assignment(&cost);

    let mut out = Assignment::default();
    let mut det_used = vec![false; dets.len()];
    for (r, &track) in tracks.iter().enumerate() {
        match columns.get(r) {
            Some(&c) if c < dets.len() && gated[(r, c)] => {
                out.pairs.push((track, dets[c]));
                det_used[c] = true;
            }
            _ => out.unmatched_tracks.push(track),
        }
    }
    out.unmatched_dets = dets
        .iter()
        .zip(&det_used)
        .filter(|(_, used)| !**used)
        .map(|(&d, _)| d)
        .collect();
    out
}

/// Shortest-augmenting-path assignment on a square matrix with finite costs.
/// Returns the column chosen for each row.
fn min_cost_assignment(cost: &DMatrix<f64>) -> Vec<usize> {
    let n = cost.nrows();
    // 1-based rows and columns; column 0 is the virtual start.
    let mut row_pot = vec![0.0f64; n + 1];
    let mut col_pot = vec![0.0f64; n + 1];
    let mut owner = vec![0usize; n + 1];
    let mut back = vec![0usize; n + 1];

    for row in 1..=n {
        owner[0] = row;
        let mut col = 0usize;
        let mut slack = vec![f64::INFINITY; n + 1];
        let mut visited = vec![false; n + 1];

        while owner[col] != 0 {
            visited[col] = true;
            let r = owner[col];
            let mut delta = f64::INFINITY;
            let mut next = 0usize;
            for j in (1..=n).filter(|&j| !visited[j]) {
                let reduced = cost[(r - 1, j - 1)] - row_pot[r] - col_pot[j];
                if reduced < slack[j] {
                    slack[j] = reduced;
                    back[j] = col;
                }
                if slack[j] < delta {
                    delta = slack[j];
                    next = j;
                }
            }
            for j in 0..=n {
                if visited[j] {
                    row_pot[owner[j]] += delta;
                    col_pot[j] -= delta;
                } else {
                    slack[j] -= delta;
                }
            }
            col = next;
        }

        while col != 0 {
            let prev = back[col];
            owner[col] = owner[prev];
            col = prev;
        }
    }

    let mut columns = vec![0usize; n];
    for (c, &r) in owner.iter().enumerate().skip(1) {
        if r != 0 {
            columns[r - 1] = c - 1;
        }
    }
    columns
}
