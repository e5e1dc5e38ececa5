use crate::error::{Error, Result};
use crate::graph::{LayoutGraph, Point};
use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxBuildHasher;

/// Neighbor index -> normalized, squared edge weight.
pub type Adjacency = IndexMap<usize, f64, FxBuildHasher>;

#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    /// Pinned by the caller; see `OpenOrdOptions::freeze_ticks`.
    pub fixed: bool,
    pub position: Point,
    /// Where the node was last added to the density grid, if it is resident.
    pub inserted_at: Option<Point>,
    /// Energy of the last committed position.
    pub energy: f64,
}

impl Default for NodeRecord {
    fn default() -> Self {
        Self {
            fixed: false,
            position: Point::ORIGIN,
            inserted_at: None,
            energy: 0.0,
        }
    }
}

/// Read-only snapshot of the input graph plus the shared position array.
///
/// Node `i` is owned (written) by worker `i % workers`; every worker may read every record.
#[derive(Debug, Clone)]
pub struct Description<N> {
    ids: IndexSet<N, FxBuildHasher>,
    highest_weight: f64,
    edge_count: usize,
    workers: usize,
    records: Vec<NodeRecord>,
    /// `partitions[w][slot]` is the adjacency of node `w + slot * workers`.
    partitions: Vec<Vec<Adjacency>>,
}

impl<N: Clone + Eq + std::hash::Hash + std::fmt::Debug> Description<N> {
    pub fn new<G>(graph: &G, workers: usize) -> Result<Self>
    where
        G: LayoutGraph<NodeId = N>,
    {
        if workers == 0 {
            return Err(Error::InvalidOptions("workers must be at least 1".to_string()));
        }

        let mut ids: IndexSet<N, FxBuildHasher> = IndexSet::default();
        for id in graph.node_ids() {
            ids.insert(id);
        }

        let mut adjacency: Vec<Adjacency> = vec![Adjacency::default(); ids.len()];
        let mut highest_weight: f64 = 0.0;
        for (src, dst, weight) in graph.edges() {
            let (Some(src_idx), Some(dst_idx)) = (ids.get_index_of(&src), ids.get_index_of(&dst))
            else {
                return Err(Error::MissingEndpoint {
                    from: format!("{src:?}"),
                    to: format!("{dst:?}"),
                });
            };
            let weight = weight.unwrap_or(1.0);
            if !(weight >= 0.0) {
                return Err(Error::NegativeEdgeWeight {
                    from: format!("{src:?}"),
                    to: format!("{dst:?}"),
                    weight,
                });
            }
            if src_idx == dst_idx {
                continue;
            }
            highest_weight = highest_weight.max(weight);
            keep_heaviest(&mut adjacency[src_idx], dst_idx, weight);
            keep_heaviest(&mut adjacency[dst_idx], src_idx, weight);
        }

        let edge_count = adjacency.iter().map(IndexMap::len).sum::<usize>() / 2;
        for adj in &mut adjacency {
            for w in adj.values_mut() {
                let normalized = if highest_weight > 0.0 {
                    *w / highest_weight
                } else {
                    0.0
                };
                *w = normalized * normalized;
            }
        }

        let mut partitions: Vec<Vec<Adjacency>> = (0..workers)
            .map(|_| Vec::with_capacity(ids.len().div_ceil(workers)))
            .collect();
        for (idx, adj) in adjacency.into_iter().enumerate() {
            partitions[idx % workers].push(adj);
        }

        Ok(Self {
            records: vec![NodeRecord::default(); ids.len()],
            ids,
            highest_weight,
            edge_count,
            workers,
            partitions,
        })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Number of distinct undirected node pairs joined by an edge.
    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    pub fn highest_weight(&self) -> f64 {
        self.highest_weight
    }

    pub fn index_of(&self, id: &N) -> Option<usize> {
        self.ids.get_index_of(id)
    }

    pub fn id(&self, index: usize) -> Option<&N> {
        self.ids.get_index(index)
    }

    pub fn ids(&self) -> impl Iterator<Item = &N> + '_ {
        self.ids.iter()
    }

    pub fn owner(&self, index: usize) -> usize {
        index % self.workers
    }

    pub fn records(&self) -> &[NodeRecord] {
        &self.records
    }

    pub(crate) fn records_mut(&mut self) -> &mut [NodeRecord] {
        &mut self.records
    }

    /// Adjacency of the nodes owned by `worker`, one entry per owned node in index order.
    pub fn partition(&self, worker: usize) -> &[Adjacency] {
        self.partitions.get(worker).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn keep_heaviest(adj: &mut Adjacency, neighbor: usize, weight: f64) {
    let entry = adj.entry(neighbor).or_insert(weight);
    if weight > *entry {
        *entry = weight;
    }
}
