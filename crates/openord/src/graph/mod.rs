use crate::error::{Error, Result};
use rustc_hash::FxHashSet;
use std::collections::{BTreeMap, HashMap};
use std::hash::{BuildHasher, Hash};

/// Read-only view of a graph to lay out.
///
/// Edges are enumerated from their source; the layout treats them as undirected.
pub trait LayoutGraph {
    type NodeId: Clone + Eq + Hash + std::fmt::Debug;

    fn node_ids(&self) -> impl Iterator<Item = Self::NodeId> + '_;

    fn out_neighbors(&self, id: &Self::NodeId) -> impl Iterator<Item = Self::NodeId> + '_;

    /// Weight of the edge `from -> to`. `None` means the graph carries no weight (treated as 1).
    fn edge_weight(&self, _from: &Self::NodeId, _to: &Self::NodeId) -> Option<f64> {
        None
    }

    /// Every edge as `(source, target, weight)`, parallel edges included.
    ///
    /// The default walks `out_neighbors` and asks `edge_weight` per edge. Implementors that
    /// store an edge list should override it with a single pass.
    fn edges(&self) -> impl Iterator<Item = (Self::NodeId, Self::NodeId, Option<f64>)> + '_ {
        self.node_ids().flat_map(move |src| {
            let out: Vec<_> = self
                .out_neighbors(&src)
                .map(|dst| {
                    let weight = self.edge_weight(&src, &dst);
                    (src.clone(), dst, weight)
                })
                .collect();
            out
        })
    }
}

/// Capability the surrounding driver uses to persist coordinates.
pub trait PositionStore<N> {
    fn get(&self, id: &N) -> Option<Point>;
    fn set(&mut self, id: N, point: Point);
}

impl<N: Ord> PositionStore<N> for BTreeMap<N, Point> {
    fn get(&self, id: &N) -> Option<Point> {
        BTreeMap::get(self, id).copied()
    }

    fn set(&mut self, id: N, point: Point) {
        self.insert(id, point);
    }
}

impl<N: Eq + Hash, S: BuildHasher> PositionStore<N> for HashMap<N, Point, S> {
    fn get(&self, id: &N) -> Option<Point> {
        HashMap::get(self, id).copied()
    }

    fn set(&mut self, id: N, point: Point) {
        self.insert(id, point);
    }
}

#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Graph {
    /// Check that every edge joins known nodes and carries a usable weight.
    ///
    /// `Layout::new` performs the same checks; this is for callers that want to reject a
    /// hand-built graph before configuring a run.
    pub fn validate(&self) -> Result<()> {
        let ids: FxHashSet<&str> = self.nodes.iter().map(|n| n.id.as_str()).collect();
        for e in &self.edges {
            if !ids.contains(e.source.as_str()) || !ids.contains(e.target.as_str()) {
                return Err(Error::MissingEndpoint {
                    from: e.source.clone(),
                    to: e.target.clone(),
                });
            }
            if let Some(weight) = e.weight.filter(|w| !(*w >= 0.0)) {
                return Err(Error::NegativeEdgeWeight {
                    from: e.source.clone(),
                    to: e.target.clone(),
                    weight,
                });
            }
        }
        Ok(())
    }

    pub fn add_node(&mut self, id: impl Into<String>) {
        self.nodes.push(Node { id: id.into() });
    }

    pub fn add_edge(&mut self, source: impl Into<String>, target: impl Into<String>) {
        self.edges.push(Edge {
            source: source.into(),
            target: target.into(),
            weight: None,
        });
    }

    pub fn add_weighted_edge(
        &mut self,
        source: impl Into<String>,
        target: impl Into<String>,
        weight: f64,
    ) {
        self.edges.push(Edge {
            source: source.into(),
            target: target.into(),
            weight: Some(weight),
        });
    }
}

impl LayoutGraph for Graph {
    type NodeId = String;

    fn node_ids(&self) -> impl Iterator<Item = String> + '_ {
        self.nodes.iter().map(|n| n.id.clone())
    }

    fn out_neighbors(&self, id: &String) -> impl Iterator<Item = String> + '_ {
        let id = id.clone();
        self.edges
            .iter()
            .filter(move |e| e.source == id)
            .map(|e| e.target.clone())
    }

    fn edge_weight(&self, from: &String, to: &String) -> Option<f64> {
        // Parallel edges resolve to the heaviest one; an invalid weight always wins so it is
        // reported instead of hidden.
        self.edges
            .iter()
            .filter(|e| &e.source == from && &e.target == to)
            .filter_map(|e| e.weight)
            .reduce(|a, b| {
                if !(a >= 0.0) {
                    a
                } else if !(b >= 0.0) || b > a {
                    b
                } else {
                    a
                }
            })
    }

    fn edges(&self) -> impl Iterator<Item = (String, String, Option<f64>)> + '_ {
        self.edges
            .iter()
            .map(|e| (e.source.clone(), e.target.clone(), e.weight))
    }
}

#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const ORIGIN: Point = Point { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point) -> f64 {
        self.distance_squared(other).sqrt()
    }

    pub fn distance_squared(self, other: Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        dx * dx + dy * dy
    }
}

impl From<nalgebra::Vector2<f64>> for Point {
    fn from(v: nalgebra::Vector2<f64>) -> Self {
        Self { x: v.x, y: v.y }
    }
}

impl From<Point> for nalgebra::Vector2<f64> {
    fn from(p: Point) -> Self {
        nalgebra::Vector2::new(p.x, p.y)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LayoutResult {
    pub positions: BTreeMap<String, Point>,
}

impl PositionStore<String> for LayoutResult {
    fn get(&self, id: &String) -> Option<Point> {
        self.positions.get(id).copied()
    }

    fn set(&mut self, id: String, point: Point) {
        self.positions.insert(id, point);
    }
}
