#![forbid(unsafe_code)]

//! Headless OpenOrd-style force-directed graph layout.
//!
//! Repulsion is approximated with a density field instead of pairwise forces, and nodes are
//! annealed through a fixed sequence of stages (liquid, expansion, cooldown, crunch, simmer).
//! Work is split across `workers` partitions; a run is reproducible for a given
//! `(graph, workers, random_seed)`.

pub mod algo;
pub mod error;
pub mod graph;
mod rng;

pub use algo::density::{DensityGrid, DensityMode};
pub use algo::description::{Adjacency, Description, NodeRecord};
pub use algo::layout::Layout;
pub use algo::schedule::{EdgeCuts, LayoutSchedule, Scheduler, Stage, StageChange};
pub use algo::worker::{NodeUpdate, Worker};
pub use algo::{GridConfig, OpenOrdOptions, StageParams, StageTable};
pub use error::{Error, Result};
pub use graph::{Edge, Graph, LayoutGraph, LayoutResult, Node, Point, PositionStore};

/// Lay out `graph` to completion.
pub fn layout(graph: &Graph, opts: &OpenOrdOptions) -> Result<LayoutResult> {
    let mut engine = Layout::new(graph, opts)?;
    while engine.step()? {}

    let mut result = LayoutResult::default();
    engine.write_to(&mut result);
    Ok(result)
}
