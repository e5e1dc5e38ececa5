use crate::algo::density::DensityGrid;
use crate::algo::description::{Adjacency, Description, NodeRecord};
use crate::algo::schedule::{EdgeCuts, LayoutSchedule, Scheduler, Stage, StageTable};
use crate::error::Result;
use crate::graph::Point;
use crate::rng::XorShift64Star;
use nalgebra as na;

/// Proposed new state for one owned node, produced during the compute phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeUpdate {
    pub index: usize,
    pub position: Point,
    pub energy: f64,
    /// Energy of the candidate that lost. `None` when the node was frozen and no candidate was
    /// considered.
    pub rejected_energy: Option<f64>,
}

/// Partition-owning annealer.
///
/// Worker `id` of `workers` owns node indices `id, id + workers, id + 2 * workers, ...` and is
/// the only producer of updates for them.
#[derive(Debug, Clone)]
pub struct Worker {
    id: usize,
    workers: usize,
    rng: XorShift64Star,
    scheduler: Scheduler,
    /// Pruned adjacency view, one entry per owned node.
    neighbors: Vec<Adjacency>,
    cuts_made: usize,
}

impl Worker {
    /// Fraction of the temperature used as the jitter span.
    const JUMP_FRACTION: f64 = 0.01;
    const ATTRACTION_SCALE: f64 = 2e-2;

    pub fn new<N>(
        id: usize,
        description: &Description<N>,
        seed: u64,
        stages: StageTable,
        cuts: EdgeCuts,
    ) -> Self
    where
        N: Clone + Eq + std::hash::Hash + std::fmt::Debug,
    {
        Self {
            id,
            workers: description.workers(),
            rng: XorShift64Star::new(seed),
            scheduler: Scheduler::new(stages, cuts),
            neighbors: description.partition(id).to_vec(),
            cuts_made: 0,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn stage(&self) -> Stage {
        self.scheduler.stage()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Number of edges this worker has pruned from its view so far.
    pub fn cuts_made(&self) -> usize {
        self.cuts_made
    }

    pub fn owns(&self, index: usize) -> bool {
        index % self.workers == self.id
    }

    pub fn owned_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.neighbors.len()).map(|slot| self.index_of_slot(slot))
    }

    /// Current (possibly pruned) adjacency of an owned node.
    pub fn neighbors(&self, index: usize) -> Option<&Adjacency> {
        if !self.owns(index) {
            return None;
        }
        self.neighbors.get(index / self.workers)
    }

    fn index_of_slot(&self, slot: usize) -> usize {
        self.id + slot * self.workers
    }

    /// Compute phase of one tick.
    ///
    /// Reads only the start-of-tick `records` and `grid`; the caller commits the returned
    /// updates once every worker has finished. `pinned_frozen` holds pinned nodes in place.
    pub fn tick(
        &mut self,
        records: &[NodeRecord],
        grid: &DensityGrid,
        pinned_frozen: bool,
    ) -> Result<Vec<NodeUpdate>> {
        if self.scheduler.stage().is_done() {
            return Ok(Vec::new());
        }
        self.scheduler.begin_tick();

        let stage = self.scheduler.stage();
        let schedule = self.scheduler.schedule().clone();
        let cuts = self.scheduler.cuts().clone();
        let jump = Self::JUMP_FRACTION * schedule.temperature;

        let mut updates = Vec::with_capacity(self.neighbors.len());
        for slot in 0..self.neighbors.len() {
            let index = self.index_of_slot(slot);
            let record = &records[index];
            let frozen = record.fixed && pinned_frozen;

            // Every owned node consumes exactly two draws, frozen or not, so the stream stays
            // aligned regardless of positions.
            let jx = (0.5 - self.rng.next_f64_unit()) * jump;
            let jy = (0.5 - self.rng.next_f64_unit()) * jump;

            // Frozen nodes neither move nor prune their edges.
            let update = if frozen {
                NodeUpdate {
                    index,
                    position: record.position,
                    energy: self.energy(slot, record.position, records, grid, stage, &schedule),
                    rejected_energy: None,
                }
            } else {
                let analytic = self.solve_analytic(slot, records, &schedule, &cuts);
                let jittered = Point::new(analytic.x + jx, analytic.y + jy);
                let e_analytic = self.energy(slot, analytic, records, grid, stage, &schedule);
                let e_jittered = self.energy(slot, jittered, records, grid, stage, &schedule);
                let (position, energy, rejected) = if e_jittered < e_analytic {
                    (jittered, e_jittered, e_analytic)
                } else {
                    (analytic, e_analytic, e_jittered)
                };
                NodeUpdate {
                    index,
                    position,
                    energy,
                    rejected_energy: Some(rejected),
                }
            };
            grid.ensure_addressable(update.position)?;
            updates.push(update);
        }

        if let Some(change) = self.scheduler.advance() {
            tracing::debug!(
                worker = self.id,
                from = ?change.from,
                to = ?change.to,
                elapsed = ?change.elapsed,
                "openord stage finished"
            );
        }
        Ok(updates)
    }

    /// Damped blend of the node's position and the weighted centroid of its neighbors.
    ///
    /// Also prunes the farthest neighbor from this node's view when the edge-cut thresholds say so.
    fn solve_analytic(
        &mut self,
        slot: usize,
        records: &[NodeRecord],
        schedule: &LayoutSchedule,
        cuts: &EdgeCuts,
    ) -> Point {
        let index = self.index_of_slot(slot);
        let current: na::Vector2<f64> = records[index].position.into();
        let adj = &self.neighbors[slot];

        let mut total_weight = 0.0;
        let mut weighted = na::Vector2::<f64>::zeros();
        for (&n, &w) in adj {
            total_weight += w;
            weighted += na::Vector2::<f64>::from(records[n].position) * w;
        }
        if total_weight <= 0.0 {
            return current.into();
        }
        let centroid = weighted / total_weight;
        let keep = 1.0 - schedule.damping;
        let blended = current * keep + centroid * (1.0 - keep);

        let Some(min_edges) = cuts.min_edges else {
            return blended.into();
        };
        let degree = adj.len() as f64;
        if degree <= min_edges {
            return blended.into();
        }
        let scale = degree.sqrt();
        let centroid_point = Point::from(centroid);
        let mut farthest: Option<(usize, f64)> = None;
        for &n in adj.keys() {
            let d = centroid_point.distance(records[n].position) * scale;
            if farthest.is_none_or(|(_, best)| d > best) {
                farthest = Some((n, d));
            }
        }
        if let Some((n, d)) = farthest {
            if d > cuts.cut_off_length {
                self.neighbors[slot].shift_remove(&n);
                self.cuts_made += 1;
                tracing::trace!(node = index, neighbor = n, length = d, "openord edge cut");
            }
        }
        blended.into()
    }

    /// Attraction to the node's neighbors plus the density cost of `pos`.
    fn energy(
        &self,
        slot: usize,
        pos: Point,
        records: &[NodeRecord],
        grid: &DensityGrid,
        stage: Stage,
        schedule: &LayoutSchedule,
    ) -> f64 {
        let index = self.index_of_slot(slot);
        let factor = schedule.attraction.powi(4) * Self::ATTRACTION_SCALE;
        let mut attraction = 0.0;
        for (&n, &w) in &self.neighbors[slot] {
            let mut d = pos.distance_squared(records[n].position);
            if stage.quartic_attraction() {
                d *= d;
            }
            attraction += w * factor * d;
        }
        attraction + grid.at_excluding(pos, index, records[index].inserted_at)
    }
}
