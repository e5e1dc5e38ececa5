use crate::algo::OpenOrdOptions;
use crate::algo::density::{DensityGrid, DensityMode};
use crate::algo::description::Description;
use crate::algo::schedule::{EdgeCuts, Stage};
use crate::algo::worker::{NodeUpdate, Worker};
use crate::error::{Error, Result};
use crate::graph::{LayoutGraph, Point, PositionStore};
use crate::rng::XorShift64Star;

/// Drives `workers` annealers over one shared [`Description`].
///
/// Each [`Layout::step`] is one tick, split in two phases:
///
/// 1. compute: every worker proposes positions for the nodes it owns, reading only the
///    positions and density field as they stood when the tick began (workers run on the
///    rayon pool with the `parallel` feature);
/// 2. commit: the proposals are applied in worker order, moving each node in the shared
///    density grid.
///
/// Output depends only on `(graph, workers, random_seed)`, not on thread scheduling.
#[derive(Debug, Clone)]
pub struct Layout<N> {
    description: Description<N>,
    workers: Vec<Worker>,
    grid: DensityGrid,
    freeze_ticks: Option<usize>,
    ticks: usize,
    last_updates: Vec<NodeUpdate>,
}

impl<N> Layout<N>
where
    N: Clone + Eq + std::hash::Hash + std::fmt::Debug,
{
    pub fn new<G>(graph: &G, options: &OpenOrdOptions) -> Result<Self>
    where
        G: LayoutGraph<NodeId = N>,
    {
        options.validate()?;
        let description = Description::new(graph, options.workers)?;
        let grid = DensityGrid::new(&options.grid)?;

        let mut seeds = XorShift64Star::new(options.random_seed);
        let cuts = EdgeCuts::new(options.edge_cut, options.grid.view_size);
        let workers: Vec<Worker> = (0..options.workers)
            .map(|id| {
                Worker::new(
                    id,
                    &description,
                    seeds.fork_seed(),
                    options.stages.clone(),
                    cuts.clone(),
                )
            })
            .collect();

        tracing::debug!(
            nodes = description.len(),
            edges = description.edge_count(),
            workers = workers.len(),
            highest_weight = description.highest_weight(),
            total_ticks = options.stages.total_iterations(),
            "openord layout created"
        );

        Ok(Self {
            description,
            workers,
            grid,
            freeze_ticks: options.freeze_ticks,
            ticks: 0,
            last_updates: Vec::new(),
        })
    }

    pub fn description(&self) -> &Description<N> {
        &self.description
    }

    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    pub fn grid(&self) -> &DensityGrid {
        &self.grid
    }

    /// Ticks performed so far.
    pub fn ticks(&self) -> usize {
        self.ticks
    }

    /// Updates committed by the most recent tick, in worker order.
    pub fn last_updates(&self) -> &[NodeUpdate] {
        &self.last_updates
    }

    pub fn stage(&self) -> Stage {
        self.workers
            .iter()
            .map(Worker::stage)
            .find(|s| !s.is_done())
            .unwrap_or(Stage::Done)
    }

    pub fn is_done(&self) -> bool {
        self.description.is_empty() || self.workers.iter().all(|w| w.stage().is_done())
    }

    pub fn position(&self, id: &N) -> Option<Point> {
        let index = self.description.index_of(id)?;
        Some(self.description.records()[index].position)
    }

    pub fn positions(&self) -> impl Iterator<Item = (&N, Point)> + '_ {
        self.description
            .ids()
            .zip(self.description.records())
            .map(|(id, r)| (id, r.position))
    }

    /// Place `id` at `point`. Pinned (`fixed`) nodes hold still during the freeze window.
    pub fn seed_position(&mut self, id: &N, point: Point, fixed: bool) -> Result<()> {
        let index = self
            .description
            .index_of(id)
            .ok_or_else(|| Error::UnknownNode(format!("{id:?}")))?;
        self.seed_index(index, point, fixed)
    }

    /// Seed every node the store knows about. Seeded nodes are not pinned.
    pub fn seed_from(&mut self, store: &impl PositionStore<N>) -> Result<()> {
        let seeded: Vec<(usize, Point)> = self
            .description
            .ids()
            .enumerate()
            .filter_map(|(i, id)| store.get(id).map(|p| (i, p)))
            .collect();
        for (index, point) in seeded {
            self.seed_index(index, point, false)?;
        }
        Ok(())
    }

    pub fn write_to(&self, store: &mut impl PositionStore<N>) {
        for (id, point) in self.positions() {
            store.set(id.clone(), point);
        }
    }

    fn seed_index(&mut self, index: usize, point: Point, fixed: bool) -> Result<()> {
        let record = &mut self.description.records_mut()[index];
        if let Some(prev) = record.inserted_at {
            self.grid.ensure_addressable(point)?;
            self.grid.sub(index, prev)?;
            self.grid.add(index, point)?;
            record.inserted_at = Some(point);
        }
        record.position = point;
        record.fixed = fixed;
        Ok(())
    }

    /// Advance every worker by one tick. Returns whether any worker still has work left.
    ///
    /// An `Err` leaves positions and the density grid as they were before the call; the
    /// layout should be discarded.
    pub fn step(&mut self) -> Result<bool> {
        if self.is_done() {
            return Ok(false);
        }
        self.prime_grid()?;
        self.sync_density_mode()?;

        let pinned_frozen = self.freeze_ticks.is_none_or(|t| self.ticks < t);
        let records = self.description.records();
        let grid = &self.grid;

        #[cfg(feature = "parallel")]
        let proposals: Vec<Result<Vec<NodeUpdate>>> = {
            use rayon::prelude::*;
            self.workers
                .par_iter_mut()
                .map(|w| w.tick(records, grid, pinned_frozen))
                .collect()
        };
        #[cfg(not(feature = "parallel"))]
        let proposals: Vec<Result<Vec<NodeUpdate>>> = self
            .workers
            .iter_mut()
            .map(|w| w.tick(records, grid, pinned_frozen))
            .collect();

        let mut updates = Vec::with_capacity(self.description.len());
        for (worker, proposal) in proposals.into_iter().enumerate() {
            let proposal = proposal?;
            debug_assert!(
                proposal
                    .iter()
                    .all(|u| self.description.owner(u.index) == worker)
            );
            updates.extend(proposal);
        }

        self.commit(&updates)?;
        self.last_updates = updates;
        self.ticks += 1;
        Ok(!self.is_done())
    }

    /// Add every node that is not yet resident in the density grid.
    fn prime_grid(&mut self) -> Result<()> {
        let records = self.description.records();
        if records.iter().all(|r| r.inserted_at.is_some()) {
            return Ok(());
        }
        for r in records.iter().filter(|r| r.inserted_at.is_none()) {
            self.grid.ensure_addressable(r.position)?;
        }
        let grid = &mut self.grid;
        for (index, record) in self.description.records_mut().iter_mut().enumerate() {
            if record.inserted_at.is_none() {
                grid.add(index, record.position)?;
                record.inserted_at = Some(record.position);
            }
        }
        Ok(())
    }

    fn sync_density_mode(&mut self) -> Result<()> {
        let wanted = if self.stage().uses_fine_density() {
            DensityMode::Fine
        } else {
            DensityMode::Coarse
        };
        if self.grid.mode() == wanted {
            return Ok(());
        }
        tracing::debug!(mode = ?wanted, tick = self.ticks, "openord density mode switch");
        let residents = self
            .description
            .records()
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.inserted_at.map(|p| (i, p)));
        self.grid.switch_mode(wanted, residents)
    }

    fn commit(&mut self, updates: &[NodeUpdate]) -> Result<()> {
        let grid = &mut self.grid;
        let records = self.description.records_mut();
        for u in updates {
            let record = &mut records[u.index];
            if let Some(prev) = record.inserted_at {
                grid.sub(u.index, prev)?;
            }
            grid.add(u.index, u.position)?;
            record.position = u.position;
            record.inserted_at = Some(u.position);
            record.energy = u.energy;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algo::{GridConfig, StageParams, StageTable};
    use crate::graph::Graph;
    use std::collections::BTreeMap;

    fn pair() -> Graph {
        let mut g = Graph::default();
        g.add_node("a");
        g.add_node("b");
        g.add_edge("a", "b");
        g
    }

    fn short_table() -> StageTable {
        StageTable {
            liquid: StageParams::new(3, 2000.0, 2.0, 1.0),
            expansion: StageParams::new(3, 2000.0, 10.0, 1.0),
            cooldown: StageParams::new(3, 2000.0, 1.0, 0.1),
            crunch: StageParams::new(2, 250.0, 1.0, 0.25),
            simmer: StageParams::new(2, 250.0, 0.5, 0.0),
        }
    }

    #[test]
    fn empty_graph_is_done_before_the_first_tick() {
        let mut layout = Layout::new(&Graph::default(), &OpenOrdOptions::default()).unwrap();
        assert!(layout.is_done());
        assert!(!layout.step().unwrap());
        assert_eq!(layout.ticks(), 0);
        assert_eq!(layout.stage(), Stage::Done);
    }

    #[test]
    fn step_count_matches_the_stage_table() {
        let opts = OpenOrdOptions {
            stages: short_table(),
            ..Default::default()
        };
        let mut layout = Layout::new(&pair(), &opts).unwrap();
        let mut calls = 0;
        while layout.step().unwrap() {
            calls += 1;
        }
        assert_eq!(calls + 1, 13);
        assert_eq!(layout.ticks(), 13);
        assert!(!layout.step().unwrap());
        assert_eq!(layout.ticks(), 13);
    }

    #[test]
    fn grid_holds_one_entry_per_node() {
        let opts = OpenOrdOptions {
            stages: short_table(),
            workers: 2,
            ..Default::default()
        };
        let mut layout = Layout::new(&pair(), &opts).unwrap();
        assert_eq!(layout.grid().residents(), 0);
        layout.step().unwrap();
        assert_eq!(layout.grid().residents(), 2);
        while layout.step().unwrap() {}
        assert_eq!(layout.grid().residents(), 2);
        assert_eq!(layout.grid().mode(), DensityMode::Fine);
    }

    #[test]
    fn committed_energy_is_recorded_on_the_node() {
        let mut layout = Layout::new(&pair(), &OpenOrdOptions::default()).unwrap();
        layout.step().unwrap();
        for u in layout.last_updates() {
            let r = &layout.description().records()[u.index];
            assert_eq!(r.position, u.position);
            assert_eq!(r.energy, u.energy);
            assert_eq!(r.inserted_at, Some(u.position));
        }
    }

    #[test]
    fn seeding_unknown_node_fails() {
        let mut layout = Layout::new(&pair(), &OpenOrdOptions::default()).unwrap();
        let err = layout
            .seed_position(&"zzz".to_string(), Point::ORIGIN, false)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownNode(_)));
    }

    #[test]
    fn seeding_outside_the_viewport_fails_on_first_step() {
        let mut layout = Layout::new(&pair(), &OpenOrdOptions::default()).unwrap();
        layout
            .seed_position(&"a".to_string(), Point::new(10_000.0, 0.0), false)
            .unwrap();
        assert!(matches!(layout.step(), Err(Error::OutsideViewport { .. })));
        assert_eq!(layout.grid().residents(), 0);
    }

    #[test]
    fn reseeding_after_start_moves_the_grid_entry() {
        let mut layout = Layout::new(&pair(), &OpenOrdOptions::default()).unwrap();
        layout.step().unwrap();
        layout
            .seed_position(&"a".to_string(), Point::new(100.0, 100.0), true)
            .unwrap();
        assert_eq!(layout.grid().residents(), 2);
        assert_eq!(
            layout.position(&"a".to_string()),
            Some(Point::new(100.0, 100.0))
        );
    }

    #[test]
    fn pinned_node_is_released_after_the_freeze_window() {
        let opts = OpenOrdOptions {
            freeze_ticks: Some(2),
            ..Default::default()
        };
        let mut layout = Layout::new(&pair(), &opts).unwrap();
        let pin = Point::new(20.0, 20.0);
        layout.seed_position(&"a".to_string(), pin, true).unwrap();
        for _ in 0..2 {
            layout.step().unwrap();
            assert_eq!(layout.position(&"a".to_string()), Some(pin));
            assert_eq!(layout.last_updates()[0].rejected_energy, None);
        }
        layout.step().unwrap();
        assert!(layout.last_updates()[0].rejected_energy.is_some());
        assert!(layout.last_updates()[1].rejected_energy.is_some());
    }

    #[test]
    fn store_round_trip_seeds_and_writes_positions() {
        let mut store: BTreeMap<String, Point> = BTreeMap::new();
        store.insert("b".to_string(), Point::new(-30.0, 12.0));
        let mut layout = Layout::new(&pair(), &OpenOrdOptions::default()).unwrap();
        layout.seed_from(&store).unwrap();
        assert_eq!(
            layout.position(&"b".to_string()),
            Some(Point::new(-30.0, 12.0))
        );

        let mut out: BTreeMap<String, Point> = BTreeMap::new();
        layout.write_to(&mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(out["a"], Point::ORIGIN);
    }

    #[test]
    fn tiny_viewport_is_rejected_up_front() {
        let opts = OpenOrdOptions {
            grid: GridConfig {
                grid_size: 10,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            Layout::new(&pair(), &opts),
            Err(Error::InvalidOptions(_))
        ));
    }
}
