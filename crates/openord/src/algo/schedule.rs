//! Annealing schedule: the stage state machine, its per-stage parameter table and the
//! edge-cut heuristic's tightening thresholds.

use std::time::{Duration, Instant};

/// One phase of the annealing process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Stage {
    Liquid,
    Expansion,
    Cooldown,
    Crunch,
    Simmer,
    Done,
}

impl Stage {
    pub fn successor(self) -> Stage {
        match self {
            Stage::Liquid => Stage::Expansion,
            Stage::Expansion => Stage::Cooldown,
            Stage::Cooldown => Stage::Crunch,
            Stage::Crunch => Stage::Simmer,
            Stage::Simmer | Stage::Done => Stage::Done,
        }
    }

    pub fn is_done(self) -> bool {
        self == Stage::Done
    }

    /// Only the final polishing stage pays for exact short-range density.
    pub fn uses_fine_density(self) -> bool {
        self == Stage::Simmer
    }

    /// Liquid penalizes long edges with the fourth power of their length instead of the square.
    pub fn quartic_attraction(self) -> bool {
        self == Stage::Liquid
    }

    /// Stage that runs the next tick after `elapsed` iterations were spent in `self`.
    ///
    /// Stages configured with zero iterations are skipped.
    pub fn transition(self, elapsed: usize, table: &StageTable) -> Stage {
        let mut stage = self;
        let mut elapsed = elapsed;
        while let Some(params) = table.params(stage) {
            if elapsed < params.iterations {
                break;
            }
            stage = stage.successor();
            elapsed = 0;
        }
        stage
    }

    /// First stage with a non-empty budget.
    pub fn initial(table: &StageTable) -> Stage {
        Stage::Liquid.transition(0, table)
    }
}

/// Starting parameters of a stage.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StageParams {
    pub iterations: usize,
    pub temperature: f64,
    pub attraction: f64,
    pub damping: f64,
}

impl StageParams {
    pub const fn new(iterations: usize, temperature: f64, attraction: f64, damping: f64) -> Self {
        Self {
            iterations,
            temperature,
            attraction,
            damping,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct StageTable {
    pub liquid: StageParams,
    pub expansion: StageParams,
    pub cooldown: StageParams,
    pub crunch: StageParams,
    pub simmer: StageParams,
}

impl Default for StageTable {
    fn default() -> Self {
        Self {
            liquid: StageParams::new(200, 2000.0, 2.0, 1.0),
            expansion: StageParams::new(200, 2000.0, 10.0, 1.0),
            cooldown: StageParams::new(200, 2000.0, 1.0, 0.1),
            crunch: StageParams::new(50, 250.0, 1.0, 0.25),
            simmer: StageParams::new(100, 250.0, 0.5, 0.0),
        }
    }
}

impl StageTable {
    pub fn params(&self, stage: Stage) -> Option<&StageParams> {
        match stage {
            Stage::Liquid => Some(&self.liquid),
            Stage::Expansion => Some(&self.expansion),
            Stage::Cooldown => Some(&self.cooldown),
            Stage::Crunch => Some(&self.crunch),
            Stage::Simmer => Some(&self.simmer),
            Stage::Done => None,
        }
    }

    /// Number of ticks a full run takes.
    pub fn total_iterations(&self) -> usize {
        [
            &self.liquid,
            &self.expansion,
            &self.cooldown,
            &self.crunch,
            &self.simmer,
        ]
        .iter()
        .map(|p| p.iterations)
        .sum()
    }

    pub fn validate(&self) -> crate::Result<()> {
        for p in [
            &self.liquid,
            &self.expansion,
            &self.cooldown,
            &self.crunch,
            &self.simmer,
        ] {
            let finite =
                p.temperature.is_finite() && p.attraction.is_finite() && p.damping.is_finite();
            if !finite || p.temperature < 0.0 || p.attraction < 0.0 {
                return Err(crate::Error::InvalidOptions(format!(
                    "stage parameters must be finite and non-negative: {p:?}"
                )));
            }
            if !(0.0..=1.0).contains(&p.damping) {
                return Err(crate::Error::InvalidOptions(format!(
                    "stage damping must lie in [0, 1]: {p:?}"
                )));
            }
        }
        Ok(())
    }
}

/// Mutable state of the running stage.
#[derive(Debug, Clone)]
pub struct LayoutSchedule {
    pub iteration: usize,
    pub temperature: f64,
    pub attraction: f64,
    pub damping: f64,
    /// Wall time spent in this stage so far.
    pub elapsed: Duration,
}

impl LayoutSchedule {
    fn from_params(params: Option<&StageParams>) -> Self {
        let p = params.copied().unwrap_or(StageParams::new(0, 0.0, 0.0, 0.0));
        Self {
            iteration: 0,
            temperature: p.temperature,
            attraction: p.attraction,
            damping: p.damping,
            elapsed: Duration::ZERO,
        }
    }
}

/// Long-edge pruning thresholds.
///
/// Tightens monotonically over the run; `min_edges == None` disables pruning.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeCuts {
    pub min_edges: Option<f64>,
    pub cut_off_length: f64,
    pub cut_end: f64,
    pub cut_rate: f64,
}

impl EdgeCuts {
    const INITIAL_MIN_EDGES: f64 = 20.0;
    const EXPANSION_MIN_EDGES: f64 = 12.0;
    const COOLDOWN_MIN_EDGES: f64 = 1.0;
    /// Ticks over which the cutoff shrinks from its start to its end value.
    const CUT_SPAN: f64 = 400.0;

    /// `edge_cut` in `[0, 1]`: 0 never prunes, 1 prunes most aggressively.
    pub fn new(edge_cut: f64, view_size: f64) -> Self {
        let cut_end = (10.0 * view_size * (1.0 - edge_cut)).max(1.0);
        let cut_start = 4.0 * cut_end;
        Self {
            min_edges: (edge_cut > 0.0).then_some(Self::INITIAL_MIN_EDGES),
            cut_off_length: cut_start,
            cut_end,
            cut_rate: (cut_start - cut_end) / Self::CUT_SPAN,
        }
    }

    pub fn enabled(&self) -> bool {
        self.min_edges.is_some()
    }
}

/// A stage change reported by [`Scheduler::advance`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageChange {
    pub from: Stage,
    pub to: Stage,
    pub elapsed: Duration,
}

/// Per-worker finite-state annealer.
#[derive(Debug, Clone)]
pub struct Scheduler {
    table: StageTable,
    stage: Stage,
    schedule: LayoutSchedule,
    cuts: EdgeCuts,
    tick_started: Option<Instant>,
}

impl Scheduler {
    const EXPANSION_ATTRACTION_FLOOR: f64 = 1.0;
    const EXPANSION_ATTRACTION_STEP: f64 = 0.05;
    const EXPANSION_MIN_EDGES_STEP: f64 = 0.05;
    const EXPANSION_DAMPING_FLOOR: f64 = 0.1;
    const EXPANSION_DAMPING_STEP: f64 = 0.005;
    const COOLDOWN_TEMPERATURE_FLOOR: f64 = 50.0;
    const COOLDOWN_TEMPERATURE_STEP: f64 = 10.0;
    const COOLDOWN_MIN_EDGES_STEP: f64 = 0.2;
    const SIMMER_TEMPERATURE_FLOOR: f64 = 50.0;
    const SIMMER_TEMPERATURE_STEP: f64 = 2.0;

    pub fn new(table: StageTable, cuts: EdgeCuts) -> Self {
        let stage = Stage::initial(&table);
        let schedule = LayoutSchedule::from_params(table.params(stage));
        let mut scheduler = Self {
            table,
            stage,
            schedule,
            cuts,
            tick_started: None,
        };
        scheduler.enter_stage(stage);
        scheduler
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn schedule(&self) -> &LayoutSchedule {
        &self.schedule
    }

    pub fn cuts(&self) -> &EdgeCuts {
        &self.cuts
    }

    pub fn table(&self) -> &StageTable {
        &self.table
    }

    pub(crate) fn begin_tick(&mut self) {
        self.tick_started = Some(Instant::now());
    }

    /// Close the tick that just ran: decay the stage's parameters and move to the next stage
    /// once the iteration budget is spent.
    pub fn advance(&mut self) -> Option<StageChange> {
        if self.stage.is_done() {
            return None;
        }
        if let Some(started) = self.tick_started.take() {
            self.schedule.elapsed += started.elapsed();
        }
        self.schedule.iteration += 1;
        self.decay();

        let next = self.stage.transition(self.schedule.iteration, &self.table);
        if next == self.stage {
            return None;
        }
        let change = StageChange {
            from: self.stage,
            to: next,
            elapsed: self.schedule.elapsed,
        };
        self.enter_stage(next);
        Some(change)
    }

    fn decay(&mut self) {
        let s = &mut self.schedule;
        let c = &mut self.cuts;
        match self.stage {
            Stage::Expansion => {
                if s.attraction > Self::EXPANSION_ATTRACTION_FLOOR {
                    s.attraction -= Self::EXPANSION_ATTRACTION_STEP;
                }
                if let Some(min_edges) = c.min_edges.as_mut() {
                    if *min_edges > EdgeCuts::EXPANSION_MIN_EDGES {
                        *min_edges -= Self::EXPANSION_MIN_EDGES_STEP;
                    }
                }
                c.cut_off_length = (c.cut_off_length - c.cut_rate).max(c.cut_end);
                if s.damping > Self::EXPANSION_DAMPING_FLOOR {
                    s.damping -= Self::EXPANSION_DAMPING_STEP;
                }
            }
            Stage::Cooldown => {
                if s.temperature > Self::COOLDOWN_TEMPERATURE_FLOOR {
                    s.temperature -= Self::COOLDOWN_TEMPERATURE_STEP;
                }
                if c.cut_off_length > c.cut_end {
                    c.cut_off_length = (c.cut_off_length - 2.0 * c.cut_rate).max(c.cut_end);
                }
                if let Some(min_edges) = c.min_edges.as_mut() {
                    if *min_edges > EdgeCuts::COOLDOWN_MIN_EDGES {
                        *min_edges -= Self::COOLDOWN_MIN_EDGES_STEP;
                    }
                }
            }
            Stage::Simmer => {
                if s.temperature > Self::SIMMER_TEMPERATURE_FLOOR {
                    s.temperature -= Self::SIMMER_TEMPERATURE_STEP;
                }
            }
            Stage::Liquid | Stage::Crunch | Stage::Done => {}
        }
    }

    fn enter_stage(&mut self, stage: Stage) {
        self.stage = stage;
        self.schedule = LayoutSchedule::from_params(self.table.params(stage));
        match stage {
            Stage::Cooldown => {
                if let Some(min_edges) = self.cuts.min_edges.as_mut() {
                    *min_edges = min_edges.min(EdgeCuts::EXPANSION_MIN_EDGES);
                }
            }
            Stage::Crunch | Stage::Simmer | Stage::Done => {
                self.cuts.cut_off_length = self.cuts.cut_end;
                self.cuts.min_edges = None;
            }
            Stage::Liquid | Stage::Expansion => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_runs_750_ticks() {
        assert_eq!(StageTable::default().total_iterations(), 750);
    }

    #[test]
    fn transition_is_pure_and_follows_stage_order() {
        let table = StageTable::default();
        assert_eq!(Stage::Liquid.transition(0, &table), Stage::Liquid);
        assert_eq!(Stage::Liquid.transition(199, &table), Stage::Liquid);
        assert_eq!(Stage::Liquid.transition(200, &table), Stage::Expansion);
        assert_eq!(Stage::Expansion.transition(200, &table), Stage::Cooldown);
        assert_eq!(Stage::Cooldown.transition(200, &table), Stage::Crunch);
        assert_eq!(Stage::Crunch.transition(49, &table), Stage::Crunch);
        assert_eq!(Stage::Crunch.transition(50, &table), Stage::Simmer);
        assert_eq!(Stage::Simmer.transition(100, &table), Stage::Done);
        assert_eq!(Stage::Done.transition(0, &table), Stage::Done);
    }

    #[test]
    fn transition_skips_empty_stages() {
        let mut table = StageTable::default();
        table.liquid.iterations = 0;
        table.crunch.iterations = 0;
        assert_eq!(Stage::initial(&table), Stage::Expansion);
        assert_eq!(Stage::Cooldown.transition(200, &table), Stage::Simmer);

        let empty = StageTable {
            liquid: StageParams::new(0, 0.0, 0.0, 0.0),
            expansion: StageParams::new(0, 0.0, 0.0, 0.0),
            cooldown: StageParams::new(0, 0.0, 0.0, 0.0),
            crunch: StageParams::new(0, 0.0, 0.0, 0.0),
            simmer: StageParams::new(0, 0.0, 0.0, 0.0),
        };
        assert_eq!(Stage::initial(&empty), Stage::Done);
    }

    #[test]
    fn scheduler_reaches_done_after_total_iterations() {
        let table = StageTable::default();
        let total = table.total_iterations();
        let mut s = Scheduler::new(table, EdgeCuts::new(0.8, 4000.0));
        let mut stages = vec![s.stage()];
        for _ in 0..total {
            assert!(!s.stage().is_done());
            if let Some(change) = s.advance() {
                stages.push(change.to);
            }
        }
        assert!(s.stage().is_done());
        assert_eq!(
            stages,
            vec![
                Stage::Liquid,
                Stage::Expansion,
                Stage::Cooldown,
                Stage::Crunch,
                Stage::Simmer,
                Stage::Done
            ]
        );
        assert_eq!(s.advance(), None);
    }

    #[test]
    fn stage_change_reports_time_spent_in_the_stage() {
        let mut table = StageTable::default();
        table.liquid.iterations = 2;
        let mut s = Scheduler::new(table, EdgeCuts::new(0.8, 4000.0));
        s.begin_tick();
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(s.advance(), None);
        let spent = s.schedule().elapsed;
        assert!(spent >= Duration::from_millis(2));

        s.begin_tick();
        let change = s.advance().expect("liquid finished");
        assert_eq!(change.to, Stage::Expansion);
        assert!(change.elapsed >= spent);
        assert_eq!(s.schedule().elapsed, Duration::ZERO);
        // Ticks without `begin_tick` count iterations but no time.
        s.advance();
        assert_eq!(s.schedule().elapsed, Duration::ZERO);
    }

    #[test]
    fn expansion_decays_toward_floors() {
        let table = StageTable::default();
        let mut s = Scheduler::new(table, EdgeCuts::new(0.8, 4000.0));
        for _ in 0..200 {
            s.advance();
        }
        assert_eq!(s.stage(), Stage::Expansion);
        let start_cut = s.cuts().cut_off_length;
        for _ in 0..199 {
            s.advance();
        }
        assert_eq!(s.stage(), Stage::Expansion);
        assert!(s.schedule().attraction <= 1.0 + 1e-9);
        assert!(s.schedule().damping <= 0.1 + 1e-9);
        assert!(s.cuts().cut_off_length < start_cut);
        let min_edges = s.cuts().min_edges.expect("pruning enabled");
        assert!(min_edges < 20.0 && min_edges > 11.9);
    }

    #[test]
    fn cooldown_cools_and_tightens_cuts() {
        let mut s = Scheduler::new(StageTable::default(), EdgeCuts::new(0.8, 4000.0));
        for _ in 0..400 {
            s.advance();
        }
        assert_eq!(s.stage(), Stage::Cooldown);
        assert_eq!(s.schedule().temperature, 2000.0);
        for _ in 0..199 {
            s.advance();
        }
        assert!((s.schedule().temperature - 50.0).abs() < 1e-9);
        assert!((s.cuts().cut_off_length - s.cuts().cut_end).abs() < 1e-9);
        let min_edges = s.cuts().min_edges.expect("pruning enabled");
        assert!(min_edges <= 1.0 + 1e-9);
    }

    #[test]
    fn crunch_disables_pruning_and_simmer_uses_fine_density() {
        let mut s = Scheduler::new(StageTable::default(), EdgeCuts::new(0.8, 4000.0));
        for _ in 0..600 {
            s.advance();
        }
        assert_eq!(s.stage(), Stage::Crunch);
        assert!(!s.cuts().enabled());
        for _ in 0..50 {
            s.advance();
        }
        assert_eq!(s.stage(), Stage::Simmer);
        assert!(s.stage().uses_fine_density());
        assert_eq!(s.schedule().temperature, 250.0);
    }

    #[test]
    fn zero_edge_cut_never_prunes() {
        let cuts = EdgeCuts::new(0.0, 4000.0);
        assert!(!cuts.enabled());
        let cuts = EdgeCuts::new(0.8, 4000.0);
        assert!((cuts.cut_end - 8000.0).abs() < 1e-9);
        assert!((cuts.cut_off_length - 32000.0).abs() < 1e-9);
        assert!((cuts.cut_rate - 60.0).abs() < 1e-9);
    }

    #[test]
    fn invalid_damping_is_rejected() {
        let mut table = StageTable::default();
        table.cooldown.damping = 1.5;
        assert!(table.validate().is_err());
        assert!(StageTable::default().validate().is_ok());
    }
}
