//! Dual-resolution density field used as the repulsion term.
//!
//! Coarse mode splats a triangular kernel over a window of cells around each node and reads
//! back the squared cell value. Fine mode keeps per-cell FIFO queues of residents and sums a
//! softened inverse-square potential over the 3x3 neighborhood of the query.

use crate::algo::GridConfig;
use crate::error::{Error, Result};
use crate::graph::Point;
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DensityMode {
    Coarse,
    Fine,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Resident {
    index: usize,
    position: Point,
}

#[derive(Debug, Clone)]
pub struct DensityGrid {
    size: usize,
    radius: usize,
    boundary: usize,
    half_view: f64,
    view_to_grid: f64,
    /// `(2r + 1)^2` kernel, row-major.
    fall_off: Vec<f64>,
    /// `size^2` cells, row-major (`y * size + x`).
    density: Vec<f64>,
    bins: FxHashMap<usize, VecDeque<Resident>>,
    mode: DensityMode,
    residents: usize,
}

impl DensityGrid {
    /// Reported for positions inside the boundary margin.
    pub const BOUNDARY_DENSITY: f64 = 10_000.0;
    const FINE_STRENGTH: f64 = 1e-4;
    const FINE_SOFTENING: f64 = 1e-50;

    pub fn new(config: &GridConfig) -> Result<Self> {
        config.validate()?;
        let size = config.grid_size;
        let radius = config.radius;
        let diam = 2 * radius + 1;
        let r = radius as f64;
        let mut fall_off = Vec::with_capacity(diam * diam);
        for i in -(radius as i64)..=(radius as i64) {
            for j in -(radius as i64)..=(radius as i64) {
                let fy = (r - (i as f64).abs()) / r;
                let fx = (r - (j as f64).abs()) / r;
                fall_off.push(fy * fx);
            }
        }
        Ok(Self {
            size,
            radius,
            boundary: config.boundary,
            half_view: config.view_size / 2.0,
            view_to_grid: config.view_to_grid(),
            fall_off,
            density: vec![0.0; size * size],
            bins: FxHashMap::default(),
            mode: DensityMode::Coarse,
            residents: 0,
        })
    }

    pub fn mode(&self) -> DensityMode {
        self.mode
    }

    /// Number of nodes currently added.
    pub fn residents(&self) -> usize {
        self.residents
    }

    /// Cell index along one axis, or `None` when `v` maps outside the backing array.
    ///
    /// The range check happens in `f64` so huge or non-finite coordinates never reach the cast.
    fn cell_coord(&self, v: f64) -> Option<i64> {
        let c = ((v + self.half_view + 0.5) * self.view_to_grid).floor();
        (c >= 0.0 && c < self.size as f64).then_some(c as i64)
    }

    fn cell_of(&self, pos: Point) -> Option<(i64, i64)> {
        Some((self.cell_coord(pos.x)?, self.cell_coord(pos.y)?))
    }

    fn in_boundary_margin(&self, cx: i64, cy: i64) -> bool {
        let lo = self.boundary as i64;
        let hi = (self.size - self.boundary) as i64;
        cx < lo || cx >= hi || cy < lo || cy >= hi
    }

    fn kernel_at(&self, dx: i64, dy: i64) -> f64 {
        let r = self.radius as i64;
        if dx.abs() > r || dy.abs() > r {
            return 0.0;
        }
        let diam = 2 * r + 1;
        self.fall_off[((dy + r) * diam + (dx + r)) as usize]
    }

    /// Fails when `pos` cannot be added in the current mode without leaving the backing array.
    pub fn ensure_addressable(&self, pos: Point) -> Result<()> {
        self.addressable_cell(pos).map(|_| ())
    }

    fn addressable_cell(&self, pos: Point) -> Result<(i64, i64)> {
        let outside = || Error::OutsideViewport { x: pos.x, y: pos.y };
        let (cx, cy) = self.cell_of(pos).ok_or_else(outside)?;
        let reach = match self.mode {
            DensityMode::Coarse => self.radius as i64,
            DensityMode::Fine => 0,
        };
        let size = self.size as i64;
        if cx - reach < 0 || cy - reach < 0 || cx + reach >= size || cy + reach >= size {
            return Err(outside());
        }
        Ok((cx, cy))
    }

    /// Density cost of occupying `pos`.
    pub fn at(&self, pos: Point) -> f64 {
        self.at_inner(pos, None)
    }

    /// Density cost of occupying `pos` for node `index`, ignoring that node's own contribution
    /// from its last insertion at `inserted_at`.
    pub fn at_excluding(&self, pos: Point, index: usize, inserted_at: Option<Point>) -> f64 {
        self.at_inner(pos, inserted_at.map(|p| (index, p)))
    }

    fn at_inner(&self, pos: Point, exclude: Option<(usize, Point)>) -> f64 {
        let Some((cx, cy)) = self.cell_of(pos) else {
            return Self::BOUNDARY_DENSITY;
        };
        if self.in_boundary_margin(cx, cy) {
            return Self::BOUNDARY_DENSITY;
        }
        match self.mode {
            DensityMode::Coarse => {
                let mut d = self.density[cy as usize * self.size + cx as usize];
                if let Some((ox, oy)) = exclude.and_then(|(_, own)| self.cell_of(own)) {
                    d -= self.kernel_at(cx - ox, cy - oy);
                }
                d * d
            }
            DensityMode::Fine => {
                let skip = exclude.map(|(index, _)| index);
                let mut density = 0.0;
                let last = self.size as i64 - 1;
                for y in (cy - 1).max(0)..=(cy + 1).min(last) {
                    for x in (cx - 1).max(0)..=(cx + 1).min(last) {
                        let Some(bin) = self.bins.get(&(y as usize * self.size + x as usize))
                        else {
                            continue;
                        };
                        for r in bin.iter().filter(|r| Some(r.index) != skip) {
                            let d2 = pos.distance_squared(r.position);
                            density += Self::FINE_STRENGTH / (d2 + Self::FINE_SOFTENING);
                        }
                    }
                }
                density
            }
        }
    }

    pub fn add(&mut self, index: usize, pos: Point) -> Result<()> {
        let (cx, cy) = self.addressable_cell(pos)?;
        match self.mode {
            DensityMode::Coarse => self.splat(cx, cy, 1.0),
            DensityMode::Fine => {
                self.bins
                    .entry(cy as usize * self.size + cx as usize)
                    .or_default()
                    .push_back(Resident {
                        index,
                        position: pos,
                    });
            }
        }
        self.residents += 1;
        Ok(())
    }

    /// Undo the `add` that placed `index` at `pos`.
    ///
    /// In fine mode a node that is not resident in `pos`'s cell is left alone and the
    /// resident count is not touched.
    pub fn sub(&mut self, index: usize, pos: Point) -> Result<()> {
        let (cx, cy) = self.addressable_cell(pos)?;
        let removed = match self.mode {
            DensityMode::Coarse => {
                self.splat(cx, cy, -1.0);
                true
            }
            DensityMode::Fine => {
                let key = cy as usize * self.size + cx as usize;
                let mut removed = false;
                if let Some(bin) = self.bins.get_mut(&key) {
                    if let Some(at) = bin.iter().position(|r| r.index == index) {
                        bin.remove(at);
                        removed = true;
                    }
                    if bin.is_empty() {
                        self.bins.remove(&key);
                    }
                }
                removed
            }
        };
        if removed {
            self.residents = self.residents.saturating_sub(1);
        } else {
            tracing::warn!(index, x = pos.x, y = pos.y, "openord density sub missed resident");
        }
        Ok(())
    }

    fn splat(&mut self, cx: i64, cy: i64, sign: f64) {
        let diam = 2 * self.radius + 1;
        let x0 = (cx - self.radius as i64) as usize;
        let y0 = (cy - self.radius as i64) as usize;
        for i in 0..diam {
            let row = (y0 + i) * self.size + x0;
            let kernel = &self.fall_off[i * diam..(i + 1) * diam];
            for (cell, k) in self.density[row..row + diam].iter_mut().zip(kernel) {
                *cell += sign * k;
            }
        }
    }

    /// Move every resident from the current representation to `mode`.
    pub fn switch_mode(
        &mut self,
        mode: DensityMode,
        residents: impl Iterator<Item = (usize, Point)> + Clone,
    ) -> Result<()> {
        if mode == self.mode {
            return Ok(());
        }
        // Validate against the target mode first so a failure leaves the grid untouched.
        let current = self.mode;
        self.mode = mode;
        let check = residents
            .clone()
            .try_for_each(|(_, p)| self.ensure_addressable(p));
        self.mode = current;
        check?;

        for (index, pos) in residents.clone() {
            self.sub(index, pos)?;
        }
        self.mode = mode;
        for (index, pos) in residents {
            self.add(index, pos)?;
        }
        Ok(())
    }
}
