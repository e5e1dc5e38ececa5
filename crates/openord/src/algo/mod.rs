pub mod density;
pub mod description;
pub mod layout;
pub mod schedule;
pub mod worker;

use crate::error::{Error, Result};
pub use schedule::{StageParams, StageTable};

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct OpenOrdOptions {
    /// Seed of the top-level stream every worker's stream is derived from.
    pub random_seed: u64,
    /// Number of partitions. Node `i` is written by worker `i % workers`.
    pub workers: usize,
    /// Edge-cutting strength in `[0, 1]`. 0 keeps every edge.
    pub edge_cut: f64,
    pub stages: StageTable,
    pub grid: GridConfig,
    /// Ticks during which pinned nodes stay put. `None` pins them for the whole run.
    pub freeze_ticks: Option<usize>,
}

impl Default for OpenOrdOptions {
    fn default() -> Self {
        Self {
            random_seed: 0,
            workers: 1,
            edge_cut: 0.8,
            stages: StageTable::default(),
            grid: GridConfig::default(),
            freeze_ticks: None,
        }
    }
}

impl OpenOrdOptions {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::InvalidOptions("workers must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.edge_cut) {
            return Err(Error::InvalidOptions(format!(
                "edge_cut must lie in [0, 1], got {}",
                self.edge_cut
            )));
        }
        self.stages.validate()?;
        self.grid.validate()
    }
}

/// Sizing of the density grid's square viewport.
///
/// The viewport is centered on the origin and spans `view_size` layout units per side, split
/// into `grid_size` cells per side.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct GridConfig {
    pub grid_size: usize,
    pub view_size: f64,
    /// Half-width, in cells, of the coarse falloff kernel.
    pub radius: usize,
    /// Cells along each edge that report the boundary density.
    pub boundary: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            grid_size: 1000,
            view_size: 4000.0,
            radius: 10,
            boundary: 10,
        }
    }
}

impl GridConfig {
    pub fn validate(&self) -> Result<()> {
        if self.grid_size == 0 || self.radius == 0 || self.boundary == 0 {
            return Err(Error::InvalidOptions(
                "grid_size, radius and boundary must be positive".to_string(),
            ));
        }
        if !self.view_size.is_finite() || self.view_size <= 0.0 {
            return Err(Error::InvalidOptions(format!(
                "view_size must be positive, got {}",
                self.view_size
            )));
        }
        if 2 * self.boundary >= self.grid_size {
            return Err(Error::InvalidOptions(format!(
                "boundary {} leaves no interior in a {}-cell grid",
                self.boundary, self.grid_size
            )));
        }
        Ok(())
    }

    pub fn view_to_grid(&self) -> f64 {
        self.grid_size as f64 / self.view_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        OpenOrdOptions::default().validate().expect("valid defaults");
    }

    #[test]
    fn zero_workers_is_rejected() {
        let opts = OpenOrdOptions {
            workers: 0,
            ..Default::default()
        };
        assert!(matches!(opts.validate(), Err(Error::InvalidOptions(_))));
    }

    #[test]
    fn edge_cut_outside_unit_range_is_rejected() {
        for edge_cut in [-0.1, 1.5, f64::NAN] {
            let opts = OpenOrdOptions {
                edge_cut,
                ..Default::default()
            };
            assert!(opts.validate().is_err(), "edge_cut={edge_cut}");
        }
    }

    #[test]
    fn grid_without_interior_is_rejected() {
        let grid = GridConfig {
            grid_size: 20,
            boundary: 10,
            ..Default::default()
        };
        assert!(grid.validate().is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn options_deserialize_with_partial_overrides() {
        let opts: OpenOrdOptions = serde_json::from_value(serde_json::json!({
            "random_seed": 9,
            "workers": 4,
            "stages": { "simmer": { "iterations": 10, "temperature": 100.0, "attraction": 0.5, "damping": 0.0 } },
            "grid": { "view_size": 8000.0 }
        }))
        .expect("options");
        assert_eq!(opts.random_seed, 9);
        assert_eq!(opts.workers, 4);
        assert_eq!(opts.stages.simmer.iterations, 10);
        assert_eq!(opts.stages.liquid, StageTable::default().liquid);
        assert_eq!(opts.grid.grid_size, 1000);
        assert_eq!(opts.grid.view_size, 8000.0);
        assert_eq!(opts.edge_cut, 0.8);
    }
}
