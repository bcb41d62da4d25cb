use std::collections::HashSet;

use tracing::debug;

use crate::error::{MapfError, Result};

/// A point in the d-dimensional integer lattice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cell(pub Vec<i64>);

impl Cell {
    pub fn new(coords: impl Into<Vec<i64>>) -> Self {
        Cell(coords.into())
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    /// Manhattan distance, used as the A* heuristic (spec.md §4.2).
    pub fn manhattan(&self, other: &Cell) -> i64 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b).abs())
            .sum()
    }

    fn step(&self, axis: usize, delta: i64) -> Cell {
        let mut coords = self.0.clone();
        coords[axis] += delta;
        Cell(coords)
    }
}

/// Immutable description of the grid: dimension, per-axis extents, static
/// obstacles and time-windowed dynamic obstacles.
///
/// Grounded on `map.rs::Map`, generalized from a 2-D tile grid loaded from a
/// file to a d-dimensional world built programmatically by the caller — this
/// crate has no file format of its own (spec.md §1: YAML/scenario loading is
/// an external collaborator).
#[derive(Debug, Clone)]
pub struct World {
    pub dimension: usize,
    pub space_limit: Vec<i64>,
    pub static_obstacles: HashSet<Cell>,
    pub dynamic_obstacles: Vec<(Cell, (i64, i64))>,
}

impl World {
    pub fn new(
        dimension: usize,
        space_limit: Vec<i64>,
        static_obstacles: impl IntoIterator<Item = Cell>,
        dynamic_obstacles: impl IntoIterator<Item = (Cell, (i64, i64))>,
    ) -> Result<Self> {
        if space_limit.len() != dimension {
            return Err(MapfError::DimensionMismatch {
                cell: space_limit.clone(),
                expected: dimension,
                actual: space_limit.len(),
            });
        }

        let static_obstacles: HashSet<Cell> = static_obstacles.into_iter().collect();
        let dynamic_obstacles: Vec<(Cell, (i64, i64))> = dynamic_obstacles.into_iter().collect();

        let world = World {
            dimension,
            space_limit,
            static_obstacles,
            dynamic_obstacles,
        };

        for cell in &world.static_obstacles {
            world.validate_point(cell)?;
        }
        for (cell, (t_start, t_end)) in &world.dynamic_obstacles {
            world.validate_point(cell)?;
            debug_assert!(t_start <= t_end, "dynamic obstacle window must be ordered");
            let _ = (t_start, t_end);
        }

        debug!(
            dimension = world.dimension,
            static_obstacles = world.static_obstacles.len(),
            dynamic_obstacles = world.dynamic_obstacles.len(),
            "constructed world"
        );

        Ok(world)
    }

    /// Fails with `DimensionMismatch` if `cell` has the wrong arity, or
    /// `OutOfBounds` if it lies outside `[0, space_limit_k)` on any axis.
    pub fn validate_point(&self, cell: &Cell) -> Result<()> {
        if cell.dim() != self.dimension {
            return Err(MapfError::DimensionMismatch {
                cell: cell.0.clone(),
                expected: self.dimension,
                actual: cell.dim(),
            });
        }
        if !self.in_bounds(cell) {
            return Err(MapfError::OutOfBounds {
                cell: cell.0.clone(),
                space_limit: self.space_limit.clone(),
            });
        }
        Ok(())
    }

    pub fn in_bounds(&self, cell: &Cell) -> bool {
        cell.0.len() == self.dimension
            && cell
                .0
                .iter()
                .zip(self.space_limit.iter())
                .all(|(&c, &limit)| c >= 0 && c < limit)
    }

    pub fn is_dynamically_blocked(&self, cell: &Cell, t: i64) -> bool {
        self.dynamic_obstacles
            .iter()
            .any(|(c, (a, b))| c == cell && *a <= t && t <= *b)
    }

    /// `cell` itself (wait) plus every unit-axis-aligned move that stays in
    /// bounds and is not a static obstacle. Emission order is fixed — axis 0
    /// decreasing, axis 0 increasing, axis 1 decreasing, ... then the wait —
    /// so that open-list ties resolve reproducibly (spec.md §4.1).
    pub fn neighbours(&self, cell: &Cell) -> Vec<Cell> {
        let mut out = Vec::with_capacity(2 * self.dimension + 1);
        for axis in 0..self.dimension {
            for delta in [-1i64, 1i64] {
                let candidate = cell.step(axis, delta);
                if self.in_bounds(&candidate) && !self.static_obstacles.contains(&candidate) {
                    out.push(candidate);
                }
            }
        }
        out.push(cell.clone());
        out
    }
}
