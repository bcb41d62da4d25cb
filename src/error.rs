use thiserror::Error;

/// Closed set of input-validation failures raised by constructors.
///
/// Search failures (an unsolvable scenario) are never represented here —
/// those are values (`None`), not errors. See `LowPlanner::plan` / `Cbs::plan`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MapfError {
    #[error("cell {cell:?} has {actual} coordinates, expected {expected}")]
    DimensionMismatch {
        cell: Vec<i64>,
        expected: usize,
        actual: usize,
    },
    #[error("cell {cell:?} lies outside the world bounds {space_limit:?}")]
    OutOfBounds {
        cell: Vec<i64>,
        space_limit: Vec<i64>,
    },
    #[error("starts and goals have different lengths: {starts} != {goals}")]
    LengthMismatch { starts: usize, goals: usize },
}

pub type Result<T> = std::result::Result<T, MapfError>;
