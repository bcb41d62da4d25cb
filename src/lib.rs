//! Multi-agent path finding on a d-dimensional discretized grid: Space-Time
//! A* for a single agent, Conflict-Based Search (and its bounded-suboptimal
//! ECBS sibling) coordinating many. Grounded on the `mapf_rust` solver
//! family's module layout (`map.rs`, `algorithm/astar.rs`, `solver/cbs.rs`,
//! `solver/ecbs.rs`), generalized from a 2-D, file-loaded map to a
//! d-dimensional world built programmatically by the caller.

mod cbs;
mod constraint;
mod ecbs;
mod error;
mod lowlevel;
mod stats;
mod world;

pub use cbs::Cbs;
pub use constraint::{Conflict, Constraint, Path};
pub use ecbs::EcbsSolver;
pub use error::{MapfError, Result};
pub use lowlevel::LowPlanner;
pub use stats::Stats;
pub use world::{Cell, World};
