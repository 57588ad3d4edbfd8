//! Grid construction and capital planning.

pub mod builder;
pub mod planner;

pub use builder::{build, GridLevel, MAX_GRID_LEVELS};
pub use planner::{plan, CapitalPlan};
