//! # tb-grid
//!
//! Parameter grids for the task buffet.
//!
//! A grid is the ordered, addressable universe of tasks: task `i` is the
//! dictionary mapping every parameter name to its `i`-th value. Grids are
//! built either by zipping equal-length value lists (direct mode) or by
//! expanding the full Cartesian product of the lists.

mod grid;
mod request;

pub use grid::ParamGrid;
pub use request::GridRequest;
