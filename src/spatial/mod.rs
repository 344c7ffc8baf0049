//! Spatial indexing

pub mod grid_index;

pub use grid_index::{Cell, CellQuery, GridIndex};
