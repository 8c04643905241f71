//! Grid Components
//!
//! Columns, events and the grid component itself.

mod column;
mod data_grid;
mod events;

pub use column::*;
pub use data_grid::*;
pub use events::*;
