//! Data Layer
//!
//! Item identity, the query contract and the provider implementations the
//! communication layer consumes.

mod change;
mod item;
mod provider;
mod query;
mod tree_data;

pub use change::*;
pub use item::*;
pub use provider::*;
pub use query::*;
pub use tree_data::*;
