//! Data Communication
//!
//! Key mapping, flat/hierarchy mapping and the client update protocol.

mod data_communicator;
mod data_source;
mod hierarchy_mapper;
mod key_mapper;
mod row_pipeline;
mod update;

pub use data_communicator::*;
pub use data_source::*;
pub use hierarchy_mapper::*;
pub use key_mapper::*;
pub use row_pipeline::*;
pub use update::*;
