//! Sessions
//!
//! Component arena, client protocol, turn loop and the per-session actor.

mod actor;
mod arena;
mod protocol;
mod replay;
mod state;

pub use actor::*;
pub use arena::*;
pub use protocol::*;
pub use replay::*;
pub use state::*;
