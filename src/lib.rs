//! TreeGrid Library
//!
//! Server-side data layer for lazily loaded, scrollable grids and tree
//! grids: key mapping, hierarchy-to-flat-index mapping, paged fetching with
//! a bounded cache window, selection, sorting, and per-session actors that
//! serialize all access to a client's components.

pub mod communication;
pub mod config;
pub mod constants;
pub mod data;
pub mod error;
pub mod grid;
pub mod selection;
pub mod session;

pub use error::{Error, Result};
