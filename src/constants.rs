//! Data Layer Constants
//!
//! Centralized defaults shared by configuration and components.

/// Rows fetched per page and buffered on each side of the viewport
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Initial assumed row count for providers that cannot count
pub const DEFAULT_SIZE_ESTIMATE: usize = 200;

/// Growth step for the assumed row count when scrolling near its end
pub const DEFAULT_SIZE_ESTIMATE_INCREASE: usize = 200;

/// Batches kept per component for client resynchronization
pub const DEFAULT_REPLAY_BUFFER: usize = 16;

/// Maximum client messages drained from the mailbox in one session turn
pub const DEFAULT_MAILBOX_BATCH: usize = 64;

/// Default log directive
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Config file name inside the platform config directory
pub const CONFIG_FILE_NAME: &str = "treegrid.toml";

/// Upper bound for hierarchy resolution passes in a single operation.
///
/// Each pass resolves at least one pending subtree or loads at least one
/// page, so hitting this means the provider keeps changing under us.
pub const MAX_RESOLVE_PASSES: usize = 10_000;
