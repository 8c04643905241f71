//! Error types for the grid data layer
//!
//! Centralized error handling using snafu for ergonomic error definitions.
//! Client-originated failures (stale keys, unsupported selection calls) are
//! swallowed at the session boundary; programmatic misuse is returned to the
//! caller as-is.

use snafu::Snafu;

/// Main error type for the crate
#[derive(Debug, Snafu)]
pub enum Error {
    /// A key sent by the client is not (or no longer) mapped to an item
    #[snafu(display("Unknown key: {key}"))]
    UnknownKey { key: String },

    /// An item passed to the server API is not part of the current dataset
    #[snafu(display("Unknown item: {item}"))]
    UnknownItem { item: String },

    /// A DataProvider failed to fetch or count items
    #[snafu(display("Fetch failed: {message}"))]
    FetchFailure { message: String },

    /// Programming-contract violation
    #[snafu(display("Invalid state: {message}"))]
    InvalidState { message: String },

    /// Operation not available in the current mode or for the current provider
    #[snafu(display("Unsupported operation: {message}"))]
    UnsupportedOperation { message: String },

    /// IO error (config files)
    #[snafu(display("IO error: {source}"))]
    Io { source: std::io::Error },

    /// JSON serialization/deserialization error
    #[snafu(display("JSON error: {source}"))]
    Json { source: serde_json::Error },

    /// TOML deserialization error
    #[snafu(display("TOML parse error: {source}"))]
    TomlDe { source: toml::de::Error },

    /// TOML serialization error
    #[snafu(display("TOML serialize error: {source}"))]
    TomlSe { source: toml::ser::Error },

    /// The session actor is gone or its mailbox is closed
    #[snafu(display("Session closed: {message}"))]
    SessionClosed { message: String },
}

impl Error {
    /// Shorthand for [`Error::FetchFailure`]
    pub fn fetch(message: impl Into<String>) -> Self {
        Error::FetchFailure {
            message: message.into(),
        }
    }

    /// Shorthand for [`Error::InvalidState`]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Error::InvalidState {
            message: message.into(),
        }
    }

    /// Shorthand for [`Error::UnsupportedOperation`]
    pub fn unsupported(message: impl Into<String>) -> Self {
        Error::UnsupportedOperation {
            message: message.into(),
        }
    }

    /// Build an [`Error::UnknownItem`] from the item's debug form
    pub fn unknown_item(item: &impl std::fmt::Debug) -> Self {
        Error::UnknownItem {
            item: format!("{item:?}"),
        }
    }

    /// Whether this error stems from stale or foreign client input.
    ///
    /// Such errors are logged and dropped when they come from the client.
    pub fn is_client_recoverable(&self) -> bool {
        matches!(
            self,
            Error::UnknownKey { .. } | Error::UnknownItem { .. } | Error::UnsupportedOperation { .. }
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Error::Io { source }
    }
}

impl From<serde_json::Error> for Error {
    fn from(source: serde_json::Error) -> Self {
        Error::Json { source }
    }
}

impl From<toml::de::Error> for Error {
    fn from(source: toml::de::Error) -> Self {
        Error::TomlDe { source }
    }
}

impl From<toml::ser::Error> for Error {
    fn from(source: toml::ser::Error) -> Self {
        Error::TomlSe { source }
    }
}

/// Result type alias for convenience
pub type Result<T, E = Error> = std::result::Result<T, E>;
