//! Table error types

use thiserror::Error;

use spindle_route::RouteError;

/// Result type for table mutations
pub type Result<T> = std::result::Result<T, TableError>;

/// Errors from the table's mutation surface
#[derive(Debug, Error)]
pub enum TableError {
    /// No rewriter exists at the given index
    #[error("no rewriter at index {index}")]
    RewriterIndex {
        /// The rejected index
        index: usize,
    },

    /// No blacklist entry exists at the given index
    #[error("no blacklist entry at index {index}")]
    BlacklistIndex {
        /// The rejected index
        index: usize,
    },

    /// No aggregator exists at the given index
    #[error("no aggregator at index {index}")]
    AggregatorIndex {
        /// The rejected index
        index: usize,
    },

    /// No route is registered under the given key
    #[error("unknown route '{key}'")]
    UnknownRoute {
        /// The key that did not resolve
        key: String,
    },

    /// A delegated route operation failed
    #[error(transparent)]
    Route(#[from] RouteError),
}
