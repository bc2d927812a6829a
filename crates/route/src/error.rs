//! Route error types

use thiserror::Error;

use spindle_matcher::MatcherError;

/// Result type for route operations
pub type Result<T> = std::result::Result<T, RouteError>;

/// Errors from route construction and the delegated mutation surface
#[derive(Debug, Error)]
pub enum RouteError {
    /// A destination index does not exist
    #[error("no destination at index {index}")]
    DestinationIndex {
        /// The rejected index
        index: usize,
    },

    /// The policy needs more destinations than were provided (or would
    /// remain after a deletion)
    #[error("route requires at least {min} destination(s)")]
    TooFewDestinations {
        /// Minimum destination count for the policy
        min: usize,
    },

    /// An option key is not recognized by the target
    #[error("unknown option '{key}'")]
    UnknownOption {
        /// The rejected key
        key: String,
    },

    /// An option value failed to parse
    #[error("invalid value '{value}' for option '{key}'")]
    InvalidOption {
        /// Option key
        key: String,
        /// The rejected value
        value: String,
    },

    /// A destination spec string could not be parsed
    #[error("invalid destination spec '{spec}': {reason}")]
    InvalidDestination {
        /// The offending spec string
        spec: String,
        /// Why it was rejected
        reason: String,
    },

    /// A required configuration field is empty
    #[error("missing required field '{field}'")]
    MissingField {
        /// Field name
        field: &'static str,
    },

    /// The partitioning scheme is not recognized
    #[error("invalid partitioning scheme '{value}' (expected byOrg or bySeries)")]
    InvalidPartitionBy {
        /// The rejected value
        value: String,
    },

    /// A matcher component failed to compile
    #[error(transparent)]
    Matcher(#[from] MatcherError),

    /// The delivery worker has already exited
    #[error("route worker is gone")]
    WorkerGone,

    /// An explicit flush failed
    #[error("flush failed: {0}")]
    Flush(String),

    /// A batch publish failed or timed out
    #[error("publish failed: {0}")]
    Publish(String),
}
