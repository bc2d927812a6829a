//! Aggregator error types

use thiserror::Error;

/// Result type for aggregator construction
pub type Result<T> = std::result::Result<T, AggregatorError>;

/// Errors that can occur while building an aggregator
#[derive(Debug, Error)]
pub enum AggregatorError {
    /// The aggregation function name is not recognized
    #[error("unknown aggregation function '{name}'")]
    UnknownFunction {
        /// The rejected function name
        name: String,
    },

    /// The capture regex failed to compile
    #[error("invalid aggregation regex '{pattern}': {source}")]
    InvalidRegex {
        /// The pattern that failed to compile
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// The window interval must be at least one second
    #[error("aggregation interval may not be zero")]
    ZeroInterval,
}

impl AggregatorError {
    /// Create an UnknownFunction error
    #[inline]
    pub fn unknown_function(name: impl Into<String>) -> Self {
        Self::UnknownFunction { name: name.into() }
    }
}
