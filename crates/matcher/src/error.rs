//! Matcher error types

use thiserror::Error;

/// Result type for matcher construction
pub type Result<T> = std::result::Result<T, MatcherError>;

/// Errors that can occur while building a matcher
#[derive(Debug, Error)]
pub enum MatcherError {
    /// The regex component failed to compile
    #[error("invalid regex '{pattern}': {source}")]
    InvalidRegex {
        /// The pattern that failed to compile
        pattern: String,
        #[source]
        source: regex::Error,
    },
}
