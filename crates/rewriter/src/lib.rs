//! Bounded metric-name substitutions
//!
//! A [`Rewriter`] replaces occurrences of one byte sequence with another
//! inside the metric name token, capped at a configurable number of
//! replacements. Rewriters compose left to right: the table applies each
//! one in order to the output of the previous.

mod rewriter;

pub use rewriter::{Rewriter, RewriterError};

/// Result type for rewriter construction
pub type Result<T> = std::result::Result<T, RewriterError>;
