//! Metric-name matching predicates
//!
//! A [`Matcher`] is a pure predicate over a byte-string metric name,
//! combining an optional prefix, substring, and regular expression. Every
//! non-empty component must hold for the matcher to accept a name; empty
//! components match vacuously, so the all-empty matcher accepts everything.
//!
//! Matching operates on `&[u8]` directly - metric names arrive on the wire
//! as bytes and never round-trip through UTF-8 validation on the hot path.
//!
//! # Example
//!
//! ```
//! use spindle_matcher::Matcher;
//!
//! let m = Matcher::new("service.", "api", "").unwrap();
//! assert!(m.matches(b"service.api.requests"));
//! assert!(!m.matches(b"service.db.queries"));
//! ```

mod error;
mod matcher;

pub use error::{MatcherError, Result};
pub use matcher::Matcher;
