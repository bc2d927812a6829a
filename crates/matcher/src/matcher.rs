//! The combined prefix/substring/regex predicate

use regex::bytes::Regex;
use serde::Serialize;

use crate::error::{MatcherError, Result};

/// Predicate over a byte-string metric name
///
/// Combines three optional components with AND semantics:
///
/// - `prefix` - the name must start with these bytes
/// - `sub` - the name must contain these bytes
/// - `regex` - the name must match this pattern
///
/// An empty component matches vacuously. The regex is compiled once at
/// construction; [`matches`](Matcher::matches) performs no allocation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Matcher {
    prefix: String,
    sub: String,
    regex: String,

    /// Compiled form of `regex`; `None` when the pattern is empty.
    #[serde(skip)]
    compiled: Option<Regex>,
}

impl Matcher {
    /// Build a matcher from its three components
    ///
    /// # Errors
    ///
    /// Returns [`MatcherError::InvalidRegex`] if the regex component does
    /// not compile.
    pub fn new(
        prefix: impl Into<String>,
        sub: impl Into<String>,
        regex: impl Into<String>,
    ) -> Result<Self> {
        let regex = regex.into();
        let compiled = if regex.is_empty() {
            None
        } else {
            Some(
                Regex::new(&regex).map_err(|source| MatcherError::InvalidRegex {
                    pattern: regex.clone(),
                    source,
                })?,
            )
        };

        Ok(Self {
            prefix: prefix.into(),
            sub: sub.into(),
            regex,
            compiled,
        })
    }

    /// A matcher that accepts every name
    #[inline]
    #[must_use]
    pub fn match_all() -> Self {
        Self::default()
    }

    /// The prefix component (may be empty)
    #[inline]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The substring component (may be empty)
    #[inline]
    pub fn sub(&self) -> &str {
        &self.sub
    }

    /// The regex component's source pattern (may be empty)
    #[inline]
    pub fn regex(&self) -> &str {
        &self.regex
    }

    /// Test a metric name against all components
    ///
    /// Every non-empty component must hold. Empty components match
    /// vacuously, so a default matcher accepts every name.
    pub fn matches(&self, name: &[u8]) -> bool {
        if !self.prefix.is_empty() && !name.starts_with(self.prefix.as_bytes()) {
            return false;
        }
        if !self.sub.is_empty() && !contains(name, self.sub.as_bytes()) {
            return false;
        }
        if let Some(re) = &self.compiled {
            if !re.is_match(name) {
                return false;
            }
        }
        true
    }
}

impl PartialEq for Matcher {
    fn eq(&self, other: &Self) -> bool {
        // The compiled regex is derived from `regex`; the source fields
        // fully determine equality.
        self.prefix == other.prefix && self.sub == other.sub && self.regex == other.regex
    }
}

impl Eq for Matcher {}

/// Substring search over raw bytes
fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    if needle.len() > haystack.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}
