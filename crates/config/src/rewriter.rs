//! Rewriter section

use serde::Deserialize;

/// One `[[rewriter]]` entry
///
/// # Example
///
/// ```toml
/// [[rewriter]]
/// old = "prod."
/// new = "p."
/// max = 1
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RewriterConfig {
    /// Byte sequence to replace
    pub old: String,

    /// Replacement byte sequence
    pub new: String,

    /// Replacement cap; 0 means unlimited
    pub max: u32,
}
