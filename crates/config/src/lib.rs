//! Spindle configuration
//!
//! TOML-based configuration loading with sensible defaults; a minimal
//! config should just work.
//!
//! # Parsing
//!
//! ```
//! use std::str::FromStr;
//! use spindle_config::RelayConfig;
//!
//! let config = RelayConfig::from_str(r#"
//! spool_dir = "var/spool"
//! blacklist = ["prefix junk."]
//! "#).unwrap();
//! assert_eq!(config.spool_dir, "var/spool");
//! ```
//!
//! # Example full config
//!
//! ```toml
//! spool_dir = "var/spool"
//! init = ["addRoute sendAllMatch fallback 127.0.0.1:2005"]
//! blacklist = ["prefix junk.", "regex \\.debug$"]
//!
//! [log]
//! level = "info"
//!
//! [[aggregation]]
//! function = "sum"
//! regex = '^stats\.(.*)$'
//! format = "aggregated.$1"
//! interval = 60
//! wait = 10
//!
//! [[rewriter]]
//! old = "prod."
//! new = "p."
//! max = 1
//!
//! [[route]]
//! type = "send-all-match"
//! key = "main"
//! prefix = "p."
//! destinations = ["graphite-a:2003 spool=true", "graphite-b:2003"]
//! ```

mod aggregation;
mod error;
mod logging;
mod rewriter;
mod route;

pub use aggregation::AggregationConfig;
pub use error::{ConfigError, Result};
pub use logging::{LogConfig, LogFormat, LogLevel, LogOutput};
pub use rewriter::RewriterConfig;
pub use route::RouteConfig;

use std::fs;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

/// Top-level relay configuration
///
/// Every section is optional; defaults produce an empty but valid relay.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Directory where spooling destinations keep their on-disk queues
    pub spool_dir: String,

    /// Textual operator commands applied before anything else
    pub init: Vec<String>,

    /// Blacklist entries, each a `"<method> <pattern>"` line with method
    /// one of `prefix`, `sub`, `regex`
    pub blacklist: Vec<String>,

    /// Aggregations, in registration order
    pub aggregation: Vec<AggregationConfig>,

    /// Rewriters, in application order
    pub rewriter: Vec<RewriterConfig>,

    /// Routes, in evaluation order
    pub route: Vec<RouteConfig>,

    /// Logging configuration
    pub log: LogConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            spool_dir: "spool".into(),
            init: Vec::new(),
            blacklist: Vec::new(),
            aggregation: Vec::new(),
            rewriter: Vec::new(),
            route: Vec::new(),
            log: LogConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or contains invalid
    /// TOML.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(toml::from_str(&contents)?)
    }
}

impl FromStr for RelayConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.spool_dir, "spool");
        assert!(config.init.is_empty());
        assert!(config.blacklist.is_empty());
        assert!(config.aggregation.is_empty());
        assert!(config.rewriter.is_empty());
        assert!(config.route.is_empty());
    }

    #[test]
    fn test_parse_empty() {
        let config = RelayConfig::from_str("").unwrap();
        assert_eq!(config.spool_dir, "spool");
        assert!(config.route.is_empty());
    }

    #[test]
    fn test_parse_full() {
        let config = RelayConfig::from_str(
            r#"
spool_dir = "var/spool"
init = ["addBlack prefix secret."]
blacklist = ["prefix junk.", "sub temp"]

[[aggregation]]
function = "sum"
regex = '^stats\.(.*)$'
format = "aggregated.$1"
interval = 60
wait = 10

[[rewriter]]
old = "prod."
new = "p."
max = 1

[[route]]
type = "send-all-match"
key = "main"
prefix = "p."
destinations = ["graphite-a:2003", "graphite-b:2003 spool=true"]
"#,
        )
        .unwrap();

        assert_eq!(config.spool_dir, "var/spool");
        assert_eq!(config.init.len(), 1);
        assert_eq!(config.blacklist, vec!["prefix junk.", "sub temp"]);
        assert_eq!(config.aggregation.len(), 1);
        assert_eq!(config.aggregation[0].function, "sum");
        assert_eq!(config.rewriter.len(), 1);
        assert_eq!(config.rewriter[0].max, 1);
        assert_eq!(config.route.len(), 1);
        assert_eq!(config.route[0].kind, "send-all-match");
        assert_eq!(config.route[0].destinations.len(), 2);
    }

    #[test]
    fn test_parse_invalid_toml() {
        let err = RelayConfig::from_str("spool_dir = [").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_from_file_missing() {
        let err = RelayConfig::from_file("/nonexistent/spindle.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/spindle.toml"));
    }
}
