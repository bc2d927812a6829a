//! The route contract consumed by the dispatch table

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;

use spindle_matcher::Matcher;

use crate::destination::DestinationSnapshot;
use crate::error::{Result, RouteError};

/// String key/value options for `update` / `update_destination`
pub type RouteOptions = HashMap<String, String>;

/// The route type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RouteKind {
    /// Every matching destination receives the record
    SendAllMatch,
    /// Only the first matching destination receives the record
    SendFirstMatch,
    /// A hash of the metric name selects exactly one destination
    ConsistentHash,
    /// Single HTTP-batched destination
    GrafanaNet,
    /// Single Kafka-batched destination
    KafkaMdm,
}

impl RouteKind {
    /// Canonical kebab-case name, as used in configuration
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendAllMatch => "send-all-match",
            Self::SendFirstMatch => "send-first-match",
            Self::ConsistentHash => "consistent-hash",
            Self::GrafanaNet => "grafana-net",
            Self::KafkaMdm => "kafka-mdm",
        }
    }
}

impl fmt::Display for RouteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A downstream delivery abstraction
///
/// The table treats routes as opaque: it tests the matcher, hands over
/// finished record lines, and delegates the mutation surface. A route
/// handed to the table is already running; the table owns its shutdown
/// from then on.
#[async_trait]
pub trait Route: Send + Sync {
    /// The unique key this route is addressed by
    fn key(&self) -> &str;

    /// The route type tag
    fn kind(&self) -> RouteKind;

    /// Test the route's own matcher against a metric name
    fn matches(&self, name: &[u8]) -> bool;

    /// Deliver one finished record line
    ///
    /// Never blocks; a full internal queue counts and drops.
    fn dispatch(&self, line: Bytes);

    /// Flush internal buffers through to the destinations
    async fn flush(&self) -> Result<()>;

    /// Stop all internal workers, draining queued lines best-effort
    async fn shutdown(&self) -> Result<()>;

    /// A deep, decoupled view of the route's declarative state
    fn snapshot(&self) -> RouteSnapshot;

    /// Update the route's own matcher from string options
    async fn update(&self, opts: &RouteOptions) -> Result<()>;

    /// Remove the destination at `index`, shutting it down
    async fn del_destination(&self, index: usize) -> Result<()>;

    /// Update the destination at `index` from string options
    async fn update_destination(&self, index: usize, opts: &RouteOptions) -> Result<()>;
}

/// Deep view of a route for introspection and printing
///
/// Fully decoupled from the live route: concurrent mutations never alter
/// an already-returned snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct RouteSnapshot {
    /// Route type tag
    pub kind: RouteKind,
    /// Route key
    pub key: String,
    /// The route's own matcher
    pub matcher: Matcher,
    /// One entry per destination
    pub dests: Vec<DestinationSnapshot>,
}

/// The metric name is the leading portion of a record line, up to the
/// first space.
#[inline]
pub fn metric_name(line: &[u8]) -> &[u8] {
    match line.iter().position(|&b| b == b' ') {
        Some(i) => &line[..i],
        None => line,
    }
}

/// Rebuild a matcher with string options applied on top of its current
/// components. Recognized keys: `prefix`, `sub`, `regex`.
pub(crate) fn apply_matcher_opts(current: &Matcher, opts: &RouteOptions) -> Result<Matcher> {
    let mut prefix = current.prefix().to_string();
    let mut sub = current.sub().to_string();
    let mut regex = current.regex().to_string();

    for (key, value) in opts {
        match key.as_str() {
            "prefix" => prefix = value.clone(),
            "sub" => sub = value.clone(),
            "regex" => regex = value.clone(),
            _ => {
                return Err(RouteError::UnknownOption { key: key.clone() });
            }
        }
    }

    Ok(Matcher::new(prefix, sub, regex)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_name() {
        assert_eq!(metric_name(b"foo.bar 1 1000"), b"foo.bar");
        assert_eq!(metric_name(b"foo.bar"), b"foo.bar");
        assert_eq!(metric_name(b""), b"");
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(RouteKind::SendAllMatch.as_str(), "send-all-match");
        assert_eq!(RouteKind::SendFirstMatch.as_str(), "send-first-match");
        assert_eq!(RouteKind::ConsistentHash.as_str(), "consistent-hash");
        assert_eq!(RouteKind::GrafanaNet.as_str(), "grafana-net");
        assert_eq!(RouteKind::KafkaMdm.as_str(), "kafka-mdm");
    }

    #[test]
    fn test_apply_matcher_opts() {
        let base = Matcher::new("old.", "", "").unwrap();
        let mut opts = RouteOptions::new();
        opts.insert("prefix".into(), "new.".into());
        opts.insert("sub".into(), "api".into());

        let updated = apply_matcher_opts(&base, &opts).unwrap();
        assert_eq!(updated.prefix(), "new.");
        assert_eq!(updated.sub(), "api");
        assert_eq!(updated.regex(), "");
    }

    #[test]
    fn test_apply_matcher_opts_unknown_key() {
        let base = Matcher::match_all();
        let mut opts = RouteOptions::new();
        opts.insert("addr".into(), "other:2003".into());

        let err = apply_matcher_opts(&base, &opts).unwrap_err();
        assert!(matches!(err, RouteError::UnknownOption { .. }));
    }

    #[test]
    fn test_apply_matcher_opts_bad_regex() {
        let base = Matcher::match_all();
        let mut opts = RouteOptions::new();
        opts.insert("regex".into(), "(".into());

        assert!(apply_matcher_opts(&base, &opts).is_err());
    }
}
