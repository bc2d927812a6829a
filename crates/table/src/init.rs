//! Declarative table initialization
//!
//! Populates a freshly created table from a [`RelayConfig`] in a fixed
//! order: init commands, blacklist, aggregations, rewriters, routes. Each
//! step applies to the live table, so on error the caller keeps the
//! partially built table.
//!
//! Init commands are operator imperatives in textual form. Parsing them is
//! the job of an external collaborator; the table only drives an injected
//! [`ImperativeRunner`]. [`NoImperatives`] is the default for deployments
//! without an imperatives layer - it fails on the first command.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use spindle_aggregator::{AggregateFn, Aggregator, AggregatorError};
use spindle_config::{AggregationConfig, RelayConfig, RewriterConfig, RouteConfig};
use spindle_matcher::Matcher;
use spindle_rewriter::{Rewriter, RewriterError};
use spindle_route::{
    ConsistentHash, Destination, DestinationConfig, GrafanaNetConfig, GrafanaNetRoute,
    KafkaMdmConfig, KafkaMdmRoute, PartitionBy, SendAllMatch, SendFirstMatch,
};

use crate::table::Table;

/// Applies one textual operator command to the table
#[async_trait]
pub trait ImperativeRunner: Send + Sync {
    /// Apply `cmd` to `table`
    async fn apply(&self, table: &Table, cmd: &str) -> Result<(), ImperativeError>;
}

/// Failure reported by an [`ImperativeRunner`]
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ImperativeError {
    message: String,
}

impl ImperativeError {
    /// Wrap a failure message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Runner for deployments without an imperatives layer; fails on the
/// first command it sees
pub struct NoImperatives;

#[async_trait]
impl ImperativeRunner for NoImperatives {
    async fn apply(&self, _table: &Table, cmd: &str) -> Result<(), ImperativeError> {
        Err(ImperativeError::new(format!(
            "no imperative runner configured (command: '{}')",
            cmd
        )))
    }
}

/// Errors from declarative initialization
///
/// All indices are 1-based, matching the entry's position in the
/// configuration file.
#[derive(Debug, Error)]
pub enum InitError {
    /// An init command failed
    #[error("could not apply init command #{index}: {source}")]
    Command {
        /// 1-based position in the `init` list
        index: usize,
        #[source]
        source: ImperativeError,
    },

    /// A blacklist entry could not be parsed
    #[error("invalid blacklist entry #{index}: {reason}")]
    Blacklist {
        /// 1-based position in the `blacklist` list
        index: usize,
        /// Why it was rejected
        reason: String,
    },

    /// An aggregation could not be built
    #[error("could not add aggregation #{index}: {source}")]
    Aggregation {
        /// 1-based position in the `aggregation` list
        index: usize,
        #[source]
        source: AggregatorError,
    },

    /// A rewriter could not be built
    #[error("could not add rewriter #{index}: {source}")]
    Rewriter {
        /// 1-based position in the `rewriter` list
        index: usize,
        #[source]
        source: RewriterError,
    },

    /// A route could not be built
    #[error("invalid route '{key}': {reason}")]
    Route {
        /// The route's key
        key: String,
        /// Why it was rejected
        reason: String,
    },

    /// The route type tag is not recognized
    #[error("unrecognized route type '{kind}' for route '{key}'")]
    UnknownRouteType {
        /// The rejected type tag
        kind: String,
        /// The route's key
        key: String,
    },
}

impl Table {
    /// Populate the table from a declarative configuration
    ///
    /// Order is fixed: init commands, blacklist, aggregations, rewriters,
    /// routes. The first error halts initialization; everything applied
    /// before it stays in the table.
    pub async fn init_from_config(
        &self,
        config: &RelayConfig,
        imperatives: &dyn ImperativeRunner,
    ) -> Result<(), InitError> {
        self.init_commands(&config.init, imperatives).await?;
        self.init_blacklist(&config.blacklist).await?;
        self.init_aggregations(&config.aggregation).await?;
        self.init_rewriters(&config.rewriter).await?;
        self.init_routes(&config.route).await?;
        Ok(())
    }

    /// Apply each init command through the imperatives runner
    pub async fn init_commands(
        &self,
        commands: &[String],
        imperatives: &dyn ImperativeRunner,
    ) -> Result<(), InitError> {
        for (i, cmd) in commands.iter().enumerate() {
            tracing::info!(command = %cmd, "applying init command");
            imperatives
                .apply(self, cmd)
                .await
                .map_err(|source| InitError::Command {
                    index: i + 1,
                    source,
                })?;
        }
        Ok(())
    }

    /// Parse and append each blacklist entry
    ///
    /// Entries are two-token lines: a method (`prefix`, `sub`, or `regex`)
    /// and a single pattern argument.
    pub async fn init_blacklist(&self, entries: &[String]) -> Result<(), InitError> {
        for (i, entry) in entries.iter().enumerate() {
            let index = i + 1;
            let (method, pattern) =
                entry
                    .trim()
                    .split_once(' ')
                    .ok_or_else(|| InitError::Blacklist {
                        index,
                        reason: format!("expected '<method> <pattern>', got '{}'", entry),
                    })?;

            let (prefix, sub, regex) = match method {
                "prefix" => (pattern, "", ""),
                "sub" => ("", pattern, ""),
                "regex" => ("", "", pattern),
                other => {
                    return Err(InitError::Blacklist {
                        index,
                        reason: format!("invalid method '{}'", other),
                    });
                }
            };

            let matcher = Matcher::new(prefix, sub, regex).map_err(|e| InitError::Blacklist {
                index,
                reason: e.to_string(),
            })?;
            self.add_blacklist(matcher).await;
        }
        Ok(())
    }

    /// Build and append each aggregator, wired to the feedback channel
    pub async fn init_aggregations(
        &self,
        aggregations: &[AggregationConfig],
    ) -> Result<(), InitError> {
        for (i, agg_config) in aggregations.iter().enumerate() {
            let index = i + 1;
            let fun = AggregateFn::from_str(&agg_config.function)
                .map_err(|source| InitError::Aggregation { index, source })?;
            let aggregator = Aggregator::new(
                fun,
                &agg_config.regex,
                &agg_config.format,
                agg_config.interval,
                agg_config.wait,
                self.feedback_sender(),
            )
            .map_err(|source| InitError::Aggregation { index, source })?;
            self.add_aggregator(aggregator).await;
        }
        Ok(())
    }

    /// Build and append each rewriter
    pub async fn init_rewriters(&self, rewriters: &[RewriterConfig]) -> Result<(), InitError> {
        for (i, rw_config) in rewriters.iter().enumerate() {
            let rewriter = Rewriter::new(&rw_config.old, &rw_config.new, rw_config.max)
                .map_err(|source| InitError::Rewriter {
                    index: i + 1,
                    source,
                })?;
            self.add_rewriter(rewriter).await;
        }
        Ok(())
    }

    /// Build and append each route, branching on its type tag
    pub async fn init_routes(&self, routes: &[RouteConfig]) -> Result<(), InitError> {
        for route_config in routes {
            self.init_route(route_config).await?;
        }
        Ok(())
    }

    async fn init_route(&self, rc: &RouteConfig) -> Result<(), InitError> {
        let route_err = |reason: String| InitError::Route {
            key: rc.key.clone(),
            reason,
        };

        let matcher = Matcher::new(&rc.prefix, &rc.substr, &rc.regex)
            .map_err(|e| route_err(e.to_string()))?;

        match rc.kind.as_str() {
            "send-all-match" => {
                let dests = self.build_destinations(&rc.destinations, &rc.key)?;
                let route = SendAllMatch::new(&rc.key, matcher, dests)
                    .map_err(|e| route_err(e.to_string()))?;
                self.add_route(route).await;
            }
            "send-first-match" => {
                let dests = self.build_destinations(&rc.destinations, &rc.key)?;
                let route = SendFirstMatch::new(&rc.key, matcher, dests)
                    .map_err(|e| route_err(e.to_string()))?;
                self.add_route(route).await;
            }
            "consistent-hash" => {
                let dests = self.build_destinations(&rc.destinations, &rc.key)?;
                let route = ConsistentHash::new(&rc.key, matcher, dests)
                    .map_err(|e| route_err(e.to_string()))?;
                self.add_route(route).await;
            }
            "grafana-net" => {
                let mut config = GrafanaNetConfig::new(&rc.addr, &rc.api_key);
                config.schemas_file = rc.schemas_file.clone();
                // configured values always win, including explicit false
                if let Some(v) = rc.spool {
                    config.spool = v;
                }
                if let Some(v) = rc.ssl_verify {
                    config.ssl_verify = v;
                }
                if let Some(v) = rc.buf_size {
                    config.buf_size = v;
                }
                if let Some(v) = rc.flush_max_num {
                    config.flush_max_num = v;
                }
                if let Some(v) = rc.flush_max_wait_ms {
                    config.flush_max_wait = Duration::from_millis(v);
                }
                if let Some(v) = rc.timeout_ms {
                    config.timeout = Duration::from_millis(v);
                }
                if let Some(v) = rc.concurrency {
                    config.concurrency = v;
                }
                if let Some(v) = rc.org_id {
                    config.org_id = v;
                }
                let route = GrafanaNetRoute::new(&rc.key, matcher, config)
                    .map_err(|e| route_err(e.to_string()))?;
                self.add_route(route).await;
            }
            "kafka-mdm" => {
                let partition_by = PartitionBy::from_str(&rc.partition_by)
                    .map_err(|e| route_err(e.to_string()))?;
                let mut config = KafkaMdmConfig::new(&rc.broker, &rc.topic, partition_by);
                config.codec = rc.codec.clone();
                config.schemas_file = rc.schemas_file.clone();
                if let Some(v) = rc.org_id {
                    config.org_id = v;
                }
                if let Some(v) = rc.buf_size {
                    config.buf_size = v;
                }
                if let Some(v) = rc.flush_max_num {
                    config.flush_max_num = v;
                }
                if let Some(v) = rc.flush_max_wait_ms {
                    config.flush_max_wait = Duration::from_millis(v);
                }
                if let Some(v) = rc.timeout_ms {
                    config.timeout = Duration::from_millis(v);
                }
                let route = KafkaMdmRoute::new(&rc.key, matcher, config)
                    .map_err(|e| route_err(e.to_string()))?;
                self.add_route(route).await;
            }
            other => {
                return Err(InitError::UnknownRouteType {
                    kind: other.to_string(),
                    key: rc.key.clone(),
                });
            }
        }
        Ok(())
    }

    fn build_destinations(
        &self,
        specs: &[String],
        key: &str,
    ) -> Result<Vec<Arc<Destination>>, InitError> {
        specs
            .iter()
            .map(|spec| {
                let config =
                    DestinationConfig::from_spec(spec).map_err(|e| InitError::Route {
                        key: key.to_string(),
                        reason: e.to_string(),
                    })?;
                Destination::spawn(config, self.spool_dir()).map_err(|e| InitError::Route {
                    key: key.to_string(),
                    reason: e.to_string(),
                })
            })
            .collect()
    }
}
