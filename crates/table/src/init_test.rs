//! Declarative initialization tests

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use spindle_config::RelayConfig;
use spindle_matcher::Matcher;
use spindle_route::RouteKind;

use crate::{ImperativeError, ImperativeRunner, InitError, NoImperatives, Table};

fn parse(toml: &str) -> RelayConfig {
    RelayConfig::from_str(toml).unwrap()
}

async fn init(toml: &str) -> (Arc<Table>, Result<(), InitError>) {
    let config = parse(toml);
    let table = Table::new(&config.spool_dir);
    let result = table.init_from_config(&config, &NoImperatives).await;
    (table, result)
}

// ============================================================================
// Happy path
// ============================================================================

#[tokio::test]
async fn test_init_full_config() {
    let (table, result) = init(
        r#"
spool_dir = "var/spool"
blacklist = ["prefix junk.", "sub tmp", "regex \\.debug$"]

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
destinations = ["127.0.0.1:1", "127.0.0.1:2 spool=true"]

[[route]]
type = "send-first-match"
key = "first"
destinations = ["127.0.0.1:3"]

[[route]]
type = "consistent-hash"
key = "sharded"
destinations = ["127.0.0.1:4", "127.0.0.1:5"]
"#,
    )
    .await;

    result.unwrap();
    let snap = table.snapshot();

    assert_eq!(snap.blacklist.len(), 3);
    assert_eq!(snap.blacklist[0].prefix(), "junk.");
    assert_eq!(snap.blacklist[1].sub(), "tmp");
    assert_eq!(snap.blacklist[2].regex(), r"\.debug$");

    assert_eq!(snap.aggregators.len(), 1);
    assert_eq!(snap.aggregators[0].interval, 60);

    assert_eq!(snap.rewriters.len(), 1);
    assert_eq!(snap.rewriters[0].old(), "prod.");

    assert_eq!(snap.routes.len(), 3);
    assert_eq!(snap.routes[0].kind, RouteKind::SendAllMatch);
    assert_eq!(snap.routes[0].dests.len(), 2);
    assert!(snap.routes[0].dests[1].spool);
    // destinations inherit the relay's spool directory
    assert_eq!(snap.routes[0].dests[0].spool_dir, "var/spool");
    assert_eq!(snap.routes[1].kind, RouteKind::SendFirstMatch);
    assert_eq!(snap.routes[2].kind, RouteKind::ConsistentHash);

    table.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_init_grafana_net_route() {
    let (table, result) = init(
        r#"
[[route]]
type = "grafana-net"
key = "cloud"
prefix = "agg."
addr = "https://tsdb.example/metrics"
api_key = "secret"
spool = true
ssl_verify = false
"#,
    )
    .await;

    result.unwrap();
    let snap = table.snapshot();
    assert_eq!(snap.routes[0].kind, RouteKind::GrafanaNet);
    assert_eq!(snap.routes[0].dests.len(), 1);
    assert_eq!(snap.routes[0].dests[0].addr, "https://tsdb.example/metrics");
    // the configured spool=true overrode the default
    assert!(snap.routes[0].dests[0].spool);

    table.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_init_kafka_mdm_route() {
    let (table, result) = init(
        r#"
[[route]]
type = "kafka-mdm"
key = "kafka"
broker = "broker:9092"
topic = "mdm"
partition_by = "bySeries"
"#,
    )
    .await;

    result.unwrap();
    let snap = table.snapshot();
    assert_eq!(snap.routes[0].kind, RouteKind::KafkaMdm);
    assert_eq!(snap.routes[0].dests[0].addr, "broker:9092/mdm");

    table.shutdown().await.unwrap();
}

// ============================================================================
// Blacklist entry errors
// ============================================================================

#[tokio::test]
async fn test_init_blacklist_invalid_method() {
    let (_, result) = init(r#"blacklist = ["glob junk.*"]"#).await;
    let err = result.unwrap_err();
    assert!(matches!(err, InitError::Blacklist { index: 1, .. }));
    assert!(err.to_string().contains("glob"));
}

#[tokio::test]
async fn test_init_blacklist_missing_argument() {
    let (_, result) = init(r#"blacklist = ["prefix"]"#).await;
    assert!(matches!(result.unwrap_err(), InitError::Blacklist { .. }));
}

#[tokio::test]
async fn test_init_blacklist_bad_regex() {
    let (_, result) = init(r#"blacklist = ["regex ("]"#).await;
    assert!(matches!(result.unwrap_err(), InitError::Blacklist { .. }));
}

// ============================================================================
// Aggregation and rewriter errors
// ============================================================================

#[tokio::test]
async fn test_init_unknown_aggregation_function() {
    let (_, result) = init(
        r#"
[[aggregation]]
function = "median"
regex = ".*"
format = "agg"
interval = 60
"#,
    )
    .await;
    assert!(matches!(
        result.unwrap_err(),
        InitError::Aggregation { index: 1, .. }
    ));
}

#[tokio::test]
async fn test_init_empty_rewriter_pattern() {
    let (_, result) = init(
        r#"
[[rewriter]]
old = ""
new = "x"
"#,
    )
    .await;
    assert!(matches!(
        result.unwrap_err(),
        InitError::Rewriter { index: 1, .. }
    ));
}

// ============================================================================
// Route errors
// ============================================================================

#[tokio::test]
async fn test_init_unknown_route_type() {
    let (_, result) = init(
        r#"
[[route]]
type = "broadcast"
key = "b"
"#,
    )
    .await;
    let err = result.unwrap_err();
    assert!(matches!(err, InitError::UnknownRouteType { .. }));
    assert!(err.to_string().contains("broadcast"));
}

#[tokio::test]
async fn test_init_route_without_destinations() {
    let (_, result) = init(
        r#"
[[route]]
type = "send-all-match"
key = "empty"
"#,
    )
    .await;
    let err = result.unwrap_err();
    assert!(matches!(err, InitError::Route { .. }));
    assert!(err.to_string().contains("empty"));
}

#[tokio::test]
async fn test_init_consistent_hash_needs_two_destinations() {
    let (_, result) = init(
        r#"
[[route]]
type = "consistent-hash"
key = "ch"
destinations = ["127.0.0.1:1"]
"#,
    )
    .await;
    assert!(matches!(result.unwrap_err(), InitError::Route { .. }));
}

#[tokio::test]
async fn test_init_kafka_mdm_requires_partition_by() {
    let (_, result) = init(
        r#"
[[route]]
type = "kafka-mdm"
key = "kafka"
broker = "broker:9092"
topic = "mdm"
"#,
    )
    .await;
    let err = result.unwrap_err();
    assert!(matches!(err, InitError::Route { .. }));
    assert!(err.to_string().contains("partitioning"));
}

#[tokio::test]
async fn test_init_bad_destination_spec() {
    let (_, result) = init(
        r#"
[[route]]
type = "send-all-match"
key = "r"
destinations = ["127.0.0.1:1 color=red"]
"#,
    )
    .await;
    assert!(matches!(result.unwrap_err(), InitError::Route { .. }));
}

// ============================================================================
// Ordering and partial initialization
// ============================================================================

#[tokio::test]
async fn test_init_halts_but_keeps_prior_sections() {
    let (table, result) = init(
        r#"
blacklist = ["prefix junk."]

[[aggregation]]
function = "median"
regex = ".*"
format = "agg"
interval = 60
"#,
    )
    .await;

    // aggregation fails after blacklist succeeded
    assert!(matches!(
        result.unwrap_err(),
        InitError::Aggregation { .. }
    ));
    let snap = table.snapshot();
    assert_eq!(snap.blacklist.len(), 1);
    assert_eq!(snap.aggregators.len(), 0);
}

#[tokio::test]
async fn test_init_commands_fail_without_runner() {
    let (table, result) = init(r#"init = ["addBlack prefix junk."]"#).await;
    let err = result.unwrap_err();
    assert!(matches!(err, InitError::Command { index: 1, .. }));
    // commands run first, so nothing else was applied
    assert_eq!(table.snapshot().blacklist.len(), 0);
}

// ============================================================================
// The imperatives seam
// ============================================================================

/// Runner that understands exactly one command shape: `addBlack <prefix>`
struct PrefixBlackRunner;

#[async_trait]
impl ImperativeRunner for PrefixBlackRunner {
    async fn apply(&self, table: &Table, cmd: &str) -> Result<(), ImperativeError> {
        let prefix = cmd
            .strip_prefix("addBlack ")
            .ok_or_else(|| ImperativeError::new(format!("unknown command '{}'", cmd)))?;
        let matcher = Matcher::new(prefix, "", "")
            .map_err(|e| ImperativeError::new(e.to_string()))?;
        table.add_blacklist(matcher).await;
        Ok(())
    }
}

#[tokio::test]
async fn test_init_commands_run_through_injected_runner() {
    let config = parse(r#"init = ["addBlack secret."]"#);
    let table = Table::new(&config.spool_dir);
    table
        .init_from_config(&config, &PrefixBlackRunner)
        .await
        .unwrap();

    let snap = table.snapshot();
    assert_eq!(snap.blacklist.len(), 1);
    assert_eq!(snap.blacklist[0].prefix(), "secret.");

    table.dispatch(b"secret.key 1 1").await;
    assert_eq!(table.metrics().num_blacklist, 1);
}
