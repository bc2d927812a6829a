//! Batched route tests
//!
//! Channel-backed publishers stand in for the wire producers, exposing
//! exactly what each flushed batch contained.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::timeout;

use spindle_matcher::Matcher;

use crate::{
    GrafanaNetConfig, GrafanaNetRoute, KafkaMdmConfig, KafkaMdmRoute, PartitionBy, Publisher,
    Route, RouteError, RouteKind, RouteOptions,
};

/// Publisher that forwards every batch into a channel
struct ChannelPublisher {
    tx: mpsc::Sender<Vec<Bytes>>,
}

#[async_trait]
impl Publisher for ChannelPublisher {
    async fn publish(
        &self,
        lines: Vec<Bytes>,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.tx.send(lines).await.map_err(|e| e.to_string().into())
    }
}

/// Publisher that always fails
struct FailingPublisher;

#[async_trait]
impl Publisher for FailingPublisher {
    async fn publish(
        &self,
        _lines: Vec<Bytes>,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Err("endpoint unavailable".into())
    }
}

fn channel_publisher() -> (Arc<ChannelPublisher>, mpsc::Receiver<Vec<Bytes>>) {
    let (tx, rx) = mpsc::channel(16);
    (Arc::new(ChannelPublisher { tx }), rx)
}

fn grafana_config() -> GrafanaNetConfig {
    GrafanaNetConfig::new("https://tsdb.example/metrics", "secret")
}

async fn recv_batch(rx: &mut mpsc::Receiver<Vec<Bytes>>) -> Vec<Bytes> {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for batch")
        .expect("publisher channel closed")
}

// ============================================================================
// Defaults and validation
// ============================================================================

#[test]
fn test_grafana_net_defaults() {
    let config = grafana_config();
    assert!(!config.spool);
    assert!(config.ssl_verify);
    assert_eq!(config.buf_size, 10_000_000);
    assert_eq!(config.flush_max_num, 10_000);
    assert_eq!(config.flush_max_wait, Duration::from_millis(500));
    assert_eq!(config.timeout, Duration::from_millis(5000));
    assert_eq!(config.concurrency, 10);
    assert_eq!(config.org_id, 1);
}

#[test]
fn test_kafka_mdm_defaults() {
    let config = KafkaMdmConfig::new("broker:9092", "mdm", PartitionBy::BySeries);
    assert_eq!(config.buf_size, 10_000_000);
    assert_eq!(config.flush_max_num, 10_000);
    assert_eq!(config.flush_max_wait, Duration::from_millis(500));
    assert_eq!(config.timeout, Duration::from_millis(2000));
    assert_eq!(config.org_id, 1);
}

#[test]
fn test_partition_by_parsing() {
    assert_eq!("byOrg".parse::<PartitionBy>().unwrap(), PartitionBy::ByOrg);
    assert_eq!(
        "bySeries".parse::<PartitionBy>().unwrap(),
        PartitionBy::BySeries
    );
    let err = "byHost".parse::<PartitionBy>().unwrap_err();
    assert!(matches!(err, RouteError::InvalidPartitionBy { .. }));
}

#[tokio::test]
async fn test_grafana_net_requires_addr_and_key() {
    let err = GrafanaNetRoute::new(
        "gn",
        Matcher::match_all(),
        GrafanaNetConfig::new("", "secret"),
    )
    .unwrap_err();
    assert!(matches!(err, RouteError::MissingField { field: "addr" }));

    let err = GrafanaNetRoute::new(
        "gn",
        Matcher::match_all(),
        GrafanaNetConfig::new("https://x", ""),
    )
    .unwrap_err();
    assert!(matches!(err, RouteError::MissingField { field: "api_key" }));
}

#[tokio::test]
async fn test_kafka_mdm_requires_broker_and_topic() {
    let err = KafkaMdmRoute::new(
        "k",
        Matcher::match_all(),
        KafkaMdmConfig::new("", "topic", PartitionBy::ByOrg),
    )
    .unwrap_err();
    assert!(matches!(err, RouteError::MissingField { field: "broker" }));

    let err = KafkaMdmRoute::new(
        "k",
        Matcher::match_all(),
        KafkaMdmConfig::new("broker:9092", "", PartitionBy::ByOrg),
    )
    .unwrap_err();
    assert!(matches!(err, RouteError::MissingField { field: "topic" }));
}

// ============================================================================
// Batching
// ============================================================================

#[tokio::test]
async fn test_flush_max_num_triggers_publish() {
    let (publisher, mut rx) = channel_publisher();
    let mut config = grafana_config();
    config.flush_max_num = 2;
    config.flush_max_wait = Duration::from_secs(3600);

    let route =
        GrafanaNetRoute::with_publisher("gn", Matcher::match_all(), config, publisher).unwrap();

    route.dispatch(Bytes::from_static(b"a 1 1"));
    route.dispatch(Bytes::from_static(b"b 2 2"));

    let batch = recv_batch(&mut rx).await;
    assert_eq!(batch.len(), 2);
    assert_eq!(&batch[0][..], b"a 1 1");
    assert_eq!(&batch[1][..], b"b 2 2");

    route.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_explicit_flush_publishes_partial_batch() {
    let (publisher, mut rx) = channel_publisher();
    let mut config = grafana_config();
    config.flush_max_wait = Duration::from_secs(3600);

    let route =
        GrafanaNetRoute::with_publisher("gn", Matcher::match_all(), config, publisher).unwrap();

    route.dispatch(Bytes::from_static(b"a 1 1"));
    route.flush().await.unwrap();

    let batch = recv_batch(&mut rx).await;
    assert_eq!(batch.len(), 1);

    route.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_flush_max_wait_triggers_publish() {
    let (publisher, mut rx) = channel_publisher();
    let mut config = grafana_config();
    config.flush_max_wait = Duration::from_millis(50);

    let route =
        GrafanaNetRoute::with_publisher("gn", Matcher::match_all(), config, publisher).unwrap();

    route.dispatch(Bytes::from_static(b"a 1 1"));

    let batch = recv_batch(&mut rx).await;
    assert_eq!(batch.len(), 1);

    route.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_flushes_pending() {
    let (publisher, mut rx) = channel_publisher();
    let mut config = grafana_config();
    config.flush_max_wait = Duration::from_secs(3600);

    let route =
        GrafanaNetRoute::with_publisher("gn", Matcher::match_all(), config, publisher).unwrap();

    route.dispatch(Bytes::from_static(b"a 1 1"));
    route.shutdown().await.unwrap();

    let batch = recv_batch(&mut rx).await;
    assert_eq!(batch.len(), 1);
}

#[tokio::test]
async fn test_kafka_mdm_batches() {
    let (publisher, mut rx) = channel_publisher();
    let mut config = KafkaMdmConfig::new("broker:9092", "mdm", PartitionBy::ByOrg);
    config.flush_max_num = 1;

    let route =
        KafkaMdmRoute::with_publisher("k", Matcher::match_all(), config, publisher).unwrap();
    assert_eq!(route.kind(), RouteKind::KafkaMdm);

    route.dispatch(Bytes::from_static(b"a 1 1"));
    let batch = recv_batch(&mut rx).await;
    assert_eq!(batch.len(), 1);

    route.shutdown().await.unwrap();
}

// ============================================================================
// Failure and snapshots
// ============================================================================

#[tokio::test]
async fn test_publish_failure_surfaces_and_marks_offline() {
    let mut config = grafana_config();
    config.flush_max_wait = Duration::from_secs(3600);

    let route = GrafanaNetRoute::with_publisher(
        "gn",
        Matcher::match_all(),
        config,
        Arc::new(FailingPublisher),
    )
    .unwrap();

    route.dispatch(Bytes::from_static(b"a 1 1"));
    let err = route.flush().await.unwrap_err();
    assert!(matches!(err, RouteError::Publish(_)));

    let snap = route.snapshot();
    assert!(!snap.dests[0].online);

    route.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_snapshot_shape() {
    let route = GrafanaNetRoute::new(
        "gn",
        Matcher::new("agg.", "", "").unwrap(),
        grafana_config(),
    )
    .unwrap();

    let snap = route.snapshot();
    assert_eq!(snap.kind, RouteKind::GrafanaNet);
    assert_eq!(snap.key, "gn");
    assert_eq!(snap.matcher.prefix(), "agg.");
    assert_eq!(snap.dests.len(), 1);
    assert_eq!(snap.dests[0].addr, "https://tsdb.example/metrics");
    assert!(!snap.dests[0].spool);

    route.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_single_destination_cannot_be_deleted() {
    let route = GrafanaNetRoute::new("gn", Matcher::match_all(), grafana_config()).unwrap();
    let err = route.del_destination(0).await.unwrap_err();
    assert!(matches!(err, RouteError::TooFewDestinations { min: 1 }));
    route.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_update_destination_index_guard() {
    let route = GrafanaNetRoute::new("gn", Matcher::match_all(), grafana_config()).unwrap();

    let mut opts = RouteOptions::new();
    opts.insert("prefix".into(), "x.".into());
    route.update_destination(0, &opts).await.unwrap();
    assert!(route.matches(b"x.y"));

    let err = route.update_destination(1, &opts).await.unwrap_err();
    assert!(matches!(err, RouteError::DestinationIndex { index: 1 }));

    route.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_discard_publisher_counts() {
    use crate::DiscardPublisher;

    let publisher = Arc::new(DiscardPublisher::default());
    let mut config = grafana_config();
    config.flush_max_num = 1;

    let route = GrafanaNetRoute::with_publisher(
        "gn",
        Matcher::match_all(),
        config,
        Arc::clone(&publisher) as Arc<dyn Publisher>,
    )
    .unwrap();

    route.dispatch(Bytes::from_static(b"a 1 1"));
    route.flush().await.unwrap();

    assert_eq!(publisher.batches(), 1);
    assert_eq!(publisher.lines(), 1);

    route.shutdown().await.unwrap();
}
