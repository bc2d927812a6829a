//! Batched single-destination routes
//!
//! `grafana-net` and `kafka-mdm` routes buffer record lines and flush them
//! in batches, bounded by count and by age. The wire producer behind each
//! batch - an HTTP client, a Kafka producer - is an external collaborator
//! injected as a [`Publisher`]; this crate owns only the queueing and
//! batching half. The default publisher discards and counts, which keeps a
//! freshly configured route harmless until a real producer is wired in.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use spindle_matcher::Matcher;

use crate::destination::DestinationSnapshot;
use crate::error::{Result, RouteError};
use crate::route::{apply_matcher_opts, Route, RouteKind, RouteOptions, RouteSnapshot};

/// Receives finished batches of record lines
///
/// Implementations are the actual wire producers (HTTP poster, Kafka
/// producer); they live outside this workspace and are injected at route
/// construction.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Deliver one batch downstream
    async fn publish(
        &self,
        lines: Vec<Bytes>,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Publisher that discards every batch, counting what it saw
///
/// The default for routes constructed without a wire producer.
#[derive(Debug, Default)]
pub struct DiscardPublisher {
    batches: AtomicU64,
    lines: AtomicU64,
}

impl DiscardPublisher {
    /// Batches discarded so far
    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    /// Lines discarded so far
    pub fn lines(&self) -> u64 {
        self.lines.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Publisher for DiscardPublisher {
    async fn publish(
        &self,
        lines: Vec<Bytes>,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.lines.fetch_add(lines.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

/// Which field of a record keys the Kafka partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PartitionBy {
    /// Partition by organisation id
    ByOrg,
    /// Partition by series name
    BySeries,
}

impl PartitionBy {
    /// The configuration spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ByOrg => "byOrg",
            Self::BySeries => "bySeries",
        }
    }
}

impl FromStr for PartitionBy {
    type Err = RouteError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "byOrg" => Ok(Self::ByOrg),
            "bySeries" => Ok(Self::BySeries),
            other => Err(RouteError::InvalidPartitionBy {
                value: other.to_string(),
            }),
        }
    }
}

/// Options for a grafana-net route
#[derive(Debug, Clone)]
pub struct GrafanaNetConfig {
    /// Endpoint URL
    pub addr: String,
    /// API key presented to the endpoint
    pub api_key: String,
    /// Storage-schemas file consumed by the producer
    pub schemas_file: String,
    /// Spool to disk while the endpoint is unreachable
    pub spool: bool,
    /// Verify the endpoint's TLS certificate
    pub ssl_verify: bool,
    /// Line queue capacity
    pub buf_size: usize,
    /// Flush once this many lines are pending
    pub flush_max_num: usize,
    /// Flush pending lines at least this often
    pub flush_max_wait: Duration,
    /// Per-batch publish timeout
    pub timeout: Duration,
    /// Concurrent connections the producer may use
    pub concurrency: usize,
    /// Organisation id stamped on outgoing data
    pub org_id: i64,
}

impl GrafanaNetConfig {
    /// Config with the documented defaults
    pub fn new(addr: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            api_key: api_key.into(),
            schemas_file: String::new(),
            spool: false,
            ssl_verify: true,
            buf_size: 10_000_000,
            flush_max_num: 10_000,
            flush_max_wait: Duration::from_millis(500),
            timeout: Duration::from_millis(5000),
            concurrency: 10,
            org_id: 1,
        }
    }
}

/// Options for a kafka-mdm route
#[derive(Debug, Clone)]
pub struct KafkaMdmConfig {
    /// Broker address
    pub broker: String,
    /// Topic to produce to
    pub topic: String,
    /// Compression codec name
    pub codec: String,
    /// Storage-schemas file consumed by the producer
    pub schemas_file: String,
    /// Partitioning scheme; mandatory
    pub partition_by: PartitionBy,
    /// Organisation id stamped on outgoing data
    pub org_id: i64,
    /// Line queue capacity
    pub buf_size: usize,
    /// Flush once this many lines are pending
    pub flush_max_num: usize,
    /// Flush pending lines at least this often
    pub flush_max_wait: Duration,
    /// Per-batch publish timeout
    pub timeout: Duration,
}

impl KafkaMdmConfig {
    /// Config with the documented defaults
    pub fn new(
        broker: impl Into<String>,
        topic: impl Into<String>,
        partition_by: PartitionBy,
    ) -> Self {
        Self {
            broker: broker.into(),
            topic: topic.into(),
            codec: String::new(),
            schemas_file: String::new(),
            partition_by,
            org_id: 1,
            buf_size: 10_000_000,
            flush_max_num: 10_000,
            flush_max_wait: Duration::from_millis(500),
            timeout: Duration::from_millis(2000),
        }
    }
}

/// Command sent to the batching worker
enum BatchCmd {
    Line(Bytes),
    Flush(oneshot::Sender<Result<()>>),
}

/// Shared queue/batch core behind the two batched routes
#[derive(Debug)]
struct Batched {
    key: String,
    kind: RouteKind,
    /// Address shown as the single destination in snapshots
    addr: String,
    spool: bool,
    matcher: ArcSwap<Matcher>,
    online: Arc<AtomicBool>,
    tx: mpsc::Sender<BatchCmd>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    metrics: Arc<BatchMetrics>,
}

#[derive(Debug, Default)]
struct BatchMetrics {
    lines_in: AtomicU64,
    lines_dropped: AtomicU64,
    batches_published: AtomicU64,
    lines_published: AtomicU64,
    publish_errors: AtomicU64,
}

impl BatchMetrics {
    fn snapshot(&self) -> BatchMetricsSnapshot {
        BatchMetricsSnapshot {
            lines_in: self.lines_in.load(Ordering::Relaxed),
            lines_dropped: self.lines_dropped.load(Ordering::Relaxed),
            batches_published: self.batches_published.load(Ordering::Relaxed),
            lines_published: self.lines_published.load(Ordering::Relaxed),
            publish_errors: self.publish_errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counters for a batched route
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchMetricsSnapshot {
    /// Lines accepted into the queue
    pub lines_in: u64,
    /// Lines rejected at the queue (backpressure)
    pub lines_dropped: u64,
    /// Batches handed to the publisher successfully
    pub batches_published: u64,
    /// Lines across all published batches
    pub lines_published: u64,
    /// Failed or timed-out publishes
    pub publish_errors: u64,
}

impl Batched {
    #[allow(clippy::too_many_arguments)]
    fn start(
        key: String,
        kind: RouteKind,
        addr: String,
        spool: bool,
        matcher: Matcher,
        publisher: Arc<dyn Publisher>,
        buf_size: usize,
        flush_max_num: usize,
        flush_max_wait: Duration,
        timeout: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(buf_size.max(1));
        let online = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();
        let metrics = Arc::new(BatchMetrics::default());

        let worker = BatchWorker {
            key: key.clone(),
            publisher,
            flush_max_num: flush_max_num.max(1),
            flush_max_wait,
            timeout,
            online: Arc::clone(&online),
            metrics: Arc::clone(&metrics),
        };
        let handle = tokio::spawn(worker.run(rx, cancel.clone()));

        Self {
            key,
            kind,
            addr,
            spool,
            matcher: ArcSwap::from_pointee(matcher),
            online,
            tx,
            cancel,
            worker: Mutex::new(Some(handle)),
            metrics,
        }
    }

    fn dispatch(&self, line: Bytes) {
        match self.tx.try_send(BatchCmd::Line(line)) {
            Ok(()) => {
                self.metrics.lines_in.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.metrics.lines_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    async fn flush(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(BatchCmd::Flush(reply_tx))
            .await
            .map_err(|_| RouteError::WorkerGone)?;
        reply_rx.await.map_err(|_| RouteError::WorkerGone)?
    }

    async fn shutdown(&self) -> Result<()> {
        self.cancel.cancel();
        if let Some(handle) = self.worker.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::warn!(route = %self.key, error = %e, "batch worker panicked");
            }
        }
        Ok(())
    }

    fn snapshot(&self, spool_dir: &str) -> RouteSnapshot {
        RouteSnapshot {
            kind: self.kind,
            key: self.key.clone(),
            matcher: Matcher::clone(&self.matcher.load()),
            dests: vec![DestinationSnapshot {
                matcher: Matcher::match_all(),
                addr: self.addr.clone(),
                spool_dir: spool_dir.to_string(),
                spool: self.spool,
                pickle: false,
                online: self.online.load(Ordering::Relaxed),
            }],
        }
    }

    fn update_matcher(&self, opts: &RouteOptions) -> Result<()> {
        let next = apply_matcher_opts(&self.matcher.load(), opts)?;
        self.matcher.store(Arc::new(next));
        Ok(())
    }
}

impl Drop for Batched {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// The batching worker: accumulates lines, publishes on size or age
struct BatchWorker {
    key: String,
    publisher: Arc<dyn Publisher>,
    flush_max_num: usize,
    flush_max_wait: Duration,
    timeout: Duration,
    online: Arc<AtomicBool>,
    metrics: Arc<BatchMetrics>,
}

impl BatchWorker {
    async fn run(self, mut rx: mpsc::Receiver<BatchCmd>, cancel: CancellationToken) {
        let mut pending: Vec<Bytes> = Vec::with_capacity(self.flush_max_num);
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.flush_max_wait,
            self.flush_max_wait,
        );
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                cmd = rx.recv() => match cmd {
                    None => break,
                    Some(BatchCmd::Line(line)) => {
                        pending.push(line);
                        if pending.len() >= self.flush_max_num {
                            let _ = self.publish(&mut pending).await;
                        }
                    }
                    Some(BatchCmd::Flush(reply)) => {
                        let result = self.publish(&mut pending).await;
                        let _ = reply.send(result);
                    }
                },
                _ = ticker.tick() => {
                    if !pending.is_empty() {
                        let _ = self.publish(&mut pending).await;
                    }
                }
            }
        }

        // drain queued commands, then push out the final batch
        rx.close();
        while let Ok(cmd) = rx.try_recv() {
            match cmd {
                BatchCmd::Line(line) => pending.push(line),
                BatchCmd::Flush(reply) => {
                    let result = self.publish(&mut pending).await;
                    let _ = reply.send(result);
                }
            }
        }
        let _ = self.publish(&mut pending).await;
        tracing::debug!(route = %self.key, "batch worker finished");
    }

    async fn publish(&self, pending: &mut Vec<Bytes>) -> Result<()> {
        if pending.is_empty() {
            return Ok(());
        }
        let batch = std::mem::take(pending);
        let count = batch.len();

        match tokio::time::timeout(self.timeout, self.publisher.publish(batch)).await {
            Ok(Ok(())) => {
                self.online.store(true, Ordering::Relaxed);
                self.metrics.batches_published.fetch_add(1, Ordering::Relaxed);
                self.metrics
                    .lines_published
                    .fetch_add(count as u64, Ordering::Relaxed);
                Ok(())
            }
            Ok(Err(e)) => {
                self.online.store(false, Ordering::Relaxed);
                self.metrics.publish_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(route = %self.key, lines = count, error = %e, "batch publish failed");
                Err(RouteError::Publish(e.to_string()))
            }
            Err(_) => {
                self.online.store(false, Ordering::Relaxed);
                self.metrics.publish_errors.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(route = %self.key, lines = count, "batch publish timed out");
                Err(RouteError::Publish("timed out".to_string()))
            }
        }
    }
}

macro_rules! batched_route_impl {
    ($type:ty, $kind:expr) => {
        #[async_trait]
        impl Route for $type {
            fn key(&self) -> &str {
                &self.inner.key
            }

            fn kind(&self) -> RouteKind {
                $kind
            }

            fn matches(&self, name: &[u8]) -> bool {
                self.inner.matcher.load().matches(name)
            }

            fn dispatch(&self, line: Bytes) {
                self.inner.dispatch(line);
            }

            async fn flush(&self) -> Result<()> {
                self.inner.flush().await
            }

            async fn shutdown(&self) -> Result<()> {
                self.inner.shutdown().await
            }

            fn snapshot(&self) -> RouteSnapshot {
                self.inner.snapshot(&self.spool_dir())
            }

            async fn update(&self, opts: &RouteOptions) -> Result<()> {
                self.inner.update_matcher(opts)
            }

            async fn del_destination(&self, _index: usize) -> Result<()> {
                // the single destination is the route; delete the route instead
                Err(RouteError::TooFewDestinations { min: 1 })
            }

            async fn update_destination(&self, index: usize, opts: &RouteOptions) -> Result<()> {
                if index != 0 {
                    return Err(RouteError::DestinationIndex { index });
                }
                self.inner.update_matcher(opts)
            }
        }
    };
}

/// Route batching lines toward a grafana.net-style HTTP endpoint
#[derive(Debug)]
pub struct GrafanaNetRoute {
    inner: Batched,
    config: GrafanaNetConfig,
}

impl GrafanaNetRoute {
    /// Build with the discarding default publisher
    pub fn new(key: impl Into<String>, matcher: Matcher, config: GrafanaNetConfig) -> Result<Arc<Self>> {
        Self::with_publisher(key, matcher, config, Arc::new(DiscardPublisher::default()))
    }

    /// Build with a wire producer
    ///
    /// # Errors
    ///
    /// Rejects an empty `addr` or `api_key`.
    pub fn with_publisher(
        key: impl Into<String>,
        matcher: Matcher,
        config: GrafanaNetConfig,
        publisher: Arc<dyn Publisher>,
    ) -> Result<Arc<Self>> {
        if config.addr.is_empty() {
            return Err(RouteError::MissingField { field: "addr" });
        }
        if config.api_key.is_empty() {
            return Err(RouteError::MissingField { field: "api_key" });
        }

        let inner = Batched::start(
            key.into(),
            RouteKind::GrafanaNet,
            config.addr.clone(),
            config.spool,
            matcher,
            publisher,
            config.buf_size,
            config.flush_max_num,
            config.flush_max_wait,
            config.timeout,
        );
        Ok(Arc::new(Self { inner, config }))
    }

    /// The route's configuration
    pub fn config(&self) -> &GrafanaNetConfig {
        &self.config
    }

    /// Point-in-time counters
    pub fn metrics(&self) -> BatchMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    fn spool_dir(&self) -> String {
        String::new()
    }
}

batched_route_impl!(GrafanaNetRoute, RouteKind::GrafanaNet);

/// Route batching lines toward a Kafka topic
#[derive(Debug)]
pub struct KafkaMdmRoute {
    inner: Batched,
    config: KafkaMdmConfig,
}

impl KafkaMdmRoute {
    /// Build with the discarding default publisher
    pub fn new(key: impl Into<String>, matcher: Matcher, config: KafkaMdmConfig) -> Result<Arc<Self>> {
        Self::with_publisher(key, matcher, config, Arc::new(DiscardPublisher::default()))
    }

    /// Build with a wire producer
    ///
    /// # Errors
    ///
    /// Rejects an empty `broker` or `topic`.
    pub fn with_publisher(
        key: impl Into<String>,
        matcher: Matcher,
        config: KafkaMdmConfig,
        publisher: Arc<dyn Publisher>,
    ) -> Result<Arc<Self>> {
        if config.broker.is_empty() {
            return Err(RouteError::MissingField { field: "broker" });
        }
        if config.topic.is_empty() {
            return Err(RouteError::MissingField { field: "topic" });
        }

        let addr = format!("{}/{}", config.broker, config.topic);
        let inner = Batched::start(
            key.into(),
            RouteKind::KafkaMdm,
            addr,
            false,
            matcher,
            publisher,
            config.buf_size,
            config.flush_max_num,
            config.flush_max_wait,
            config.timeout,
        );
        Ok(Arc::new(Self { inner, config }))
    }

    /// The route's configuration
    pub fn config(&self) -> &KafkaMdmConfig {
        &self.config
    }

    /// Point-in-time counters
    pub fn metrics(&self) -> BatchMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    fn spool_dir(&self) -> String {
        String::new()
    }
}

batched_route_impl!(KafkaMdmRoute, RouteKind::KafkaMdm);
