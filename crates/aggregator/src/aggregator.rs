//! The aggregator handle and its worker task

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use regex::bytes::Regex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{AggregatorError, Result};
use crate::function::AggregateFn;
use crate::INPUT_QUEUE_SIZE;

/// A running aggregation worker
///
/// Construction compiles the capture regex and spawns the worker task; the
/// returned handle is the only way to reach it. The handle is cheap to
/// share behind an `Arc` and exposes:
///
/// - [`pre_match`](Aggregator::pre_match) - the hot-path pre-filter
/// - [`feed`](Aggregator::feed) - hand a pre-split record to the worker
/// - [`shutdown`](Aggregator::shutdown) - cancel the worker; it flushes
///   every remaining bucket on the way out
/// - [`snapshot`](Aggregator::snapshot) - the declarative fields, for
///   introspection and printing
pub struct Aggregator {
    fun: AggregateFn,
    pattern: String,
    regex: Regex,
    out_format: String,
    interval: u64,
    wait: u64,
    input: mpsc::Sender<Vec<Vec<u8>>>,
    cancel: CancellationToken,
    metrics: Arc<Metrics>,
}

impl Aggregator {
    /// Build an aggregator and start its worker
    ///
    /// `interval` and `wait` are in seconds. Synthesized records are sent
    /// into `feedback` as finished `"name value timestamp"` lines.
    ///
    /// # Errors
    ///
    /// Fails on an unknown function, an invalid regex, or a zero interval.
    pub fn new(
        fun: AggregateFn,
        pattern: &str,
        out_format: impl Into<String>,
        interval: u64,
        wait: u64,
        feedback: mpsc::Sender<Bytes>,
    ) -> Result<Arc<Self>> {
        if interval == 0 {
            return Err(AggregatorError::ZeroInterval);
        }
        let regex = Regex::new(pattern).map_err(|source| AggregatorError::InvalidRegex {
            pattern: pattern.to_string(),
            source,
        })?;

        let out_format = out_format.into();
        let (input, rx) = mpsc::channel(INPUT_QUEUE_SIZE);
        let cancel = CancellationToken::new();
        let metrics = Arc::new(Metrics::default());

        let worker = Worker {
            fun,
            regex: regex.clone(),
            out_format: out_format.clone().into_bytes(),
            interval,
            wait,
            feedback,
            metrics: Arc::clone(&metrics),
            buckets: HashMap::new(),
        };
        tokio::spawn(run_worker(worker, rx, cancel.clone()));

        Ok(Arc::new(Self {
            fun,
            pattern: pattern.to_string(),
            regex,
            out_format,
            interval,
            wait,
            input,
            cancel,
            metrics,
        }))
    }

    /// Fast pre-filter: does this metric name concern the aggregator?
    ///
    /// The capture regex doubles as the pre-filter, so a record is only
    /// handed over when the worker will actually be able to bucket it.
    #[inline]
    pub fn pre_match(&self, name: &[u8]) -> bool {
        self.regex.is_match(name)
    }

    /// Hand a pre-split record to the worker
    ///
    /// Blocks (asynchronously) while the input queue is full - this is
    /// deliberate backpressure toward the producer. Records arriving after
    /// shutdown are dropped.
    pub async fn feed(&self, fields: Vec<Vec<u8>>) {
        if self.input.send(fields).await.is_err() {
            tracing::debug!("aggregator input closed, dropping record");
        }
    }

    /// Cancel the worker
    ///
    /// Returns immediately; the worker flushes all remaining buckets into
    /// the feedback channel and then exits. Safe to call more than once.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// The declarative fields, decoupled from the live worker
    pub fn snapshot(&self) -> AggregatorSnapshot {
        AggregatorSnapshot {
            function: self.fun,
            regex: self.pattern.clone(),
            out_format: self.out_format.clone(),
            interval: self.interval,
            wait: self.wait,
        }
    }

    /// Point-in-time counters
    pub fn metrics(&self) -> AggregatorMetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl Drop for Aggregator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("function", &self.fun)
            .field("regex", &self.pattern)
            .field("out_format", &self.out_format)
            .field("interval", &self.interval)
            .field("wait", &self.wait)
            .finish()
    }
}

/// Declarative view of an aggregator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatorSnapshot {
    /// Reduction function
    pub function: AggregateFn,
    /// Capture regex source
    pub regex: String,
    /// Output name template (`$1`… refer to regex captures)
    pub out_format: String,
    /// Bucket width in seconds
    pub interval: u64,
    /// Grace period for late records, in seconds
    pub wait: u64,
}

/// Point-in-time aggregator counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregatorMetricsSnapshot {
    /// Records accepted into buckets
    pub records_in: u64,
    /// Records dropped for missing or unparsable value/timestamp
    pub records_malformed: u64,
    /// Synthesized records emitted into the feedback channel
    pub records_out: u64,
}

#[derive(Debug, Default)]
struct Metrics {
    records_in: AtomicU64,
    records_malformed: AtomicU64,
    records_out: AtomicU64,
}

impl Metrics {
    fn snapshot(&self) -> AggregatorMetricsSnapshot {
        AggregatorMetricsSnapshot {
            records_in: self.records_in.load(Ordering::Relaxed),
            records_malformed: self.records_malformed.load(Ordering::Relaxed),
            records_out: self.records_out.load(Ordering::Relaxed),
        }
    }
}

/// One open time window
#[derive(Debug, Clone, Copy)]
struct Bucket {
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl Bucket {
    fn seed(value: f64) -> Self {
        Self {
            count: 1,
            sum: value,
            min: value,
            max: value,
        }
    }

    fn update(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn reduce(&self, fun: AggregateFn) -> f64 {
        match fun {
            AggregateFn::Sum => self.sum,
            AggregateFn::Avg => self.sum / self.count as f64,
            AggregateFn::Min => self.min,
            AggregateFn::Max => self.max,
        }
    }
}

struct Worker {
    fun: AggregateFn,
    regex: Regex,
    out_format: Vec<u8>,
    interval: u64,
    wait: u64,
    feedback: mpsc::Sender<Bytes>,
    metrics: Arc<Metrics>,
    buckets: HashMap<(String, u64), Bucket>,
}

async fn run_worker(
    mut worker: Worker,
    mut rx: mpsc::Receiver<Vec<Vec<u8>>>,
    cancel: CancellationToken,
) {
    // first flush pass one second in, then every second
    let period = Duration::from_secs(1);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            maybe = rx.recv() => match maybe {
                Some(fields) => worker.ingest(fields),
                None => break,
            },
            _ = ticker.tick() => worker.flush_due(now_unix()).await,
        }
    }

    worker.flush_all().await;
    tracing::debug!(open_buckets = worker.buckets.len(), "aggregator worker finished");
}

impl Worker {
    /// Bucket one pre-split record
    fn ingest(&mut self, fields: Vec<Vec<u8>>) {
        let (name, value, ts) = match parse_record(&fields) {
            Some(parts) => parts,
            None => {
                self.metrics.records_malformed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    record = %preview(&fields),
                    "dropping malformed record at aggregation"
                );
                return;
            }
        };

        let caps = match self.regex.captures(name) {
            Some(caps) => caps,
            // pre_match passed but the name raced a config change; not ours
            None => return,
        };

        let mut out_name = Vec::with_capacity(self.out_format.len());
        caps.expand(&self.out_format, &mut out_name);
        let out_name = String::from_utf8_lossy(&out_name).into_owned();

        let bucket_ts = ts - ts % self.interval;
        self.buckets
            .entry((out_name, bucket_ts))
            .and_modify(|b| b.update(value))
            .or_insert_with(|| Bucket::seed(value));
        self.metrics.records_in.fetch_add(1, Ordering::Relaxed);
    }

    /// Emit every bucket whose window plus grace period has passed
    async fn flush_due(&mut self, now: u64) {
        let mut due: Vec<(String, u64)> = self
            .buckets
            .keys()
            .filter(|(_, bucket_ts)| bucket_ts + self.interval + self.wait <= now)
            .cloned()
            .collect();
        due.sort();

        for key in due {
            if let Some(bucket) = self.buckets.remove(&key) {
                self.emit(&key.0, key.1, bucket).await;
            }
        }
    }

    /// Emit everything, regardless of age (shutdown path)
    async fn flush_all(&mut self) {
        let mut keys: Vec<(String, u64)> = self.buckets.keys().cloned().collect();
        keys.sort();
        for key in keys {
            if let Some(bucket) = self.buckets.remove(&key) {
                self.emit(&key.0, key.1, bucket).await;
            }
        }
    }

    async fn emit(&self, name: &str, bucket_ts: u64, bucket: Bucket) {
        let value = bucket.reduce(self.fun);
        let line = format!("{} {} {}", name, format_value(value), bucket_ts);
        if self.feedback.send(Bytes::from(line)).await.is_err() {
            tracing::warn!(metric = %name, "feedback channel closed, dropping aggregate");
            return;
        }
        self.metrics.records_out.fetch_add(1, Ordering::Relaxed);
    }
}

/// Extract (name, value, timestamp) from a pre-split record
fn parse_record(fields: &[Vec<u8>]) -> Option<(&[u8], f64, u64)> {
    if fields.len() < 3 {
        return None;
    }
    let value: f64 = std::str::from_utf8(&fields[1]).ok()?.parse().ok()?;
    let ts: u64 = std::str::from_utf8(&fields[2]).ok()?.parse().ok()?;
    Some((&fields[0], value, ts))
}

/// Render a value the way graphite tooling expects: integral values
/// without a trailing `.0`.
fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Lossy rendering of a record for log lines
fn preview(fields: &[Vec<u8>]) -> String {
    let joined: Vec<String> = fields
        .iter()
        .map(|f| String::from_utf8_lossy(f).into_owned())
        .collect();
    joined.join(" ")
}
