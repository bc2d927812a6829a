//! Destinations: the endpoints inside a route
//!
//! A destination owns a bounded line queue and a connection worker. The
//! route side only ever enqueues (non-blocking); the worker connects,
//! reconnects, and writes lines downstream. Backpressure is a counted drop
//! with rate-limited logging, never a stall on the caller.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;

use serde::Serialize;
use spindle_matcher::Matcher;

use crate::error::{Result, RouteError};
use crate::route::{apply_matcher_opts, RouteOptions};
use crate::DEST_QUEUE_SIZE;

/// Declarative description of a destination
#[derive(Debug, Clone)]
pub struct DestinationConfig {
    /// Downstream address (`host:port`)
    pub addr: String,
    /// Local matcher prefix component
    pub prefix: String,
    /// Local matcher substring component
    pub sub: String,
    /// Local matcher regex component
    pub regex: String,
    /// Whether records for this destination are spooled to disk when the
    /// connection is down (consumed by the spooling collaborator)
    pub spool: bool,
    /// Whether this destination speaks the pickle protocol
    pub pickle: bool,
    /// Line queue capacity
    pub queue_size: usize,
    /// Connection establishment timeout
    pub connect_timeout: Duration,
    /// Minimum wait between reconnection attempts
    pub reconnect_interval: Duration,
}

impl DestinationConfig {
    /// A destination with an address and defaults for everything else
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            prefix: String::new(),
            sub: String::new(),
            regex: String::new(),
            spool: false,
            pickle: false,
            queue_size: DEST_QUEUE_SIZE,
            connect_timeout: Duration::from_secs(10),
            reconnect_interval: Duration::from_secs(5),
        }
    }

    /// Set the local matcher components
    #[must_use]
    pub fn with_matcher(
        mut self,
        prefix: impl Into<String>,
        sub: impl Into<String>,
        regex: impl Into<String>,
    ) -> Self {
        self.prefix = prefix.into();
        self.sub = sub.into();
        self.regex = regex.into();
        self
    }

    /// Enable or disable spooling
    #[must_use]
    pub fn with_spool(mut self, spool: bool) -> Self {
        self.spool = spool;
        self
    }

    /// Enable or disable the pickle protocol flag
    #[must_use]
    pub fn with_pickle(mut self, pickle: bool) -> Self {
        self.pickle = pickle;
        self
    }

    /// Parse a declarative destination spec
    ///
    /// The spec is the address followed by `key=value` options:
    ///
    /// ```text
    /// graphite-a:2003 prefix=service. spool=true pickle=false
    /// ```
    ///
    /// Recognized options: `prefix`, `sub`, `regex`, `spool`, `pickle`.
    ///
    /// # Errors
    ///
    /// Rejects a missing address, malformed options, unknown option keys,
    /// and non-boolean values for `spool`/`pickle`.
    pub fn from_spec(spec: &str) -> Result<Self> {
        let mut tokens = spec.split_ascii_whitespace();
        let addr = tokens.next().ok_or_else(|| RouteError::InvalidDestination {
            spec: spec.to_string(),
            reason: "missing address".to_string(),
        })?;

        let mut config = Self::new(addr);
        for token in tokens {
            let (key, value) = token.split_once('=').ok_or_else(|| {
                RouteError::InvalidDestination {
                    spec: spec.to_string(),
                    reason: format!("expected key=value, got '{}'", token),
                }
            })?;
            match key {
                "prefix" => config.prefix = value.to_string(),
                "sub" => config.sub = value.to_string(),
                "regex" => config.regex = value.to_string(),
                "spool" => config.spool = parse_bool(key, value)?,
                "pickle" => config.pickle = parse_bool(key, value)?,
                _ => {
                    return Err(RouteError::InvalidDestination {
                        spec: spec.to_string(),
                        reason: format!("unknown option '{}'", key),
                    });
                }
            }
        }
        Ok(config)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(RouteError::InvalidOption {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Command sent to the connection worker
enum DestCmd {
    /// Write one record line
    Line(Bytes),
    /// Flush the connection and report the result
    Flush(oneshot::Sender<io::Result<()>>),
}

/// A running destination
///
/// Spawned by [`Destination::spawn`]; the worker task lives until
/// [`shutdown`](Destination::shutdown) or until every handle is dropped.
pub struct Destination {
    addr: String,
    matcher: ArcSwap<Matcher>,
    spool_dir: String,
    spool: bool,
    pickle: bool,
    online: Arc<AtomicBool>,
    tx: mpsc::Sender<DestCmd>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
    metrics: Arc<Metrics>,
    drop_logger: DropLogger,
}

impl Destination {
    /// Compile the local matcher and start the connection worker
    ///
    /// # Errors
    ///
    /// Fails if the matcher's regex component does not compile.
    pub fn spawn(config: DestinationConfig, spool_dir: impl Into<String>) -> Result<Arc<Self>> {
        let matcher = Matcher::new(&config.prefix, &config.sub, &config.regex)?;
        let (tx, rx) = mpsc::channel(config.queue_size);
        let online = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();
        let metrics = Arc::new(Metrics::default());

        let worker = Worker {
            addr: config.addr.clone(),
            online: Arc::clone(&online),
            connect_timeout: config.connect_timeout,
            reconnect_interval: config.reconnect_interval,
            metrics: Arc::clone(&metrics),
        };
        let handle = tokio::spawn(worker.run(rx, cancel.clone()));

        Ok(Arc::new(Self {
            addr: config.addr,
            matcher: ArcSwap::from_pointee(matcher),
            spool_dir: spool_dir.into(),
            spool: config.spool,
            pickle: config.pickle,
            online,
            tx,
            cancel,
            worker: Mutex::new(Some(handle)),
            metrics,
            drop_logger: DropLogger::new(),
        }))
    }

    /// The downstream address
    #[inline]
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Whether the worker currently holds a live connection
    #[inline]
    pub fn online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    /// Test the destination's local matcher
    #[inline]
    pub fn matches(&self, name: &[u8]) -> bool {
        self.matcher.load().matches(name)
    }

    /// Queue one line for delivery; never blocks
    ///
    /// A full queue is backpressure: the line is dropped, counted, and
    /// reported through rate-limited logging.
    pub fn enqueue(&self, line: Bytes) {
        match self.tx.try_send(DestCmd::Line(line)) {
            Ok(()) => {
                self.metrics.lines_queued.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                self.metrics.queue_full.fetch_add(1, Ordering::Relaxed);
                self.drop_logger.record(&self.addr);
            }
        }
    }

    /// Flush the connection through to the socket
    pub async fn flush(&self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(DestCmd::Flush(reply_tx))
            .await
            .map_err(|_| RouteError::WorkerGone)?;
        let result = reply_rx.await.map_err(|_| RouteError::WorkerGone)?;
        result.map_err(|e| RouteError::Flush(e.to_string()))
    }

    /// Stop the worker, draining queued lines best-effort
    pub async fn shutdown(&self) -> Result<()> {
        self.cancel.cancel();
        if let Some(handle) = self.worker.lock().await.take() {
            if let Err(e) = handle.await {
                tracing::warn!(dest = %self.addr, error = %e, "destination worker panicked");
            }
        }
        Ok(())
    }

    /// Update the local matcher from string options
    ///
    /// Recognized keys: `prefix`, `sub`, `regex`. The address is
    /// deliberately not updatable - a destination is replaced, not
    /// repointed.
    pub fn update(&self, opts: &RouteOptions) -> Result<()> {
        let next = apply_matcher_opts(&self.matcher.load(), opts)?;
        self.matcher.store(Arc::new(next));
        Ok(())
    }

    /// A deep, decoupled view of this destination
    pub fn snapshot(&self) -> DestinationSnapshot {
        DestinationSnapshot {
            matcher: Matcher::clone(&self.matcher.load()),
            addr: self.addr.clone(),
            spool_dir: self.spool_dir.clone(),
            spool: self.spool,
            pickle: self.pickle,
            online: self.online(),
        }
    }

    /// Point-in-time counters
    pub fn metrics(&self) -> DestinationMetricsSnapshot {
        self.metrics.snapshot()
    }
}

impl Drop for Destination {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Destination")
            .field("addr", &self.addr)
            .field("online", &self.online())
            .finish()
    }
}

/// Deep view of a destination
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DestinationSnapshot {
    /// The destination's local matcher
    pub matcher: Matcher,
    /// Downstream address
    pub addr: String,
    /// Spool directory
    pub spool_dir: String,
    /// Spool-to-disk flag
    pub spool: bool,
    /// Pickle protocol flag
    pub pickle: bool,
    /// Whether the connection was live at snapshot time
    pub online: bool,
}

/// Point-in-time destination counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DestinationMetricsSnapshot {
    /// Lines accepted into the queue
    pub lines_queued: u64,
    /// Lines rejected at the queue (backpressure)
    pub queue_full: u64,
    /// Lines written to the connection
    pub lines_sent: u64,
    /// Queued lines dropped by the worker (no connection, write failure)
    pub lines_dropped: u64,
    /// Write errors observed on the connection
    pub write_errors: u64,
    /// Successful (re)connections
    pub connects: u64,
}

#[derive(Debug, Default)]
struct Metrics {
    lines_queued: AtomicU64,
    queue_full: AtomicU64,
    lines_sent: AtomicU64,
    lines_dropped: AtomicU64,
    write_errors: AtomicU64,
    connects: AtomicU64,
}

impl Metrics {
    fn snapshot(&self) -> DestinationMetricsSnapshot {
        DestinationMetricsSnapshot {
            lines_queued: self.lines_queued.load(Ordering::Relaxed),
            queue_full: self.queue_full.load(Ordering::Relaxed),
            lines_sent: self.lines_sent.load(Ordering::Relaxed),
            lines_dropped: self.lines_dropped.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
        }
    }
}

/// Rate-limited drop logging: aggregates to at most one warning per second
/// instead of one per dropped line.
struct DropLogger {
    interval_drops: AtomicU64,
    last_log_ms: AtomicU64,
}

const DROP_LOG_INTERVAL_MS: u64 = 1000;

impl DropLogger {
    fn new() -> Self {
        Self {
            interval_drops: AtomicU64::new(0),
            last_log_ms: AtomicU64::new(0),
        }
    }

    fn record(&self, addr: &str) {
        self.interval_drops.fetch_add(1, Ordering::Relaxed);

        let now = now_ms();
        let last = self.last_log_ms.load(Ordering::Relaxed);
        if now.saturating_sub(last) < DROP_LOG_INTERVAL_MS {
            return;
        }
        if self
            .last_log_ms
            .compare_exchange(last, now, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        let drops = self.interval_drops.swap(0, Ordering::Relaxed);
        tracing::warn!(
            dest = %addr,
            dropped_lines = drops,
            "destination queue full, dropping lines"
        );
    }
}

fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The connection worker
struct Worker {
    addr: String,
    online: Arc<AtomicBool>,
    connect_timeout: Duration,
    reconnect_interval: Duration,
    metrics: Arc<Metrics>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<DestCmd>, cancel: CancellationToken) {
        let mut conn: Option<TcpStream> = None;
        let mut last_attempt: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                cmd = rx.recv() => match cmd {
                    None => break,
                    Some(DestCmd::Line(line)) => {
                        self.write_line(&mut conn, &mut last_attempt, &line).await;
                    }
                    Some(DestCmd::Flush(reply)) => {
                        let result = flush_conn(&mut conn).await;
                        let _ = reply.send(result);
                    }
                }
            }
        }

        // Drain whatever is still queued before tearing down.
        rx.close();
        while let Ok(cmd) = rx.try_recv() {
            match cmd {
                DestCmd::Line(line) => {
                    self.write_line(&mut conn, &mut last_attempt, &line).await;
                }
                DestCmd::Flush(reply) => {
                    let result = flush_conn(&mut conn).await;
                    let _ = reply.send(result);
                }
            }
        }

        if let Some(mut stream) = conn.take() {
            let _ = stream.flush().await;
            let _ = stream.shutdown().await;
        }
        self.online.store(false, Ordering::Relaxed);
        tracing::debug!(dest = %self.addr, "destination worker finished");
    }

    async fn write_line(
        &self,
        conn: &mut Option<TcpStream>,
        last_attempt: &mut Option<Instant>,
        line: &[u8],
    ) {
        if conn.is_none() {
            let due = last_attempt.map_or(true, |t| t.elapsed() >= self.reconnect_interval);
            if due {
                *last_attempt = Some(Instant::now());
                match self.connect().await {
                    Ok(stream) => {
                        self.online.store(true, Ordering::Relaxed);
                        self.metrics.connects.fetch_add(1, Ordering::Relaxed);
                        *conn = Some(stream);
                    }
                    Err(e) => {
                        self.online.store(false, Ordering::Relaxed);
                        tracing::warn!(dest = %self.addr, error = %e, "connection failed");
                    }
                }
            }
        }

        let Some(stream) = conn.as_mut() else {
            self.metrics.lines_dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let write = async {
            stream.write_all(line).await?;
            stream.write_all(b"\n").await
        };
        match write.await {
            Ok(()) => {
                self.metrics.lines_sent.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.metrics.write_errors.fetch_add(1, Ordering::Relaxed);
                self.metrics.lines_dropped.fetch_add(1, Ordering::Relaxed);
                self.online.store(false, Ordering::Relaxed);
                *conn = None;
                tracing::warn!(dest = %self.addr, error = %e, "write failed, dropping connection");
            }
        }
    }

    async fn connect(&self) -> io::Result<TcpStream> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connection timed out"))??;

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(dest = %self.addr, error = %e, "failed to set TCP_NODELAY");
        }
        tracing::debug!(dest = %self.addr, "connected");
        Ok(stream)
    }
}

async fn flush_conn(conn: &mut Option<TcpStream>) -> io::Result<()> {
    match conn.as_mut() {
        Some(stream) => stream.flush().await,
        None => Ok(()),
    }
}
