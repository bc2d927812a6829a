//! The table itself: hot path, feedback pump, and mutation surface

use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, Mutex};

use spindle_aggregator::Aggregator;
use spindle_matcher::Matcher;
use spindle_rewriter::Rewriter;
use spindle_route::{metric_name, Route, RouteOptions};

use crate::config::TableConfig;
use crate::error::{Result, TableError};
use crate::metrics::TableMetrics;
use crate::snapshot::TableSnapshot;
use crate::{TableMetricsSnapshot, FEEDBACK_QUEUE_SIZE};

/// The dispatch table
///
/// One per relay instance. Producers call [`dispatch`](Table::dispatch)
/// concurrently; the administrative surface mutates the pipeline live
/// underneath them. The only cross-task mutable state the hot path touches
/// is the atomic config cell and two relaxed counters.
pub struct Table {
    /// The current pipeline; readers load, writers swap
    config: ArcSwap<TableConfig>,
    /// Serializes all writers; readers never touch it
    write_lock: Mutex<()>,
    /// Where spooling destinations keep their on-disk queues; the table
    /// itself never reads it
    spool_dir: String,
    metrics: TableMetrics,
    /// Shared sender half of the feedback channel; aggregators get clones
    feedback: mpsc::Sender<Bytes>,
}

impl Table {
    /// Create an empty table and start its feedback pump
    ///
    /// The pump holds a weak reference: it exits when the feedback channel
    /// closes or the table itself is gone.
    pub fn new(spool_dir: impl Into<String>) -> Arc<Self> {
        let (feedback, rx) = mpsc::channel(FEEDBACK_QUEUE_SIZE);

        let table = Arc::new(Self {
            config: ArcSwap::from_pointee(TableConfig::default()),
            write_lock: Mutex::new(()),
            spool_dir: spool_dir.into(),
            metrics: TableMetrics::default(),
            feedback,
        });

        tokio::spawn(run_feedback_pump(Arc::downgrade(&table), rx));
        table
    }

    /// The spool directory configured for this relay instance
    #[inline]
    pub fn spool_dir(&self) -> &str {
        &self.spool_dir
    }

    /// A sender into the feedback channel, for aggregator construction
    pub fn feedback_sender(&self) -> mpsc::Sender<Bytes> {
        self.feedback.clone()
    }

    /// Point-in-time table counters
    pub fn metrics(&self) -> TableMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Run one record through the full pipeline
    ///
    /// `buf` holds a single record with no trailing whitespace; the table
    /// copies it before use, so the caller may reuse the buffer
    /// immediately. The entire pipeline runs against the one config
    /// generation loaded at the start - a concurrent mutation never
    /// half-applies.
    ///
    /// The only suspension point is the send into a full aggregator
    /// intake, which deliberately back-pressures the producer. Route
    /// delivery never blocks.
    pub async fn dispatch(&self, buf: &[u8]) {
        let mut fields = split_fields(buf);
        if fields.is_empty() {
            tracing::debug!("dropping empty record");
            return;
        }

        let config = self.config.load_full();

        for matcher in &config.blacklist {
            if matcher.matches(&fields[0]) {
                self.metrics.record_blacklisted();
                return;
            }
        }

        for aggregator in &config.aggregators {
            if aggregator.pre_match(&fields[0]) {
                aggregator.feed(fields.clone()).await;
            }
        }

        for rewriter in &config.rewriters {
            fields[0] = rewriter.rewrite(&fields[0]);
        }

        let line = join_fields(&fields);

        let mut routed = false;
        for route in &config.routes {
            if route.matches(&fields[0]) {
                routed = true;
                tracing::trace!(route = %route.key(), "sending to route");
                route.dispatch(line.clone());
            }
        }

        if !routed {
            self.metrics.record_unroutable();
            tracing::info!(record = %String::from_utf8_lossy(&line), "unroutable");
        }
    }

    /// Route one already-formatted record, skipping blacklist,
    /// aggregation, and rewriting
    ///
    /// This is the feedback half of the pipeline: aggregator output must
    /// reach the routes without being aggregated again. The metric name is
    /// the leading portion of `line` up to the first space.
    pub async fn dispatch_aggregate(&self, line: Bytes) {
        let config = self.config.load();
        let name = metric_name(&line);

        let mut routed = false;
        for route in &config.routes {
            if route.matches(name) {
                routed = true;
                tracing::trace!(route = %route.key(), "sending aggregate to route");
                route.dispatch(line.clone());
            }
        }

        if !routed {
            self.metrics.record_unroutable();
            tracing::info!(record = %String::from_utf8_lossy(&line), "unroutable");
        }
    }

    /// Look up a route by key
    pub fn get_route(&self, key: &str) -> Option<Arc<dyn Route>> {
        let config = self.config.load();
        config.routes.iter().find(|r| r.key() == key).cloned()
    }

    /// Append a route
    ///
    /// The route must already be running; the table owns its shutdown from
    /// here on.
    pub async fn add_route(&self, route: Arc<dyn Route>) {
        let _guard = self.write_lock.lock().await;
        let mut next = TableConfig::clone(&self.config.load());
        next.routes.push(route);
        self.config.store(Arc::new(next));
    }

    /// Append a blacklist entry
    pub async fn add_blacklist(&self, matcher: Matcher) {
        let _guard = self.write_lock.lock().await;
        let mut next = TableConfig::clone(&self.config.load());
        next.blacklist.push(matcher);
        self.config.store(Arc::new(next));
    }

    /// Append an aggregator
    ///
    /// The aggregator must already be running and already know the
    /// feedback channel; the table owns its shutdown from here on.
    pub async fn add_aggregator(&self, aggregator: Arc<Aggregator>) {
        let _guard = self.write_lock.lock().await;
        let mut next = TableConfig::clone(&self.config.load());
        next.aggregators.push(aggregator);
        self.config.store(Arc::new(next));
    }

    /// Append a rewriter
    pub async fn add_rewriter(&self, rewriter: Rewriter) {
        let _guard = self.write_lock.lock().await;
        let mut next = TableConfig::clone(&self.config.load());
        next.rewriters.push(rewriter);
        self.config.store(Arc::new(next));
    }

    /// Remove the aggregator at `index` and shut it down
    ///
    /// The swap happens first: once the new config is published no
    /// dispatch can reach the aggregator, and shutdown drains its open
    /// buckets into the feedback channel.
    pub async fn del_aggregator(&self, index: usize) -> Result<()> {
        let removed = {
            let _guard = self.write_lock.lock().await;
            let mut next = TableConfig::clone(&self.config.load());
            if index >= next.aggregators.len() {
                return Err(TableError::AggregatorIndex { index });
            }
            let removed = next.aggregators.remove(index);
            self.config.store(Arc::new(next));
            removed
        };
        removed.shutdown();
        Ok(())
    }

    /// Remove the blacklist entry at `index`
    pub async fn del_blacklist(&self, index: usize) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut next = TableConfig::clone(&self.config.load());
        if index >= next.blacklist.len() {
            return Err(TableError::BlacklistIndex { index });
        }
        next.blacklist.remove(index);
        self.config.store(Arc::new(next));
        Ok(())
    }

    /// Remove the rewriter at `index`
    pub async fn del_rewriter(&self, index: usize) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut next = TableConfig::clone(&self.config.load());
        if index >= next.rewriters.len() {
            return Err(TableError::RewriterIndex { index });
        }
        next.rewriters.remove(index);
        self.config.store(Arc::new(next));
        Ok(())
    }

    /// Remove the route with the given key and shut it down
    ///
    /// Idempotent: a key that does not exist is success. The route is
    /// removed from the config before its shutdown is drained; a shutdown
    /// failure leaves the route out of the table but is surfaced to the
    /// caller.
    pub async fn del_route(&self, key: &str) -> Result<()> {
        let removed = {
            let _guard = self.write_lock.lock().await;
            let mut next = TableConfig::clone(&self.config.load());
            let Some(position) = next.routes.iter().position(|r| r.key() == key) else {
                return Ok(());
            };
            let removed = next.routes.remove(position);
            self.config.store(Arc::new(next));
            removed
        };
        removed.shutdown().await?;
        Ok(())
    }

    /// Remove a destination from the route with the given key
    pub async fn del_destination(&self, key: &str, index: usize) -> Result<()> {
        let route = self
            .get_route(key)
            .ok_or_else(|| TableError::UnknownRoute { key: key.into() })?;
        route.del_destination(index).await?;
        Ok(())
    }

    /// Update the route with the given key from string options
    pub async fn update_route(&self, key: &str, opts: &RouteOptions) -> Result<()> {
        let route = self
            .get_route(key)
            .ok_or_else(|| TableError::UnknownRoute { key: key.into() })?;
        route.update(opts).await?;
        Ok(())
    }

    /// Update a destination of the route with the given key
    pub async fn update_destination(
        &self,
        key: &str,
        index: usize,
        opts: &RouteOptions,
    ) -> Result<()> {
        let route = self
            .get_route(key)
            .ok_or_else(|| TableError::UnknownRoute { key: key.into() })?;
        route.update_destination(index, opts).await?;
        Ok(())
    }

    /// Flush every route in order, stopping at the first failure
    pub async fn flush(&self) -> Result<()> {
        let config = self.config.load_full();
        for route in &config.routes {
            route.flush().await?;
        }
        Ok(())
    }

    /// Shut every route down in order and empty the route sequence
    ///
    /// The first failure is surfaced but the teardown is not rolled back:
    /// all routes are shut down and the empty config is stored regardless.
    /// Dispatch afterwards finds no routes; the feedback pump keeps
    /// running until the feedback channel closes.
    pub async fn shutdown(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut next = TableConfig::clone(&self.config.load());

        let mut first_err = None;
        for route in &next.routes {
            if let Err(e) = route.shutdown().await {
                tracing::warn!(route = %route.key(), error = %e, "route shutdown failed");
                first_err.get_or_insert(e);
            }
        }
        next.routes.clear();
        self.config.store(Arc::new(next));

        match first_err {
            Some(e) => Err(TableError::Route(e)),
            None => Ok(()),
        }
    }

    /// A deep, decoupled view of the whole table
    pub fn snapshot(&self) -> TableSnapshot {
        let config = self.config.load();
        TableSnapshot {
            rewriters: config.rewriters.clone(),
            aggregators: config.aggregators.iter().map(|a| a.snapshot()).collect(),
            blacklist: config.blacklist.clone(),
            routes: config.routes.iter().map(|r| r.snapshot()).collect(),
            spool_dir: self.spool_dir.clone(),
        }
    }

    /// The current pipeline generation (for diagnostics)
    pub fn config(&self) -> Arc<TableConfig> {
        self.config.load_full()
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let config = self.config.load();
        f.debug_struct("Table")
            .field("spool_dir", &self.spool_dir)
            .field("config", &*config)
            .finish()
    }
}

/// The feedback pump: drains aggregator output into the routing half of
/// the pipeline
///
/// Single consumer, no internal state. Calls `dispatch_aggregate`, never
/// `dispatch` - synthesized records must not be re-aggregated.
async fn run_feedback_pump(table: Weak<Table>, mut rx: mpsc::Receiver<Bytes>) {
    while let Some(line) = rx.recv().await {
        let Some(table) = table.upgrade() else {
            break;
        };
        table.dispatch_aggregate(line).await;
    }
    tracing::debug!("feedback pump finished");
}

/// Split a record into owned tokens on ASCII whitespace
pub(crate) fn split_fields(buf: &[u8]) -> Vec<Vec<u8>> {
    buf.split(|b| b.is_ascii_whitespace())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_vec())
        .collect()
}

/// Join tokens with single spaces into a finished line
pub(crate) fn join_fields(fields: &[Vec<u8>]) -> Bytes {
    let total: usize = fields.iter().map(|f| f.len()).sum::<usize>() + fields.len().saturating_sub(1);
    let mut out = BytesMut::with_capacity(total);
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.extend_from_slice(b" ");
        }
        out.extend_from_slice(field);
    }
    out.freeze()
}
