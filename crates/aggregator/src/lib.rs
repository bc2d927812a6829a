//! Time-windowed metric aggregation
//!
//! An [`Aggregator`] consumes pre-split metric records on a bounded input
//! channel, groups them into time buckets keyed by a regex capture of the
//! metric name, and periodically emits one synthesized record per expired
//! bucket into a shared feedback channel. The relay's dispatch table routes
//! those synthesized records like any other traffic (without re-aggregating
//! them).
//!
//! # Design
//!
//! - The worker task is spawned at construction; the table adopts a
//!   *running* aggregator and owns its shutdown.
//! - The input channel is bounded: a full intake back-pressures the
//!   producer, which is the only blocking site on the relay's hot path.
//! - Buckets expire once `bucket_ts + interval + wait` is in the past;
//!   `wait` is the grace period for late records.
//! - [`Aggregator::shutdown`] is synchronous and cooperative: it cancels
//!   the worker, which flushes every remaining bucket before exiting.
//!
//! # Example
//!
//! ```ignore
//! let (feedback_tx, feedback_rx) = tokio::sync::mpsc::channel(1024);
//! let agg = Aggregator::new(
//!     AggregateFn::Sum,
//!     r"^metrics\.(.*)$",
//!     "aggregated.$1",
//!     60,
//!     10,
//!     feedback_tx,
//! )?;
//!
//! if agg.pre_match(b"metrics.requests") {
//!     agg.feed(fields).await;
//! }
//! ```

mod aggregator;
mod error;
mod function;

pub use aggregator::{Aggregator, AggregatorMetricsSnapshot, AggregatorSnapshot};
pub use error::{AggregatorError, Result};
pub use function::AggregateFn;

/// Capacity of each aggregator's input channel
pub const INPUT_QUEUE_SIZE: usize = 1000;
