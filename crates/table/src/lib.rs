//! The dispatch table
//!
//! The [`Table`] is the single in-process object at the core of the relay:
//! it holds the ordered pipeline - blacklist, aggregators, rewriters,
//! routes - and applies it to every incoming record.
//!
//! # Architecture
//!
//! ```text
//! [Producers]                  [Table]                      [Routes]
//!    TCP ────┐                                           ┌──→ send-all-match ──→ dests
//!    UDP ────┼──→ dispatch ──→ blacklist ──→ rewriters ──┼──→ consistent-hash ──→ dests
//!    pickle ─┘         │                         ▲       └──→ grafana-net ──→ publisher
//!                      └──→ aggregators ──→ feedback pump
//! ```
//!
//! # Key design
//!
//! - **Copy-on-write config cell**: the whole pipeline lives in one
//!   immutable [`TableConfig`] held in an `ArcSwap`. The hot path loads it
//!   once per record and never takes a lock; every dispatch sees a single
//!   consistent pipeline from blacklist through routing.
//! - **Serialized writers**: all mutations share one async mutex, build a
//!   fresh config value, and store it atomically. In-flight dispatches
//!   complete under the config they loaded.
//! - **Swap-then-drain removal**: `del_route` / `del_aggregator` publish
//!   the shrunken config first and shut the removed collaborator down
//!   after, so no new records can race into it.
//! - **Feedback without loops**: aggregator output re-enters routing
//!   through [`Table::dispatch_aggregate`], which skips the blacklist,
//!   aggregation, and rewrite stages by construction.
//!
//! # Example
//!
//! ```ignore
//! use spindle_table::Table;
//!
//! let table = Table::new("spool");
//! table.add_route(route).await;
//! table.dispatch(b"service.api.requests 42 1700000000").await;
//! println!("{}", table.snapshot());
//! ```

mod config;
mod error;
mod init;
mod metrics;
mod snapshot;
mod table;

pub use config::TableConfig;
pub use error::{Result, TableError};
pub use init::{ImperativeError, ImperativeRunner, InitError, NoImperatives};
pub use metrics::TableMetricsSnapshot;
pub use snapshot::TableSnapshot;
pub use table::Table;

// Re-export the pipeline piece types for consumers that assemble tables
// programmatically
pub use spindle_aggregator::Aggregator;
pub use spindle_matcher::Matcher;
pub use spindle_rewriter::Rewriter;
pub use spindle_route::Route;

/// Capacity of the feedback channel between aggregators and the pump
pub const FEEDBACK_QUEUE_SIZE: usize = 1000;

#[cfg(test)]
mod init_test;
