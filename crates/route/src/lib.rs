//! Downstream delivery routes
//!
//! A route is the delivery half of the relay pipeline: it carries its own
//! [`Matcher`](spindle_matcher::Matcher), a set of destinations, and a
//! policy deciding which destination(s) receive a record line. The dispatch
//! table consumes routes exclusively through the [`Route`] trait.
//!
//! # Policies
//!
//! - [`SendAllMatch`] - every destination whose matcher accepts the record
//!   receives it
//! - [`SendFirstMatch`] - only the first accepting destination receives it
//! - [`ConsistentHash`] - a stable FNV hash ring over the destinations
//!   selects exactly one per metric name
//! - [`GrafanaNetRoute`] / [`KafkaMdmRoute`] - a single batched
//!   destination; the wire producer behind it is an external collaborator
//!   injected as a [`Publisher`]
//!
//! # Ownership
//!
//! Routes are running workers. Construction spawns every destination's
//! delivery task; handing the route to the table transfers shutdown
//! ownership to it. `dispatch` never blocks: a full destination queue is
//! backpressure, surfaced as a drop counter and a rate-limited warning.

mod batched;
mod destination;
mod error;
mod fanout;
mod ring;
mod route;

pub use batched::{
    BatchMetricsSnapshot, DiscardPublisher, GrafanaNetConfig, GrafanaNetRoute, KafkaMdmConfig,
    KafkaMdmRoute, PartitionBy, Publisher,
};
pub use destination::{
    Destination, DestinationConfig, DestinationMetricsSnapshot, DestinationSnapshot,
};
pub use error::{Result, RouteError};
pub use fanout::{ConsistentHash, SendAllMatch, SendFirstMatch};
pub use ring::HashRing;
pub use route::{metric_name, Route, RouteKind, RouteOptions, RouteSnapshot};

// Re-export the matcher type routes are built from
pub use spindle_matcher::Matcher;

/// Default capacity of a destination's line queue
pub const DEST_QUEUE_SIZE: usize = 1000;

#[cfg(test)]
mod batched_test;
