//! The destination fan-out policies
//!
//! `SendAllMatch`, `SendFirstMatch`, and `ConsistentHash` share one
//! internal shape: an atomically swappable `{matcher, destinations, ring}`
//! state read lock-free on the dispatch path, with mutations serialized by
//! a writer mutex - the same copy-on-write pattern the table itself uses.

use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

use spindle_matcher::Matcher;

use crate::destination::Destination;
use crate::error::{Result, RouteError};
use crate::ring::HashRing;
use crate::route::{apply_matcher_opts, metric_name, Route, RouteKind, RouteOptions, RouteSnapshot};

/// Swappable route state; replaced wholesale on every mutation
#[derive(Debug)]
struct State {
    matcher: Matcher,
    dests: Vec<Arc<Destination>>,
    /// Present only for consistent-hash routes; rebuilt on every
    /// destination change
    ring: Option<HashRing>,
}

impl State {
    fn new(kind: RouteKind, matcher: Matcher, dests: Vec<Arc<Destination>>) -> Self {
        let ring = match kind {
            RouteKind::ConsistentHash => {
                Some(HashRing::new(dests.iter().map(|d| d.addr().to_string())))
            }
            _ => None,
        };
        Self {
            matcher,
            dests,
            ring,
        }
    }
}

/// Shared implementation behind the three fan-out policies
#[derive(Debug)]
struct Base {
    key: String,
    kind: RouteKind,
    min_dests: usize,
    state: ArcSwap<State>,
    write_lock: Mutex<()>,
}

impl Base {
    fn new(
        key: String,
        kind: RouteKind,
        min_dests: usize,
        matcher: Matcher,
        dests: Vec<Arc<Destination>>,
    ) -> Result<Self> {
        if dests.len() < min_dests {
            return Err(RouteError::TooFewDestinations { min: min_dests });
        }
        Ok(Self {
            key,
            kind,
            min_dests,
            state: ArcSwap::from_pointee(State::new(kind, matcher, dests)),
            write_lock: Mutex::new(()),
        })
    }

    fn matches(&self, name: &[u8]) -> bool {
        self.state.load().matcher.matches(name)
    }

    fn snapshot(&self) -> RouteSnapshot {
        let state = self.state.load();
        RouteSnapshot {
            kind: self.kind,
            key: self.key.clone(),
            matcher: state.matcher.clone(),
            dests: state.dests.iter().map(|d| d.snapshot()).collect(),
        }
    }

    async fn flush(&self) -> Result<()> {
        let state = self.state.load_full();
        for dest in &state.dests {
            dest.flush().await?;
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        let state = self.state.load_full();
        let mut first_err = None;
        for dest in &state.dests {
            if let Err(e) = dest.shutdown().await {
                tracing::warn!(route = %self.key, dest = %dest.addr(), error = %e, "destination shutdown failed");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn update(&self, opts: &RouteOptions) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let state = self.state.load();
        let matcher = apply_matcher_opts(&state.matcher, opts)?;
        self.state
            .store(Arc::new(State::new(self.kind, matcher, state.dests.clone())));
        Ok(())
    }

    async fn del_destination(&self, index: usize) -> Result<()> {
        let removed = {
            let _guard = self.write_lock.lock().await;
            let state = self.state.load();
            if index >= state.dests.len() {
                return Err(RouteError::DestinationIndex { index });
            }
            if state.dests.len() <= self.min_dests {
                return Err(RouteError::TooFewDestinations {
                    min: self.min_dests,
                });
            }
            let mut dests = state.dests.clone();
            let removed = dests.remove(index);
            self.state
                .store(Arc::new(State::new(self.kind, state.matcher.clone(), dests)));
            removed
        };
        // swap first, then drain: no new lines can reach the destination
        removed.shutdown().await
    }

    async fn update_destination(&self, index: usize, opts: &RouteOptions) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let state = self.state.load();
        let dest = state
            .dests
            .get(index)
            .ok_or(RouteError::DestinationIndex { index })?;
        dest.update(opts)
    }
}

macro_rules! delegate_route_impl {
    ($type:ty, $kind:expr) => {
        #[async_trait]
        impl Route for $type {
            fn key(&self) -> &str {
                &self.base.key
            }

            fn kind(&self) -> RouteKind {
                $kind
            }

            fn matches(&self, name: &[u8]) -> bool {
                self.base.matches(name)
            }

            fn dispatch(&self, line: Bytes) {
                self.dispatch_line(line);
            }

            async fn flush(&self) -> Result<()> {
                self.base.flush().await
            }

            async fn shutdown(&self) -> Result<()> {
                self.base.shutdown().await
            }

            fn snapshot(&self) -> RouteSnapshot {
                self.base.snapshot()
            }

            async fn update(&self, opts: &RouteOptions) -> Result<()> {
                self.base.update(opts).await
            }

            async fn del_destination(&self, index: usize) -> Result<()> {
                self.base.del_destination(index).await
            }

            async fn update_destination(&self, index: usize, opts: &RouteOptions) -> Result<()> {
                self.base.update_destination(index, opts).await
            }
        }
    };
}

/// Delivers each record to every destination whose matcher accepts it
#[derive(Debug)]
pub struct SendAllMatch {
    base: Base,
}

impl SendAllMatch {
    /// Build the route; requires at least one destination
    pub fn new(
        key: impl Into<String>,
        matcher: Matcher,
        dests: Vec<Arc<Destination>>,
    ) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            base: Base::new(key.into(), RouteKind::SendAllMatch, 1, matcher, dests)?,
        }))
    }

    fn dispatch_line(&self, line: Bytes) {
        let state = self.base.state.load();
        let name = metric_name(&line);
        for dest in &state.dests {
            if dest.matches(name) {
                dest.enqueue(line.clone());
            }
        }
    }
}

delegate_route_impl!(SendAllMatch, RouteKind::SendAllMatch);

/// Delivers each record to the first destination whose matcher accepts it
pub struct SendFirstMatch {
    base: Base,
}

impl SendFirstMatch {
    /// Build the route; requires at least one destination
    pub fn new(
        key: impl Into<String>,
        matcher: Matcher,
        dests: Vec<Arc<Destination>>,
    ) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            base: Base::new(key.into(), RouteKind::SendFirstMatch, 1, matcher, dests)?,
        }))
    }

    fn dispatch_line(&self, line: Bytes) {
        let state = self.base.state.load();
        let name = metric_name(&line);
        for dest in &state.dests {
            if dest.matches(name) {
                dest.enqueue(line);
                return;
            }
        }
    }
}

delegate_route_impl!(SendFirstMatch, RouteKind::SendFirstMatch);

/// Delivers each record to the one destination its metric name hashes to
///
/// Destination matchers are ignored; membership is decided by the ring
/// alone, so the same name always lands on the same destination as long as
/// the destination set is unchanged.
#[derive(Debug)]
pub struct ConsistentHash {
    base: Base,
}

impl ConsistentHash {
    /// Build the route; requires at least two destinations
    pub fn new(
        key: impl Into<String>,
        matcher: Matcher,
        dests: Vec<Arc<Destination>>,
    ) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            base: Base::new(key.into(), RouteKind::ConsistentHash, 2, matcher, dests)?,
        }))
    }

    fn dispatch_line(&self, line: Bytes) {
        let state = self.base.state.load();
        let name = metric_name(&line);
        let Some(ring) = &state.ring else { return };
        if let Some(index) = ring.select(name) {
            state.dests[index].enqueue(line);
        }
    }
}

delegate_route_impl!(ConsistentHash, RouteKind::ConsistentHash);
