//! Consistent-hash ring over destinations
//!
//! Each destination contributes a fixed number of replicated points hashed
//! from its address; a metric name hashes to the first point at or after
//! it on the ring. Selection depends only on the address list, so it is
//! stable across table snapshots and process restarts.

use std::hash::Hasher;

use fnv::FnvHasher;

/// Replicated points per destination; more points smooth the distribution
const POINTS_PER_DEST: usize = 100;

/// A precomputed hash ring mapping metric names to destination indices
#[derive(Debug, Clone)]
pub struct HashRing {
    /// Sorted (point, destination index) pairs
    points: Vec<(u64, usize)>,
}

impl HashRing {
    /// Build a ring from destination addresses, in destination order
    pub fn new<I, S>(addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut points = Vec::new();
        for (index, addr) in addrs.into_iter().enumerate() {
            for replica in 0..POINTS_PER_DEST {
                let point = hash(format!("{}:{}", addr.as_ref(), replica).as_bytes());
                points.push((point, index));
            }
        }
        points.sort_unstable();
        Self { points }
    }

    /// Select the destination index for a metric name
    ///
    /// Returns `None` only for an empty ring.
    pub fn select(&self, name: &[u8]) -> Option<usize> {
        if self.points.is_empty() {
            return None;
        }
        let target = hash(name);
        let at = self
            .points
            .partition_point(|&(point, _)| point < target);
        let (_, index) = self.points[at % self.points.len()];
        Some(index)
    }

    /// Number of points on the ring
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the ring has no points
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

fn hash(data: &[u8]) -> u64 {
    let mut hasher = FnvHasher::default();
    hasher.write(data);
    hasher.finish()
}
