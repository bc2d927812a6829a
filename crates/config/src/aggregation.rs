//! Aggregation section

use serde::Deserialize;

/// One `[[aggregation]]` entry
///
/// # Example
///
/// ```toml
/// [[aggregation]]
/// function = "sum"
/// regex = '^stats\.(.*)$'
/// format = "aggregated.$1"
/// interval = 60
/// wait = 10
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Reduction function: `sum`, `avg`, `min`, or `max`
    pub function: String,

    /// Capture regex over metric names; doubles as the pre-filter
    pub regex: String,

    /// Output name template; `$1`… refer to regex captures
    pub format: String,

    /// Bucket width in seconds
    pub interval: u64,

    /// Grace period for late records, in seconds
    pub wait: u64,
}
