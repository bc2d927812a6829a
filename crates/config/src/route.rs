//! Route section

use serde::Deserialize;

/// One `[[route]]` entry
///
/// The `type` tag selects the policy and decides which of the remaining
/// fields apply. Overridable producer options are `Option`s so that an
/// explicit `false`/`0` is distinguishable from "not configured" - a
/// configured value always wins over the built-in default.
///
/// # Example
///
/// ```toml
/// [[route]]
/// type = "consistent-hash"
/// key = "storage"
/// prefix = "collected."
/// destinations = ["store-a:2003", "store-b:2003"]
///
/// [[route]]
/// type = "grafana-net"
/// key = "cloud"
/// addr = "https://tsdb.example/metrics"
/// api_key = "secret"
/// ssl_verify = false
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RouteConfig {
    /// Route type tag: `send-all-match`, `send-first-match`,
    /// `consistent-hash`, `grafana-net`, or `kafka-mdm`
    #[serde(rename = "type")]
    pub kind: String,

    /// Unique route key
    pub key: String,

    /// Route matcher prefix component
    pub prefix: String,

    /// Route matcher substring component
    pub substr: String,

    /// Route matcher regex component
    pub regex: String,

    /// Destination specs for the fan-out policies; each is an address
    /// followed by `key=value` options
    pub destinations: Vec<String>,

    /// Endpoint URL (grafana-net)
    pub addr: String,

    /// API key (grafana-net)
    pub api_key: String,

    /// Storage-schemas file (grafana-net, kafka-mdm)
    pub schemas_file: String,

    /// Spool to disk while the endpoint is unreachable (grafana-net)
    pub spool: Option<bool>,

    /// Verify the endpoint's TLS certificate (grafana-net)
    pub ssl_verify: Option<bool>,

    /// Line queue capacity (grafana-net, kafka-mdm)
    pub buf_size: Option<usize>,

    /// Flush once this many lines are pending (grafana-net, kafka-mdm)
    pub flush_max_num: Option<usize>,

    /// Flush pending lines at least this often, in milliseconds
    /// (grafana-net, kafka-mdm)
    pub flush_max_wait_ms: Option<u64>,

    /// Per-batch publish timeout in milliseconds (grafana-net, kafka-mdm)
    pub timeout_ms: Option<u64>,

    /// Concurrent producer connections (grafana-net)
    pub concurrency: Option<usize>,

    /// Organisation id (grafana-net, kafka-mdm)
    pub org_id: Option<i64>,

    /// Broker address (kafka-mdm)
    pub broker: String,

    /// Topic to produce to (kafka-mdm)
    pub topic: String,

    /// Compression codec name (kafka-mdm)
    pub codec: String,

    /// Partitioning scheme, `byOrg` or `bySeries` (kafka-mdm, mandatory)
    pub partition_by: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_fanout_route() {
        let config: RouteConfig = toml::from_str(
            r#"
type = "send-all-match"
key = "main"
prefix = "svc."
destinations = ["a:2003", "b:2003 spool=true"]
"#,
        )
        .unwrap();

        assert_eq!(config.kind, "send-all-match");
        assert_eq!(config.key, "main");
        assert_eq!(config.prefix, "svc.");
        assert_eq!(config.destinations.len(), 2);
        assert!(config.spool.is_none());
    }

    #[test]
    fn test_deserialize_grafana_net_route() {
        let config: RouteConfig = toml::from_str(
            r#"
type = "grafana-net"
key = "cloud"
addr = "https://tsdb.example/metrics"
api_key = "secret"
ssl_verify = false
spool = false
flush_max_num = 500
"#,
        )
        .unwrap();

        assert_eq!(config.kind, "grafana-net");
        assert_eq!(config.addr, "https://tsdb.example/metrics");
        // explicit false survives as a configured value
        assert_eq!(config.ssl_verify, Some(false));
        assert_eq!(config.spool, Some(false));
        assert_eq!(config.flush_max_num, Some(500));
        assert!(config.timeout_ms.is_none());
    }

    #[test]
    fn test_deserialize_kafka_mdm_route() {
        let config: RouteConfig = toml::from_str(
            r#"
type = "kafka-mdm"
key = "kafka"
broker = "broker:9092"
topic = "mdm"
partition_by = "bySeries"
codec = "snappy"
"#,
        )
        .unwrap();

        assert_eq!(config.kind, "kafka-mdm");
        assert_eq!(config.broker, "broker:9092");
        assert_eq!(config.topic, "mdm");
        assert_eq!(config.partition_by, "bySeries");
        assert_eq!(config.codec, "snappy");
    }

    #[test]
    fn test_unset_options_are_none() {
        let config: RouteConfig = toml::from_str("type = \"grafana-net\"").unwrap();
        assert!(config.spool.is_none());
        assert!(config.ssl_verify.is_none());
        assert!(config.buf_size.is_none());
        assert!(config.org_id.is_none());
    }
}
