//! Shared constants for the nettest probes
//!
//! Defaults applied when a configuration key is missing, and the names
//! under which measurements are exported.

// ============================================================================
// Probe Defaults (`latency` section)
// ============================================================================

/// Host probed when `target_ip` is not configured
pub const DEFAULT_TARGET_IP: &str = "8.8.8.8";

/// Number of echo requests sent per run
pub const DEFAULT_NUM_PACKETS: u32 = 50;

/// Per-packet reply timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: f64 = 1.0;

/// Percentiles computed for the latency and jitter series
pub const DEFAULT_PERCENTILES: [f64; 2] = [5.0, 95.0];

// ============================================================================
// Metrics Backend Defaults (`influxdb` section)
// ============================================================================

/// InfluxDB host
pub const DEFAULT_INFLUX_HOST: &str = "localhost";

/// InfluxDB HTTP API port
pub const DEFAULT_INFLUX_PORT: u16 = 8086;

/// Database receiving the latency points
pub const DEFAULT_LATENCY_DATABASE: &str = "latency";

/// Upper bound on the single write request, in seconds
pub const INFLUX_WRITE_TIMEOUT_SECS: u64 = 10;

// ============================================================================
// Configuration File
// ============================================================================

/// Environment variable overriding the configuration file path
pub const CONFIG_ENV_VAR: &str = "NETTEST_CONF";

/// Configuration file looked up next to the executable
pub const DEFAULT_CONFIG_FILE: &str = "nettest.conf.yaml";

// ============================================================================
// ICMP
// ============================================================================

/// Echo request payload size in bytes (same as the classic `ping`)
pub const ICMP_PAYLOAD_SIZE: usize = 56;

// ============================================================================
// Metric Names
// ============================================================================

/// Number of echo requests sent
pub const METRIC_SENT_PACKETS: &str = "sent_packets";

/// Number of echo requests without a reply
pub const METRIC_LOST_PACKETS: &str = "lost_packets";

/// Share of lost requests, 0-100
pub const METRIC_PERCENTAGE_LOST: &str = "percentage_lost_packets";

/// Measurement class for round-trip latency
pub const CLASS_LATENCY: &str = "latency_ms";

/// Measurement class for inter-packet jitter
pub const CLASS_JITTER: &str = "jitter_ms";

/// Tag carrying the reporting machine's hostname
pub const HOST_TAG: &str = "host";

/// Field name holding the numeric value of every point
pub const VALUE_FIELD: &str = "value";
