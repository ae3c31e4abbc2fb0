//! ICMP Latency Probe Library
//!
//! Provides the components of one probe-and-report cycle: probing a
//! target over ICMP, aggregating latency and jitter statistics, and
//! exporting them as tagged metric points.

pub mod collector;
pub mod config;
pub mod cron;
pub mod exporter;
pub mod prober;
pub mod reporter;
pub mod types;

pub use collector::{calculate_stats, generate_report};
pub use config::{ConfigError, Settings};
pub use exporter::{ExportError, ExporterType, InfluxSink, MetricsSink};
pub use prober::{probe, EchoTransport, IcmpTransport, ProbeError, Prober};
pub use reporter::{ExportFailed, Reporter};
pub use types::*;
