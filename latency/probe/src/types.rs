//! Aggregated report types
//!
//! Defines the statistics computed from a finished probe run and the
//! report printed to the console and handed to the reporter.
//!
//! ## Organization
//!
//! - **Raw Types**: the per-run measurement model (from nettest_common)
//! - **Report Types**: statistics derived from a frozen [`ProbeResult`]

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Raw Types (from nettest_common)
// ============================================================================

pub use nettest_common::types::{MetricPoint, PacketOutcome, ProbeConfig, ProbeResult, Tags};

// ============================================================================
// Report Types
// ============================================================================

/// Value of one requested percentile
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct PercentileValue {
    /// Requested percentile, 0-100
    pub percentile: f64,
    /// Interpolated value, `None` when the series is empty
    pub value: Option<f64>,
}

/// Order statistics of one series
///
/// Every field is `None` for an empty series so that "no data" never
/// reads as a zero measurement.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Stats {
    /// Smallest sample
    pub min: Option<f64>,
    /// Largest sample
    pub max: Option<f64>,
    /// Arithmetic mean
    pub mean: Option<f64>,
    /// Requested percentiles, in request order
    pub percentiles: Vec<PercentileValue>,
}

impl Stats {
    /// Look up the value computed for percentile `p`
    pub fn percentile(&self, p: f64) -> Option<f64> {
        self.percentiles
            .iter()
            .find(|entry| entry.percentile == p)
            .and_then(|entry| entry.value)
    }

    /// Whether the series had no samples
    pub fn is_empty(&self) -> bool {
        self.min.is_none()
    }
}

/// Summary of a finished probe run
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProbeReport {
    /// Probed host as configured
    pub target: String,
    /// RFC 3339 timestamp of the end of the run
    pub timestamp: String,
    /// Wall-clock duration of the run in milliseconds
    pub elapsed_ms: u64,
    /// Echo requests sent
    pub sent: u64,
    /// Echo requests without a reply
    pub lost: u64,
    /// `lost / sent * 100`, 0 when nothing was sent
    pub loss_percentage: f64,
    /// Round-trip latency statistics (ms)
    pub latency: Stats,
    /// Jitter statistics (ms)
    pub jitter: Stats,
}

/// Format an optional statistic for the console summary
pub fn format_value(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.3}", v),
        None => "n/a".to_string(),
    }
}

/// Render a percentile the way it appears in metric names (`5`, `99.9`)
pub fn percentile_label(p: f64) -> String {
    format!("{}", p)
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "min {} / avg {} / max {}",
            format_value(self.min),
            format_value(self.mean),
            format_value(self.max)
        )?;
        for entry in &self.percentiles {
            write!(
                f,
                " / p{} {}",
                percentile_label(entry.percentile),
                format_value(entry.value)
            )?;
        }
        Ok(())
    }
}
