//! Measurement data model
//!
//! Types flowing through one probe run: the immutable [`ProbeConfig`],
//! one [`PacketOutcome`] per attempt, the accumulated [`ProbeResult`]
//! and the [`MetricPoint`]s handed to a metrics sink.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Tag set attached to exported points
pub type Tags = BTreeMap<String, String>;

/// Parameters of a single probe run
///
/// Built once from the settings source and never modified while the
/// run is in progress.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeConfig {
    /// Hostname or IP address to probe
    pub target_host: String,
    /// Number of echo requests to send (0 yields an empty result)
    pub packet_count: u32,
    /// How long to wait for each reply
    pub per_packet_timeout: Duration,
    /// Percentiles to compute, in the order they were requested
    pub percentiles: Vec<f64>,
}

/// Outcome of one echo attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PacketOutcome {
    /// Reply received; round-trip time in milliseconds
    Success { latency_ms: f64 },
    /// Timed out or failed to send/receive
    Lost,
}

/// Raw measurements of a probe run
///
/// Built incrementally with [`ProbeResult::record`]. The latency series
/// only holds successful attempts; the jitter series holds the absolute
/// difference between each pair of consecutive successes, so a lost
/// attempt between two replies does not break the pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Attempts made
    pub sent: u64,
    /// Attempts without a reply
    pub lost: u64,
    /// Round-trip times of successful attempts, in send order (ms)
    pub latencies: Vec<f64>,
    /// Deltas between consecutive successful latencies (ms)
    pub jitters: Vec<f64>,
}

impl ProbeResult {
    /// Create an empty result
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a result by replaying outcomes in send order
    pub fn from_outcomes<I>(outcomes: I) -> Self
    where
        I: IntoIterator<Item = PacketOutcome>,
    {
        let mut result = Self::new();
        for outcome in outcomes {
            result.record(outcome);
        }
        result
    }

    /// Account for one attempt
    pub fn record(&mut self, outcome: PacketOutcome) {
        self.sent += 1;
        match outcome {
            PacketOutcome::Success { latency_ms } => {
                if let Some(previous) = self.latencies.last() {
                    self.jitters.push((latency_ms - previous).abs());
                }
                self.latencies.push(latency_ms);
            }
            PacketOutcome::Lost => self.lost += 1,
        }
    }

    /// Number of attempts that got a reply
    pub fn successes(&self) -> u64 {
        self.latencies.len() as u64
    }

    /// Lost attempts as a percentage of sent ones, 0 when nothing was sent
    pub fn loss_percentage(&self) -> f64 {
        if self.sent == 0 {
            return 0.0;
        }
        self.lost as f64 / self.sent as f64 * 100.0
    }

    /// Check the counting invariants between the counters and series
    pub fn is_consistent(&self) -> bool {
        self.sent == self.successes() + self.lost
            && self.jitters.len() == self.latencies.len().saturating_sub(1)
    }
}

/// A single exported data point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    /// Measurement name, e.g. `latency_ms_avg`
    pub name: String,
    /// Numeric value
    pub value: f64,
    /// Tags identifying the series
    pub tags: Tags,
}

impl MetricPoint {
    /// Create a point
    pub fn new(name: impl Into<String>, value: f64, tags: Tags) -> Self {
        Self {
            name: name.into(),
            value,
            tags,
        }
    }
}
