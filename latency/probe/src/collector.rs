//! Metrics aggregation
//!
//! Turns the latency and jitter series of a [`ProbeResult`] into order
//! statistics.

use crate::types::*;
use chrono::Utc;
use std::cmp::Ordering;
use std::time::Duration;

/// Compute min/max/mean and the requested percentiles of a series
///
/// The input is left untouched; percentiles are taken over a sorted
/// private copy.
///
/// # Arguments
///
/// * `samples` - Series in temporal order, possibly empty
/// * `percentiles` - Requested percentiles, 0-100
pub fn calculate_stats(samples: &[f64], percentiles: &[f64]) -> Stats {
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let percentiles = percentiles
        .iter()
        .map(|&p| PercentileValue {
            percentile: p,
            value: percentile(&sorted, p),
        })
        .collect();

    Stats {
        min: sorted.first().copied(),
        max: sorted.last().copied(),
        mean: mean(samples),
        percentiles,
    }
}

/// Linearly interpolated percentile of an ascending series
///
/// Percentile `p` maps to the fractional index `p / 100 * (n - 1)`;
/// the result interpolates between the two neighbouring samples.
/// `p` is clamped to 0-100. Returns `None` for an empty series.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    match sorted.len() {
        0 => None,
        1 => Some(sorted[0]),
        len => {
            let idx = p.clamp(0.0, 100.0) / 100.0 * (len - 1) as f64;
            let lower = idx.floor() as usize;
            let upper = idx.ceil() as usize;
            let fraction = idx - lower as f64;
            Some(sorted[lower] + fraction * (sorted[upper] - sorted[lower]))
        }
    }
}

/// Arithmetic mean, `None` for an empty series
pub fn mean(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().sum::<f64>() / samples.len() as f64)
}

/// Freeze a probe result into a report
///
/// # Arguments
///
/// * `config` - Configuration the run was made with
/// * `result` - Raw measurements of the run
/// * `elapsed` - Wall-clock duration of the run
pub fn generate_report(config: &ProbeConfig, result: &ProbeResult, elapsed: Duration) -> ProbeReport {
    ProbeReport {
        target: config.target_host.clone(),
        timestamp: Utc::now().to_rfc3339(),
        elapsed_ms: elapsed.as_millis().min(u64::MAX as u128) as u64,
        sent: result.sent,
        lost: result.lost,
        loss_percentage: result.loss_percentage(),
        latency: calculate_stats(&result.latencies, &config.percentiles),
        jitter: calculate_stats(&result.jitters, &config.percentiles),
    }
}
