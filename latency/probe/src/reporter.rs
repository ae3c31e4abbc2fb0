//! Metric point reporting
//!
//! Flattens a [`ProbeReport`] into tagged [`MetricPoint`]s and hands
//! them to a [`MetricsSink`] in one batch.
//!
//! Point names:
//! - `sent_packets`, `lost_packets`, `percentage_lost_packets` (always)
//! - `{class}_min`, `{class}_max`, `{class}_avg`, `{class}_pcr_{p}` for
//!   the `latency_ms` and `jitter_ms` classes
//!
//! A statistic without data (empty series) produces no point at all.

use crate::exporter::{ExportError, MetricsSink};
use crate::types::{percentile_label, MetricPoint, ProbeReport, Stats, Tags};
use log::info;
use nettest_common::constants::*;
use thiserror::Error;

/// The sink write of a run failed
///
/// The measurements themselves are unaffected.
#[derive(Debug, Error)]
#[error("failed to export {points} metric points to {sink}")]
pub struct ExportFailed {
    /// Sink description
    pub sink: String,
    /// Number of points in the rejected batch
    pub points: usize,
    #[source]
    pub source: ExportError,
}

/// Hostname of the machine running the probe
pub fn reporting_host() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}

/// Merge static tags with the `host` tag; `host` overrides a static value
pub fn base_tags(static_tags: &Tags, host: &str) -> Tags {
    let mut tags = static_tags.clone();
    tags.insert(HOST_TAG.to_string(), host.to_string());
    tags
}

/// Flatten a report into metric points carrying `tags`
pub fn build_points(report: &ProbeReport, tags: &Tags) -> Vec<MetricPoint> {
    let mut points = vec![
        MetricPoint::new(METRIC_SENT_PACKETS, report.sent as f64, tags.clone()),
        MetricPoint::new(METRIC_LOST_PACKETS, report.lost as f64, tags.clone()),
        MetricPoint::new(METRIC_PERCENTAGE_LOST, report.loss_percentage, tags.clone()),
    ];

    push_stats(&mut points, CLASS_LATENCY, &report.latency, tags);
    push_stats(&mut points, CLASS_JITTER, &report.jitter, tags);
    points
}

fn push_stats(points: &mut Vec<MetricPoint>, class: &str, stats: &Stats, tags: &Tags) {
    let summary = [("min", stats.min), ("max", stats.max), ("avg", stats.mean)];
    for (suffix, value) in summary {
        if let Some(value) = value {
            points.push(MetricPoint::new(format!("{class}_{suffix}"), value, tags.clone()));
        }
    }

    for entry in &stats.percentiles {
        if let Some(value) = entry.value {
            let name = format!("{class}_pcr_{}", percentile_label(entry.percentile));
            points.push(MetricPoint::new(name, value, tags.clone()));
        }
    }
}

/// Sends the points of a run to a sink
pub struct Reporter {
    sink: Box<dyn MetricsSink>,
    tags: Tags,
}

impl Reporter {
    /// Create a reporter applying `tags` to every point
    pub fn new(sink: Box<dyn MetricsSink>, tags: Tags) -> Self {
        Self { sink, tags }
    }

    /// Tags applied to every point
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Render the report and write it to the sink once, without retry
    ///
    /// # Returns
    ///
    /// Number of points written
    pub async fn report(&self, report: &ProbeReport) -> Result<usize, ExportFailed> {
        let points = build_points(report, &self.tags);
        let sink = self.sink.describe();

        info!("Writing {} points to {}", points.len(), sink);
        self.sink
            .write_points(&points)
            .await
            .map_err(|source| ExportFailed {
                sink,
                points: points.len(),
                source,
            })?;

        Ok(points.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::generate_report;
    use crate::types::{PacketOutcome, ProbeConfig, ProbeResult};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Keeps every batch it receives
    #[derive(Default)]
    struct RecordingSink {
        batches: Arc<Mutex<Vec<Vec<MetricPoint>>>>,
    }

    #[async_trait]
    impl MetricsSink for RecordingSink {
        fn describe(&self) -> String {
            "recording sink".to_string()
        }

        async fn write_points(&self, points: &[MetricPoint]) -> Result<(), ExportError> {
            self.batches.lock().unwrap().push(points.to_vec());
            Ok(())
        }
    }

    struct RejectingSink;

    #[async_trait]
    impl MetricsSink for RejectingSink {
        fn describe(&self) -> String {
            "rejecting sink".to_string()
        }

        async fn write_points(&self, _points: &[MetricPoint]) -> Result<(), ExportError> {
            Err(ExportError::Rejected {
                status: 401,
                body: "authorization failed".to_string(),
            })
        }
    }

    fn scenario_report() -> ProbeReport {
        let config = ProbeConfig {
            target_host: "192.0.2.1".to_string(),
            packet_count: 4,
            per_packet_timeout: Duration::from_secs(1),
            percentiles: vec![50.0],
        };
        let result = ProbeResult::from_outcomes([
            PacketOutcome::Success { latency_ms: 10.0 },
            PacketOutcome::Success { latency_ms: 12.0 },
            PacketOutcome::Lost,
            PacketOutcome::Success { latency_ms: 14.0 },
        ]);
        generate_report(&config, &result, Duration::from_secs(1))
    }

    fn value_of(points: &[MetricPoint], name: &str) -> Option<f64> {
        points.iter().find(|p| p.name == name).map(|p| p.value)
    }

    #[test]
    fn test_base_tags_host_wins() {
        let mut static_tags = Tags::new();
        static_tags.insert("site".to_string(), "office".to_string());
        static_tags.insert("host".to_string(), "stale".to_string());

        let tags = base_tags(&static_tags, "probe-1");

        assert_eq!(tags.len(), 2);
        assert_eq!(tags["site"], "office");
        assert_eq!(tags["host"], "probe-1");
    }

    #[test]
    fn test_reporting_host_not_empty() {
        assert!(!reporting_host().is_empty());
    }

    #[test]
    fn test_build_points_scenario() {
        let tags = base_tags(&Tags::new(), "probe-1");
        let points = build_points(&scenario_report(), &tags);

        assert_eq!(points.len(), 11);
        assert!(points.iter().all(|p| p.tags["host"] == "probe-1"));

        assert_eq!(value_of(&points, "sent_packets"), Some(4.0));
        assert_eq!(value_of(&points, "lost_packets"), Some(1.0));
        assert_eq!(value_of(&points, "percentage_lost_packets"), Some(25.0));
        assert_eq!(value_of(&points, "latency_ms_min"), Some(10.0));
        assert_eq!(value_of(&points, "latency_ms_max"), Some(14.0));
        assert_eq!(value_of(&points, "latency_ms_avg"), Some(12.0));
        assert_eq!(value_of(&points, "latency_ms_pcr_50"), Some(12.0));
        assert_eq!(value_of(&points, "jitter_ms_min"), Some(2.0));
        assert_eq!(value_of(&points, "jitter_ms_max"), Some(2.0));
        assert_eq!(value_of(&points, "jitter_ms_avg"), Some(2.0));
        assert_eq!(value_of(&points, "jitter_ms_pcr_50"), Some(2.0));
    }

    #[test]
    fn test_no_data_points_are_omitted() {
        let config = ProbeConfig {
            target_host: "192.0.2.1".to_string(),
            packet_count: 0,
            per_packet_timeout: Duration::from_secs(1),
            percentiles: vec![5.0, 95.0],
        };
        let report = generate_report(&config, &ProbeResult::new(), Duration::ZERO);

        let points = build_points(&report, &Tags::new());
        let names: Vec<&str> = points.iter().map(|p| p.name.as_str()).collect();

        assert_eq!(names, vec!["sent_packets", "lost_packets", "percentage_lost_packets"]);
        assert_eq!(value_of(&points, "percentage_lost_packets"), Some(0.0));
    }

    #[test]
    fn test_single_reply_has_latency_but_no_jitter() {
        let config = ProbeConfig {
            target_host: "192.0.2.1".to_string(),
            packet_count: 2,
            per_packet_timeout: Duration::from_secs(1),
            percentiles: vec![5.0, 95.0],
        };
        let result = ProbeResult::from_outcomes([
            PacketOutcome::Lost,
            PacketOutcome::Success { latency_ms: 7.0 },
        ]);
        let report = generate_report(&config, &result, Duration::ZERO);

        let points = build_points(&report, &Tags::new());

        assert_eq!(points.len(), 3 + 5);
        assert_eq!(value_of(&points, "latency_ms_pcr_5"), Some(7.0));
        assert_eq!(value_of(&points, "latency_ms_pcr_95"), Some(7.0));
        assert!(points.iter().all(|p| !p.name.starts_with("jitter_ms")));
    }

    #[tokio::test]
    async fn test_report_writes_one_batch() {
        let sink = RecordingSink::default();
        let batches = Arc::clone(&sink.batches);
        let reporter = Reporter::new(Box::new(sink), base_tags(&Tags::new(), "probe-1"));

        let written = reporter.report(&scenario_report()).await.unwrap();

        assert_eq!(written, 11);
        let batches = batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 11);
    }

    #[tokio::test]
    async fn test_report_sink_failure() {
        let reporter = Reporter::new(Box::new(RejectingSink), Tags::new());

        let err = reporter.report(&scenario_report()).await.unwrap_err();

        assert_eq!(err.points, 11);
        assert_eq!(err.sink, "rejecting sink");
        assert!(matches!(err.source, ExportError::Rejected { status: 401, .. }));
    }
}
