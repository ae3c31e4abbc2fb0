//! Metrics exporters
//!
//! Sinks receiving the flat list of metric points produced by a run:
//! InfluxDB over HTTP, or a file in line-protocol, JSON or Prometheus
//! text format.

use crate::config::InfluxSettings;
use crate::types::MetricPoint;
use async_trait::async_trait;
use log::debug;
use nettest_common::constants::{INFLUX_WRITE_TIMEOUT_SECS, VALUE_FIELD};
use std::net::Ipv6Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while writing points to a sink
#[derive(Debug, Error)]
pub enum ExportError {
    /// The HTTP request could not be completed
    #[error("HTTP request to metrics backend failed")]
    Http(#[from] reqwest::Error),
    /// The backend answered with a non-success status
    #[error("metrics backend rejected the write with status {status}: {body}")]
    Rejected { status: u16, body: String },
    /// Writing an output file failed
    #[error("failed to write output file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Points could not be serialized
    #[error("failed to serialize metric points")]
    Serialize(#[from] serde_json::Error),
}

/// Trait for metrics sinks
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Short description used in log messages
    fn describe(&self) -> String;

    /// Write all points in a single batch
    ///
    /// # Arguments
    ///
    /// * `points` - Points of one run
    async fn write_points(&self, points: &[MetricPoint]) -> Result<(), ExportError>;
}

/// Export format type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExporterType {
    /// InfluxDB HTTP write API
    Influx,
    /// InfluxDB line protocol file
    Line,
    /// JSON file
    Json,
    /// Prometheus text exposition file
    Prometheus,
}

/// Build the sink for `kind`
///
/// `output_path` is used by the file formats, `influx` by the HTTP sink.
pub fn create_sink(
    kind: ExporterType,
    influx: &InfluxSettings,
    output_path: &Path,
) -> Result<Box<dyn MetricsSink>, ExportError> {
    let sink: Box<dyn MetricsSink> = match kind {
        ExporterType::Influx => Box::new(InfluxSink::new(influx)?),
        ExporterType::Line => Box::new(LineProtocolFileSink::new(output_path.to_path_buf())),
        ExporterType::Json => Box::new(JsonFileSink::new(output_path.to_path_buf(), true)),
        ExporterType::Prometheus => Box::new(PrometheusFileSink::new(output_path.to_path_buf())),
    };
    Ok(sink)
}

// ============================================================================
// InfluxDB
// ============================================================================

/// InfluxDB 1.x HTTP sink
pub struct InfluxSink {
    client: reqwest::Client,
    write_url: String,
    database: String,
    username: String,
    password: String,
}

impl InfluxSink {
    /// Create a sink from the `influxdb` settings section
    pub fn new(settings: &InfluxSettings) -> Result<Self, ExportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(INFLUX_WRITE_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            write_url: write_url(&settings.host, settings.port),
            database: settings.latency_database.clone(),
            username: settings.username.clone(),
            password: settings.password.clone(),
        })
    }

    /// Endpoint the points are posted to
    pub fn write_url(&self) -> &str {
        &self.write_url
    }
}

fn write_url(host: &str, port: u16) -> String {
    if host.parse::<Ipv6Addr>().is_ok() {
        format!("http://[{}]:{}/write", host, port)
    } else {
        format!("http://{}:{}/write", host, port)
    }
}

#[async_trait]
impl MetricsSink for InfluxSink {
    fn describe(&self) -> String {
        format!("influxdb {} (database {})", self.write_url, self.database)
    }

    async fn write_points(&self, points: &[MetricPoint]) -> Result<(), ExportError> {
        let mut request = self
            .client
            .post(&self.write_url)
            .query(&[("db", self.database.as_str())]);
        if !self.username.is_empty() {
            request = request.query(&[
                ("u", self.username.as_str()),
                ("p", self.password.as_str()),
            ]);
        }

        let body = to_line_protocol(points);
        debug!("Posting {} bytes of line protocol", body.len());
        let response = request.body(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExportError::Rejected {
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Convert points to InfluxDB line protocol, one line per point
///
/// Points carry no timestamp; the server assigns its receive time.
/// Tags with an empty key or value are left out, since InfluxDB
/// rejects the whole line otherwise.
pub fn to_line_protocol(points: &[MetricPoint]) -> String {
    let mut output = String::new();
    for point in points {
        output.push_str(&escape_line(&point.name, false));
        let tags = point
            .tags
            .iter()
            .filter(|(key, value)| !key.is_empty() && !value.is_empty());
        for (key, value) in tags {
            output.push(',');
            output.push_str(&escape_line(key, true));
            output.push('=');
            output.push_str(&escape_line(value, true));
        }
        output.push_str(&format!(" {}={}\n", VALUE_FIELD, point.value));
    }
    output
}

fn escape_line(raw: &str, escape_equals: bool) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == ',' || c == ' ' || (escape_equals && c == '=') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

// ============================================================================
// File exporters
// ============================================================================

fn write_file(path: &Path, contents: &str) -> Result<(), ExportError> {
    std::fs::write(path, contents).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Line protocol file exporter
pub struct LineProtocolFileSink {
    output_path: PathBuf,
}

impl LineProtocolFileSink {
    /// Create a new line protocol exporter
    ///
    /// # Arguments
    ///
    /// * `output_path` - Path to output file
    pub fn new(output_path: PathBuf) -> Self {
        Self { output_path }
    }
}

#[async_trait]
impl MetricsSink for LineProtocolFileSink {
    fn describe(&self) -> String {
        format!("line protocol file {:?}", self.output_path)
    }

    async fn write_points(&self, points: &[MetricPoint]) -> Result<(), ExportError> {
        write_file(&self.output_path, &to_line_protocol(points))
    }
}

/// JSON exporter
pub struct JsonFileSink {
    output_path: PathBuf,
    pretty: bool,
}

impl JsonFileSink {
    /// Create a new JSON exporter
    ///
    /// # Arguments
    ///
    /// * `output_path` - Path to output file
    /// * `pretty` - Enable pretty-printing
    pub fn new(output_path: PathBuf, pretty: bool) -> Self {
        Self {
            output_path,
            pretty,
        }
    }
}

#[async_trait]
impl MetricsSink for JsonFileSink {
    fn describe(&self) -> String {
        format!("JSON file {:?}", self.output_path)
    }

    async fn write_points(&self, points: &[MetricPoint]) -> Result<(), ExportError> {
        let json = if self.pretty {
            serde_json::to_string_pretty(points)?
        } else {
            serde_json::to_string(points)?
        };
        write_file(&self.output_path, &json)
    }
}

/// Prometheus exporter
pub struct PrometheusFileSink {
    output_path: PathBuf,
}

impl PrometheusFileSink {
    /// Create a new Prometheus exporter
    ///
    /// # Arguments
    ///
    /// * `output_path` - Path to output file
    pub fn new(output_path: PathBuf) -> Self {
        Self { output_path }
    }

    /// Convert points to Prometheus text format
    ///
    /// Every point becomes a gauge named `nettest_<name>`.
    fn to_prometheus_format(points: &[MetricPoint]) -> String {
        let mut output = String::new();
        for point in points {
            let name = format!("nettest_{}", sanitize_metric_name(&point.name));
            output.push_str(&format!("# TYPE {} gauge\n", name));
            output.push_str(&name);
            if !point.tags.is_empty() {
                let labels: Vec<String> = point
                    .tags
                    .iter()
                    .map(|(k, v)| {
                        format!("{}=\"{}\"", sanitize_metric_name(k), escape_label_value(v))
                    })
                    .collect();
                output.push_str(&format!("{{{}}}", labels.join(",")));
            }
            output.push_str(&format!(" {}\n", point.value));
        }
        output
    }
}

fn sanitize_metric_name(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn escape_label_value(raw: &str) -> String {
    raw.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[async_trait]
impl MetricsSink for PrometheusFileSink {
    fn describe(&self) -> String {
        format!("Prometheus file {:?}", self.output_path)
    }

    async fn write_points(&self, points: &[MetricPoint]) -> Result<(), ExportError> {
        write_file(&self.output_path, &Self::to_prometheus_format(points))
    }
}
