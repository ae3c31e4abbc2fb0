//! ICMP Latency Probe
//!
//! Sends a burst of ICMP echo requests to the configured target,
//! computes latency and jitter statistics, and exports them as metric
//! points. Each invocation is one complete probe-and-report cycle,
//! meant to be run from cron.
//!
//! ## Usage
//!
//! ```bash
//! # Probe with nettest.conf.yaml next to the binary, write to InfluxDB
//! ./nettest-latency
//!
//! # Use another configuration file
//! NETTEST_CONF=~/nettest.conf.yaml ./nettest-latency
//!
//! # Write the points to a file instead
//! ./nettest-latency --format json --output latency.json
//!
//! # Probe and print the points without exporting
//! ./nettest-latency --dry-run
//!
//! # Install the cron entries listed in the `cron` section
//! ./nettest-latency install-cron
//! ```
//!
//! ## Exit status
//!
//! - `0`: probe completed and points exported
//! - `1`: configuration error, unresolvable target or no ICMP access
//! - `2`: probe completed but the export failed

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use nettest_common::constants::CONFIG_ENV_VAR;
use nettest_latency::{
    collector::generate_report,
    config::{self, Settings},
    cron,
    exporter::{create_sink, ExporterType},
    prober,
    reporter::{base_tags, build_points, reporting_host, Reporter},
    types::{format_value, percentile_label, ProbeReport, Stats},
};
use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    time::Instant,
};

/// Exit status when the measurements were taken but not exported
const EXIT_EXPORT_FAILED: u8 = 2;

/// ICMP latency and jitter probe
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (YAML)
    #[clap(short, long, env = CONFIG_ENV_VAR)]
    config: Option<PathBuf>,

    /// Output format (influx, line, json, prometheus)
    #[clap(short, long, default_value = "influx")]
    format: String,

    /// Output file for the line, json and prometheus formats
    #[clap(short, long, default_value = "latency-metrics.out")]
    output: PathBuf,

    /// Probe and print the points without exporting them
    #[clap(long)]
    dry_run: bool,

    /// Verbose logging
    #[clap(short, long)]
    verbose: bool,

    #[clap(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install the cron jobs listed in the configuration file
    InstallCron,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // A .env file may provide NETTEST_CONF
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    let config_path = config::resolve_config_path(args.config.clone());
    let settings = Settings::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {:?}", config_path))?;

    if let Some(Commands::InstallCron) = args.command {
        install_cron(&settings, &config_path)?;
        return Ok(ExitCode::SUCCESS);
    }

    // Parse export format
    let export_format = match args.format.to_lowercase().as_str() {
        "influx" | "influxdb" => ExporterType::Influx,
        "line" | "lp" => ExporterType::Line,
        "json" => ExporterType::Json,
        "prometheus" | "prom" => ExporterType::Prometheus,
        _ => anyhow::bail!(
            "Unsupported format: {}. Use influx, line, json, or prometheus",
            args.format
        ),
    };

    let probe_config = settings
        .latency
        .probe_config()
        .context("Invalid latency configuration")?;

    let start = Instant::now();
    let result = prober::probe(&probe_config)
        .await
        .with_context(|| format!("Cannot probe {}", probe_config.target_host))?;
    let report = generate_report(&probe_config, &result, start.elapsed());

    print_summary(&report);

    let tags = base_tags(&settings.influxdb.tags, &reporting_host());

    if args.dry_run {
        for point in build_points(&report, &tags) {
            println!("  {} = {}", point.name, point.value);
        }
        info!("Dry run, nothing exported");
        return Ok(ExitCode::SUCCESS);
    }

    if export_format == ExporterType::Influx {
        info!("influx_db_host: {}", settings.influxdb.host);
    }
    // From here on a measurement exists, so any failure is an export failure
    let sink = match create_sink(export_format, &settings.influxdb, &args.output) {
        Ok(sink) => sink,
        Err(e) => {
            error!("{:#}", anyhow::Error::new(e).context("Failed to create metrics sink"));
            return Ok(ExitCode::from(EXIT_EXPORT_FAILED));
        }
    };

    let reporter = Reporter::new(sink, tags);
    match reporter.report(&report).await {
        Ok(points) => {
            info!("Exported {} points", points);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!("{:#}", anyhow::Error::new(e));
            Ok(ExitCode::from(EXIT_EXPORT_FAILED))
        }
    }
}

fn install_cron(settings: &Settings, config_path: &Path) -> Result<()> {
    if settings.cron.is_empty() {
        warn!("No cron jobs configured in {:?}", config_path);
        return Ok(());
    }

    let executable = std::env::current_exe().context("Cannot locate the probe executable")?;
    let config_path = config_path
        .canonicalize()
        .unwrap_or_else(|_| config_path.to_path_buf());
    let command = cron::job_command(&executable, &config_path);

    let entries = cron::plan_entries(&settings.cron, &command)?;
    cron::install(&entries).context("Failed to install cron jobs")?;
    Ok(())
}

fn print_summary(report: &ProbeReport) {
    println!();
    println!("============================================");
    println!("  Latency probe: {}", report.target);
    println!("============================================");
    println!("  Timestamp:     {}", report.timestamp);
    println!("  Duration:      {} ms", report.elapsed_ms);
    println!("  Sent packets:  {}", report.sent);
    println!("  Lost packets:  {}", report.lost);
    println!("  Loss:          {:.2}%", report.loss_percentage);
    println!();
    print_stats("Latency (ms)", &report.latency);
    print_stats("Jitter (ms)", &report.jitter);
    println!("============================================");
}

fn print_stats(title: &str, stats: &Stats) {
    println!("  {}:", title);
    println!("    min:  {:>10}", format_value(stats.min));
    println!("    avg:  {:>10}", format_value(stats.mean));
    println!("    max:  {:>10}", format_value(stats.max));
    for entry in &stats.percentiles {
        println!(
            "    p{:<4}{:>10}",
            format!("{}:", percentile_label(entry.percentile)),
            format_value(entry.value)
        );
    }
    println!();
}
