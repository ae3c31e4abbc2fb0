//! Cron job installation
//!
//! Installs one user crontab entry per job listed in the `cron`
//! settings section, so the probe runs on a fixed cadence. Entries
//! whose command is already present are left alone.

use log::{info, warn};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use thiserror::Error;

/// Job name of the latency probe in the `cron` section
pub const LATENCY_JOB: &str = "latency";

const SCHEDULE_MACROS: [&str; 8] = [
    "@reboot",
    "@yearly",
    "@annually",
    "@monthly",
    "@weekly",
    "@daily",
    "@midnight",
    "@hourly",
];

/// Errors raised while installing cron jobs
#[derive(Debug, Error)]
pub enum CronError {
    /// Schedule is neither five fields nor a known `@` macro
    #[error("invalid schedule {schedule:?} for job {job}")]
    InvalidSchedule { job: String, schedule: String },
    /// Running `crontab` failed
    #[error("failed to run crontab")]
    Io(#[from] std::io::Error),
    /// `crontab` exited with an error
    #[error("crontab failed: {0}")]
    Crontab(String),
}

/// A crontab line to install
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronEntry {
    /// Job name from the settings
    pub job: String,
    /// Five-field schedule or `@` macro
    pub schedule: String,
    /// Shell command to run
    pub command: String,
}

impl CronEntry {
    /// Crontab line for this entry
    pub fn render(&self) -> String {
        format!("{} {}", self.schedule, self.command)
    }
}

/// Result of installing one entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStatus {
    /// Entry added to the crontab
    Installed,
    /// An entry with the same command was already present
    AlreadyInstalled,
}

/// Check a schedule expression
pub fn validate_schedule(job: &str, schedule: &str) -> Result<(), CronError> {
    let fields: Vec<&str> = schedule.split_whitespace().collect();
    let valid = match fields.as_slice() {
        [single] => SCHEDULE_MACROS.contains(single),
        _ => fields.len() == 5,
    };
    if valid {
        Ok(())
    } else {
        Err(CronError::InvalidSchedule {
            job: job.to_string(),
            schedule: schedule.to_string(),
        })
    }
}

fn shell_quote(raw: &str) -> String {
    if raw
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "/._-+:~".contains(c))
    {
        raw.to_string()
    } else {
        format!("'{}'", raw.replace('\'', r"'\''"))
    }
}

/// Command line cron runs for the latency job
pub fn job_command(executable: &Path, config_path: &Path) -> String {
    format!(
        "{} --config {}",
        shell_quote(&executable.to_string_lossy()),
        shell_quote(&config_path.to_string_lossy())
    )
}

/// Turn the `cron` section into entries
///
/// Only the latency job is known; other names are skipped with a
/// warning.
pub fn plan_entries(
    jobs: &BTreeMap<String, String>,
    latency_command: &str,
) -> Result<Vec<CronEntry>, CronError> {
    let mut entries = Vec::new();
    for (job, schedule) in jobs {
        if job != LATENCY_JOB {
            warn!("Skipping unknown cron job {:?}", job);
            continue;
        }
        validate_schedule(job, schedule)?;
        entries.push(CronEntry {
            job: job.clone(),
            schedule: schedule.split_whitespace().collect::<Vec<_>>().join(" "),
            command: latency_command.to_string(),
        });
    }
    Ok(entries)
}

/// Command part of a crontab line, whitespace-normalized
fn line_command(line: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let fields: Vec<&str> = line.split_whitespace().collect();
    let skip = if fields[0].starts_with('@') { 1 } else { 5 };
    if fields.len() <= skip {
        return None;
    }
    Some(fields[skip..].join(" "))
}

/// Whether `crontab` already runs `command`
pub fn is_installed(crontab: &str, command: &str) -> bool {
    let wanted = command.split_whitespace().collect::<Vec<_>>().join(" ");
    crontab
        .lines()
        .filter_map(line_command)
        .any(|existing| existing == wanted)
}

/// Add missing entries to a crontab
///
/// # Returns
///
/// The new crontab text and the status of each entry, in order
pub fn merge(crontab: &str, entries: &[CronEntry]) -> (String, Vec<InstallStatus>) {
    let mut merged = crontab.to_string();
    let mut statuses = Vec::with_capacity(entries.len());

    for entry in entries {
        if is_installed(&merged, &entry.command) {
            statuses.push(InstallStatus::AlreadyInstalled);
            continue;
        }
        if !merged.is_empty() && !merged.ends_with('\n') {
            merged.push('\n');
        }
        merged.push_str(&entry.render());
        merged.push('\n');
        statuses.push(InstallStatus::Installed);
    }

    (merged, statuses)
}

/// Read the current user's crontab; a missing crontab reads as empty
pub fn read_crontab() -> Result<String, CronError> {
    let output = Command::new("crontab").arg("-l").output()?;
    if output.status.success() {
        return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    if stderr.to_lowercase().contains("no crontab") {
        return Ok(String::new());
    }
    Err(CronError::Crontab(stderr.trim().to_string()))
}

/// Replace the current user's crontab
pub fn write_crontab(contents: &str) -> Result<(), CronError> {
    let mut child = Command::new("crontab")
        .arg("-")
        .stdin(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(contents.as_bytes())?;
    }
    let output = child.wait_with_output()?;
    if !output.status.success() {
        return Err(CronError::Crontab(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(())
}

/// Install the configured jobs into the user's crontab
///
/// The crontab is only rewritten when at least one entry is new.
pub fn install(entries: &[CronEntry]) -> Result<Vec<InstallStatus>, CronError> {
    let current = read_crontab()?;
    let (merged, statuses) = merge(&current, entries);

    for (entry, status) in entries.iter().zip(&statuses) {
        match status {
            InstallStatus::Installed => {
                info!("Installing cron job {}: {}", entry.job, entry.render())
            }
            InstallStatus::AlreadyInstalled => info!("Cron job {} already set up", entry.job),
        }
    }

    if statuses.contains(&InstallStatus::Installed) {
        write_crontab(&merged)?;
    }
    Ok(statuses)
}
