//! Shared types and constants for the nettest probes
//!
//! This crate provides the measurement data model and the constants
//! (defaults, metric names) shared between the probe library, its
//! exporters and the command-line front end.

pub mod constants;
pub mod types;

// Re-export commonly used types
pub use constants::*;
pub use types::{MetricPoint, PacketOutcome, ProbeConfig, ProbeResult, Tags};
