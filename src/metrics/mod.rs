//! Metrics collection and exposition for Prometheus.
//!
//! Counts sync traffic, boundary calls and storage failures per context.

mod recorder;

pub use recorder::{Metrics, MetricsRecorder};
