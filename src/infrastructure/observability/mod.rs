//! Push-based observability.
//!
//! Metrics leave the process as periodic structured JSON logs on stdout (for
//! Loki, Fluentd, CloudWatch); the Prometheus registry backs the counters.
//! This module only SENDS data, it never accepts requests.

pub mod metrics;
pub mod reporter;

pub use metrics::{Metrics, MetricsListener};
pub use reporter::MetricsReporter;
