//! Monitoring configuration — recognized metrics and thresholds.
//!
//! Defaults follow the control plane's standard metric set. Latency
//! and error-rate windows are short (5m), accuracy and drift windows
//! long (60m), matching the differing volatility of the two metric
//! classes. Everything here is overridable from the daemon config.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// How a window is reduced to one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregate {
    /// Arithmetic mean of samples (latency, throughput, utilization).
    Mean,
    /// Fraction of samples with a nonzero value (error flags).
    Ratio,
    /// Most recent sample (accuracy, drift scores).
    LastValue,
}

/// Which side of the threshold is unhealthy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Above,
    Below,
}

/// Thresholds and window shape for a single metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSpec {
    pub aggregate: Aggregate,
    pub direction: Direction,
    pub warning: f64,
    pub critical: f64,
    /// Window retention in seconds.
    pub window_secs: u64,
    /// Hysteresis: the breach must hold this long before firing, and
    /// be absent this long before clearing.
    pub for_secs: u64,
    /// Critical crossings bypass hysteresis and are forwarded at once
    /// (drift is a directly actionable signal, not a transient).
    #[serde(default)]
    pub forward_critical: bool,
}

/// Full monitoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Recognized metrics. Samples for anything else are counted as
    /// malformed.
    pub metrics: HashMap<String, MetricSpec>,
    /// Bounded ingestion queue capacity.
    pub queue_capacity: usize,
}

/// Default hysteresis duration (seconds).
const DEFAULT_FOR_SECS: u64 = 300;

const SHORT_WINDOW_SECS: u64 = 300;
const LONG_WINDOW_SECS: u64 = 3600;

impl Default for MonitorConfig {
    fn default() -> Self {
        let mut metrics = HashMap::new();
        metrics.insert(
            "prediction_latency_ms".to_string(),
            MetricSpec {
                aggregate: Aggregate::Mean,
                direction: Direction::Above,
                warning: 100.0,
                critical: 250.0,
                window_secs: SHORT_WINDOW_SECS,
                for_secs: DEFAULT_FOR_SECS,
                forward_critical: false,
            },
        );
        metrics.insert(
            "error_rate".to_string(),
            MetricSpec {
                aggregate: Aggregate::Ratio,
                direction: Direction::Above,
                warning: 0.05,
                critical: 0.10,
                window_secs: SHORT_WINDOW_SECS,
                for_secs: DEFAULT_FOR_SECS,
                forward_critical: false,
            },
        );
        metrics.insert(
            "prediction_accuracy".to_string(),
            MetricSpec {
                aggregate: Aggregate::LastValue,
                direction: Direction::Below,
                warning: 0.85,
                critical: 0.75,
                window_secs: LONG_WINDOW_SECS,
                for_secs: DEFAULT_FOR_SECS,
                forward_critical: false,
            },
        );
        metrics.insert(
            "model_drift".to_string(),
            MetricSpec {
                aggregate: Aggregate::LastValue,
                direction: Direction::Above,
                warning: 0.10,
                critical: 0.20,
                window_secs: LONG_WINDOW_SECS,
                for_secs: DEFAULT_FOR_SECS,
                forward_critical: true,
            },
        );
        metrics.insert(
            "queue_utilization".to_string(),
            MetricSpec {
                aggregate: Aggregate::Mean,
                direction: Direction::Above,
                warning: 0.70,
                critical: 0.90,
                window_secs: SHORT_WINDOW_SECS,
                for_secs: DEFAULT_FOR_SECS,
                forward_critical: false,
            },
        );
        Self {
            metrics,
            queue_capacity: 1024,
        }
    }
}
