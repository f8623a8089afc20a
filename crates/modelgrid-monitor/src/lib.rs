//! ModelGrid monitoring & alerting engine.
//!
//! Consumes the live metrics stream keyed to the active deployment,
//! evaluates sliding-window aggregates against per-metric thresholds,
//! and emits deduplicated alerts with hysteresis. Ingestion and
//! evaluation are decoupled by a bounded queue so a sample burst can
//! never block the ingestion path; overload drops the oldest
//! unprocessed sample with a `SampleDropped` diagnostic, never
//! silently.
//!
//! # Components
//!
//! - **`config`** — recognized metrics, thresholds, windows
//! - **`window`** — per-(deployment, metric) sliding windows
//! - **`alert`** — hysteresis state machine
//! - **`engine`** — ingestion queue, evaluation loop, alert emission

pub mod alert;
pub mod config;
pub mod engine;
pub mod window;

pub use alert::{AlertTracker, Transition};
pub use config::{Aggregate, Direction, MetricSpec, MonitorConfig};
pub use engine::{AlertSink, Diagnostics, MonitoringEngine, NullSink};
pub use window::MetricWindow;
