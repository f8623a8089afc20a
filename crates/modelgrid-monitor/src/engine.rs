//! Monitoring engine — ingestion queue, evaluation, alert emission.
//!
//! Ingestion is decoupled from evaluation by a bounded queue: a burst
//! of samples never blocks the ingestion path, and overload drops the
//! oldest unprocessed sample with a diagnostic. Evaluation never
//! blocks on alert delivery — the sink hand-off is best-effort and any
//! retrying belongs to the external notification channel.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use modelgrid_state::{AlertEvent, DeploymentId, MetricSample, Severity, StateResult, StateStore};

use crate::alert::{AlertTracker, Transition};
use crate::config::{Direction, MetricSpec, MonitorConfig};
use crate::window::MetricWindow;

/// External notification-channel seam. `deliver` must not block;
/// delivery failures and retries are the channel's concern.
pub trait AlertSink: Send + Sync {
    fn deliver(&self, event: &AlertEvent);
}

/// Sink that discards events (engine still appends to the alert log).
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl AlertSink for NullSink {
    fn deliver(&self, _event: &AlertEvent) {}
}

/// Ingestion/evaluation counters.
#[derive(Debug, Default)]
pub struct Diagnostics {
    pub ingested: AtomicU64,
    /// Oldest-sample drops under queue overload (`SampleDropped`).
    pub dropped: AtomicU64,
    /// Per-sample failures: non-finite values, unrecognized metrics,
    /// samples for unknown deployments.
    pub malformed: AtomicU64,
}

impl Diagnostics {
    /// Fraction of ingested samples that were malformed.
    pub fn malformed_sample_rate(&self) -> f64 {
        let ingested = self.ingested.load(Ordering::Relaxed);
        if ingested == 0 {
            return 0.0;
        }
        self.malformed.load(Ordering::Relaxed) as f64 / ingested as f64
    }
}

/// Window + hysteresis state for one `(deployment, metric)` pair.
struct Lane {
    window: MetricWindow,
    tracker: AlertTracker,
    /// Latch for hysteresis-bypassing critical crossings (drift).
    critical_latched: bool,
}

/// The monitoring & alerting engine.
pub struct MonitoringEngine {
    state: StateStore,
    config: MonitorConfig,
    queue: Mutex<VecDeque<MetricSample>>,
    notify: tokio::sync::Notify,
    lanes: Mutex<HashMap<(DeploymentId, String), Lane>>,
    /// Deployments the engine is attached to: id → model name.
    attached: Mutex<HashMap<DeploymentId, String>>,
    sink: Arc<dyn AlertSink>,
    pub diagnostics: Diagnostics,
}

impl MonitoringEngine {
    pub fn new(state: StateStore, config: MonitorConfig, sink: Arc<dyn AlertSink>) -> Self {
        Self {
            state,
            config,
            queue: Mutex::new(VecDeque::new()),
            notify: tokio::sync::Notify::new(),
            lanes: Mutex::new(HashMap::new()),
            attached: Mutex::new(HashMap::new()),
            sink,
            diagnostics: Diagnostics::default(),
        }
    }

    /// Attach to a deployment, resolving its model name from the
    /// deployment log. Called when a deployment becomes active.
    pub fn attach(&self, deployment_id: DeploymentId) -> StateResult<bool> {
        let Some(record) = self.state.find_deployment(deployment_id)? else {
            return Ok(false);
        };
        self.attached
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(deployment_id, record.model_name.clone());
        info!(deployment_id, model = %record.model_name, "monitoring attached");
        Ok(true)
    }

    /// Detach from a deployment and drop its windows.
    pub fn detach(&self, deployment_id: DeploymentId) {
        self.attached
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&deployment_id);
        self.lanes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(id, _), _| *id != deployment_id);
        info!(deployment_id, "monitoring detached");
    }

    /// Enqueue a sample for evaluation. Never blocks: when the queue
    /// is full the oldest unprocessed sample is dropped and recorded
    /// as a `SampleDropped` diagnostic.
    pub fn ingest(&self, sample: MetricSample) {
        self.diagnostics.ingested.fetch_add(1, Ordering::Relaxed);
        {
            let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
            if queue.len() >= self.config.queue_capacity {
                queue.pop_front();
                self.diagnostics.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("sample dropped: ingestion queue full");
            }
            queue.push_back(sample);
        }
        self.notify.notify_one();
    }

    /// Drain the queue and evaluate every pending sample. Returns the
    /// alerts that fired.
    pub fn process_pending(&self) -> Vec<AlertEvent> {
        let pending: Vec<MetricSample> = {
            let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
            queue.drain(..).collect()
        };

        let mut fired = Vec::new();
        for sample in pending {
            if let Some(event) = self.evaluate(sample) {
                fired.push(event);
            }
        }
        fired
    }

    /// Evaluate one sample against its window and thresholds.
    ///
    /// Malformed samples are per-sample failures: counted, logged, and
    /// skipped without halting the window.
    fn evaluate(&self, sample: MetricSample) -> Option<AlertEvent> {
        let Some(spec) = self.config.metrics.get(&sample.metric) else {
            self.diagnostics.malformed.fetch_add(1, Ordering::Relaxed);
            debug!(metric = %sample.metric, "unrecognized metric");
            return None;
        };
        if !sample.value.is_finite() || sample.timestamp == 0 {
            self.diagnostics.malformed.fetch_add(1, Ordering::Relaxed);
            debug!(metric = %sample.metric, value = sample.value, "malformed sample");
            return None;
        }
        let Some(model_name) = self.resolve_model(sample.deployment_id) else {
            self.diagnostics.malformed.fetch_add(1, Ordering::Relaxed);
            debug!(deployment_id = sample.deployment_id, "sample for unknown deployment");
            return None;
        };

        let mut lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());
        let lane = lanes
            .entry((sample.deployment_id, sample.metric.clone()))
            .or_insert_with(|| Lane {
                window: MetricWindow::new(spec.window_secs),
                tracker: AlertTracker::new(spec.for_secs),
                critical_latched: false,
            });

        lane.window.insert(sample.timestamp, sample.value);
        let aggregate = lane.window.aggregate(spec.aggregate)?;
        let breach = breach_severity(spec, aggregate);

        // Drift-style metrics: a critical crossing is forwarded at
        // once, regardless of hysteresis; re-arm once the aggregate
        // falls back below the critical threshold.
        let mut emit = None;
        if spec.forward_critical {
            if breach == Some(Severity::Critical) {
                if !lane.critical_latched {
                    lane.critical_latched = true;
                    emit = Some(Severity::Critical);
                }
            } else {
                lane.critical_latched = false;
            }
        }

        if let Transition::Fired(severity) = lane.tracker.observe(sample.timestamp, breach) {
            // The latch already covered an immediate critical for
            // forward_critical metrics; don't emit it twice.
            if emit.is_none() && !(spec.forward_critical && severity == Severity::Critical) {
                emit = Some(severity);
            }
        }

        let severity = emit?;
        let (window_start, window_end) = lane.window.bounds()?;
        drop(lanes);

        let event = AlertEvent {
            id: 0,
            alert_name: sample.metric.clone(),
            model_name,
            severity,
            window_start,
            window_end,
            triggering_value: aggregate,
            deployment_id: sample.deployment_id,
        };
        match self.state.append_alert(event) {
            Ok(event) => {
                warn!(
                    alert = %event.alert_name,
                    model = %event.model_name,
                    severity = ?event.severity,
                    value = event.triggering_value,
                    deployment_id = event.deployment_id,
                    "alert firing"
                );
                // Best-effort hand-off; the channel owns retries.
                self.sink.deliver(&event);
                Some(event)
            }
            Err(e) => {
                error!(error = %e, "failed to append alert");
                None
            }
        }
    }

    /// Current window aggregates for a deployment, per metric.
    pub fn summary(&self, deployment_id: DeploymentId) -> HashMap<String, f64> {
        let lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = HashMap::new();
        for ((id, metric), lane) in lanes.iter() {
            if *id != deployment_id {
                continue;
            }
            if let Some(spec) = self.config.metrics.get(metric)
                && let Some(value) = lane.window.aggregate(spec.aggregate)
            {
                out.insert(metric.clone(), value);
            }
        }
        out
    }

    /// Run the evaluation loop until shutdown.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!("monitoring engine started");
        loop {
            tokio::select! {
                _ = self.notify.notified() => {
                    let fired = self.process_pending();
                    if !fired.is_empty() {
                        debug!(count = fired.len(), "alerts emitted");
                    }
                }
                _ = tokio::time::sleep(Duration::from_secs(1)) => {
                    // Drain anything the notify raced past.
                    self.process_pending();
                }
                _ = shutdown.changed() => {
                    info!("monitoring engine shutting down");
                    break;
                }
            }
        }
    }

    fn resolve_model(&self, deployment_id: DeploymentId) -> Option<String> {
        {
            let attached = self.attached.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(model) = attached.get(&deployment_id) {
                return Some(model.clone());
            }
        }
        // Late attach: samples can race the transition hook.
        match self.attach(deployment_id) {
            Ok(true) => self
                .attached
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .get(&deployment_id)
                .cloned(),
            _ => None,
        }
    }
}

/// Compare a window aggregate against the spec thresholds.
fn breach_severity(spec: &MetricSpec, value: f64) -> Option<Severity> {
    match spec.direction {
        Direction::Above => {
            if value > spec.critical {
                Some(Severity::Critical)
            } else if value > spec.warning {
                Some(Severity::Warning)
            } else {
                None
            }
        }
        Direction::Below => {
            if value < spec.critical {
                Some(Severity::Critical)
            } else if value < spec.warning {
                Some(Severity::Warning)
            } else {
                None
            }
        }
    }
}
