//! Retrain trigger — alert accumulation and request lifecycle.
//!
//! One piece of state per model name: the set of alert ids already
//! considered, plus a rolling window of warning alerts. Critical
//! drift/accuracy alerts request retraining immediately; warnings
//! accumulate until the configured count within the window.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use semver::Version;
use tracing::{debug, info, warn};

use modelgrid_deploy::DeploymentController;
use modelgrid_state::{
    AlertEvent, AlertId, DeployMode, DeploymentRecord, RetrainRequest, RetrainStatus, Severity,
    StateStore,
};

use crate::error::{TriggerError, TriggerResult};
use crate::training::TrainingSystem;

/// Alert names whose critical severity requests retraining on sight.
const ACTIONABLE_ALERTS: [&str; 2] = ["model_drift", "prediction_accuracy"];

/// When the trigger asks for a new training run.
///
/// The warning count and window are placeholders promoted to
/// configuration — tune per deployment, they are not load-bearing.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TriggerPolicy {
    /// Warnings within the rolling window that request retraining.
    pub warning_threshold: usize,
    /// Rolling accumulation window in seconds.
    pub warning_window_secs: u64,
}

impl Default for TriggerPolicy {
    fn default() -> Self {
        Self {
            warning_threshold: 3,
            warning_window_secs: 24 * 3600,
        }
    }
}

/// Per-model accumulation state.
#[derive(Default)]
struct ModelState {
    /// Alert ids already considered (dedup).
    considered: HashSet<AlertId>,
    /// Warning alerts not yet consumed: (event time, alert id).
    warnings: VecDeque<(u64, AlertId)>,
}

/// The retrain trigger.
pub struct RetrainTrigger {
    state: StateStore,
    training: Arc<dyn TrainingSystem>,
    controller: Arc<DeploymentController>,
    policy: TriggerPolicy,
    models: Mutex<HashMap<String, ModelState>>,
}

impl RetrainTrigger {
    pub fn new(
        state: StateStore,
        training: Arc<dyn TrainingSystem>,
        controller: Arc<DeploymentController>,
        policy: TriggerPolicy,
    ) -> Self {
        Self {
            state,
            training,
            controller,
            policy,
            models: Mutex::new(HashMap::new()),
        }
    }

    /// Consume one alert. Returns the retrain request if the alert
    /// caused one.
    pub fn on_alert(&self, event: &AlertEvent) -> TriggerResult<Option<RetrainRequest>> {
        let triggering: Vec<AlertId> = {
            let mut models = self.models.lock().unwrap_or_else(|e| e.into_inner());
            let model_state = models.entry(event.model_name.clone()).or_default();

            if !model_state.considered.insert(event.id) {
                debug!(alert = event.id, "alert already considered");
                return Ok(None);
            }

            let actionable_critical = event.severity == Severity::Critical
                && ACTIONABLE_ALERTS.contains(&event.alert_name.as_str());

            if actionable_critical {
                vec![event.id]
            } else if event.severity == Severity::Warning {
                model_state.warnings.push_back((event.window_end, event.id));
                let cutoff = event
                    .window_end
                    .saturating_sub(self.policy.warning_window_secs);
                while let Some(&(ts, _)) = model_state.warnings.front() {
                    if ts < cutoff {
                        model_state.warnings.pop_front();
                    } else {
                        break;
                    }
                }
                if model_state.warnings.len() >= self.policy.warning_threshold {
                    // Consume the accumulated warnings.
                    model_state.warnings.drain(..).map(|(_, id)| id).collect()
                } else {
                    return Ok(None);
                }
            } else {
                // Criticals outside the actionable set are an ops
                // signal, not a retrain signal.
                debug!(alert = %event.alert_name, "critical alert not actionable for retraining");
                return Ok(None);
            }
        };

        // One open request per model covers the degradation signal.
        if !self.state.open_retrain(&event.model_name)?.is_empty() {
            info!(model = %event.model_name, "retrain request already open, skipping");
            return Ok(None);
        }

        let reason = if triggering.len() == 1 {
            format!("critical {} alert", event.alert_name)
        } else {
            format!("{} warning alerts within rolling window", triggering.len())
        };
        self.create_and_dispatch(&event.model_name, reason, triggering)
            .map(Some)
    }

    /// Completion callback from the external training system.
    ///
    /// Marks the request completed and forwards the new version to the
    /// deployment controller as a dry run — never auto-promoted to
    /// live.
    pub fn on_training_complete(
        &self,
        model: &str,
        request_id: u64,
        new_version: &Version,
    ) -> TriggerResult<DeploymentRecord> {
        let mut request = self
            .state
            .get_retrain(model, request_id)?
            .ok_or_else(|| TriggerError::NotFound(format!("{model}#{request_id}")))?;
        if request.status != RetrainStatus::Dispatched {
            return Err(TriggerError::InvalidState {
                id: request_id,
                status: format!("{:?}", request.status),
                expected: "Dispatched".to_string(),
            });
        }

        request.status = RetrainStatus::Completed;
        self.state.put_retrain(&request)?;
        info!(model, request_id, %new_version, "retrain completed");

        let record = self.controller.deploy(
            model,
            new_version,
            DeployMode::DryRun,
            "retrain-trigger",
            &format!("validation of retrain request {request_id}"),
        )?;
        Ok(record)
    }

    fn create_and_dispatch(
        &self,
        model: &str,
        reason: String,
        triggering_alert_ids: Vec<AlertId>,
    ) -> TriggerResult<RetrainRequest> {
        let baseline_version = self
            .state
            .active_deployment(model)?
            .map(|record| record.target);

        let mut request = self.state.create_retrain(RetrainRequest {
            id: 0,
            model_name: model.to_string(),
            reason: reason.clone(),
            triggering_alert_ids,
            baseline_version,
            requested_at: epoch_secs(),
            status: RetrainStatus::Pending,
        })?;
        info!(model, id = request.id, %reason, "retrain requested");

        // Fire-and-forget hand-off.
        match self.training.dispatch(&request) {
            Ok(()) => {
                request.status = RetrainStatus::Dispatched;
            }
            Err(e) => {
                warn!(model, id = request.id, error = %e, "training dispatch failed");
                request.status = RetrainStatus::Rejected;
            }
        }
        self.state.put_retrain(&request)?;
        Ok(request)
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
