//! Deployment controller — drives the deployment state machine.
//!
//! All mutations happen inside a per-model critical section and land
//! in a single store transaction, so concurrent deploy/rollback calls
//! for the same model serialize and readers never observe a partial
//! swap. The loser of a race re-evaluates preconditions against the
//! winner's resulting state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use semver::Version;
use tracing::{info, warn};

use modelgrid_registry::ArtifactStore;
use modelgrid_state::{DeployMode, DeploymentRecord, DeploymentState, StateStore, VersionStatus};

use crate::error::{DeployError, DeployResult};
use crate::validate::{self, CancelToken, DeployPolicy, ResourceProbe};

/// Callback invoked after each successful live transition (deploy or
/// rollback) with the newly active record. The daemon uses this to
/// re-attach the monitoring engine.
pub type TransitionHook = Arc<dyn Fn(&DeploymentRecord) + Send + Sync>;

/// Derived health of a deployment, from its alert history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
}

/// Read-only deployment status summary for a model.
#[derive(Debug, Clone)]
pub struct DeploymentStatus {
    pub model_name: String,
    pub active: Option<DeploymentRecord>,
    /// Alerts recorded against the active deployment.
    pub alert_count: usize,
    pub health: HealthState,
}

/// The deployment controller.
pub struct DeploymentController {
    state: StateStore,
    artifacts: Arc<dyn ArtifactStore>,
    probe: Arc<dyn ResourceProbe>,
    policy: DeployPolicy,
    /// Per-model critical sections. Deployments of different models
    /// never block each other.
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    transition_hook: Option<TransitionHook>,
}

impl DeploymentController {
    pub fn new(
        state: StateStore,
        artifacts: Arc<dyn ArtifactStore>,
        probe: Arc<dyn ResourceProbe>,
        policy: DeployPolicy,
    ) -> Self {
        Self {
            state,
            artifacts,
            probe,
            policy,
            locks: Mutex::new(HashMap::new()),
            transition_hook: None,
        }
    }

    /// Set the callback invoked after each successful live transition.
    pub fn with_transition_hook(mut self, hook: TransitionHook) -> Self {
        self.transition_hook = Some(hook);
        self
    }

    /// Deploy a version of a model.
    ///
    /// `dry_run` mode exercises validation and records the outcome
    /// without ever touching the active pointer; `live` mode performs
    /// the atomic swap: prior active version superseded, target
    /// activated, record appended with `previous_active` set, index
    /// repointed — all in one store transaction.
    pub fn deploy(
        &self,
        model: &str,
        version: &Version,
        mode: DeployMode,
        requested_by: &str,
        description: &str,
    ) -> DeployResult<DeploymentRecord> {
        self.deploy_with_cancel(model, version, mode, requested_by, description, &CancelToken::new())
    }

    /// `deploy` with a cooperative cancellation token, honored during
    /// the validation phase only; the swap itself is atomic.
    pub fn deploy_with_cancel(
        &self,
        model: &str,
        version: &Version,
        mode: DeployMode,
        requested_by: &str,
        description: &str,
        cancel: &CancelToken,
    ) -> DeployResult<DeploymentRecord> {
        let slot = self.model_lock(model)?;
        let _guard = slot
            .lock()
            .map_err(|_| DeployError::Conflict(format!("critical section for {model} poisoned")))?;

        let mut target = self
            .state
            .get_version(model, version)?
            .ok_or_else(|| DeployError::VersionNotFound(format!("{model}@{version}")))?;
        if target.status == VersionStatus::Active {
            return Err(DeployError::AlreadyActive {
                model: model.to_string(),
                version: version.to_string(),
            });
        }

        // In-memory staging only until the single commit below; a
        // failure anywhere before that leaves no trace in the store.
        let mut record = DeploymentRecord {
            id: 0,
            model_name: model.to_string(),
            target: version.clone(),
            previous_active: None,
            mode,
            state: DeploymentState::Requested,
            requested_by: requested_by.to_string(),
            description: description.to_string(),
            requested_at: epoch_secs(),
            activated_at: None,
            rolled_back_at: None,
        };

        validate::run_checks(&target, self.artifacts.as_ref(), self.probe.as_ref(), &self.policy, cancel)?;

        match mode {
            DeployMode::DryRun => {
                record.state = DeploymentState::DryRunComplete;
                // A validated version is staged for later promotion.
                let versions = if target.status == VersionStatus::Registered {
                    target.status = VersionStatus::Staged;
                    vec![target]
                } else {
                    Vec::new()
                };
                let record = self.state.commit_deployment(record, &versions, None, false)?;
                info!(model, %version, id = record.id, "dry run complete");
                Ok(record)
            }
            DeployMode::Live => {
                record.state = DeploymentState::Staged;

                let mut versions = Vec::new();
                let mut prior_record = None;
                if let Some(mut prior) = self.state.active_deployment(model)? {
                    record.previous_active = Some(prior.target.clone());
                    if let Some(mut prev) = self.state.get_version(model, &prior.target)? {
                        prev.status = VersionStatus::Superseded;
                        versions.push(prev);
                    }
                    prior.state = DeploymentState::Superseded;
                    prior_record = Some(prior);
                }

                target.status = VersionStatus::Active;
                versions.push(target);
                record.state = DeploymentState::Active;
                record.activated_at = Some(epoch_secs());

                let record =
                    self.state
                        .commit_deployment(record, &versions, prior_record.as_ref(), true)?;
                info!(
                    model,
                    %version,
                    id = record.id,
                    previous = ?record.previous_active,
                    "deployment activated"
                );
                if let Some(hook) = &self.transition_hook {
                    hook(&record);
                }
                Ok(record)
            }
        }
    }

    /// Roll back to the previously active version.
    ///
    /// A rollback is a first-class deployment event appended to the
    /// log; history is never erased. The new record's
    /// `previous_active` is empty, so a second rollback with no
    /// intervening deploy fails with `NoPriorVersion`.
    pub fn rollback(&self, model: &str, requested_by: &str) -> DeployResult<DeploymentRecord> {
        let slot = self.model_lock(model)?;
        let _guard = slot
            .lock()
            .map_err(|_| DeployError::Conflict(format!("critical section for {model} poisoned")))?;

        let prior = self
            .state
            .active_deployment(model)?
            .ok_or_else(|| DeployError::NoPriorVersion(model.to_string()))?;
        let restored_version = prior
            .previous_active
            .clone()
            .ok_or_else(|| DeployError::NoPriorVersion(model.to_string()))?;

        let mut versions = Vec::new();
        if let Some(mut current) = self.state.get_version(model, &prior.target)? {
            current.status = VersionStatus::Superseded;
            versions.push(current);
        }
        let mut restored = self
            .state
            .get_version(model, &restored_version)?
            .ok_or_else(|| DeployError::VersionNotFound(format!("{model}@{restored_version}")))?;
        restored.status = VersionStatus::Active;
        versions.push(restored);

        let now = epoch_secs();
        let mut rolled_back = prior.clone();
        rolled_back.state = DeploymentState::RolledBack;
        rolled_back.rolled_back_at = Some(now);

        let record = DeploymentRecord {
            id: 0,
            model_name: model.to_string(),
            target: restored_version.clone(),
            previous_active: None,
            mode: DeployMode::Live,
            state: DeploymentState::Active,
            requested_by: requested_by.to_string(),
            description: format!("rollback of deployment {}", prior.id),
            requested_at: now,
            activated_at: Some(now),
            rolled_back_at: None,
        };
        let record = self
            .state
            .commit_deployment(record, &versions, Some(&rolled_back), true)?;
        warn!(
            model,
            restored = %restored_version,
            rolled_back = prior.id,
            "rollback applied"
        );
        if let Some(hook) = &self.transition_hook {
            hook(&record);
        }
        Ok(record)
    }

    /// Deployment history for a model, newest first. Lock-free
    /// snapshot.
    pub fn history(&self, model: &str) -> DeployResult<Vec<DeploymentRecord>> {
        Ok(self.state.list_deployments(model)?)
    }

    /// Status summary: active record plus alert-derived health.
    /// Lock-free snapshot; "active as of read time".
    pub fn status(&self, model: &str) -> DeployResult<DeploymentStatus> {
        let active = self.state.active_deployment(model)?;
        let alert_count = match &active {
            Some(record) => self.state.list_alerts_for_deployment(record.id, 100)?.len(),
            None => 0,
        };
        Ok(DeploymentStatus {
            model_name: model.to_string(),
            active,
            alert_count,
            health: if alert_count > 0 {
                HealthState::Degraded
            } else {
                HealthState::Healthy
            },
        })
    }

    /// Get or create the critical-section slot for a model.
    fn model_lock(&self, model: &str) -> DeployResult<Arc<Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| DeployError::Conflict("lock table poisoned".to_string()))?;
        Ok(locks
            .entry(model.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone())
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
