//! Domain types for the ModelGrid state store.
//!
//! These types represent the persisted state of model versions, the
//! deployment log, metric samples, alert events, and retrain requests.
//! All types are serializable to/from JSON for storage in redb tables.

use std::collections::{BTreeMap, BTreeSet};

use semver::Version;
use serde::{Deserialize, Serialize};

/// Model name, the partition key for everything in the control plane.
pub type ModelName = String;

/// Monotonically increasing identifier for a deployment event.
pub type DeploymentId = u64;

/// Monotonically increasing identifier for an alert event.
pub type AlertId = u64;

/// Monotonically increasing identifier for a retrain request.
pub type RetrainId = u64;

// ── Model versions ─────────────────────────────────────────────────

/// A registered model version and its metadata.
///
/// Immutable once created except for `status` and `tags`. The artifact
/// itself lives in an external store; `artifact_ref` is an opaque
/// locator that the control plane never interprets.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelVersion {
    pub model_name: ModelName,
    pub version: Version,
    /// Opaque locator resolved by the external artifact store.
    pub artifact_ref: String,
    /// Capability tag; kind-specific behavior lives in the external
    /// training/serving collaborators, never in the control plane.
    pub model_kind: String,
    pub status: VersionStatus,
    pub tags: BTreeSet<String>,
    /// Training-time metrics snapshot (metric name → value).
    pub training_metrics: BTreeMap<String, f64>,
    /// Unix timestamp (seconds) when this version was registered.
    pub created_at: u64,
}

/// Lifecycle status of a model version.
///
/// Transitions: `registered → staged → active → superseded`, or
/// `→ retired` if never deployed. A version never returns to
/// `registered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Registered,
    Staged,
    Active,
    Superseded,
    Retired,
}

// ── Deployment log ─────────────────────────────────────────────────

/// Whether a deployment exercises validation only or swaps the active
/// pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployMode {
    DryRun,
    Live,
}

/// State of a deployment record.
///
/// `requested` and `staged` are transient within a single operation;
/// persisted records carry `dry_run_complete`, `active`, `superseded`,
/// or `rolled_back`. `rolled_back` is reachable only from `active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    Requested,
    DryRunComplete,
    Staged,
    Active,
    Superseded,
    RolledBack,
}

/// One entry in the append-only deployment log for a model.
///
/// Past records are never erased; a rollback appends a new record
/// rather than rewriting history. Only the per-model active pointer
/// (an index maintained alongside the log) is mutable derived state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentRecord {
    pub id: DeploymentId,
    pub model_name: ModelName,
    /// Version this deployment targets.
    pub target: Version,
    /// Version that was active when this deployment went live; the
    /// rollback anchor. `None` for dry runs and for records created by
    /// a rollback (a rollback cannot itself be rolled back).
    pub previous_active: Option<Version>,
    pub mode: DeployMode,
    pub state: DeploymentState,
    pub requested_by: String,
    pub description: String,
    /// Unix timestamp (seconds) when the deployment was requested.
    pub requested_at: u64,
    /// Set when the record went live; never mutated afterwards.
    pub activated_at: Option<u64>,
    /// Set when the record was rolled back.
    pub rolled_back_at: Option<u64>,
}

// ── Metrics & alerts ───────────────────────────────────────────────

/// A single observation from the serving process, tagged with the
/// deployment it was measured against. Append-only, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSample {
    pub metric: String,
    pub value: f64,
    /// Unix timestamp (seconds) at which the sample was taken.
    pub timestamp: u64,
    pub deployment_id: DeploymentId,
}

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Critical,
}

/// An alert emitted by the monitoring engine. Immutable once emitted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlertEvent {
    pub id: AlertId,
    pub alert_name: String,
    pub model_name: ModelName,
    pub severity: Severity,
    /// Window bounds (unix seconds) the triggering aggregate covered.
    pub window_start: u64,
    pub window_end: u64,
    pub triggering_value: f64,
    pub deployment_id: DeploymentId,
}

// ── Retrain requests ───────────────────────────────────────────────

/// Status of a retrain request. `completed` and `rejected` are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrainStatus {
    Pending,
    Dispatched,
    Completed,
    Rejected,
}

/// A request for a new training run, created by the retrain trigger
/// and driven to completion by the external training system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrainRequest {
    pub id: RetrainId,
    pub model_name: ModelName,
    pub reason: String,
    /// Alerts that caused this request.
    pub triggering_alert_ids: Vec<AlertId>,
    /// Active version when the request was created. Exempt from
    /// registry pruning while the request is non-terminal.
    pub baseline_version: Option<Version>,
    pub requested_at: u64,
    pub status: RetrainStatus,
}

impl RetrainRequest {
    /// Whether the request is still open (exempts its baseline version
    /// from pruning).
    pub fn is_open(&self) -> bool {
        matches!(self.status, RetrainStatus::Pending | RetrainStatus::Dispatched)
    }
}

// ── Table keys ─────────────────────────────────────────────────────

impl ModelVersion {
    /// Build the composite key for the versions table.
    pub fn table_key(&self) -> String {
        version_key(&self.model_name, &self.version)
    }
}

/// Key for a version row: `{model}/{version}`.
pub fn version_key(model: &str, version: &Version) -> String {
    format!("{model}/{version}")
}

impl DeploymentRecord {
    /// Build the composite key for the deployments table. The id is
    /// zero-padded so iteration order within a model prefix is append
    /// order.
    pub fn table_key(&self) -> String {
        deployment_key(&self.model_name, self.id)
    }
}

/// Key for a deployment log row: `{model}:{id:020}`.
pub fn deployment_key(model: &str, id: DeploymentId) -> String {
    format!("{model}:{id:020}")
}

impl AlertEvent {
    /// Build the composite key for the alerts table, partitioned by
    /// deployment id.
    pub fn table_key(&self) -> String {
        alert_key(self.deployment_id, self.id)
    }
}

/// Key for an alert log row: `{deployment_id:020}:{alert_id:020}`.
pub fn alert_key(deployment_id: DeploymentId, id: AlertId) -> String {
    format!("{deployment_id:020}:{id:020}")
}

impl RetrainRequest {
    /// Build the composite key for the retrain table.
    pub fn table_key(&self) -> String {
        retrain_key(&self.model_name, self.id)
    }
}

/// Key for a retrain request row: `{model}:{id:020}`.
pub fn retrain_key(model: &str, id: RetrainId) -> String {
    format!("{model}:{id:020}")
}
