//! Pre-deployment validation checks.
//!
//! Each check has a stable name reported in `ValidationFailed` so the
//! caller sees the specific failing precondition. Dry runs exercise
//! the same checks as live deploys; a dry run may be cancelled between
//! checks via a `CancelToken`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;

use modelgrid_state::ModelVersion;

use crate::error::{DeployError, DeployResult};
use modelgrid_registry::ArtifactStore;

/// Resource sanity floor a deployment must clear.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceBudget {
    pub min_free_memory_bytes: u64,
    pub max_cpu_percent: f64,
}

impl Default for ResourceBudget {
    fn default() -> Self {
        Self {
            min_free_memory_bytes: 256 * 1024 * 1024,
            max_cpu_percent: 90.0,
        }
    }
}

/// Point-in-time view of serving-host resources, supplied by an
/// external probe.
#[derive(Debug, Clone, Copy)]
pub struct ResourceSnapshot {
    pub free_memory_bytes: u64,
    pub cpu_percent: f64,
}

/// External resource-probe seam.
pub trait ResourceProbe: Send + Sync {
    fn snapshot(&self) -> ResourceSnapshot;
}

/// Probe that always reports ample headroom. Test/bootstrap use.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unconstrained;

impl ResourceProbe for Unconstrained {
    fn snapshot(&self) -> ResourceSnapshot {
        ResourceSnapshot {
            free_memory_bytes: u64::MAX,
            cpu_percent: 0.0,
        }
    }
}

/// Deployment policy: the resource budget plus training-metric floors
/// a version must meet before it may be deployed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployPolicy {
    pub budget: ResourceBudget,
    /// Metric name → minimum value required of the version's training
    /// metrics snapshot.
    pub requirements: BTreeMap<String, f64>,
}

/// Cooperative cancellation handle for an in-flight dry run.
///
/// A live swap, once entered, runs to completion or fails atomically;
/// only the validation phase honors cancellation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// Run all validation checks for a target version, in order:
/// `artifact`, `training_metrics`, `resource_budget`.
pub fn run_checks(
    version: &ModelVersion,
    artifacts: &dyn ArtifactStore,
    probe: &dyn ResourceProbe,
    policy: &DeployPolicy,
    cancel: &CancelToken,
) -> DeployResult<()> {
    if cancel.is_cancelled() {
        return Err(DeployError::Cancelled);
    }
    if !artifacts.resolve(&version.artifact_ref) {
        return Err(DeployError::ValidationFailed {
            check: "artifact".to_string(),
            detail: format!("unresolvable artifact ref {}", version.artifact_ref),
        });
    }

    if cancel.is_cancelled() {
        return Err(DeployError::Cancelled);
    }
    for (metric, floor) in &policy.requirements {
        let value = version.training_metrics.get(metric).copied();
        if !value.is_some_and(|v| v >= *floor) {
            return Err(DeployError::ValidationFailed {
                check: "training_metrics".to_string(),
                detail: format!(
                    "{metric} = {} below required {floor}",
                    value.map_or("absent".to_string(), |v| v.to_string())
                ),
            });
        }
    }

    if cancel.is_cancelled() {
        return Err(DeployError::Cancelled);
    }
    let snapshot = probe.snapshot();
    if snapshot.free_memory_bytes < policy.budget.min_free_memory_bytes {
        return Err(DeployError::ValidationFailed {
            check: "resource_budget".to_string(),
            detail: format!(
                "free memory {} below floor {}",
                snapshot.free_memory_bytes, policy.budget.min_free_memory_bytes
            ),
        });
    }
    if snapshot.cpu_percent > policy.budget.max_cpu_percent {
        return Err(DeployError::ValidationFailed {
            check: "resource_budget".to_string(),
            detail: format!(
                "cpu {:.1}% above ceiling {:.1}%",
                snapshot.cpu_percent, policy.budget.max_cpu_percent
            ),
        });
    }

    debug!(model = %version.model_name, version = %version.version, "validation passed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelgrid_registry::artifact::AcceptAll;
    use modelgrid_state::VersionStatus;
    use semver::Version;
    use std::collections::BTreeSet;

    struct RejectAll;
    impl ArtifactStore for RejectAll {
        fn resolve(&self, _artifact_ref: &str) -> bool {
            false
        }
    }

    struct FixedProbe(ResourceSnapshot);
    impl ResourceProbe for FixedProbe {
        fn snapshot(&self) -> ResourceSnapshot {
            self.0
        }
    }

    fn test_version() -> ModelVersion {
        ModelVersion {
            model_name: "pricer".to_string(),
            version: Version::new(1, 0, 0),
            artifact_ref: "file:pricer.bin".to_string(),
            model_kind: "regressor".to_string(),
            status: VersionStatus::Registered,
            tags: BTreeSet::new(),
            training_metrics: BTreeMap::from([("accuracy".to_string(), 0.9)]),
            created_at: 1000,
        }
    }

    #[test]
    fn all_checks_pass() {
        let result = run_checks(
            &test_version(),
            &AcceptAll,
            &Unconstrained,
            &DeployPolicy::default(),
            &CancelToken::new(),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn unresolvable_artifact_names_the_check() {
        let err = run_checks(
            &test_version(),
            &RejectAll,
            &Unconstrained,
            &DeployPolicy::default(),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, DeployError::ValidationFailed { ref check, .. } if check == "artifact"));
    }

    #[test]
    fn metric_floor_violation_names_the_check() {
        let policy = DeployPolicy {
            requirements: BTreeMap::from([("accuracy".to_string(), 0.95)]),
            ..Default::default()
        };
        let err = run_checks(
            &test_version(),
            &AcceptAll,
            &Unconstrained,
            &policy,
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(
            matches!(err, DeployError::ValidationFailed { ref check, .. } if check == "training_metrics")
        );
    }

    #[test]
    fn absent_required_metric_fails() {
        let policy = DeployPolicy {
            requirements: BTreeMap::from([("f1".to_string(), 0.5)]),
            ..Default::default()
        };
        let err = run_checks(
            &test_version(),
            &AcceptAll,
            &Unconstrained,
            &policy,
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(
            matches!(err, DeployError::ValidationFailed { ref check, .. } if check == "training_metrics")
        );
    }

    #[test]
    fn budget_violations_name_the_check() {
        let probe = FixedProbe(ResourceSnapshot {
            free_memory_bytes: 1,
            cpu_percent: 0.0,
        });
        let err = run_checks(
            &test_version(),
            &AcceptAll,
            &probe,
            &DeployPolicy::default(),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(
            matches!(err, DeployError::ValidationFailed { ref check, .. } if check == "resource_budget")
        );

        let probe = FixedProbe(ResourceSnapshot {
            free_memory_bytes: u64::MAX,
            cpu_percent: 99.0,
        });
        let err = run_checks(
            &test_version(),
            &AcceptAll,
            &probe,
            &DeployPolicy::default(),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(
            matches!(err, DeployError::ValidationFailed { ref check, .. } if check == "resource_budget")
        );
    }

    #[test]
    fn cancellation_short_circuits() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = run_checks(
            &test_version(),
            &AcceptAll,
            &Unconstrained,
            &DeployPolicy::default(),
            &cancel,
        )
        .unwrap_err();
        assert!(matches!(err, DeployError::Cancelled));
    }
}
