//! Registry operations over the version store.
//!
//! Register allocates the next semantic version (patch bump unless the
//! caller asks for minor/major), `get` resolves symbolic selectors,
//! and `prune` applies the retention policy. Reads are lock-free
//! snapshots against the durable store.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use semver::Version;
use tracing::{debug, info};

use modelgrid_state::{ModelVersion, StateStore, VersionStatus};

use crate::artifact::ArtifactStore;
use crate::error::{RegistryError, RegistryResult};

/// Which component of the semantic version to bump on registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionBump {
    #[default]
    Patch,
    Minor,
    Major,
}

/// Caller-supplied payload for a new version.
#[derive(Debug, Clone)]
pub struct VersionSpec {
    /// Opaque locator resolved by the external artifact store.
    pub artifact_ref: String,
    /// Capability tag for the external training/serving collaborators.
    pub model_kind: String,
    pub training_metrics: BTreeMap<String, f64>,
    pub tags: BTreeSet<String>,
    pub bump: VersionBump,
}

/// Symbolic or exact version selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSelector {
    Exact(Version),
    Latest,
    Active,
}

impl FromStr for VersionSelector {
    type Err = semver::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "latest" => Ok(Self::Latest),
            "active" => Ok(Self::Active),
            other => Ok(Self::Exact(Version::parse(other)?)),
        }
    }
}

/// Listing filter: tag any-match plus minimum training-metric floors.
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Keep versions carrying at least one of these tags. Empty = all.
    pub tags: Vec<String>,
    /// Keep versions whose training metrics meet every floor.
    pub min_metrics: BTreeMap<String, f64>,
}

/// Retention policy for non-active versions.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RegistryPolicy {
    /// Maximum non-active versions retained per model name.
    pub max_versions: usize,
}

impl Default for RegistryPolicy {
    fn default() -> Self {
        Self { max_versions: 5 }
    }
}

/// The model registry. Owns all `ModelVersion` mutation.
#[derive(Clone)]
pub struct Registry {
    state: StateStore,
    artifacts: Arc<dyn ArtifactStore>,
    policy: RegistryPolicy,
}

impl Registry {
    pub fn new(state: StateStore, artifacts: Arc<dyn ArtifactStore>, policy: RegistryPolicy) -> Self {
        Self {
            state,
            artifacts,
            policy,
        }
    }

    /// Register a new version of a model.
    ///
    /// Allocates the next semantic version by bumping patch (or
    /// minor/major when requested) over the highest existing version;
    /// the first version of a model is `1.0.0`. Fails with
    /// `InvalidArtifact` when the external store cannot resolve the
    /// artifact reference (existence check only, not content
    /// validation).
    pub fn register(&self, model: &str, spec: VersionSpec) -> RegistryResult<ModelVersion> {
        if !self.artifacts.resolve(&spec.artifact_ref) {
            return Err(RegistryError::InvalidArtifact(spec.artifact_ref));
        }

        let existing = self.state.list_versions(model)?;
        let version = match existing.iter().map(|v| &v.version).max() {
            Some(highest) => bump(highest, spec.bump),
            None => Version::new(1, 0, 0),
        };

        let record = ModelVersion {
            model_name: model.to_string(),
            version: version.clone(),
            artifact_ref: spec.artifact_ref,
            model_kind: spec.model_kind,
            status: VersionStatus::Registered,
            tags: spec.tags,
            training_metrics: spec.training_metrics,
            created_at: epoch_secs(),
        };
        self.state.put_version(&record)?;
        info!(%model, %version, "version registered");
        Ok(record)
    }

    /// Resolve a selector to a version.
    ///
    /// `Active` resolution is "active as of read time" — it may be
    /// superseded by the time the caller acts on it.
    pub fn get(&self, model: &str, selector: &VersionSelector) -> RegistryResult<ModelVersion> {
        match selector {
            VersionSelector::Exact(version) => self
                .state
                .get_version(model, version)?
                .ok_or_else(|| RegistryError::NotFound(format!("{model}@{version}"))),
            VersionSelector::Latest => {
                let versions = self.state.list_versions(model)?;
                versions
                    .into_iter()
                    .max_by(|a, b| a.version.cmp(&b.version))
                    .ok_or_else(|| RegistryError::NotFound(format!("{model}@latest")))
            }
            VersionSelector::Active => {
                let active = self
                    .state
                    .active_deployment(model)?
                    .ok_or_else(|| RegistryError::NotFound(format!("{model}@active")))?;
                self.state
                    .get_version(model, &active.target)?
                    .ok_or_else(|| RegistryError::NotFound(format!("{model}@active")))
            }
        }
    }

    /// List versions of a model, semver-descending.
    ///
    /// Snapshot semantics: registrations committed mid-iteration are
    /// not reflected.
    pub fn list_versions(&self, model: &str, filter: &ListFilter) -> RegistryResult<Vec<ModelVersion>> {
        let mut versions = self.state.list_versions(model)?;

        if !filter.tags.is_empty() {
            versions.retain(|v| filter.tags.iter().any(|t| v.tags.contains(t)));
        }
        versions.retain(|v| {
            filter
                .min_metrics
                .iter()
                .all(|(metric, floor)| v.training_metrics.get(metric).is_some_and(|m| m >= floor))
        });

        versions.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(versions)
    }

    /// Apply the retention policy: keep at most `max_versions`
    /// non-active versions, purging the oldest beyond the limit.
    ///
    /// Exempt from purge: the active version, versions staged for
    /// promotion, and the baseline version of any open retrain
    /// request. Idempotent; returns the number purged.
    pub fn prune(&self, model: &str) -> RegistryResult<usize> {
        let mut versions = self.state.list_versions(model)?;
        versions.sort_by(|a, b| b.version.cmp(&a.version));

        let retrain_baselines: BTreeSet<Version> = self
            .state
            .open_retrain(model)?
            .into_iter()
            .filter_map(|r| r.baseline_version)
            .collect();

        let mut purged = 0;
        let mut retained = 0usize;
        for v in &versions {
            if v.status == VersionStatus::Active {
                continue;
            }
            retained += 1;
            if retained <= self.policy.max_versions {
                continue;
            }
            if v.status == VersionStatus::Staged || retrain_baselines.contains(&v.version) {
                debug!(model, version = %v.version, "purge exempt");
                continue;
            }
            self.state.delete_version(model, &v.version)?;
            purged += 1;
            debug!(model, version = %v.version, "version purged");
        }

        if purged > 0 {
            info!(model, purged, "retention applied");
        }
        Ok(purged)
    }

    /// Add a tag to a version.
    pub fn tag(&self, model: &str, version: &Version, tag: &str) -> RegistryResult<()> {
        let mut v = self.load(model, version)?;
        if v.tags.insert(tag.to_string()) {
            self.state.put_version(&v)?;
        }
        Ok(())
    }

    /// Remove a tag from a version.
    pub fn untag(&self, model: &str, version: &Version, tag: &str) -> RegistryResult<()> {
        let mut v = self.load(model, version)?;
        if v.tags.remove(tag) {
            self.state.put_version(&v)?;
        }
        Ok(())
    }

    /// Retire a version that was never deployed.
    pub fn retire(&self, model: &str, version: &Version) -> RegistryResult<ModelVersion> {
        let mut v = self.load(model, version)?;
        match v.status {
            VersionStatus::Registered | VersionStatus::Staged => {
                v.status = VersionStatus::Retired;
                self.state.put_version(&v)?;
                info!(model, %version, "version retired");
                Ok(v)
            }
            status => Err(RegistryError::InvalidTransition {
                model: model.to_string(),
                version: version.to_string(),
                detail: format!("cannot retire a {status:?} version"),
            }),
        }
    }

    fn load(&self, model: &str, version: &Version) -> RegistryResult<ModelVersion> {
        self.state
            .get_version(model, version)?
            .ok_or_else(|| RegistryError::NotFound(format!("{model}@{version}")))
    }
}

fn bump(version: &Version, bump: VersionBump) -> Version {
    match bump {
        VersionBump::Patch => Version::new(version.major, version.minor, version.patch + 1),
        VersionBump::Minor => Version::new(version.major, version.minor + 1, 0),
        VersionBump::Major => Version::new(version.major + 1, 0, 0),
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::AcceptAll;

    struct RejectAll;
    impl ArtifactStore for RejectAll {
        fn resolve(&self, _artifact_ref: &str) -> bool {
            false
        }
    }

    fn test_registry(max_versions: usize) -> Registry {
        Registry::new(
            StateStore::open_in_memory().unwrap(),
            Arc::new(AcceptAll),
            RegistryPolicy { max_versions },
        )
    }

    fn test_spec() -> VersionSpec {
        VersionSpec {
            artifact_ref: "file:artifacts/pricer.bin".to_string(),
            model_kind: "regressor".to_string(),
            training_metrics: BTreeMap::from([("accuracy".to_string(), 0.9)]),
            tags: BTreeSet::new(),
            bump: VersionBump::Patch,
        }
    }

    // ── register ───────────────────────────────────────────────────

    #[test]
    fn first_version_is_one_zero_zero() {
        let registry = test_registry(5);
        let v = registry.register("pricer", test_spec()).unwrap();
        assert_eq!(v.version, Version::new(1, 0, 0));
        assert_eq!(v.status, VersionStatus::Registered);
    }

    #[test]
    fn default_bump_is_patch() {
        let registry = test_registry(5);
        registry.register("pricer", test_spec()).unwrap();
        let v = registry.register("pricer", test_spec()).unwrap();
        assert_eq!(v.version, Version::new(1, 0, 1));
    }

    #[test]
    fn minor_and_major_bumps() {
        let registry = test_registry(5);
        registry.register("pricer", test_spec()).unwrap();

        let mut spec = test_spec();
        spec.bump = VersionBump::Minor;
        let v = registry.register("pricer", spec).unwrap();
        assert_eq!(v.version, Version::new(1, 1, 0));

        let mut spec = test_spec();
        spec.bump = VersionBump::Major;
        let v = registry.register("pricer", spec).unwrap();
        assert_eq!(v.version, Version::new(2, 0, 0));
    }

    #[test]
    fn unresolvable_artifact_is_rejected() {
        let registry = Registry::new(
            StateStore::open_in_memory().unwrap(),
            Arc::new(RejectAll),
            RegistryPolicy::default(),
        );
        let err = registry.register("pricer", test_spec()).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidArtifact(_)));
    }

    // ── get ────────────────────────────────────────────────────────

    #[test]
    fn get_latest_and_exact() {
        let registry = test_registry(5);
        registry.register("pricer", test_spec()).unwrap();
        registry.register("pricer", test_spec()).unwrap();

        let latest = registry.get("pricer", &VersionSelector::Latest).unwrap();
        assert_eq!(latest.version, Version::new(1, 0, 1));

        let exact = registry
            .get("pricer", &VersionSelector::Exact(Version::new(1, 0, 0)))
            .unwrap();
        assert_eq!(exact.version, Version::new(1, 0, 0));
    }

    #[test]
    fn get_unknown_is_not_found() {
        let registry = test_registry(5);
        for selector in [
            VersionSelector::Latest,
            VersionSelector::Active,
            VersionSelector::Exact(Version::new(9, 9, 9)),
        ] {
            let err = registry.get("ghost", &selector).unwrap_err();
            assert!(matches!(err, RegistryError::NotFound(_)));
        }
    }

    #[test]
    fn selector_parses_from_text() {
        assert_eq!("latest".parse::<VersionSelector>().unwrap(), VersionSelector::Latest);
        assert_eq!("active".parse::<VersionSelector>().unwrap(), VersionSelector::Active);
        assert_eq!(
            "1.2.3".parse::<VersionSelector>().unwrap(),
            VersionSelector::Exact(Version::new(1, 2, 3))
        );
        assert!("not-a-version".parse::<VersionSelector>().is_err());
    }

    // ── list ───────────────────────────────────────────────────────

    #[test]
    fn list_is_semver_descending() {
        let registry = test_registry(5);
        for _ in 0..3 {
            registry.register("pricer", test_spec()).unwrap();
        }

        let versions = registry.list_versions("pricer", &ListFilter::default()).unwrap();
        assert_eq!(versions[0].version, Version::new(1, 0, 2));
        assert_eq!(versions[2].version, Version::new(1, 0, 0));
    }

    #[test]
    fn list_filters_by_tag_and_metric_floor() {
        let registry = test_registry(5);

        let mut spec = test_spec();
        spec.tags.insert("candidate".to_string());
        registry.register("pricer", spec).unwrap();

        let mut spec = test_spec();
        spec.training_metrics.insert("accuracy".to_string(), 0.7);
        registry.register("pricer", spec).unwrap();

        let by_tag = registry
            .list_versions(
                "pricer",
                &ListFilter {
                    tags: vec!["candidate".to_string()],
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(by_tag.len(), 1);
        assert_eq!(by_tag[0].version, Version::new(1, 0, 0));

        let by_floor = registry
            .list_versions(
                "pricer",
                &ListFilter {
                    min_metrics: BTreeMap::from([("accuracy".to_string(), 0.8)]),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(by_floor.len(), 1);
        assert_eq!(by_floor[0].version, Version::new(1, 0, 0));
    }

    // ── prune ──────────────────────────────────────────────────────

    #[test]
    fn prune_purges_oldest_beyond_limit() {
        let registry = test_registry(2);
        for _ in 0..3 {
            registry.register("pricer", test_spec()).unwrap();
        }

        let purged = registry.prune("pricer").unwrap();
        assert_eq!(purged, 1);

        let remaining = registry.list_versions("pricer", &ListFilter::default()).unwrap();
        let versions: Vec<_> = remaining.iter().map(|v| v.version.clone()).collect();
        assert_eq!(versions, vec![Version::new(1, 0, 2), Version::new(1, 0, 1)]);

        // Idempotent.
        assert_eq!(registry.prune("pricer").unwrap(), 0);
    }

    #[test]
    fn prune_exempts_active_version() {
        // Mark the oldest active by hand; prune must not count or touch it.
        let state = StateStore::open_in_memory().unwrap();
        let registry = Registry::new(state.clone(), Arc::new(AcceptAll), RegistryPolicy { max_versions: 1 });
        for _ in 0..3 {
            registry.register("pricer", test_spec()).unwrap();
        }
        let mut oldest = state
            .get_version("pricer", &Version::new(1, 0, 0))
            .unwrap()
            .unwrap();
        oldest.status = VersionStatus::Active;
        state.put_version(&oldest).unwrap();

        registry.prune("pricer").unwrap();
        assert!(state.get_version("pricer", &Version::new(1, 0, 0)).unwrap().is_some());
        // Non-active retention of 1 keeps only 1.0.2.
        assert!(state.get_version("pricer", &Version::new(1, 0, 1)).unwrap().is_none());
        assert!(state.get_version("pricer", &Version::new(1, 0, 2)).unwrap().is_some());
    }

    #[test]
    fn prune_exempts_retrain_baseline() {
        let state = StateStore::open_in_memory().unwrap();
        let registry = Registry::new(state.clone(), Arc::new(AcceptAll), RegistryPolicy { max_versions: 1 });
        for _ in 0..3 {
            registry.register("pricer", test_spec()).unwrap();
        }

        state
            .create_retrain(modelgrid_state::RetrainRequest {
                id: 0,
                model_name: "pricer".to_string(),
                reason: "drift".to_string(),
                triggering_alert_ids: vec![],
                baseline_version: Some(Version::new(1, 0, 0)),
                requested_at: 1000,
                status: modelgrid_state::RetrainStatus::Pending,
            })
            .unwrap();

        registry.prune("pricer").unwrap();
        // 1.0.0 is the baseline of an open request; 1.0.1 is purged instead.
        assert!(state.get_version("pricer", &Version::new(1, 0, 0)).unwrap().is_some());
        assert!(state.get_version("pricer", &Version::new(1, 0, 1)).unwrap().is_none());
    }

    // ── tags & retire ──────────────────────────────────────────────

    #[test]
    fn tag_and_untag() {
        let registry = test_registry(5);
        let v = registry.register("pricer", test_spec()).unwrap();

        registry.tag("pricer", &v.version, "blessed").unwrap();
        let loaded = registry
            .get("pricer", &VersionSelector::Exact(v.version.clone()))
            .unwrap();
        assert!(loaded.tags.contains("blessed"));

        registry.untag("pricer", &v.version, "blessed").unwrap();
        let loaded = registry
            .get("pricer", &VersionSelector::Exact(v.version.clone()))
            .unwrap();
        assert!(!loaded.tags.contains("blessed"));
    }

    #[test]
    fn retire_never_deployed_only() {
        let registry = test_registry(5);
        let v = registry.register("pricer", test_spec()).unwrap();

        let retired = registry.retire("pricer", &v.version).unwrap();
        assert_eq!(retired.status, VersionStatus::Retired);

        // A retired version cannot be retired again.
        let err = registry.retire("pricer", &v.version).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTransition { .. }));
    }
}
