//! StateStore — redb-backed persistence for the control plane.
//!
//! Provides typed CRUD over model versions, the deployment log, the
//! alert log, and retrain requests. All values are JSON-serialized into
//! redb's `&[u8]` value columns. The store supports both on-disk and
//! in-memory backends (the latter for testing).
//!
//! `commit_deployment` is the single transactional primitive behind
//! the live swap: version rewrites, the log append, the prior record
//! rewrite, and the active-index repoint all land in one write
//! transaction, so readers observe either the old world or the new one.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use semver::Version;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(VERSIONS).map_err(map_err!(Table))?;
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(ALERTS).map_err(map_err!(Table))?;
        txn.open_table(RETRAIN).map_err(map_err!(Table))?;
        txn.open_table(ACTIVE).map_err(map_err!(Table))?;
        txn.open_table(COUNTERS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Model versions ─────────────────────────────────────────────

    /// Insert or update a model version.
    pub fn put_version(&self, version: &ModelVersion) -> StateResult<()> {
        let key = version.table_key();
        let value = serde_json::to_vec(version).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(VERSIONS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "version stored");
        Ok(())
    }

    /// Get a version by model name and exact version.
    pub fn get_version(&self, model: &str, version: &Version) -> StateResult<Option<ModelVersion>> {
        let key = version_key(model, version);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(VERSIONS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let v: ModelVersion =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(v))
            }
            None => Ok(None),
        }
    }

    /// List all versions for a model. Snapshot semantics: registrations
    /// committed after the read transaction began are not reflected.
    pub fn list_versions(&self, model: &str) -> StateResult<Vec<ModelVersion>> {
        let prefix = format!("{model}/");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(VERSIONS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let v: ModelVersion =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(v);
            }
        }
        Ok(results)
    }

    /// Delete a version row. Returns true if it existed.
    pub fn delete_version(&self, model: &str, version: &Version) -> StateResult<bool> {
        let key = version_key(model, version);
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(VERSIONS).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "version deleted");
        Ok(existed)
    }

    // ── Deployment log ─────────────────────────────────────────────

    /// Atomically apply a deployment transition.
    ///
    /// In one write transaction: allocates the next deployment id,
    /// appends `record` to the log, rewrites the given version rows
    /// (statuses already updated by the caller), rewrites the prior
    /// record if any (e.g. marking it superseded or rolled back), and,
    /// when `set_active` is true, repoints the model's active index at
    /// the new record. Returns the record with its assigned id.
    pub fn commit_deployment(
        &self,
        mut record: DeploymentRecord,
        versions: &[ModelVersion],
        prior_record: Option<&DeploymentRecord>,
        set_active: bool,
    ) -> StateResult<DeploymentRecord> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut counters = txn.open_table(COUNTERS).map_err(map_err!(Table))?;
            record.id = next_id(&mut counters, "deployment")?;

            let mut deployments = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            if let Some(prior) = prior_record {
                let value = serde_json::to_vec(prior).map_err(map_err!(Serialize))?;
                deployments
                    .insert(prior.table_key().as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            deployments
                .insert(record.table_key().as_str(), value.as_slice())
                .map_err(map_err!(Write))?;

            let mut version_table = txn.open_table(VERSIONS).map_err(map_err!(Table))?;
            for v in versions {
                let value = serde_json::to_vec(v).map_err(map_err!(Serialize))?;
                version_table
                    .insert(v.table_key().as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }

            if set_active {
                let mut active = txn.open_table(ACTIVE).map_err(map_err!(Table))?;
                active
                    .insert(record.model_name.as_str(), record.id)
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            model = %record.model_name,
            id = record.id,
            mode = ?record.mode,
            set_active,
            "deployment committed"
        );
        Ok(record)
    }

    /// Get a deployment record by model and id.
    pub fn get_deployment(
        &self,
        model: &str,
        id: DeploymentId,
    ) -> StateResult<Option<DeploymentRecord>> {
        let key = deployment_key(model, id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: DeploymentRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Find a deployment record by id alone (scan; used when only the
    /// id is known, e.g. resolving a metric sample's deployment).
    pub fn find_deployment(&self, id: DeploymentId) -> StateResult<Option<DeploymentRecord>> {
        let suffix = format!(":{id:020}");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().ends_with(&suffix) {
                let record: DeploymentRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    /// List the deployment log for a model, newest first.
    pub fn list_deployments(&self, model: &str) -> StateResult<Vec<DeploymentRecord>> {
        let prefix = format!("{model}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let record: DeploymentRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(record);
            }
        }
        // Zero-padded keys iterate in append order; history is newest first.
        results.reverse();
        Ok(results)
    }

    /// Resolve the currently active deployment record for a model via
    /// the active index. Lock-free snapshot: "active as of read time".
    pub fn active_deployment(&self, model: &str) -> StateResult<Option<DeploymentRecord>> {
        let id = {
            let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
            let table = txn.open_table(ACTIVE).map_err(map_err!(Table))?;
            match table.get(model).map_err(map_err!(Read))? {
                Some(guard) => guard.value(),
                None => return Ok(None),
            }
        };
        self.get_deployment(model, id)
    }

    // ── Alert log ──────────────────────────────────────────────────

    /// Append an alert to the log, allocating its id. Returns the
    /// event with the id filled in.
    pub fn append_alert(&self, mut event: AlertEvent) -> StateResult<AlertEvent> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut counters = txn.open_table(COUNTERS).map_err(map_err!(Table))?;
            event.id = next_id(&mut counters, "alert")?;

            let value = serde_json::to_vec(&event).map_err(map_err!(Serialize))?;
            let mut table = txn.open_table(ALERTS).map_err(map_err!(Table))?;
            table
                .insert(event.table_key().as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(event)
    }

    /// List alerts for a deployment (append order), up to `limit`.
    pub fn list_alerts_for_deployment(
        &self,
        deployment_id: DeploymentId,
        limit: usize,
    ) -> StateResult<Vec<AlertEvent>> {
        let prefix = format!("{deployment_id:020}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ALERTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let event: AlertEvent =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(event);
                if results.len() >= limit {
                    break;
                }
            }
        }
        Ok(results)
    }

    // ── Retrain requests ───────────────────────────────────────────

    /// Create a retrain request, allocating its id. Returns the
    /// request with the id filled in.
    pub fn create_retrain(&self, mut request: RetrainRequest) -> StateResult<RetrainRequest> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut counters = txn.open_table(COUNTERS).map_err(map_err!(Table))?;
            request.id = next_id(&mut counters, "retrain")?;

            let value = serde_json::to_vec(&request).map_err(map_err!(Serialize))?;
            let mut table = txn.open_table(RETRAIN).map_err(map_err!(Table))?;
            table
                .insert(request.table_key().as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(model = %request.model_name, id = request.id, "retrain request created");
        Ok(request)
    }

    /// Update an existing retrain request in place (status transitions
    /// only; the trigger owns all mutation).
    pub fn put_retrain(&self, request: &RetrainRequest) -> StateResult<()> {
        let value = serde_json::to_vec(request).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(RETRAIN).map_err(map_err!(Table))?;
            table
                .insert(request.table_key().as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Get a retrain request by model and id.
    pub fn get_retrain(&self, model: &str, id: RetrainId) -> StateResult<Option<RetrainRequest>> {
        let key = retrain_key(model, id);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RETRAIN).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let request: RetrainRequest =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(request))
            }
            None => Ok(None),
        }
    }

    /// List all retrain requests for a model (append order).
    pub fn list_retrain(&self, model: &str) -> StateResult<Vec<RetrainRequest>> {
        let prefix = format!("{model}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(RETRAIN).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let request: RetrainRequest =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(request);
            }
        }
        Ok(results)
    }

    /// List non-terminal retrain requests for a model.
    pub fn open_retrain(&self, model: &str) -> StateResult<Vec<RetrainRequest>> {
        Ok(self
            .list_retrain(model)?
            .into_iter()
            .filter(RetrainRequest::is_open)
            .collect())
    }
}

/// Bump and return the next value of a named monotonic counter.
/// Must be called within an open write transaction.
fn next_id(
    counters: &mut redb::Table<'_, &str, u64>,
    name: &str,
) -> StateResult<u64> {
    let current = counters
        .get(name)
        .map_err(map_err!(Read))?
        .map(|g| g.value())
        .unwrap_or(0);
    let next = current + 1;
    counters.insert(name, next).map_err(map_err!(Write))?;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};

    fn test_version(model: &str, version: &str) -> ModelVersion {
        ModelVersion {
            model_name: model.to_string(),
            version: Version::parse(version).unwrap(),
            artifact_ref: format!("file:artifacts/{model}-{version}.bin"),
            model_kind: "regressor".to_string(),
            status: VersionStatus::Registered,
            tags: BTreeSet::new(),
            training_metrics: BTreeMap::from([("accuracy".to_string(), 0.9)]),
            created_at: 1000,
        }
    }

    fn test_record(model: &str, target: &str) -> DeploymentRecord {
        DeploymentRecord {
            id: 0,
            model_name: model.to_string(),
            target: Version::parse(target).unwrap(),
            previous_active: None,
            mode: DeployMode::Live,
            state: DeploymentState::Active,
            requested_by: "tester".to_string(),
            description: "test deploy".to_string(),
            requested_at: 1000,
            activated_at: Some(1000),
            rolled_back_at: None,
        }
    }

    // ── Version CRUD ───────────────────────────────────────────────

    #[test]
    fn version_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let v = test_version("pricer", "1.0.0");

        store.put_version(&v).unwrap();
        let retrieved = store
            .get_version("pricer", &Version::parse("1.0.0").unwrap())
            .unwrap();

        assert_eq!(retrieved, Some(v));
    }

    #[test]
    fn version_get_nonexistent_returns_none() {
        let store = StateStore::open_in_memory().unwrap();
        let result = store
            .get_version("nope", &Version::parse("1.0.0").unwrap())
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn version_list_is_per_model() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_version(&test_version("pricer", "1.0.0")).unwrap();
        store.put_version(&test_version("pricer", "1.0.1")).unwrap();
        store.put_version(&test_version("ranker", "1.0.0")).unwrap();

        assert_eq!(store.list_versions("pricer").unwrap().len(), 2);
        assert_eq!(store.list_versions("ranker").unwrap().len(), 1);
    }

    #[test]
    fn version_delete() {
        let store = StateStore::open_in_memory().unwrap();
        let v = test_version("pricer", "1.0.0");
        store.put_version(&v).unwrap();

        assert!(store.delete_version("pricer", &v.version).unwrap());
        assert!(!store.delete_version("pricer", &v.version).unwrap());
        assert!(store.get_version("pricer", &v.version).unwrap().is_none());
    }

    // ── Deployment log ─────────────────────────────────────────────

    #[test]
    fn commit_assigns_monotonic_ids() {
        let store = StateStore::open_in_memory().unwrap();

        let a = store
            .commit_deployment(test_record("pricer", "1.0.0"), &[], None, true)
            .unwrap();
        let b = store
            .commit_deployment(test_record("pricer", "1.0.1"), &[], None, true)
            .unwrap();

        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
    }

    #[test]
    fn commit_repoints_active_index() {
        let store = StateStore::open_in_memory().unwrap();

        store
            .commit_deployment(test_record("pricer", "1.0.0"), &[], None, true)
            .unwrap();
        let second = store
            .commit_deployment(test_record("pricer", "1.0.1"), &[], None, true)
            .unwrap();

        let active = store.active_deployment("pricer").unwrap().unwrap();
        assert_eq!(active.id, second.id);
        assert_eq!(active.target, Version::parse("1.0.1").unwrap());
    }

    #[test]
    fn dry_run_commit_leaves_active_untouched() {
        let store = StateStore::open_in_memory().unwrap();

        let live = store
            .commit_deployment(test_record("pricer", "1.0.0"), &[], None, true)
            .unwrap();

        let mut dry = test_record("pricer", "1.0.1");
        dry.mode = DeployMode::DryRun;
        dry.state = DeploymentState::DryRunComplete;
        dry.activated_at = None;
        store.commit_deployment(dry, &[], None, false).unwrap();

        let active = store.active_deployment("pricer").unwrap().unwrap();
        assert_eq!(active.id, live.id);
    }

    #[test]
    fn commit_rewrites_versions_and_prior_record() {
        let store = StateStore::open_in_memory().unwrap();

        let mut v1 = test_version("pricer", "1.0.0");
        v1.status = VersionStatus::Active;
        store.put_version(&v1).unwrap();
        let first = store
            .commit_deployment(test_record("pricer", "1.0.0"), &[v1.clone()], None, true)
            .unwrap();

        // Supersede v1 with v2 in a single commit.
        v1.status = VersionStatus::Superseded;
        let mut v2 = test_version("pricer", "1.0.1");
        v2.status = VersionStatus::Active;
        let mut prior = first.clone();
        prior.state = DeploymentState::Superseded;

        store
            .commit_deployment(
                test_record("pricer", "1.0.1"),
                &[v1.clone(), v2.clone()],
                Some(&prior),
                true,
            )
            .unwrap();

        let stored_v1 = store.get_version("pricer", &v1.version).unwrap().unwrap();
        assert_eq!(stored_v1.status, VersionStatus::Superseded);
        let stored_first = store.get_deployment("pricer", first.id).unwrap().unwrap();
        assert_eq!(stored_first.state, DeploymentState::Superseded);
    }

    #[test]
    fn history_is_newest_first() {
        let store = StateStore::open_in_memory().unwrap();
        for v in ["1.0.0", "1.0.1", "1.0.2"] {
            store
                .commit_deployment(test_record("pricer", v), &[], None, true)
                .unwrap();
        }

        let history = store.list_deployments("pricer").unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].target, Version::parse("1.0.2").unwrap());
        assert_eq!(history[2].target, Version::parse("1.0.0").unwrap());
    }

    #[test]
    fn find_deployment_by_id_alone() {
        let store = StateStore::open_in_memory().unwrap();
        let record = store
            .commit_deployment(test_record("pricer", "1.0.0"), &[], None, true)
            .unwrap();

        let found = store.find_deployment(record.id).unwrap().unwrap();
        assert_eq!(found.model_name, "pricer");
        assert!(store.find_deployment(999).unwrap().is_none());
    }

    // ── Alert log ──────────────────────────────────────────────────

    #[test]
    fn alerts_append_and_list_by_deployment() {
        let store = StateStore::open_in_memory().unwrap();

        for (dep, value) in [(1u64, 120.0), (1, 130.0), (2, 0.2)] {
            let event = AlertEvent {
                id: 0,
                alert_name: "prediction_latency_ms".to_string(),
                model_name: "pricer".to_string(),
                severity: Severity::Warning,
                window_start: 0,
                window_end: 300,
                triggering_value: value,
                deployment_id: dep,
            };
            store.append_alert(event).unwrap();
        }

        assert_eq!(store.list_alerts_for_deployment(1, 10).unwrap().len(), 2);
        assert_eq!(store.list_alerts_for_deployment(2, 10).unwrap().len(), 1);
        assert_eq!(store.list_alerts_for_deployment(1, 1).unwrap().len(), 1);
    }

    // ── Retrain requests ───────────────────────────────────────────

    #[test]
    fn retrain_create_update_and_filter_open() {
        let store = StateStore::open_in_memory().unwrap();

        let mut request = store
            .create_retrain(RetrainRequest {
                id: 0,
                model_name: "pricer".to_string(),
                reason: "drift".to_string(),
                triggering_alert_ids: vec![7],
                baseline_version: Some(Version::parse("1.0.0").unwrap()),
                requested_at: 1000,
                status: RetrainStatus::Pending,
            })
            .unwrap();
        assert_eq!(request.id, 1);
        assert_eq!(store.open_retrain("pricer").unwrap().len(), 1);

        request.status = RetrainStatus::Completed;
        store.put_retrain(&request).unwrap();
        assert!(store.open_retrain("pricer").unwrap().is_empty());
        assert_eq!(store.list_retrain("pricer").unwrap().len(), 1);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.put_version(&test_version("pricer", "1.0.0")).unwrap();
            store
                .commit_deployment(test_record("pricer", "1.0.0"), &[], None, true)
                .unwrap();
        }

        // Reopen the same database file.
        let store = StateStore::open(&db_path).unwrap();
        assert!(store
            .get_version("pricer", &Version::parse("1.0.0").unwrap())
            .unwrap()
            .is_some());
        let active = store.active_deployment("pricer").unwrap().unwrap();
        assert_eq!(active.id, 1);
    }

    // ── Edge cases ─────────────────────────────────────────────────

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_versions("any").unwrap().is_empty());
        assert!(store.list_deployments("any").unwrap().is_empty());
        assert!(store.active_deployment("any").unwrap().is_none());
        assert!(store.list_alerts_for_deployment(1, 10).unwrap().is_empty());
        assert!(store.list_retrain("any").unwrap().is_empty());
    }
}
