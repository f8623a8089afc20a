//! Concrete collaborator implementations for the daemon.
//!
//! The control plane consumes external systems through narrow traits;
//! these are the daemon's local stand-ins: a filesystem artifact
//! store, a log-only notification channel, and a log-only training
//! hand-off. Real integrations replace them at assembly time.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use tracing::{error, info, warn};

use modelgrid_monitor::AlertSink;
use modelgrid_registry::ArtifactStore;
use modelgrid_state::{AlertEvent, RetrainRequest, Severity};
use modelgrid_trigger::{RetrainTrigger, TrainingSystem};

/// Artifact store resolving `file:` references against a root
/// directory. Existence check only.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl ArtifactStore for FsArtifactStore {
    fn resolve(&self, artifact_ref: &str) -> bool {
        match artifact_ref.strip_prefix("file:") {
            Some(path) => self.root.join(path).exists(),
            None => false,
        }
    }
}

/// Notification channel that logs alerts. Delivery retries belong to
/// a real channel; logging never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl AlertSink for LogNotifier {
    fn deliver(&self, event: &AlertEvent) {
        match event.severity {
            Severity::Warning => warn!(
                alert = %event.alert_name,
                model = %event.model_name,
                value = event.triggering_value,
                "alert notification"
            ),
            Severity::Critical => error!(
                alert = %event.alert_name,
                model = %event.model_name,
                value = event.triggering_value,
                "alert notification"
            ),
        }
    }
}

/// Training hand-off that logs the request and accepts it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTrainer;

impl TrainingSystem for LogTrainer {
    fn dispatch(&self, request: &RetrainRequest) -> anyhow::Result<()> {
        info!(
            model = %request.model_name,
            id = request.id,
            reason = %request.reason,
            "retrain request handed to training system"
        );
        Ok(())
    }
}

/// Fan-out sink: notify the channel, then feed the retrain trigger.
///
/// The trigger slot is filled after construction because the engine
/// (which owns the sink) is built before the trigger.
#[derive(Default)]
pub struct FanoutSink {
    notifier: LogNotifier,
    trigger: OnceLock<Arc<RetrainTrigger>>,
}

impl FanoutSink {
    pub fn set_trigger(&self, trigger: Arc<RetrainTrigger>) {
        let _ = self.trigger.set(trigger);
    }
}

impl AlertSink for FanoutSink {
    fn deliver(&self, event: &AlertEvent) {
        self.notifier.deliver(event);
        if let Some(trigger) = self.trigger.get()
            && let Err(e) = trigger.on_alert(event)
        {
            error!(error = %e, alert = event.id, "retrain trigger failed to consume alert");
        }
    }
}
