//! modelgrid.toml configuration parser.
//!
//! Every section is optional; absent values fall back to the built-in
//! defaults of the respective subsystem. Metric entries overlay the
//! default metric set field by field.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use modelgrid_deploy::{DeployPolicy, ResourceBudget};
use modelgrid_monitor::{Aggregate, Direction, MetricSpec, MonitorConfig};
use modelgrid_registry::RegistryPolicy;
use modelgrid_trigger::TriggerPolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelgridConfig {
    pub registry: Option<RegistrySection>,
    pub deploy: Option<DeploySection>,
    pub monitor: Option<MonitorSection>,
    pub trigger: Option<TriggerSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySection {
    pub max_versions: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploySection {
    pub min_free_memory_bytes: Option<u64>,
    pub max_cpu_percent: Option<f64>,
    /// Training-metric floors a version must meet before deployment.
    pub requirements: Option<BTreeMap<String, f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSection {
    pub queue_capacity: Option<usize>,
    /// Per-metric overrides, overlaid on the default metric set.
    pub metrics: Option<HashMap<String, MetricOverride>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricOverride {
    pub aggregate: Option<Aggregate>,
    pub direction: Option<Direction>,
    pub warning: Option<f64>,
    pub critical: Option<f64>,
    pub window_secs: Option<u64>,
    pub for_secs: Option<u64>,
    pub forward_critical: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerSection {
    pub warning_threshold: Option<usize>,
    pub warning_window_secs: Option<u64>,
}

impl ModelgridConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ModelgridConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn registry_policy(&self) -> RegistryPolicy {
        let mut policy = RegistryPolicy::default();
        if let Some(section) = &self.registry
            && let Some(max) = section.max_versions
        {
            policy.max_versions = max;
        }
        policy
    }

    pub fn deploy_policy(&self) -> DeployPolicy {
        let mut policy = DeployPolicy::default();
        if let Some(section) = &self.deploy {
            let defaults = ResourceBudget::default();
            policy.budget = ResourceBudget {
                min_free_memory_bytes: section
                    .min_free_memory_bytes
                    .unwrap_or(defaults.min_free_memory_bytes),
                max_cpu_percent: section.max_cpu_percent.unwrap_or(defaults.max_cpu_percent),
            };
            if let Some(requirements) = &section.requirements {
                policy.requirements = requirements.clone();
            }
        }
        policy
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        let mut config = MonitorConfig::default();
        if let Some(section) = &self.monitor {
            if let Some(capacity) = section.queue_capacity {
                config.queue_capacity = capacity;
            }
            if let Some(overrides) = &section.metrics {
                for (name, patch) in overrides {
                    let spec = config.metrics.entry(name.clone()).or_insert(MetricSpec {
                        aggregate: Aggregate::Mean,
                        direction: Direction::Above,
                        warning: f64::MAX,
                        critical: f64::MAX,
                        window_secs: 300,
                        for_secs: 300,
                        forward_critical: false,
                    });
                    if let Some(v) = patch.aggregate {
                        spec.aggregate = v;
                    }
                    if let Some(v) = patch.direction {
                        spec.direction = v;
                    }
                    if let Some(v) = patch.warning {
                        spec.warning = v;
                    }
                    if let Some(v) = patch.critical {
                        spec.critical = v;
                    }
                    if let Some(v) = patch.window_secs {
                        spec.window_secs = v;
                    }
                    if let Some(v) = patch.for_secs {
                        spec.for_secs = v;
                    }
                    if let Some(v) = patch.forward_critical {
                        spec.forward_critical = v;
                    }
                }
            }
        }
        config
    }

    pub fn trigger_policy(&self) -> TriggerPolicy {
        let mut policy = TriggerPolicy::default();
        if let Some(section) = &self.trigger {
            if let Some(threshold) = section.warning_threshold {
                policy.warning_threshold = threshold;
            }
            if let Some(window) = section.warning_window_secs {
                policy.warning_window_secs = window;
            }
        }
        policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_yields_defaults() {
        let config: ModelgridConfig = toml::from_str("").unwrap();
        assert_eq!(config.registry_policy().max_versions, RegistryPolicy::default().max_versions);
        assert_eq!(config.trigger_policy().warning_threshold, 3);
        let monitor = config.monitor_config();
        assert_eq!(monitor.metrics.len(), MonitorConfig::default().metrics.len());
    }

    #[test]
    fn sections_override_defaults() {
        let config: ModelgridConfig = toml::from_str(
            r#"
            [registry]
            max_versions = 10

            [deploy]
            min_free_memory_bytes = 1024
            [deploy.requirements]
            accuracy = 0.8

            [trigger]
            warning_threshold = 5
            warning_window_secs = 3600
            "#,
        )
        .unwrap();

        assert_eq!(config.registry_policy().max_versions, 10);
        let deploy = config.deploy_policy();
        assert_eq!(deploy.budget.min_free_memory_bytes, 1024);
        assert_eq!(deploy.requirements.get("accuracy"), Some(&0.8));
        assert_eq!(config.trigger_policy().warning_threshold, 5);
        assert_eq!(config.trigger_policy().warning_window_secs, 3600);
    }

    #[test]
    fn metric_override_is_field_by_field() {
        let config: ModelgridConfig = toml::from_str(
            r#"
            [monitor]
            queue_capacity = 64

            [monitor.metrics.prediction_latency_ms]
            warning = 50.0

            [monitor.metrics.gpu_utilization]
            aggregate = "mean"
            direction = "above"
            warning = 0.8
            critical = 0.95
            window_secs = 300
            for_secs = 60
            "#,
        )
        .unwrap();

        let monitor = config.monitor_config();
        assert_eq!(monitor.queue_capacity, 64);

        // Patched field changes; the rest keeps its default.
        let latency = &monitor.metrics["prediction_latency_ms"];
        assert_eq!(latency.warning, 50.0);
        assert_eq!(latency.critical, 250.0);

        // A novel metric becomes recognized.
        let gpu = &monitor.metrics["gpu_utilization"];
        assert_eq!(gpu.critical, 0.95);
        assert_eq!(gpu.for_secs, 60);
    }

    #[test]
    fn from_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modelgrid.toml");
        std::fs::write(&path, "[registry]\nmax_versions = 3\n").unwrap();

        let config = ModelgridConfig::from_file(&path).unwrap();
        assert_eq!(config.registry_policy().max_versions, 3);
    }
}
