//! Configuration schema (§6). Parsing/fetching these from disk, a URL, or a
//! cluster config map is an external collaborator's job; this module only
//! defines the shape the engine consumes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn default_qps() -> f64 {
    20.0
}

fn default_burst() -> u32 {
    20
}

/// Global run-level settings shared by all jobs (§3 "Run").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConfig {
    /// Run UUID; generated at run start when absent.
    #[serde(default)]
    pub uuid: Option<Uuid>,
    /// Kinds the Measurement Subsystem should observe this run.
    #[serde(default)]
    pub measurements: Vec<MeasurementConfig>,
    /// Indexer sink configuration.
    #[serde(default)]
    pub indexer: Option<IndexerConfig>,
    /// Optional run-wide timeout, seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Free-form metadata merged into every emitted document.
    #[serde(default)]
    pub user_metadata: HashMap<String, serde_json::Value>,
}

/// One kind the Measurement Subsystem watches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasurementConfig {
    pub kind: String,
}

/// Top-level run configuration: `global` + ordered `jobs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub global: GlobalConfig,
    pub jobs: Vec<JobConfig>,
}

/// Job kind (§3 "Job").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobType {
    Create,
    Delete,
    Patch,
    Read,
    KubeVirt,
}

/// A named unit of work within a `Run` (§3 "Job").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    pub name: String,
    pub job_type: JobType,
    pub job_iterations: u64,
    #[serde(default = "default_qps")]
    pub qps: f64,
    #[serde(default = "default_burst")]
    pub burst: u32,
    /// Bounded worker-pool concurrency; defaults to `burst` when unset.
    #[serde(default)]
    pub concurrency: Option<usize>,
    #[serde(default)]
    pub namespaced_iterations: bool,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub cleanup: bool,
    #[serde(default)]
    pub pod_wait: bool,
    #[serde(default)]
    pub wait_when_finished: bool,
    #[serde(default)]
    pub verify_objects: bool,
    #[serde(default)]
    pub error_on_verify: bool,
    /// Accepted for config-schema compatibility (§6); pre-pulling job
    /// images onto nodes ahead of the timed run is not implemented by this
    /// crate, so the flag is parsed but otherwise a no-op.
    #[serde(default)]
    pub pre_load_images: bool,
    #[serde(default, rename = "maxWaitTimeout")]
    pub max_wait_timeout_secs: Option<u64>,
    #[serde(default, rename = "jobPause")]
    pub job_pause_secs: Option<u64>,
    #[serde(default)]
    pub namespace_labels: HashMap<String, String>,
    pub objects: Vec<ObjectConfig>,
}

/// A template reference + replica count within a `Job` (§3 "Object").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectConfig {
    #[serde(default)]
    pub object_template: Option<String>,
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    #[serde(default)]
    pub input_vars: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub wait: Option<WaitConfig>,

    // Delete-job fields.
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub label_selector: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub wait_for_deletion: bool,
}

fn default_replicas() -> u32 {
    1
}

/// Per-object readiness override.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WaitConfig {
    /// Use the kind-specific default predicate (§4.3 table).
    Default,
    /// JSONPath-lite / condition-type match for custom kinds.
    Custom {
        condition_type: String,
        expected_status: String,
    },
}

/// Indexer sink selection (§4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum IndexerConfig {
    Local {
        path: String,
        #[serde(default)]
        archive: bool,
    },
    Remote {
        endpoint: String,
        index: String,
        #[serde(default)]
        token: Option<String>,
        #[serde(default = "default_batch_count")]
        batch_count: usize,
        #[serde(default = "default_batch_bytes")]
        batch_bytes: usize,
    },
}

fn default_batch_count() -> usize {
    500
}

fn default_batch_bytes() -> usize {
    5 * 1024 * 1024
}

/// One entry of a metrics profile (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsProfileEntry {
    pub query: String,
    #[serde(rename = "metricName")]
    pub metric_name: String,
    #[serde(default)]
    pub instant: bool,
}

/// A metrics profile is an ordered list of PromQL queries.
pub type MetricsProfile = Vec<MetricsProfileEntry>;

/// Alert severity (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// One entry of an alert profile (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertProfileEntry {
    pub expr: String,
    pub severity: Severity,
    pub description: String,
}

/// An alert profile is an ordered list of boolean PromQL expressions.
pub type AlertProfile = Vec<AlertProfileEntry>;

/// One Prometheus endpoint configuration (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointConfig {
    pub endpoint: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_step_secs", rename = "step")]
    pub step_secs: u64,
    #[serde(default, rename = "skipTLSVerify")]
    pub skip_tls_verify: bool,
    #[serde(default)]
    pub metrics_profile: Option<String>,
    #[serde(default)]
    pub alert_profile: Option<String>,
}

fn default_step_secs() -> u64 {
    30
}

impl RunConfig {
    /// Parses a `RunConfig` from a YAML string. Mirrors the local-file
    /// loader shape used throughout this codebase for sibling config types.
    pub fn from_yaml(raw: &str) -> Result<Self, crate::error::ConfigError> {
        serde_yaml::from_str(raw).map_err(|source| crate::error::ConfigError::Parse {
            path: "<string>".to_string(),
            source,
        })
    }

    /// Basic structural validation beyond what serde enforces: mutually
    /// exclusive or nonsensical flag combinations are rejected up front
    /// (§8 boundary: "QPS = 0 with burst > 0" is disallowed via config
    /// validation).
    pub fn validate(&self) -> Result<(), crate::error::ConfigError> {
        for job in &self.jobs {
            if job.qps <= 0.0 {
                return Err(crate::error::ConfigError::Invalid(format!(
                    "job {}: qps must be > 0",
                    job.name
                )));
            }
            if job.burst == 0 {
                return Err(crate::error::ConfigError::Invalid(format!(
                    "job {}: burst must be > 0",
                    job.name
                )));
            }
            if job.job_type == JobType::Create && job.objects.is_empty() {
                return Err(crate::error::ConfigError::Invalid(format!(
                    "job {}: create jobs require at least one object",
                    job.name
                )));
            }
            if job.job_type == JobType::Delete {
                for obj in &job.objects {
                    if obj.kind.is_none() {
                        return Err(crate::error::ConfigError::Invalid(format!(
                            "job {}: delete objects require `kind`",
                            job.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let yaml = r#"
global:
  measurements:
    - kind: pod
jobs:
  - name: create-deployments
    jobType: create
    jobIterations: 3
    qps: 2
    burst: 2
    namespacedIterations: true
    namespace: kube-burner
    cleanup: true
    podWait: true
    objects:
      - objectTemplate: deployment.yml
        replicas: 1
"#;
        let cfg = RunConfig::from_yaml(yaml).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.jobs.len(), 1);
        assert_eq!(cfg.jobs[0].job_iterations, 3);
        assert!(cfg.jobs[0].namespaced_iterations);
    }

    #[test]
    fn rejects_zero_qps() {
        let yaml = r#"
global: {}
jobs:
  - name: j
    jobType: create
    jobIterations: 1
    qps: 0
    burst: 1
    objects:
      - objectTemplate: x.yml
"#;
        let cfg = RunConfig::from_yaml(yaml).unwrap();
        assert!(cfg.validate().is_err());
    }
}
