//! Local config loading (§1): YAML parsing and `objectTemplate`/profile path
//! resolution are this crate's responsibility alone. The engine only ever
//! sees fully-resolved [`JobSpec`]s and template bodies.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use kube_burner_core::config::{
    AlertProfile, EndpointConfig, IndexerConfig, JobConfig, MetricsProfile, ObjectConfig, RunConfig,
    WaitConfig,
};
use kube_burner_engine::{JobSpec, ObjectSpec};
use kube_burner_engine::waiter::Readiness;

/// Reads and validates a run configuration file.
pub fn load_run_config(path: &Path) -> Result<RunConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading run config {}", path.display()))?;
    let cfg = RunConfig::from_yaml(&raw)
        .with_context(|| format!("parsing run config {}", path.display()))?;
    cfg.validate().context("validating run config")?;
    Ok(cfg)
}

/// Resolves every job's `objectTemplate` path (relative to the config file's
/// directory) into a raw manifest body, producing engine-ready [`JobSpec`]s.
pub fn resolve_jobs(config_dir: &Path, jobs: &[JobConfig]) -> Result<Vec<JobSpec>> {
    jobs.iter().map(|job| resolve_job(config_dir, job)).collect()
}

fn resolve_job(config_dir: &Path, job: &JobConfig) -> Result<JobSpec> {
    let objects = job
        .objects
        .iter()
        .map(|obj| resolve_object(config_dir, obj))
        .collect::<Result<Vec<_>>>()?;

    Ok(JobSpec {
        name: job.name.clone(),
        job_type: job.job_type,
        iterations: job.job_iterations,
        qps: job.qps,
        burst: job.burst,
        concurrency: job.concurrency,
        namespaced_iterations: job.namespaced_iterations,
        namespace: job.namespace.clone(),
        namespace_labels: job.namespace_labels.clone().into_iter().collect(),
        cleanup: job.cleanup,
        pod_wait: job.pod_wait,
        wait_when_finished: job.wait_when_finished,
        verify_objects: job.verify_objects,
        error_on_verify: job.error_on_verify,
        max_wait_timeout: Duration::from_secs(job.max_wait_timeout_secs.unwrap_or(600)),
        job_pause: Duration::from_secs(job.job_pause_secs.unwrap_or(0)),
        objects,
    })
}

fn resolve_object(config_dir: &Path, obj: &ObjectConfig) -> Result<ObjectSpec> {
    let template = obj
        .object_template
        .as_ref()
        .map(|rel| -> Result<String> {
            let path = config_dir.join(rel);
            std::fs::read_to_string(&path)
                .with_context(|| format!("reading object template {}", path.display()))
        })
        .transpose()?;

    Ok(ObjectSpec {
        template,
        replicas: obj.replicas,
        input_vars: obj.input_vars.clone().into_iter().collect(),
        wait: obj.wait.as_ref().map(resolve_wait),
        kind: obj.kind.clone(),
        api_version: obj.api_version.clone(),
        label_selector: obj.label_selector.clone(),
        wait_for_deletion: obj.wait_for_deletion,
    })
}

fn resolve_wait(wait: &WaitConfig) -> Readiness {
    match wait {
        WaitConfig::Default => Readiness::Default,
        WaitConfig::Custom {
            condition_type,
            expected_status,
        } => Readiness::Custom {
            condition_type: condition_type.clone(),
            expected_status: expected_status.clone(),
        },
    }
}

/// Loads a metrics profile YAML file.
pub fn load_metrics_profile(path: &Path) -> Result<MetricsProfile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading metrics profile {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing metrics profile {}", path.display()))
}

/// Loads an alert profile YAML file.
pub fn load_alert_profile(path: &Path) -> Result<AlertProfile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading alert profile {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing alert profile {}", path.display()))
}

/// Loads a free-form user-metadata YAML map.
pub fn load_user_metadata(path: &Path) -> Result<BTreeMap<String, serde_json::Value>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading user metadata {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing user metadata {}", path.display()))
}

pub fn config_dir(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn endpoint_spec(cfg: &EndpointConfig) -> kube_burner_engine::metrics::EndpointSpec {
    kube_burner_engine::metrics::EndpointSpec {
        name: cfg.endpoint.clone(),
        url: cfg.endpoint.clone(),
        token: cfg.token.clone(),
        username: cfg.username.clone(),
        password: cfg.password.clone(),
        skip_tls_verify: cfg.skip_tls_verify,
        step: Duration::from_secs(cfg.step_secs),
    }
}

pub fn metrics_query(entry: &kube_burner_core::config::MetricsProfileEntry) -> kube_burner_engine::metrics::MetricsQuery {
    kube_burner_engine::metrics::MetricsQuery {
        query: entry.query.clone(),
        metric_name: entry.metric_name.clone(),
        instant: entry.instant,
    }
}

pub fn alert_rule(entry: &kube_burner_core::config::AlertProfileEntry) -> kube_burner_engine::alerts::AlertRule {
    kube_burner_engine::alerts::AlertRule {
        expr: entry.expr.clone(),
        severity: entry.severity,
        description: entry.description.clone(),
    }
}

/// Indexer sink chosen directly from CLI flags, bypassing `IndexerConfig`
/// for the subcommands that never read a run config (`index`, `check-alerts`,
/// `measure`).
pub enum SinkChoice {
    Local { dir: PathBuf, archive: Option<PathBuf> },
    Remote {
        endpoint: String,
        index: String,
        token: Option<String>,
    },
}

pub fn indexer_config_to_sink(cfg: &IndexerConfig) -> SinkChoice {
    match cfg {
        IndexerConfig::Local { path, archive } => SinkChoice::Local {
            dir: PathBuf::from(path),
            archive: if *archive {
                Some(PathBuf::from(format!("{path}.tar.gz")))
            } else {
                None
            },
        },
        IndexerConfig::Remote {
            endpoint,
            index,
            token,
            ..
        } => SinkChoice::Remote {
            endpoint: endpoint.clone(),
            index: index.clone(),
            token: token.clone(),
        },
    }
}
