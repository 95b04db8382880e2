//! Job Executor (§4.4): namespace preparation, the iteration loop,
//! end-of-job wait, verification, and label-scoped cleanup for one job.
//!
//! Object templates are handed to this module already resolved to their
//! raw manifest bodies — reading `objectTemplate` paths from disk is the
//! CLI's job (§1), not the engine's.

use std::collections::BTreeMap;
use std::time::Duration;

use kube::core::DynamicObject;
use kube::discovery::ApiResource;
use kube::Client;
use serde_json::{Map, Value};
use uuid::Uuid;

use kube_burner_core::error::{Error, VerificationError};
use kube_burner_core::labels::{fingerprint_labels, job_selector};

use crate::client;
use crate::dispatcher::{DispatchOp, Dispatcher};
use crate::events::{JobState, ObjectOutcome, RunHandle};
use crate::render::{RenderContext, Renderer};
use crate::waiter::{self, Readiness};

/// One `Object` entry within a job, resolved for execution.
#[derive(Debug, Clone)]
pub struct ObjectSpec {
    /// Raw manifest template body; `None` for delete-type jobs.
    pub template: Option<String>,
    pub replicas: u32,
    pub input_vars: Map<String, Value>,
    pub wait: Option<Readiness>,

    // Delete-type fields.
    pub kind: Option<String>,
    pub api_version: Option<String>,
    pub label_selector: Option<String>,
    pub wait_for_deletion: bool,
}

/// One job, resolved for execution (no unresolved paths/URLs remain).
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub name: String,
    pub job_type: kube_burner_core::config::JobType,
    pub iterations: u64,
    pub qps: f64,
    pub burst: u32,
    pub concurrency: Option<usize>,
    pub namespaced_iterations: bool,
    pub namespace: Option<String>,
    pub namespace_labels: BTreeMap<String, String>,
    pub cleanup: bool,
    pub pod_wait: bool,
    pub wait_when_finished: bool,
    pub verify_objects: bool,
    pub error_on_verify: bool,
    pub max_wait_timeout: Duration,
    pub job_pause: Duration,
    pub objects: Vec<ObjectSpec>,
}

/// Outcome of one job's execution, consumed by the Run Controller.
#[derive(Debug, Default)]
pub struct JobReport {
    pub dispatched: usize,
    pub verification: Option<Result<(), VerificationError>>,
}

struct Target {
    resource: ApiResource,
    namespace: Option<String>,
    name: String,
    kind: String,
    wait: Option<Readiness>,
    /// Index into `job.objects` this target was rendered from, so
    /// verification can tell apart two templates that share a `kind`
    /// (§4.4 step 4, "N·R per template").
    template_index: usize,
}

/// Executes one job to completion (or until cancelled/failed).
pub async fn execute(
    client: Client,
    uuid: Uuid,
    job: &JobSpec,
    run: &RunHandle,
) -> Result<JobReport, Error> {
    run.set_job_state(&job.name, JobState::Running);

    let report = match job.job_type {
        kube_burner_core::config::JobType::Delete => execute_delete(client, uuid, job, run).await,
        _ => execute_create(client, uuid, job, run).await,
    };

    match &report {
        Ok(_) => run.set_job_state(&job.name, JobState::Completed),
        Err(_) => run.set_job_state(&job.name, JobState::Failed),
    }
    report
}

async fn execute_create(
    client: Client,
    uuid: Uuid,
    job: &JobSpec,
    run: &RunHandle,
) -> Result<JobReport, Error> {
    let prefix = job.namespace.clone().unwrap_or_else(|| job.name.clone());
    let dispatcher = Dispatcher::new(
        client.clone(),
        job.qps,
        job.burst,
        job.concurrency.unwrap_or(job.burst as usize),
    );

    if job.namespaced_iterations {
        for i in 1..=job.iterations {
            let ns_name = format!("{prefix}-{i}");
            create_namespace(&dispatcher, uuid, job, &ns_name).await?;
        }
    } else if let Some(ns) = &job.namespace {
        create_namespace(&dispatcher, uuid, job, ns).await?;
    }

    let mut all_targets: Vec<Target> = Vec::new();
    let mut dispatched = 0usize;

    'iterations: for i in 1..=job.iterations {
        if run.is_cancelled() {
            run.set_job_state(&job.name, JobState::Cancelled);
            break 'iterations;
        }

        run.set_job_state(&job.name, JobState::Running);
        let namespace = if job.namespaced_iterations {
            Some(format!("{prefix}-{i}"))
        } else {
            job.namespace.clone()
        };

        let mut this_iteration: Vec<Target> = Vec::new();

        for (template_index, object) in job.objects.iter().enumerate() {
            let template = object
                .template
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("create job object missing a template body"))?;

            for r in 1..=object.replicas {
                let ctx = RenderContext {
                    uuid,
                    job_name: job.name.clone(),
                    job_iteration: i,
                    iteration: i,
                    replica: r,
                    input_vars: object.input_vars.clone(),
                };

                let started = std::time::Instant::now();
                let rendered = Renderer::render(template, &ctx)?;
                let manifest = client::parse_manifest(&rendered, fingerprint_labels(&uuid, &job.name))?;

                let types = manifest
                    .types
                    .clone()
                    .ok_or_else(|| anyhow::anyhow!("rendered manifest missing apiVersion/kind"))?;
                let resource = client::api_resource_for(&types.api_version, &types.kind);
                let name = manifest
                    .metadata
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("{}-{i}-{r}", job.name));

                let outcome = dispatcher
                    .submit(DispatchOp::Create {
                        resource: resource.clone(),
                        namespace: namespace.clone(),
                        object: Box::new(manifest),
                    })
                    .await;

                let outcome = match outcome {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        let message = err.to_string();
                        run.record_object(ObjectOutcome {
                            job_name: job.name.clone(),
                            kind: types.kind.clone(),
                            name: name.clone(),
                            namespace: namespace.clone(),
                            iteration: i,
                            replica: r,
                            error: Some(message.clone()),
                            duration_ms: started.elapsed().as_millis() as u64,
                        });
                        if job.error_on_verify {
                            return Err(err.into());
                        }
                        tracing::warn!(job = %job.name, iteration = i, replica = r, message, "dispatch failed, continuing");
                        continue;
                    }
                };
                run.record_object(ObjectOutcome {
                    job_name: job.name.clone(),
                    kind: types.kind.clone(),
                    name: name.clone(),
                    namespace: namespace.clone(),
                    iteration: i,
                    replica: r,
                    error: None,
                    duration_ms: outcome.duration.as_millis() as u64,
                });
                dispatched += 1;

                let target = Target {
                    resource,
                    namespace: namespace.clone(),
                    name,
                    kind: types.kind,
                    wait: object.wait.clone(),
                    template_index,
                };
                this_iteration.push(target);
            }
        }

        if job.pod_wait {
            wait_all(&client, &this_iteration, job, run).await?;
        }

        all_targets.extend(this_iteration);

        if !job.job_pause.is_zero() {
            tokio::time::sleep(job.job_pause).await;
        }
    }

    if job.wait_when_finished {
        wait_all(&client, &all_targets, job, run).await?;
    }

    let verification = if job.verify_objects {
        Some(verify_counts(&client, uuid, job, &all_targets).await)
    } else {
        None
    };

    if let Some(Err(err)) = &verification {
        if job.error_on_verify {
            return Err(err.clone().into());
        }
    }

    if job.cleanup {
        cleanup_job(&client, uuid, job, &prefix, &dispatcher).await?;
    }

    dispatcher.shutdown().await;

    Ok(JobReport {
        dispatched,
        verification,
    })
}

async fn create_namespace(
    dispatcher: &Dispatcher,
    uuid: Uuid,
    job: &JobSpec,
    name: &str,
) -> Result<(), Error> {
    let mut labels = fingerprint_labels(&uuid, &job.name);
    labels.extend(job.namespace_labels.clone());

    let manifest = client::parse_manifest(
        &format!("apiVersion: v1\nkind: Namespace\nmetadata:\n  name: {name}\n"),
        labels,
    )?;
    let resource = client::api_resource_for("v1", "Namespace");

    dispatcher
        .submit(DispatchOp::Create {
            resource,
            namespace: None,
            object: Box::new(manifest),
        })
        .await
        .map_err(Error::from)?;
    Ok(())
}

async fn wait_all(
    client: &Client,
    targets: &[Target],
    job: &JobSpec,
    run: &RunHandle,
) -> Result<(), Error> {
    for target in targets {
        let Some(readiness) = &target.wait else {
            continue;
        };
        let result = waiter::wait_for_ready(
            client.clone(),
            &target.resource,
            target.namespace.as_deref(),
            &target.name,
            &target.kind,
            readiness,
            job.max_wait_timeout,
            run,
        )
        .await;

        if let Err(timeout) = result {
            if job.error_on_verify {
                return Err(timeout.into());
            }
            tracing::warn!(kind = %target.kind, name = %target.name, "readiness wait timed out, continuing");
        }
    }
    Ok(())
}

/// Per-template bookkeeping for verification: the resource kind the
/// template dispatches, and the set of `(namespace, name)` pairs this run
/// actually dispatched for it.
struct TemplateBucket<'a> {
    resource: &'a ApiResource,
    dispatched: Vec<(Option<String>, String)>,
}

/// Confirms the cluster holds `replicas * iterations` objects for *each*
/// template individually (§4.4 step 4). Two templates that render the same
/// `kind` are tracked in separate buckets — matching listed objects back to
/// the names this job actually dispatched — so a shortfall in one template
/// can't be hidden behind a surplus in another.
async fn verify_counts(
    client: &Client,
    uuid: Uuid,
    job: &JobSpec,
    targets: &[Target],
) -> Result<(), VerificationError> {
    let selector = job_selector(&uuid, &job.name);

    let mut buckets: BTreeMap<usize, TemplateBucket> = BTreeMap::new();
    for target in targets {
        let bucket = buckets.entry(target.template_index).or_insert_with(|| TemplateBucket {
            resource: &target.resource,
            dispatched: Vec::new(),
        });
        bucket.dispatched.push((target.namespace.clone(), target.name.clone()));
    }

    // One cluster listing per distinct kind, reused across every template
    // that renders it, then partitioned back out by dispatched name.
    let mut listings: BTreeMap<String, Vec<DynamicObject>> = BTreeMap::new();
    for bucket in buckets.values() {
        let kind = bucket.resource.kind.clone();
        if listings.contains_key(&kind) {
            continue;
        }
        let items = client::list_by_selector(client.clone(), bucket.resource, None, &selector)
            .await
            .unwrap_or_default();
        listings.insert(kind, items);
    }

    let mut total_expected = 0usize;
    let mut total_actual = 0usize;
    let mut any_mismatch = false;

    for (template_index, object) in job.objects.iter().enumerate() {
        let expected = object.replicas as usize * job.iterations.max(0) as usize;
        let actual = match buckets.get(&template_index) {
            Some(bucket) => {
                let items = listings.get(&bucket.resource.kind).map(Vec::as_slice).unwrap_or(&[]);
                items
                    .iter()
                    .filter(|item| {
                        let name = item.metadata.name.as_deref().unwrap_or_default();
                        let namespace = item.metadata.namespace.clone();
                        bucket
                            .dispatched
                            .iter()
                            .any(|(ns, n)| ns == &namespace && n == name)
                    })
                    .count()
            }
            None => 0,
        };

        total_expected += expected;
        total_actual += actual;
        any_mismatch |= actual != expected;
    }

    if any_mismatch {
        Err(VerificationError {
            job: job.name.clone(),
            expected: total_expected,
            actual: total_actual,
        })
    } else {
        Ok(())
    }
}

async fn cleanup_job(
    client: &Client,
    uuid: Uuid,
    job: &JobSpec,
    namespace_prefix: &str,
    dispatcher: &Dispatcher,
) -> Result<(), Error> {
    let selector = job_selector(&uuid, &job.name);

    let mut kinds: Vec<ApiResource> = Vec::new();
    for object in &job.objects {
        if let Some(template) = &object.template {
            if let Ok(manifest) = client::parse_manifest(template, BTreeMap::new()) {
                if let Some(types) = manifest.types {
                    let resource = client::api_resource_for(&types.api_version, &types.kind);
                    if !kinds.iter().any(|r| r.kind == resource.kind) {
                        kinds.push(resource);
                    }
                }
            }
        }
    }

    for resource in &kinds {
        let namespace = if job.namespaced_iterations {
            None
        } else {
            job.namespace.as_deref()
        };
        let items = client::list_by_selector(client.clone(), resource, namespace, &selector)
            .await
            .unwrap_or_default();
        for item in items {
            let Some(name) = item.metadata.name.clone() else {
                continue;
            };
            let _ = dispatcher
                .submit(DispatchOp::Delete {
                    resource: resource.clone(),
                    namespace: item.metadata.namespace.clone(),
                    name,
                })
                .await;
        }
    }

    if job.namespaced_iterations {
        let ns_resource = client::api_resource_for("v1", "Namespace");
        for i in 1..=job.iterations {
            let ns_name = format!("{namespace_prefix}-{i}");
            let _ = dispatcher
                .submit(DispatchOp::Delete {
                    resource: ns_resource.clone(),
                    namespace: None,
                    name: ns_name,
                })
                .await;
        }
    }

    Ok(())
}

async fn execute_delete(
    client: Client,
    _uuid: Uuid,
    job: &JobSpec,
    run: &RunHandle,
) -> Result<JobReport, Error> {
    let dispatcher = Dispatcher::new(
        client.clone(),
        job.qps,
        job.burst,
        job.concurrency.unwrap_or(job.burst as usize),
    );

    let mut dispatched = 0usize;
    for object in &job.objects {
        let (Some(kind), Some(selector)) = (&object.kind, &object.label_selector) else {
            continue;
        };
        let api_version = object.api_version.as_deref().unwrap_or("v1");
        let resource = client::api_resource_for(api_version, kind);
        let namespace = job.namespace.as_deref();

        let items = client::list_by_selector(client.clone(), &resource, namespace, selector)
            .await
            .map_err(|err| anyhow::anyhow!("listing {kind} for deletion: {err}"))?;

        for item in &items {
            if run.is_cancelled() {
                break;
            }
            let Some(name) = item.metadata.name.clone() else {
                continue;
            };
            dispatcher
                .submit(DispatchOp::Delete {
                    resource: resource.clone(),
                    namespace: item.metadata.namespace.clone(),
                    name,
                })
                .await
                .map_err(Error::from)?;
            dispatched += 1;
        }

        if object.wait_for_deletion {
            wait_for_empty(&client, &resource, namespace, selector).await;
        }
    }

    Ok(JobReport {
        dispatched,
        verification: None,
    })
}

async fn wait_for_empty(client: &Client, resource: &ApiResource, namespace: Option<&str>, selector: &str) {
    let mut interval = tokio::time::interval(Duration::from_millis(500));
    loop {
        interval.tick().await;
        match client::list_by_selector(client.clone(), resource, namespace, selector).await {
            Ok(items) if items.is_empty() => return,
            Ok(_) => continue,
            Err(_) => continue,
        }
    }
}
