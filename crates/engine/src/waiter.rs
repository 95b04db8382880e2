//! Object Waiter (§4.3): observes a created object until a kind-specific
//! readiness predicate holds, or a timeout elapses. Prefers a resumable
//! watch stream; falls back to bounded polling for kinds without a
//! well-known informer in this crate (§9 "Watch-based measurement vs.
//! polling" applies to readiness waits identically).

use std::time::{Duration, Instant};

use futures::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::core::DynamicObject;
use kube::discovery::ApiResource;
use kube::runtime::watcher::{self, Event};
use kube::Client;

use kube_burner_core::error::WaitTimeout;

use crate::client;
use crate::events::RunHandle;

/// Per-object readiness override (§6 "wait").
#[derive(Debug, Clone)]
pub enum Readiness {
    Default,
    Custom {
        condition_type: String,
        expected_status: String,
    },
}

const WELL_KNOWN_KINDS: &[&str] = &[
    "Pod",
    "Deployment",
    "ReplicaSet",
    "StatefulSet",
    "DaemonSet",
    "Job",
];

fn condition_true(obj: &DynamicObject, condition_type: &str, expected: &str) -> bool {
    client::condition(obj, condition_type)
        .map(|c: Condition| c.status == expected)
        .unwrap_or(false)
}

/// Kind-specific readiness table (§4.3).
fn is_ready(obj: &DynamicObject, kind: &str, readiness: &Readiness) -> bool {
    match readiness {
        Readiness::Custom {
            condition_type,
            expected_status,
        } => condition_true(obj, condition_type, expected_status),
        Readiness::Default => match kind {
            "Pod" => condition_true(obj, "Ready", "True"),
            "Deployment" | "ReplicaSet" | "StatefulSet" => {
                let ready = client::status_int(obj, "readyReplicas");
                let wanted = client::spec_int(obj, "replicas").max(1);
                ready >= wanted
            }
            "DaemonSet" => {
                client::status_int(obj, "numberReady")
                    >= client::status_int(obj, "desiredNumberScheduled")
            }
            "Job" => {
                let completions = client::spec_int(obj, "completions").max(1);
                client::status_int(obj, "succeeded") >= completions
            }
            _ => false,
        },
    }
}

/// Waits for one object to reach readiness, honoring `maxWaitTimeout = 0`
/// as "skip entirely" (§8 boundary behavior) and cancellation.
pub async fn wait_for_ready(
    client: Client,
    resource: &ApiResource,
    namespace: Option<&str>,
    name: &str,
    kind: &str,
    readiness: &Readiness,
    timeout: Duration,
    run: &RunHandle,
) -> Result<(), WaitTimeout> {
    if timeout.is_zero() {
        return Ok(());
    }

    let started_at = Instant::now();
    let result = if WELL_KNOWN_KINDS.contains(&kind) {
        tokio::select! {
            res = wait_watched(client.clone(), resource, namespace, name, kind, readiness, timeout) => res,
            _ = run.cancelled() => false,
        }
    } else {
        tokio::select! {
            res = wait_polled(client.clone(), resource, namespace, name, kind, readiness, timeout) => res,
            _ = run.cancelled() => false,
        }
    };

    if result {
        Ok(())
    } else {
        Err(WaitTimeout {
            kind: kind.to_string(),
            name: name.to_string(),
            elapsed_secs: started_at.elapsed().as_secs(),
        })
    }
}

async fn wait_watched(
    client: Client,
    resource: &ApiResource,
    namespace: Option<&str>,
    name: &str,
    kind: &str,
    readiness: &Readiness,
    timeout: Duration,
) -> bool {
    let api = client::dynamic_api(client.clone(), resource, namespace);
    let cfg = watcher::Config::default().fields(&format!("metadata.name={name}"));
    let mut stream = Box::pin(watcher::watcher(api, cfg));

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => return false,
            next = stream.next() => {
                match next {
                    Some(Ok(Event::Apply(obj))) | Some(Ok(Event::InitApply(obj))) => {
                        if is_ready(&obj, kind, readiness) {
                            return true;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::warn!(%err, kind, name, "watch error while waiting for readiness, falling back to poll");
                        return wait_polled_remaining(client.clone(), resource, namespace, name, kind, readiness, &mut deadline).await;
                    }
                    None => return false,
                }
            }
        }
    }
}

async fn wait_polled_remaining(
    client: Client,
    resource: &ApiResource,
    namespace: Option<&str>,
    name: &str,
    kind: &str,
    readiness: &Readiness,
    deadline: &mut std::pin::Pin<&mut tokio::time::Sleep>,
) -> bool {
    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = deadline => return false,
            _ = ticker.tick() => {
                if let Ok(Some(obj)) = client::get(client.clone(), resource, namespace, name).await {
                    if is_ready(&obj, kind, readiness) {
                        return true;
                    }
                }
            }
        }
    }
}

async fn wait_polled(
    client: Client,
    resource: &ApiResource,
    namespace: Option<&str>,
    name: &str,
    kind: &str,
    readiness: &Readiness,
    timeout: Duration,
) -> bool {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    wait_polled_remaining(client, resource, namespace, name, kind, readiness, &mut deadline).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dynamic_obj(value: serde_json::Value) -> DynamicObject {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn deployment_ready_when_replicas_match() {
        let obj = dynamic_obj(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "x"},
            "spec": {"replicas": 3},
            "status": {"readyReplicas": 3}
        }));
        assert!(is_ready(&obj, "Deployment", &Readiness::Default));
    }

    #[test]
    fn deployment_not_ready_when_replicas_short() {
        let obj = dynamic_obj(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "x"},
            "spec": {"replicas": 3},
            "status": {"readyReplicas": 1}
        }));
        assert!(!is_ready(&obj, "Deployment", &Readiness::Default));
    }

    #[test]
    fn pod_ready_uses_ready_condition() {
        let obj = dynamic_obj(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "x"},
            "status": {"conditions": [{"type": "Ready", "status": "True"}]}
        }));
        assert!(is_ready(&obj, "Pod", &Readiness::Default));
    }

    #[test]
    fn custom_readiness_checks_named_condition() {
        let obj = dynamic_obj(json!({
            "apiVersion": "example.com/v1",
            "kind": "Widget",
            "metadata": {"name": "x"},
            "status": {"conditions": [{"type": "Available", "status": "True"}]}
        }));
        let readiness = Readiness::Custom {
            condition_type: "Available".to_string(),
            expected_status: "True".to_string(),
        };
        assert!(is_ready(&obj, "Widget", &readiness));
    }
}
