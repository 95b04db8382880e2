//! Thin dynamic-object client wrapper. Object templates target arbitrary
//! kinds, so dispatch goes through `kube::core::DynamicObject` resolved via
//! API discovery rather than a fixed set of typed `Api<T>`s.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::{DynamicObject, GroupVersionKind};
use kube::discovery::ApiResource;
use kube::{Api, Client};

/// Resolves an `ApiResource` for a `group/version, kind` pair without a
/// discovery round-trip, by constructing the `GroupVersionKind` directly
/// from the manifest's own `apiVersion`/`kind` fields.
pub fn api_resource_for(api_version: &str, kind: &str) -> ApiResource {
    let gvk = match api_version.split_once('/') {
        Some((group, version)) => GroupVersionKind::gvk(group, version, kind),
        None => GroupVersionKind::gvk("", api_version, kind),
    };
    ApiResource::from_gvk(&gvk)
}

/// Builds a dynamic `Api` scoped to a namespace (or cluster-wide when
/// `namespace` is `None`), for the resolved resource.
pub fn dynamic_api(client: Client, resource: &ApiResource, namespace: Option<&str>) -> Api<DynamicObject> {
    match namespace {
        Some(ns) => Api::namespaced_with(client, ns, resource),
        None => Api::all_with(client, resource),
    }
}

/// Parses a rendered manifest string (YAML or JSON) into a `DynamicObject`,
/// stamping the fingerprint labels (§3 "Invariants").
pub fn parse_manifest(
    raw: &str,
    labels: std::collections::BTreeMap<String, String>,
) -> anyhow::Result<DynamicObject> {
    let mut obj: DynamicObject = serde_yaml::from_str(raw)?;
    let existing = obj.metadata.labels.get_or_insert_with(Default::default);
    existing.extend(labels);
    Ok(obj)
}

/// Creates one object, returning the server's stored representation.
pub async fn create(
    client: Client,
    resource: &ApiResource,
    namespace: Option<&str>,
    obj: &DynamicObject,
) -> kube::Result<DynamicObject> {
    let api = dynamic_api(client, resource, namespace);
    api.create(&PostParams::default(), obj).await
}

/// Applies a strategic/merge-style JSON patch to an existing object.
pub async fn patch(
    client: Client,
    resource: &ApiResource,
    namespace: Option<&str>,
    name: &str,
    patch: serde_json::Value,
) -> kube::Result<DynamicObject> {
    let api = dynamic_api(client, resource, namespace);
    api.patch(name, &PatchParams::apply("kube-burner"), &Patch::Merge(patch))
        .await
}

/// Deletes one object by name. `404` is treated as already-deleted.
pub async fn delete(
    client: Client,
    resource: &ApiResource,
    namespace: Option<&str>,
    name: &str,
) -> kube::Result<()> {
    let api = dynamic_api(client, resource, namespace);
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(err)) if err.code == 404 => Ok(()),
        Err(err) => Err(err),
    }
}

/// Lists objects matching a label selector, used by delete-type jobs and
/// cleanup passes.
pub async fn list_by_selector(
    client: Client,
    resource: &ApiResource,
    namespace: Option<&str>,
    label_selector: &str,
) -> kube::Result<Vec<DynamicObject>> {
    let api = dynamic_api(client, resource, namespace);
    let params = ListParams::default().labels(label_selector);
    Ok(api.list(&params).await?.items)
}

pub async fn get(
    client: Client,
    resource: &ApiResource,
    namespace: Option<&str>,
    name: &str,
) -> kube::Result<Option<DynamicObject>> {
    let api = dynamic_api(client, resource, namespace);
    match api.get(name).await {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(err)) if err.code == 404 => Ok(None),
        Err(err) => Err(err),
    }
}

/// Extracts a condition of a given `type_` from a dynamic object's
/// `status.conditions`, the common shape across Deployment/Pod/etc.
pub fn condition(obj: &DynamicObject, condition_type: &str) -> Option<Condition> {
    let status = obj.data.get("status")?;
    let conditions = status.get("conditions")?.as_array()?;
    conditions.iter().find_map(|c| {
        if c.get("type")?.as_str()? == condition_type {
            serde_json::from_value(c.clone()).ok()
        } else {
            None
        }
    })
}

/// Reads a condition's `status` and `lastTransitionTime` straight from the
/// object's raw JSON, without requiring the whole condition to deserialize
/// into [`Condition`]. Used by the Measurement Subsystem, which must fall
/// back to event-receipt time when `lastTransitionTime` is absent rather
/// than discard the transition entirely (§4.6).
pub fn condition_transition(
    obj: &DynamicObject,
    condition_type: &str,
) -> Option<(String, Option<chrono::DateTime<chrono::Utc>>)> {
    let status = obj.data.get("status")?;
    let conditions = status.get("conditions")?.as_array()?;
    let raw = conditions
        .iter()
        .find(|c| c.get("type").and_then(|v| v.as_str()) == Some(condition_type))?;
    let condition_status = raw.get("status")?.as_str()?.to_string();
    let transition_time = raw
        .get("lastTransitionTime")
        .and_then(|v| v.as_str())
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc));
    Some((condition_status, transition_time))
}

/// Reads an integer status field such as `readyReplicas` or `succeeded`,
/// treating an absent field as `0` (the common meaning pre-first-reconcile).
pub fn status_int(obj: &DynamicObject, field: &str) -> i64 {
    obj.data
        .get("status")
        .and_then(|s| s.get(field))
        .and_then(|v| v.as_i64())
        .unwrap_or(0)
}

pub fn spec_int(obj: &DynamicObject, field: &str) -> i64 {
    obj.data
        .get("spec")
        .and_then(|s| s.get(field))
        .and_then(|v| v.as_i64())
        .unwrap_or(0)
}

