//! `destroy`: deletes every object in the cluster carrying a run's
//! fingerprint label, across the caller-supplied kinds plus `Namespace`
//! (§4.4 "Cleanup").

use anyhow::{Context, Result};
use kube::core::DynamicObject;
use kube::Client;
use kube_burner_core::labels::uuid_selector;
use kube_burner_engine::client;
use kube_burner_engine::dispatcher::{DispatchOp, Dispatcher};

use crate::cli::DestroyArgs;

pub async fn run(args: DestroyArgs) -> Result<()> {
    let client = crate::kube_client::build_client(args.kubeconfig.as_deref()).await?;
    let selector = uuid_selector(&args.uuid);

    let mut kinds = args.kinds.clone();
    kinds.push("v1:Namespace".to_string());

    // Paced through the same Rate-Limited Dispatcher the Job Executor uses
    // (§9 "Bounded cleanup"), so a large UUID-scoped cohort can't overload
    // the apiserver and a single transient error doesn't abort the sweep.
    let dispatcher = Dispatcher::new(client.clone(), args.qps, args.burst, args.burst as usize);

    let mut failures = Vec::new();
    for kind_spec in &kinds {
        let (api_version, kind) = kind_spec
            .split_once(':')
            .with_context(|| format!("kind {kind_spec:?} must be API_VERSION:KIND"))?;
        delete_matching(client.clone(), &dispatcher, api_version, kind, &selector, &mut failures).await?;
    }

    dispatcher.shutdown().await;

    if !failures.is_empty() {
        anyhow::bail!("{} object(s) failed to delete: {}", failures.len(), failures.join(", "));
    }

    Ok(())
}

async fn delete_matching(
    client: Client,
    dispatcher: &Dispatcher,
    api_version: &str,
    kind: &str,
    selector: &str,
    failures: &mut Vec<String>,
) -> Result<()> {
    let resource = client::api_resource_for(api_version, kind);
    let objects: Vec<DynamicObject> =
        client::list_by_selector(client.clone(), &resource, None, selector).await?;

    for obj in &objects {
        let name = obj.metadata.name.clone().unwrap_or_default();
        let namespace = obj.metadata.namespace.clone();

        let outcome = dispatcher
            .submit(DispatchOp::Delete {
                resource: resource.clone(),
                namespace: namespace.clone(),
                name: name.clone(),
            })
            .await;

        match outcome {
            Ok(_) => println!("deleted {kind}/{name}"),
            Err(err) => {
                tracing::warn!(kind, name, %err, "delete failed, continuing sweep");
                failures.push(format!("{kind}/{name}: {err}"));
            }
        }
    }

    Ok(())
}
