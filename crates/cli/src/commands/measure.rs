//! `measure`: runs the Measurement Subsystem stand-alone against whatever
//! Pods already exist or appear in the cluster during the window, without
//! dispatching any workload (§4.6).

use anyhow::{Context, Result};

use kube_burner_engine::measurement;

use crate::cli::MeasureArgs;
use crate::{indexer, kube_client};

pub async fn run(args: MeasureArgs) -> Result<i32> {
    let client = kube_client::build_client(args.kubeconfig.as_deref()).await?;
    let idx = indexer::from_sink_args(&args.sink, args.uuid)?;

    let handle = measurement::start(client, args.uuid);

    println!("measuring pod lifecycle transitions for {:?}...", args.duration);
    tokio::select! {
        _ = tokio::time::sleep(args.duration) => {}
        _ = tokio::signal::ctrl_c() => {
            println!("interrupted, finalizing early");
        }
    }

    let result = handle.stop().await.context("finalizing measurement subsystem")?;
    let observed = result.aggregates.len();
    measurement::emit(&result, &idx).await.context("indexing measurement documents")?;
    idx.flush().await.context("flushing indexer")?;

    println!(
        "observed {observed} job/phase series, {} incomplete transition(s)",
        result.incomplete
    );
    Ok(0)
}
