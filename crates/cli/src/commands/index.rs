//! `index`: scrapes configured Prometheus endpoints over an explicit time
//! window and indexes the result, without running any workload (§4.7).

use anyhow::{Context, Result};

use kube_burner_engine::metrics;

use crate::cli::IndexArgs;
use crate::{config as cfgmod, indexer};

pub async fn run(args: IndexArgs) -> Result<i32> {
    let profile = cfgmod::load_metrics_profile(&args.metrics_profile)?
        .iter()
        .map(cfgmod::metrics_query)
        .collect::<Vec<_>>();

    let endpoint_url = args
        .endpoint
        .endpoint
        .clone()
        .context("--endpoint is required")?;
    let endpoint = metrics::EndpointSpec {
        name: endpoint_url.clone(),
        url: endpoint_url,
        token: args.endpoint.token.clone(),
        username: args.endpoint.username.clone(),
        password: args.endpoint.password.clone(),
        skip_tls_verify: args.endpoint.skip_tls_verify,
        step: args.endpoint.step,
    };

    let idx = indexer::from_sink_args(&args.sink, args.uuid)?;
    let (start, end) = args.window.resolve();

    let count = metrics::scrape(&endpoint, &profile, start, end, &args.uuid, "kube-burner-indexing", &idx)
        .await
        .context("scraping metrics endpoint")?;
    idx.flush().await.context("flushing indexer")?;

    println!("indexed {count} document(s) from {}", endpoint.name);
    Ok(0)
}
