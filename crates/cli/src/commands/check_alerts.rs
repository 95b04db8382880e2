//! `check-alerts`: evaluates an alert profile over an explicit time range
//! and exits non-zero when a critical alert fired (§4.8, §6).

use anyhow::{Context, Result};
use kube_burner_core::error::ExitCode;
use prometheus_http_query::Client as PromClient;

use kube_burner_engine::alerts;

use crate::cli::CheckAlertsArgs;
use crate::{config as cfgmod, indexer};

pub async fn run(args: CheckAlertsArgs) -> Result<i32> {
    let profile = cfgmod::load_alert_profile(&args.alert_profile)?
        .iter()
        .map(cfgmod::alert_rule)
        .collect::<Vec<_>>();

    let endpoint_url = args
        .endpoint
        .endpoint
        .clone()
        .context("--endpoint is required")?;

    let http = reqwest::Client::builder()
        .danger_accept_invalid_certs(args.endpoint.skip_tls_verify)
        .build()
        .context("building http client")?;
    let client = PromClient::new(http, &endpoint_url).context("connecting to prometheus endpoint")?;

    let idx = indexer::from_sink_args(&args.sink, args.uuid)?;
    let (start, end) = args.window.resolve();

    let fired = alerts::evaluate(
        &client,
        &profile,
        start,
        end,
        args.endpoint.step.as_secs_f64(),
        &args.uuid,
        &idx,
    )
    .await
    .context("evaluating alert profile")?;
    idx.flush().await.context("flushing indexer")?;

    for alert in &fired {
        println!("fired: {} ({:?}): {}", alert.expr, alert.severity, alert.description);
    }

    if alerts::has_critical(&fired) {
        Ok(ExitCode::AlertCritical as i32)
    } else {
        Ok(ExitCode::Success as i32)
    }
}
