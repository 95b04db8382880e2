//! `init`: loads a run config, builds a client and indexer, and executes
//! every job in sequence via the Run Controller.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use uuid::Uuid;

use kube_burner_core::config::EndpointConfig;
use kube_burner_engine::events::RunHandle;
use kube_burner_engine::run::{AlertsPlan, MetricsPlan, Run};

use crate::cli::InitArgs;
use crate::{config as cfgmod, indexer, kube_client};

pub async fn run(args: InitArgs) -> Result<i32> {
    let run_cfg = cfgmod::load_run_config(&args.config)?;
    let config_dir = cfgmod::config_dir(&args.config);
    let jobs = cfgmod::resolve_jobs(&config_dir, &run_cfg.jobs)?;

    let uuid = args
        .uuid
        .or(run_cfg.global.uuid)
        .unwrap_or_else(Uuid::new_v4);

    let client = kube_client::build_client(args.kubeconfig.as_deref()).await?;

    let base_idx: Arc<dyn kube_burner_core::indexer::Indexer> = match (&args.sink.local_index_dir, &run_cfg.global.indexer) {
        (Some(_), _) => indexer::from_sink_args(&args.sink, uuid)?,
        (None, Some(cfg)) => indexer::from_sink_choice(cfgmod::indexer_config_to_sink(cfg), uuid),
        (None, None) => indexer::from_sink_args(&args.sink, uuid)?,
    };

    let mut user_metadata = run_cfg.global.user_metadata.clone();
    if let Some(path) = &args.user_metadata {
        user_metadata.extend(cfgmod::load_user_metadata(path)?);
    }
    let idx = indexer::UserMetadataIndexer::wrap(base_idx, user_metadata.into_iter().collect());

    let metrics = load_metrics_plan(&args, &config_dir)?;
    let alerts = load_alerts_plan(&args, &config_dir)?;

    let measure_pods = !run_cfg.global.measurements.is_empty();

    let plan = Run {
        uuid,
        jobs,
        measure_pods,
        timeout: run_cfg.global.timeout_secs.map(Duration::from_secs),
        indexer: idx,
        metrics,
        alerts,
    };

    let run_handle = RunHandle::new();
    let progress = crate::progress::spawn(&run_handle);

    let ctrlc_handle = run_handle.clone();
    tokio::spawn(async move {
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            if ctrlc_handle.is_cancelled() {
                std::process::exit(130);
            }
            println!("received interrupt, cancelling run (press again to force exit)");
            ctrlc_handle.request_cancel();
        }
    });

    let started = Utc::now();
    let outcome = plan.execute(client, run_handle).await;
    let elapsed = Utc::now() - started;

    progress.abort();

    println!(
        "run {} finished in {}s: {} job(s), {} measurement sample(s) incomplete, {} document(s) scraped, {} alert(s) fired",
        outcome.uuid,
        elapsed.num_seconds(),
        outcome.job_results.len(),
        outcome.measurement_incomplete,
        outcome.documents_scraped,
        outcome.fired_alerts.len(),
    );
    for job in &outcome.job_results {
        if let Err(err) = &job.outcome {
            eprintln!("job {} failed: {err}", job.name);
        }
    }

    if let (Some(dir), Some(dest)) = (&args.sink.local_index_dir, &args.sink.archive) {
        let archiver = kube_burner_core::indexer::LocalIndexer::new(dir.clone(), outcome.uuid);
        archiver.archive(dest.clone()).await?;
        println!("archived {} into {}", dir.display(), dest.display());
    }

    Ok(outcome.exit_code as i32)
}

fn load_metrics_plan(args: &InitArgs, config_dir: &std::path::Path) -> Result<Option<MetricsPlan>> {
    let Some(profile_path) = &args.metrics_profile else {
        return Ok(None);
    };
    let profile = cfgmod::load_metrics_profile(profile_path)?
        .iter()
        .map(cfgmod::metrics_query)
        .collect();
    let endpoints = vec![endpoint_from_flags(args, config_dir)?];
    Ok(Some(MetricsPlan { endpoints, profile }))
}

fn load_alerts_plan(args: &InitArgs, config_dir: &std::path::Path) -> Result<Option<AlertsPlan>> {
    let Some(profile_path) = &args.alert_profile else {
        return Ok(None);
    };
    let profile = cfgmod::load_alert_profile(profile_path)?
        .iter()
        .map(cfgmod::alert_rule)
        .collect();
    let endpoint = endpoint_from_flags(args, config_dir)?;
    Ok(Some(AlertsPlan { endpoint, profile }))
}

fn endpoint_from_flags(
    args: &InitArgs,
    _config_dir: &std::path::Path,
) -> Result<kube_burner_engine::metrics::EndpointSpec> {
    let endpoint = args
        .endpoint
        .endpoint
        .clone()
        .ok_or_else(|| anyhow::anyhow!("--endpoint is required with --metrics-profile/--alert-profile"))?;
    let cfg = EndpointConfig {
        endpoint,
        token: args.endpoint.token.clone(),
        username: args.endpoint.username.clone(),
        password: args.endpoint.password.clone(),
        step_secs: args.endpoint.step.as_secs(),
        skip_tls_verify: args.endpoint.skip_tls_verify,
        metrics_profile: None,
        alert_profile: None,
    };
    Ok(cfgmod::endpoint_spec(&cfg))
}
