//! Run Controller (§4.5): owns the run UUID and job list, starts/stops the
//! Measurement Subsystem around the job sequence, and afterwards drives the
//! Metrics Scraper and Alert Evaluator over `[run-start, run-end]`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::Client;
use prometheus_http_query::Client as PromClient;
use uuid::Uuid;

use kube_burner_core::error::{Error, ExitCode};
use kube_burner_core::indexer::Indexer;

use crate::alerts::{self, AlertRule, FiredAlert};
use crate::events::{JobState, RunHandle};
use crate::job::{self, JobReport, JobSpec};
use crate::measurement::{self, MeasurementResult};
use crate::metrics::{self, EndpointSpec, MetricsQuery};

/// Metrics Scraper configuration for one run: every endpoint is queried
/// with the same profile over the same window (§4.7).
pub struct MetricsPlan {
    pub endpoints: Vec<EndpointSpec>,
    pub profile: Vec<MetricsQuery>,
}

/// Alert Evaluator configuration for one run (§4.8). A single endpoint is
/// used for alert evaluation, matching the CLI's `check-alerts` surface.
pub struct AlertsPlan {
    pub endpoint: EndpointSpec,
    pub profile: Vec<AlertRule>,
}

/// Everything the Run Controller needs to execute one run to completion.
/// Built entirely by the CLI from parsed config; this module never reads a
/// file or constructs a `kube::Client` itself (§1).
pub struct Run {
    pub uuid: Uuid,
    pub jobs: Vec<JobSpec>,
    pub measure_pods: bool,
    pub timeout: Option<Duration>,
    pub indexer: Arc<dyn Indexer>,
    pub metrics: Option<MetricsPlan>,
    pub alerts: Option<AlertsPlan>,
}

/// One job's terminal report, success or the context-chained error it
/// surfaced with (§7 "Propagation").
pub struct JobResult {
    pub name: String,
    pub outcome: Result<JobReport, String>,
}

/// Outcome of one full run, consumed by the CLI to pick an exit code.
pub struct RunOutcome {
    pub uuid: Uuid,
    pub job_results: Vec<JobResult>,
    pub measurement_incomplete: usize,
    pub fired_alerts: Vec<FiredAlert>,
    pub documents_scraped: usize,
    pub exit_code: ExitCode,
}

impl Run {
    /// Executes every job in declared order, sequentially (§5 "Across jobs:
    /// strict sequential"). A job failure aborts remaining jobs; the
    /// Measurement Subsystem still finalizes and emits whatever it observed
    /// (§5 "Cancellation semantics").
    pub async fn execute(self, client: Client, run: Arc<RunHandle>) -> RunOutcome {
        run.emit(crate::events::RunEvent::RunStarted { uuid: self.uuid });

        let measurement = if self.measure_pods {
            Some(measurement::start(client.clone(), self.uuid))
        } else {
            None
        };

        let run_start = Utc::now();
        let job_results = self.run_jobs_with_timeout(&client, &run).await;
        let run_end = Utc::now();

        let mut measurement_incomplete = 0usize;
        if let Some(handle) = measurement {
            match handle.stop().await {
                Ok(result) => {
                    measurement_incomplete = result.incomplete;
                    if let Err(err) = measurement::emit(&result, &self.indexer).await {
                        tracing::warn!(%err, "failed to index measurement documents");
                    }
                    emit_measurement_summary(&run, &result);
                }
                Err(err) => tracing::warn!(%err, "measurement subsystem failed to finalize"),
            }
        }

        let any_job_failed = job_results.iter().any(|r| r.outcome.is_err());

        let documents_scraped = if let Some(plan) = &self.metrics {
            scrape_all(plan, run_start, run_end, &self.uuid, &self.indexer).await
        } else {
            0
        };

        let fired_alerts = if let Some(plan) = &self.alerts {
            evaluate_alerts(plan, run_start, run_end, &self.uuid, &self.indexer).await
        } else {
            Vec::new()
        };

        let _ = self.indexer.flush().await;

        run.emit(crate::events::RunEvent::RunFinished);

        let exit_code = decide_exit_code(run.is_cancelled(), run.is_timed_out(), any_job_failed, &fired_alerts);

        RunOutcome {
            uuid: self.uuid,
            job_results,
            measurement_incomplete,
            fired_alerts,
            documents_scraped,
            exit_code,
        }
    }

    async fn run_jobs_with_timeout(&self, client: &Client, run: &Arc<RunHandle>) -> Vec<JobResult> {
        let job_sequence = self.run_jobs(client, run);
        match self.timeout {
            None => job_sequence.await,
            Some(timeout) => {
                tokio::select! {
                    results = job_sequence => results,
                    _ = tokio::time::sleep(timeout) => {
                        tracing::warn!(?timeout, "run timeout elapsed, cancelling");
                        run.request_timeout();
                        Vec::new()
                    }
                }
            }
        }
    }

    async fn run_jobs(&self, client: &Client, run: &Arc<RunHandle>) -> Vec<JobResult> {
        let mut results = Vec::with_capacity(self.jobs.len());
        for spec in &self.jobs {
            if run.is_cancelled() {
                run.set_job_state(&spec.name, JobState::Cancelled);
                results.push(JobResult {
                    name: spec.name.clone(),
                    outcome: Err("cancelled before start".to_string()),
                });
                continue;
            }

            let outcome = job::execute(client.clone(), self.uuid, spec, run).await;
            let failed = outcome.is_err();
            results.push(JobResult {
                name: spec.name.clone(),
                outcome: outcome.map_err(|err: Error| err.to_string()),
            });

            if failed {
                tracing::error!(job = %spec.name, "job failed, aborting remaining jobs");
                break;
            }
        }
        results
    }
}

fn emit_measurement_summary(run: &RunHandle, result: &MeasurementResult) {
    for ((job_name, phase), agg) in &result.aggregates {
        run.emit(crate::events::RunEvent::MeasurementSummary {
            job: job_name.clone(),
            phase: phase.to_string(),
            count: agg.count,
        });
    }
}

async fn scrape_all(
    plan: &MetricsPlan,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    uuid: &Uuid,
    indexer: &Arc<dyn Indexer>,
) -> usize {
    let mut total = 0usize;
    for endpoint in &plan.endpoints {
        match metrics::scrape(endpoint, &plan.profile, start, end, uuid, "kube-burner-indexing", indexer).await {
            Ok(count) => total += count,
            Err(err) => tracing::warn!(endpoint = %endpoint.name, %err, "metrics scrape failed for endpoint"),
        }
    }
    total
}

async fn evaluate_alerts(
    plan: &AlertsPlan,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    uuid: &Uuid,
    indexer: &Arc<dyn Indexer>,
) -> Vec<FiredAlert> {
    let http = match build_basic_prom_http(&plan.endpoint) {
        Ok(http) => http,
        Err(err) => {
            tracing::warn!(%err, "failed to build http client for alert endpoint");
            return Vec::new();
        }
    };
    let client = match PromClient::new(http, &plan.endpoint.url) {
        Ok(client) => client,
        Err(err) => {
            tracing::warn!(%err, "failed to connect to alert endpoint");
            return Vec::new();
        }
    };

    match alerts::evaluate(
        &client,
        &plan.profile,
        start,
        end,
        plan.endpoint.step.as_secs_f64(),
        uuid,
        indexer,
    )
    .await
    {
        Ok(fired) => fired,
        Err(err) => {
            tracing::warn!(%err, "failed to index alert documents");
            Vec::new()
        }
    }
}

fn build_basic_prom_http(endpoint: &EndpointSpec) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(endpoint.skip_tls_verify)
        .build()
}

/// Picks the process exit code for a finished run (§4.5, §7). A
/// timeout-triggered cancellation is reported distinctly from a plain
/// ctrl-C cancel, even though both abort the remaining job sequence the
/// same way.
fn decide_exit_code(cancelled: bool, timed_out: bool, any_job_failed: bool, fired_alerts: &[FiredAlert]) -> ExitCode {
    if alerts::has_critical(fired_alerts) {
        ExitCode::AlertCritical
    } else if timed_out {
        ExitCode::Timeout
    } else if any_job_failed {
        ExitCode::Api
    } else if cancelled {
        ExitCode::Generic
    } else {
        ExitCode::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube_burner_core::config::Severity;

    fn alert(severity: Severity) -> FiredAlert {
        FiredAlert {
            expr: "up".to_string(),
            severity,
            description: "d".to_string(),
            series_count: 1,
        }
    }

    #[test]
    fn exit_code_prioritizes_critical_alerts() {
        let code = decide_exit_code(false, false, true, &[alert(Severity::Critical)]);
        assert_eq!(code, ExitCode::AlertCritical);
    }

    #[test]
    fn exit_code_success_when_nothing_failed() {
        let code = decide_exit_code(false, false, false, &[]);
        assert_eq!(code, ExitCode::Success);
    }

    #[test]
    fn exit_code_api_when_job_failed() {
        let code = decide_exit_code(false, false, true, &[]);
        assert_eq!(code, ExitCode::Api);
    }

    #[test]
    fn exit_code_generic_on_plain_cancel() {
        let code = decide_exit_code(true, false, false, &[]);
        assert_eq!(code, ExitCode::Generic);
    }

    #[test]
    fn exit_code_timeout_distinct_from_plain_cancel() {
        let code = decide_exit_code(true, true, true, &[]);
        assert_eq!(code, ExitCode::Timeout);
    }
}
