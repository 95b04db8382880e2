//! Measurement Subsystem (§4.6), pod-latency exemplar. Watches Pods carrying
//! the run UUID label, timestamps lifecycle condition transitions, and on
//! stop derives per-pod and per-job quantile documents for the Indexer.
//!
//! Sharding: `hash(uid) % shard_count` routes every event for one pod to a
//! single shard's worker task, so each shard's record map is mutated by
//! exactly one task and never needs a lock (§4.6 "Lock-free per-key map").

use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use kube::core::DynamicObject;
use kube::runtime::watcher::{self, Event};
use kube::Client;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use uuid::Uuid;

use kube_burner_core::document::IndexOptions;
use kube_burner_core::error::MeasurementError;
use kube_burner_core::indexer::Indexer;
use kube_burner_core::labels::{uuid_selector, JOB_LABEL};

use crate::client as dyn_client;

const SHARD_COUNT: usize = 8;

/// Lifecycle phases tracked for every pod (§3 "Measurement Record", §4.6).
const PHASES: &[&str] = &["PodScheduled", "Initialized", "ContainersReady", "Ready"];

#[derive(Debug, Clone, Default)]
struct PodRecord {
    namespace: String,
    name: String,
    job_name: String,
    created_at: Option<DateTime<Utc>>,
    phase_times: BTreeMap<&'static str, DateTime<Utc>>,
}

impl PodRecord {
    fn is_complete(&self) -> bool {
        PHASES.iter().all(|p| self.phase_times.contains_key(p))
    }
}

/// Per-phase quantile aggregate over a cohort of pods for one job.
#[derive(Debug, Clone, Default)]
pub struct PhaseLatencies {
    pub count: usize,
    pub min_ms: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
    pub max_ms: u64,
    pub avg_ms: f64,
}

/// Computes count/P50/P95/P99/min/max/avg over a set of phase latencies in
/// milliseconds. Pure function: no I/O, independently testable (§8).
pub fn quantiles(mut samples: Vec<u64>) -> PhaseLatencies {
    if samples.is_empty() {
        return PhaseLatencies::default();
    }
    samples.sort_unstable();
    let count = samples.len();
    let pick = |q: f64| -> u64 {
        let idx = ((count as f64 - 1.0) * q).round() as usize;
        samples[idx.min(count - 1)]
    };
    let sum: u64 = samples.iter().sum();
    PhaseLatencies {
        count,
        min_ms: samples[0],
        p50_ms: pick(0.50),
        p95_ms: pick(0.95),
        p99_ms: pick(0.99),
        max_ms: samples[count - 1],
        avg_ms: sum as f64 / count as f64,
    }
}

enum ShardMsg {
    Event(Box<DynamicObject>),
    Drain(oneshot::Sender<HashMap<String, PodRecord>>),
}

/// Handle to a running Measurement Subsystem instance. Dropping it without
/// calling [`MeasurementHandle::stop`] leaves its watcher tasks running.
pub struct MeasurementHandle {
    shards: Vec<mpsc::Sender<ShardMsg>>,
    watcher_task: JoinSet<()>,
}

fn shard_for(uid: &str) -> usize {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    uid.hash(&mut hasher);
    (hasher.finish() as usize) % SHARD_COUNT
}

/// Starts watching Pods labeled with `uuid` for lifecycle transitions.
/// Must be called before the first job starts so no transitions are missed
/// (§3 invariant "Measurement does not miss transitions ...").
pub fn start(client: Client, uuid: Uuid) -> MeasurementHandle {
    let mut shards = Vec::with_capacity(SHARD_COUNT);
    let mut watcher_task = JoinSet::new();

    for _ in 0..SHARD_COUNT {
        let (tx, rx) = mpsc::channel(1024);
        shards.push(tx);
        watcher_task.spawn(shard_worker(rx));
    }

    let pod_resource = dyn_client::api_resource_for("v1", "Pod");
    let api = dyn_client::dynamic_api(client, &pod_resource, None);
    let selector = uuid_selector(&uuid);
    let cfg = watcher::Config::default().labels(&selector);
    let shard_txs = shards.clone();

    watcher_task.spawn(async move {
        let mut stream = Box::pin(watcher::watcher(api, cfg));
        loop {
            match stream.next().await {
                Some(Ok(Event::Apply(obj))) | Some(Ok(Event::InitApply(obj))) => {
                    let uid = obj.metadata.uid.clone().unwrap_or_default();
                    let shard = shard_for(&uid);
                    let _ = shard_txs[shard].send(ShardMsg::Event(Box::new(obj))).await;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::warn!(%err, "measurement watch error, will attempt to resume");
                }
                None => break,
            }
        }
    });

    MeasurementHandle {
        shards,
        watcher_task,
    }
}

async fn shard_worker(mut rx: mpsc::Receiver<ShardMsg>) {
    let mut records: HashMap<String, PodRecord> = HashMap::new();

    while let Some(msg) = rx.recv().await {
        match msg {
            ShardMsg::Event(obj) => apply_event(&mut records, &obj),
            ShardMsg::Drain(reply) => {
                let _ = reply.send(std::mem::take(&mut records));
            }
        }
    }
}

fn apply_event(records: &mut HashMap<String, PodRecord>, obj: &DynamicObject) {
    let Some(uid) = obj.metadata.uid.clone() else {
        return;
    };
    let namespace = obj.metadata.namespace.clone().unwrap_or_default();
    let name = obj.metadata.name.clone().unwrap_or_default();
    let job_name = obj
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(JOB_LABEL))
        .cloned()
        .unwrap_or_default();

    let record = records.entry(uid).or_insert_with(|| PodRecord {
        namespace: namespace.clone(),
        name: name.clone(),
        job_name: job_name.clone(),
        created_at: None,
        phase_times: BTreeMap::new(),
    });

    if record.created_at.is_none() {
        record.created_at = obj
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|t| t.0);
    }
    if !job_name.is_empty() {
        record.job_name = job_name;
    }

    let received_at = Utc::now();
    for phase in PHASES {
        if record.phase_times.contains_key(phase) {
            continue; // idempotent: first transition wins (§4.6).
        }
        if let Some((status, transition_time)) = dyn_client::condition_transition(obj, phase) {
            if status != "True" {
                continue;
            }
            record
                .phase_times
                .insert(*phase, transition_time.unwrap_or(received_at));
        }
    }
}

/// Result of stopping the Measurement Subsystem: per-pod and per-job-phase
/// documents ready to hand to the Indexer, plus the raw aggregate table for
/// callers (e.g. the run summary / exit-code decision) that want it typed.
pub struct MeasurementResult {
    pub per_pod_documents: Vec<(String, Map<String, Value>)>,
    pub per_job_summaries: Vec<(String, Map<String, Value>)>,
    pub aggregates: HashMap<(String, &'static str), PhaseLatencies>,
    pub incomplete: usize,
}

impl MeasurementHandle {
    /// Stops the watcher, drains every shard's accumulated records, and
    /// computes latency/quantile documents. Still emits aggregates for
    /// whatever was observed even if the run was cancelled mid-flight
    /// (§5 "Triggers Measurement Subsystem's drain + finalize path").
    pub async fn stop(mut self) -> Result<MeasurementResult, MeasurementError> {
        self.watcher_task.abort_all();
        while self.watcher_task.join_next().await.is_some() {}

        let mut all_records: Vec<PodRecord> = Vec::new();
        for shard in &self.shards {
            let (tx, rx) = oneshot::channel();
            if shard.send(ShardMsg::Drain(tx)).await.is_err() {
                continue;
            }
            if let Ok(records) = rx.await {
                all_records.extend(records.into_values());
            }
        }

        Ok(finalize(all_records))
    }
}

/// Forwards a [`MeasurementResult`] to an indexer as the two document
/// streams described in §4.6: per-pod quantile events and per-job summaries.
pub async fn emit(
    result: &MeasurementResult,
    indexer: &Arc<dyn Indexer>,
) -> Result<(), MeasurementError> {
    for (job_name, doc) in &result.per_pod_documents {
        indexer
            .index(
                vec![doc.clone()],
                IndexOptions {
                    metric_name: "podLatencyMeasurement".to_string(),
                    job_name: job_name.clone(),
                    index_suffix: None,
                },
            )
            .await
            .map_err(|err| MeasurementError(err.to_string()))?;
    }
    for (job_name, doc) in &result.per_job_summaries {
        indexer
            .index(
                vec![doc.clone()],
                IndexOptions {
                    metric_name: "podLatencyQuantiles".to_string(),
                    job_name: job_name.clone(),
                    index_suffix: None,
                },
            )
            .await
            .map_err(|err| MeasurementError(err.to_string()))?;
    }
    Ok(())
}

/// Turns drained per-pod records into the two document streams plus the
/// quantile aggregates. Pure function, independently testable (§8): a
/// record missing `created_at` is dropped entirely; a record missing one
/// or more phases is still reported per-pod but excluded from the
/// per-job quantile samples (§4.6 "excluded from quantile aggregates").
fn finalize(records: Vec<PodRecord>) -> MeasurementResult {
    let mut per_pod_documents = Vec::new();
    let mut per_job_phase_samples: HashMap<(String, &'static str), Vec<u64>> = HashMap::new();
    let mut incomplete = 0usize;

    for record in &records {
        let Some(created_at) = record.created_at else {
            incomplete += 1;
            continue;
        };
        let complete = record.is_complete();
        if !complete {
            incomplete += 1;
        }
        for phase in PHASES {
            let Some(ts) = record.phase_times.get(phase) else {
                continue;
            };
            let latency_ms = (*ts - created_at).num_milliseconds().max(0) as u64;

            let mut doc = Map::new();
            doc.insert("namespace".to_string(), Value::String(record.namespace.clone()));
            doc.insert("podName".to_string(), Value::String(record.name.clone()));
            doc.insert("phase".to_string(), Value::String(phase.to_string()));
            doc.insert("latencyMs".to_string(), Value::from(latency_ms));
            doc.insert(
                "creationTimestamp".to_string(),
                Value::String(created_at.to_rfc3339()),
            );
            per_pod_documents.push((record.job_name.clone(), doc));

            if complete {
                per_job_phase_samples
                    .entry((record.job_name.clone(), *phase))
                    .or_default()
                    .push(latency_ms);
            }
        }
    }

    let mut aggregates = HashMap::new();
    let mut per_job_summaries = Vec::new();
    for ((job_name, phase), samples) in per_job_phase_samples {
        let agg = quantiles(samples);
        let mut doc = Map::new();
        doc.insert("phase".to_string(), Value::String(phase.to_string()));
        doc.insert("count".to_string(), Value::from(agg.count));
        doc.insert("p50Ms".to_string(), Value::from(agg.p50_ms));
        doc.insert("p95Ms".to_string(), Value::from(agg.p95_ms));
        doc.insert("p99Ms".to_string(), Value::from(agg.p99_ms));
        doc.insert("minMs".to_string(), Value::from(agg.min_ms));
        doc.insert("maxMs".to_string(), Value::from(agg.max_ms));
        doc.insert("avgMs".to_string(), Value::from(agg.avg_ms));
        per_job_summaries.push((job_name.clone(), doc));
        aggregates.insert((job_name, phase), agg);
    }

    MeasurementResult {
        per_pod_documents,
        per_job_summaries,
        aggregates,
        incomplete,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantiles_over_known_samples() {
        let samples: Vec<u64> = (1..=100).collect();
        let agg = quantiles(samples);
        assert_eq!(agg.count, 100);
        assert_eq!(agg.min_ms, 1);
        assert_eq!(agg.max_ms, 100);
        assert_eq!(agg.p50_ms, 50);
        assert_eq!(agg.p99_ms, 99);
    }

    #[test]
    fn quantiles_of_empty_is_default() {
        let agg = quantiles(Vec::new());
        assert_eq!(agg.count, 0);
        assert_eq!(agg.avg_ms, 0.0);
    }

    #[test]
    fn record_completeness_requires_all_phases() {
        let mut record = PodRecord {
            namespace: "ns".to_string(),
            name: "p".to_string(),
            job_name: "j".to_string(),
            created_at: Some(Utc::now()),
            phase_times: BTreeMap::new(),
        };
        assert!(!record.is_complete());
        for phase in PHASES {
            record.phase_times.insert(*phase, Utc::now());
        }
        assert!(record.is_complete());
    }

    #[test]
    fn same_pod_hashes_to_same_shard() {
        let a = shard_for("abc-123");
        let b = shard_for("abc-123");
        assert_eq!(a, b);
    }

    fn record(job: &str, created_at: DateTime<Utc>, phases: &[&'static str]) -> PodRecord {
        let mut phase_times = BTreeMap::new();
        for phase in phases {
            phase_times.insert(*phase, created_at + chrono::Duration::milliseconds(10));
        }
        PodRecord {
            namespace: "ns".to_string(),
            name: format!("pod-{job}"),
            job_name: job.to_string(),
            created_at: Some(created_at),
            phase_times,
        }
    }

    #[test]
    fn incomplete_records_are_reported_but_excluded_from_aggregates() {
        let now = Utc::now();
        let complete = record("create-pods", now, PHASES);
        let incomplete = record("create-pods", now, &["PodScheduled"]);

        let result = finalize(vec![complete, incomplete]);

        assert_eq!(result.incomplete, 1);
        // Both records still contribute per-pod documents for the phases
        // they reached.
        assert_eq!(result.per_pod_documents.len(), PHASES.len() + 1);
        // Only the complete record's samples feed the aggregate, so the
        // PodScheduled bucket has exactly one sample, not two.
        let agg = result
            .aggregates
            .get(&("create-pods".to_string(), "PodScheduled"))
            .unwrap();
        assert_eq!(agg.count, 1);
    }

    #[test]
    fn records_missing_created_at_are_dropped_entirely() {
        let mut no_creation = record("create-pods", Utc::now(), PHASES);
        no_creation.created_at = None;

        let result = finalize(vec![no_creation]);

        assert_eq!(result.incomplete, 1);
        assert!(result.per_pod_documents.is_empty());
        assert!(result.aggregates.is_empty());
    }
}
