//! Rate-Limited Dispatcher (§4.2): a bounded worker pool draining a bounded
//! `mpsc` queue of submissions, paced by a [`TokenBucket`]. Mirrors the
//! command-channel + `JoinSet` worker layout used elsewhere in this
//! codebase's engine/worker split.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::core::DynamicObject;
use kube::discovery::ApiResource;
use kube::Client;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinSet;

use kube_burner_core::error::DispatchError;

use crate::limiter::TokenBucket;

const MAX_ATTEMPTS: u32 = 5;
const BASE_DELAY: Duration = Duration::from_millis(250);
const MAX_DELAY: Duration = Duration::from_secs(8);

/// One unit of dispatchable work: everything a worker needs to perform the
/// API call without consulting the job executor again.
pub enum DispatchOp {
    Create {
        resource: ApiResource,
        namespace: Option<String>,
        object: Box<DynamicObject>,
    },
    Patch {
        resource: ApiResource,
        namespace: Option<String>,
        name: String,
        patch: serde_json::Value,
    },
    Delete {
        resource: ApiResource,
        namespace: Option<String>,
        name: String,
    },
}

impl DispatchOp {
    fn kind(&self) -> &str {
        match self {
            DispatchOp::Create { resource, .. }
            | DispatchOp::Patch { resource, .. }
            | DispatchOp::Delete { resource, .. } => resource.kind.as_str(),
        }
    }

    fn name(&self) -> &str {
        match self {
            DispatchOp::Create { object, .. } => {
                object.metadata.name.as_deref().unwrap_or("<generated>")
            }
            DispatchOp::Patch { name, .. } | DispatchOp::Delete { name, .. } => name.as_str(),
        }
    }

    fn operation(&self) -> &'static str {
        match self {
            DispatchOp::Create { .. } => "create",
            DispatchOp::Patch { .. } => "patch",
            DispatchOp::Delete { .. } => "delete",
        }
    }
}

/// Result of one successful dispatch.
pub struct DispatchOutcome {
    pub object: Option<DynamicObject>,
    pub duration: Duration,
}

struct Submission {
    op: DispatchOp,
    reply: oneshot::Sender<Result<DispatchOutcome, DispatchError>>,
}

/// Paced, bounded-concurrency submitter of create/patch/delete calls
/// against the dynamic object client.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<Submission>,
    workers: Arc<Mutex<JoinSet<()>>>,
}

impl Dispatcher {
    pub fn new(client: Client, qps: f64, burst: u32, concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        let (tx, rx) = mpsc::channel(concurrency * 4);
        let rx = Arc::new(Mutex::new(rx));
        let limiter = Arc::new(TokenBucket::new(qps, burst));

        let mut workers = JoinSet::new();
        for _ in 0..concurrency {
            let rx = rx.clone();
            let limiter = limiter.clone();
            let client = client.clone();
            workers.spawn(worker_loop(rx, limiter, client));
        }

        Self {
            tx,
            workers: Arc::new(Mutex::new(workers)),
        }
    }

    pub async fn submit(&self, op: DispatchOp) -> Result<DispatchOutcome, DispatchError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(Submission { op, reply: reply_tx })
            .await
            .map_err(|_| DispatchError::Permanent("dispatcher queue closed".to_string()))?;
        reply_rx
            .await
            .map_err(|_| DispatchError::Permanent("dispatch worker dropped reply".to_string()))?
    }

    /// Drops the submission channel and waits for in-flight workers to
    /// finish draining (graceful shutdown / cancellation per §5).
    pub async fn shutdown(self) {
        drop(self.tx);
        let mut workers = self.workers.lock().await;
        while workers.join_next().await.is_some() {}
    }
}

async fn worker_loop(
    rx: Arc<Mutex<mpsc::Receiver<Submission>>>,
    limiter: Arc<TokenBucket>,
    client: Client,
) {
    loop {
        let submission = {
            let mut guard = rx.lock().await;
            guard.recv().await
        };
        let Some(submission) = submission else {
            break;
        };

        limiter.acquire().await;
        let result = execute_with_retry(&client, submission.op).await;
        let _ = submission.reply.send(result);
    }
}

async fn execute_with_retry(
    client: &Client,
    op: DispatchOp,
) -> Result<DispatchOutcome, DispatchError> {
    let kind = op.kind().to_string();
    let name = op.name().to_string();
    let operation = op.operation();
    let started_at = Instant::now();

    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = perform(client.clone(), &op).await;

        match result {
            Ok(object) => {
                return Ok(DispatchOutcome {
                    object,
                    duration: started_at.elapsed(),
                })
            }
            Err(err) if is_permanent(&err) => {
                return Err(DispatchError::Permanent(format!(
                    "{operation} {kind}/{name}: {err}"
                )));
            }
            Err(err) => {
                if attempt >= MAX_ATTEMPTS {
                    return Err(DispatchError::Failed {
                        operation: operation.to_string(),
                        kind,
                        name,
                        attempts: attempt,
                        message: err.to_string(),
                    });
                }
                let delay = (BASE_DELAY * 2u32.pow(attempt - 1)).min(MAX_DELAY);
                tracing::warn!(kind = %kind, name = %name, attempt, ?delay, "retrying dispatch");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn perform(client: Client, op: &DispatchOp) -> kube::Result<Option<DynamicObject>> {
    match op {
        DispatchOp::Create {
            resource,
            namespace,
            object,
        } => crate::client::create(client, resource, namespace.as_deref(), object).await.map(Some),
        DispatchOp::Patch {
            resource,
            namespace,
            name,
            patch,
        } => {
            crate::client::patch(client, resource, namespace.as_deref(), name, patch.clone())
                .await
                .map(Some)
        }
        DispatchOp::Delete {
            resource,
            namespace,
            name,
        } => {
            crate::client::delete(client, resource, namespace.as_deref(), name).await?;
            Ok(None)
        }
    }
}

/// Classifies a failed API call as permanent (never retried) vs. transient.
/// Conflicts, server timeouts, 5xx, and throttling are transient; 4xx other
/// than 409/429 and schema/deserialization failures are permanent.
fn is_permanent(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(resp) => !matches!(resp.code, 409 | 429 | 500..=599),
        kube::Error::SerdeError(_) => true,
        _ => false,
    }
}
