//! Run-wide event bus and status snapshot, mirroring the broadcast +
//! watch-channel handle pattern used for progress reporting elsewhere in
//! this codebase's client/engine boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch, Notify};
use uuid::Uuid;

/// Lifecycle state of a single job (§4.4 "State").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Running,
    Waiting,
    Completed,
    Failed,
    Cancelled,
}

/// Result of dispatching one rendered instance (one create/delete/patch call).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectOutcome {
    pub job_name: String,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
    pub iteration: u64,
    pub replica: u32,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Run-wide event stream payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RunEvent {
    RunStarted { uuid: Uuid },
    JobStateChanged { job: String, state: JobState },
    ObjectDispatched { outcome: ObjectOutcome },
    MeasurementSummary { job: String, phase: String, count: usize },
    Warning { message: String },
    Error { message: String },
    RunFinished,
}

/// Current run state snapshot, polled by the CLI for progress rendering.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub cancelled: bool,
    pub jobs: Vec<(String, JobState)>,
    pub recent_objects: Vec<ObjectOutcome>,
}

pub(crate) const RECENT_OBJECTS_MAX: usize = 200;

/// Cancellation token + event bus shared by every component for the
/// duration of one run, matching the teacher's `EngineInner` pattern:
/// an `AtomicBool` flag plus a `Notify` to wake waiters immediately.
pub struct RunHandle {
    event_tx: broadcast::Sender<RunEvent>,
    snapshot_rx: watch::Receiver<RunSnapshot>,
    snapshot_tx: watch::Sender<RunSnapshot>,
    cancelled: AtomicBool,
    timed_out: AtomicBool,
    notify: Notify,
}

impl RunHandle {
    pub fn new() -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(1024);
        let (snapshot_tx, snapshot_rx) = watch::channel(RunSnapshot::default());
        Arc::new(Self {
            event_tx,
            snapshot_rx,
            snapshot_tx,
            cancelled: AtomicBool::new(false),
            timed_out: AtomicBool::new(false),
            notify: Notify::new(),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.event_tx.subscribe()
    }

    pub fn snapshot(&self) -> RunSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn emit(&self, event: RunEvent) {
        let _ = self.event_tx.send(event);
    }

    pub fn request_cancel(&self) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Cancels the run and marks the cancellation as timeout-triggered, so
    /// the Run Controller can distinguish it from a plain ctrl-C cancel and
    /// transition to `Failed (Timeout)` (§4.5).
    pub fn request_timeout(&self) {
        self.timed_out.store(true, Ordering::SeqCst);
        self.request_cancel();
    }

    pub fn is_timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }

    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            self.notify.notified().await;
        }
    }

    pub fn set_job_state(&self, job: &str, state: JobState) {
        self.snapshot_tx.send_modify(|snap| {
            snap.cancelled = self.is_cancelled();
            if let Some(entry) = snap.jobs.iter_mut().find(|(name, _)| name == job) {
                entry.1 = state;
            } else {
                snap.jobs.push((job.to_string(), state));
            }
        });
        self.emit(RunEvent::JobStateChanged {
            job: job.to_string(),
            state,
        });
    }

    pub fn record_object(&self, outcome: ObjectOutcome) {
        self.snapshot_tx.send_modify(|snap| {
            snap.recent_objects.push(outcome.clone());
            while snap.recent_objects.len() > RECENT_OBJECTS_MAX {
                snap.recent_objects.remove(0);
            }
        });
        self.emit(RunEvent::ObjectDispatched { outcome });
    }
}

