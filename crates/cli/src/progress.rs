//! Renders the run event stream to the terminal. Plain line-oriented
//! output, matching this codebase's preference for `println!`/`tracing`
//! over a TUI progress widget.

use kube_burner_engine::{RunEvent, RunHandle};
use std::sync::Arc;

/// Spawns a background task that prints each [`RunEvent`] as it arrives.
/// The task exits on its own once the run finishes and the handle's sender
/// side is dropped.
pub fn spawn(run: &Arc<RunHandle>) -> tokio::task::JoinHandle<()> {
    let mut events = run.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => render(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "progress renderer lagged behind event stream");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn render(event: &RunEvent) {
    match event {
        RunEvent::RunStarted { uuid } => println!("run {uuid} started"),
        RunEvent::JobStateChanged { job, state } => println!("job {job}: {state:?}"),
        RunEvent::ObjectDispatched { outcome } => {
            if let Some(err) = &outcome.error {
                println!(
                    "  {} {}/{} iteration {} replica {}: {err}",
                    outcome.job_name, outcome.kind, outcome.name, outcome.iteration, outcome.replica
                );
            }
        }
        RunEvent::MeasurementSummary { job, phase, count } => {
            println!("measurement {job}/{phase}: {count} samples")
        }
        RunEvent::Warning { message } => println!("warning: {message}"),
        RunEvent::Error { message } => println!("error: {message}"),
        RunEvent::RunFinished => println!("run finished"),
    }
}
