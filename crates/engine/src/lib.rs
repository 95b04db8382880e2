//! Workload execution engine: Template Renderer, Rate-Limited Dispatcher,
//! Object Waiter, Job Executor, Run Controller, Measurement Subsystem,
//! Metrics Scraper, and Alert Evaluator (§2). The CLI crate hands this
//! crate an already-constructed `kube::Client` and already-parsed config;
//! this crate never touches the filesystem or a kube config file itself.

#![forbid(unsafe_code)]
#![deny(unreachable_pub)]

pub mod alerts;
pub mod client;
pub mod dispatcher;
pub mod events;
pub mod job;
pub mod limiter;
pub mod measurement;
pub mod metrics;
pub mod render;
pub mod run;
pub mod waiter;

pub use events::{JobState, RunEvent, RunHandle, RunSnapshot};
pub use job::{JobReport, JobSpec, ObjectSpec};
pub use measurement::{MeasurementHandle, PhaseLatencies};
pub use run::{Run, RunOutcome};
