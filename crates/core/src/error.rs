//! Error taxonomy (§7). Each variant is fatal to a specific scope; the Run
//! Controller decides continuation vs. abort based on which one surfaced.

use thiserror::Error;

/// Malformed config, unresolved references, mutually exclusive flags.
/// Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Template rendering failed for one instance.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template syntax error in {template}: {source}")]
    Syntax {
        template: String,
        #[source]
        source: tera::Error,
    },
    #[error("missing template variable `{0}`")]
    MissingVariable(String),
    #[error("unknown helper function `{0}`")]
    UnknownHelper(String),
}

/// An API operation failed after retries.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("operation {operation} on {kind}/{name} failed after {attempts} attempts: {message}")]
    Failed {
        operation: String,
        kind: String,
        name: String,
        attempts: u32,
        message: String,
    },
    #[error("operation rejected (permanent): {0}")]
    Permanent(String),
}

/// Readiness was not reached within the object's `maxWaitTimeout`.
#[derive(Debug, Error)]
#[error("timed out waiting for {kind}/{name} to become ready after {elapsed_secs}s")]
pub struct WaitTimeout {
    pub kind: String,
    pub name: String,
    pub elapsed_secs: u64,
}

/// Final object counts did not match N*R per template.
#[derive(Debug, Clone, Error)]
#[error("verification failed for job {job}: expected {expected} objects, found {actual}")]
pub struct VerificationError {
    pub job: String,
    pub expected: usize,
    pub actual: usize,
}

/// The measurement watch connection was lost and could not be recovered.
#[derive(Debug, Error)]
#[error("measurement subsystem error: {0}")]
pub struct MeasurementError(pub String);

/// A sink was unavailable or rejected a batch.
#[derive(Debug, Error)]
#[error("indexer error ({indexer}): {message}")]
pub struct IndexerError {
    pub indexer: String,
    pub message: String,
}

/// At least one critical alert fired in the evaluated range.
#[derive(Debug, Error)]
#[error("{count} critical alert(s) fired")]
pub struct AlertCritical {
    pub count: usize,
}

/// Top-level error, used by the Run Controller to decide exit codes.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Wait(#[from] WaitTimeout),
    #[error(transparent)]
    Verification(#[from] VerificationError),
    #[error(transparent)]
    Measurement(#[from] MeasurementError),
    #[error(transparent)]
    Indexer(#[from] IndexerError),
    #[error(transparent)]
    AlertCritical(#[from] AlertCritical),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Exit code classes per §6 ("the specific non-zero value may encode the
/// failure class").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Generic = 1,
    Config = 2,
    Api = 3,
    Measurement = 4,
    Timeout = 5,
    AlertCritical = 6,
}

impl Error {
    /// Maps this error onto the exit-code classes the Run Controller
    /// reports to the process.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Error::Config(_) => ExitCode::Config,
            Error::Dispatch(_) | Error::Verification(_) => ExitCode::Api,
            Error::Measurement(_) => ExitCode::Measurement,
            Error::Timeout(_) | Error::Wait(_) => ExitCode::Timeout,
            Error::AlertCritical(_) => ExitCode::AlertCritical,
            Error::Template(_) | Error::Indexer(_) | Error::Cancelled | Error::Other(_) => {
                ExitCode::Generic
            }
        }
    }
}
