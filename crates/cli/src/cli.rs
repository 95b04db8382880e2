//! CLI surface (§6 "CLI subcommands"): six subcommands over a shared set of
//! endpoint-auth, time-window, and sink-selection flags. Parsing here is the
//! external collaborator the engine crate never touches (§1).

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "kube-burner", version, about = "Kubernetes cluster stress and measurement tool")]
pub struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the job list in a config file against the cluster.
    Init(InitArgs),
    /// Delete every object carrying a run UUID's fingerprint label.
    Destroy(DestroyArgs),
    /// Scrape configured Prometheus endpoints and index the result, without
    /// running any workload.
    Index(IndexArgs),
    /// Restore a local-indexer tarball into a directory sink.
    Import(ImportArgs),
    /// Evaluate an alert profile over a time range and exit non-zero on a
    /// fired critical alert.
    CheckAlerts(CheckAlertsArgs),
    /// Run the Measurement Subsystem stand-alone, without dispatching a
    /// workload.
    Measure(MeasureArgs),
}

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Path to the run configuration YAML (`global` + `jobs`).
    #[arg(short, long)]
    pub config: PathBuf,
    /// Overrides the run UUID; a fresh one is generated when absent.
    #[arg(long)]
    pub uuid: Option<Uuid>,
    /// Path to a kubeconfig file; falls back to the default loading chain
    /// (`KUBECONFIG`, in-cluster service account, `~/.kube/config`).
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,
    #[command(flatten)]
    pub sink: SinkArgs,
    #[command(flatten)]
    pub endpoint: EndpointArgs,
    /// Path to the metrics profile YAML, scraped after the run completes.
    #[arg(long)]
    pub metrics_profile: Option<PathBuf>,
    /// Path to the alert profile YAML, evaluated after the run completes.
    #[arg(long)]
    pub alert_profile: Option<PathBuf>,
    /// Path to a user-metadata YAML map merged into every emitted document.
    #[arg(long)]
    pub user_metadata: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct DestroyArgs {
    /// Run UUID whose labeled objects should be deleted.
    #[arg(long)]
    pub uuid: Uuid,
    /// Kinds to sweep for the fingerprint label, in `group/version/Kind` or
    /// bare-core `v1/Kind` form. Namespaces are always included.
    #[arg(long = "kind", value_name = "API_VERSION:KIND")]
    pub kinds: Vec<String>,
    /// Deletion rate cap, in requests per second (§4.2 "Rate-Limited
    /// Dispatcher"), so a large cohort doesn't overload the apiserver.
    #[arg(long, default_value_t = 20.0)]
    pub qps: f64,
    #[arg(long, default_value_t = 20)]
    pub burst: u32,
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct IndexArgs {
    #[command(flatten)]
    pub endpoint: EndpointArgs,
    /// Path to the metrics profile YAML.
    #[arg(long)]
    pub metrics_profile: PathBuf,
    #[command(flatten)]
    pub sink: SinkArgs,
    /// Run UUID stamped onto emitted documents.
    #[arg(long, default_value_t = Uuid::nil())]
    pub uuid: Uuid,
    #[command(flatten)]
    pub window: TimeWindowArgs,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    /// Path to the `.tar.gz` archive produced by the local indexer.
    #[arg(long)]
    pub archive: PathBuf,
    /// Directory to restore the archive's documents into.
    #[arg(long)]
    pub dest: PathBuf,
}

#[derive(Debug, Args)]
pub struct CheckAlertsArgs {
    #[command(flatten)]
    pub endpoint: EndpointArgs,
    /// Path to the alert profile YAML.
    #[arg(long)]
    pub alert_profile: PathBuf,
    #[command(flatten)]
    pub sink: SinkArgs,
    #[arg(long, default_value_t = Uuid::nil())]
    pub uuid: Uuid,
    #[command(flatten)]
    pub window: TimeWindowArgs,
}

#[derive(Debug, Args)]
pub struct MeasureArgs {
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,
    #[arg(long, default_value_t = Uuid::new_v4())]
    pub uuid: Uuid,
    /// How long to observe Pod lifecycle transitions before finalizing.
    #[arg(long, default_value = "5m", value_parser = parse_duration)]
    pub duration: std::time::Duration,
    #[command(flatten)]
    pub sink: SinkArgs,
}

#[derive(Debug, Args)]
pub struct EndpointArgs {
    /// Prometheus base URL, e.g. `https://prometheus.example.com`. Required
    /// whenever a metrics or alert profile is supplied.
    #[arg(long)]
    pub endpoint: Option<String>,
    /// Bearer token for the endpoint.
    #[arg(long, conflicts_with_all = ["username", "password"])]
    pub token: Option<String>,
    #[arg(long, requires = "password")]
    pub username: Option<String>,
    #[arg(long, requires = "username")]
    pub password: Option<String>,
    #[arg(long, default_value = "30s", value_parser = parse_duration)]
    pub step: std::time::Duration,
    #[arg(long, default_value_t = false)]
    pub skip_tls_verify: bool,
}

#[derive(Debug, Args)]
pub struct TimeWindowArgs {
    /// RFC3339 start instant; defaults to `end - 1h`.
    #[arg(long)]
    pub start: Option<chrono::DateTime<chrono::Utc>>,
    /// RFC3339 end instant; defaults to now.
    #[arg(long)]
    pub end: Option<chrono::DateTime<chrono::Utc>>,
}

impl TimeWindowArgs {
    pub fn resolve(&self) -> (chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>) {
        let end = self.end.unwrap_or_else(chrono::Utc::now);
        let start = self.start.unwrap_or_else(|| end - chrono::Duration::hours(1));
        (start, end)
    }
}

#[derive(Debug, Args)]
pub struct SinkArgs {
    /// Writes documents to a local directory instead of a remote index.
    #[arg(long, conflicts_with = "remote_index_endpoint")]
    pub local_index_dir: Option<PathBuf>,
    /// Remote search-index endpoint to bulk-submit documents to.
    #[arg(long)]
    pub remote_index_endpoint: Option<String>,
    #[arg(long, requires = "remote_index_endpoint")]
    pub remote_index_name: Option<String>,
    #[arg(long, requires = "remote_index_endpoint")]
    pub remote_index_token: Option<String>,
    /// Packages the local index directory as a `.tar.gz` after the run.
    #[arg(long, requires = "local_index_dir")]
    pub archive: Option<PathBuf>,
}

fn parse_duration(input: &str) -> Result<std::time::Duration, String> {
    let s = input.trim();
    let (num, unit) = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .map(|idx| s.split_at(idx))
        .ok_or_else(|| format!("duration {input:?} is missing a unit (s/m/h)"))?;
    let value: f64 = num
        .parse()
        .map_err(|_| format!("invalid duration number: {input:?}"))?;
    let secs = match unit {
        "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        other => return Err(format!("unknown duration unit {other:?} (use s/m/h)")),
    };
    Ok(std::time::Duration::from_secs_f64(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minute_durations() {
        assert_eq!(parse_duration("5m").unwrap(), std::time::Duration::from_secs(300));
    }

    #[test]
    fn parses_second_durations() {
        assert_eq!(parse_duration("30s").unwrap(), std::time::Duration::from_secs(30));
    }

    #[test]
    fn rejects_unitless_durations() {
        assert!(parse_duration("30").is_err());
    }
}
