//! Alert Evaluator (§4.8): range-queries each alert profile entry's boolean
//! expression over the run window; any non-empty result fires an alert.
//! `critical` severity is reported to the Run Controller as a fatal exit
//! condition; other severities are reported but non-fatal.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use kube_burner_core::config::Severity;
use kube_burner_core::document::IndexOptions;
use kube_burner_core::error::IndexerError;
use kube_burner_core::indexer::Indexer;
use prometheus_http_query::Client as PromClient;
use serde_json::{Map, Value};

/// One alert-profile entry, resolved (§6 "Alert profile").
#[derive(Debug, Clone)]
pub struct AlertRule {
    pub expr: String,
    pub severity: Severity,
    pub description: String,
}

/// One fired alert record.
#[derive(Debug, Clone)]
pub struct FiredAlert {
    pub expr: String,
    pub severity: Severity,
    pub description: String,
    pub series_count: usize,
}

/// Evaluates every rule in `profile` over `[start, end]` at `step` seconds,
/// indexes a document for each fired alert, and returns the fired set.
/// Query failures are logged and treated as "did not fire" for that rule
/// (the expression's own health is orthogonal to whether it fires).
pub async fn evaluate(
    client: &PromClient,
    profile: &[AlertRule],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    step_secs: f64,
    uuid: &uuid::Uuid,
    indexer: &Arc<dyn Indexer>,
) -> Result<Vec<FiredAlert>, IndexerError> {
    let mut fired = Vec::new();

    for rule in profile {
        let series_count = match client
            .query_range(&rule.expr, start.timestamp(), end.timestamp(), step_secs.max(1.0))
            .get()
            .await
        {
            Ok(result) => result.as_range().map(|v| v.len()).unwrap_or(0),
            Err(err) => {
                tracing::warn!(expr = %rule.expr, %err, "alert query failed, treating as not fired");
                0
            }
        };

        if series_count == 0 {
            continue;
        }

        let alert = FiredAlert {
            expr: rule.expr.clone(),
            severity: rule.severity,
            description: rule.description.clone(),
            series_count,
        };

        let mut doc: Map<String, Value> = Map::new();
        doc.insert("expr".to_string(), Value::String(alert.expr.clone()));
        doc.insert(
            "severity".to_string(),
            Value::String(severity_str(alert.severity).to_string()),
        );
        doc.insert("description".to_string(), Value::String(alert.description.clone()));
        doc.insert("seriesCount".to_string(), Value::from(alert.series_count));

        indexer
            .index(
                vec![doc],
                IndexOptions {
                    metric_name: "alert".to_string(),
                    job_name: "kube-burner-alerting".to_string(),
                    index_suffix: None,
                },
            )
            .await?;

        tracing::info!(uuid = %uuid, expr = %alert.expr, severity = severity_str(alert.severity), "alert fired");
        fired.push(alert);
    }

    Ok(fired)
}

fn severity_str(severity: Severity) -> &'static str {
    match severity {
        Severity::Info => "info",
        Severity::Warning => "warning",
        Severity::Critical => "critical",
    }
}

/// True if any fired alert is `critical` (§4.8, drives non-zero exit).
pub fn has_critical(fired: &[FiredAlert]) -> bool {
    fired.iter().any(|a| a.severity == Severity::Critical)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(severity: Severity) -> FiredAlert {
        FiredAlert {
            expr: "up".to_string(),
            severity,
            description: "d".to_string(),
            series_count: 1,
        }
    }

    #[test]
    fn critical_detection() {
        assert!(has_critical(&[alert(Severity::Warning), alert(Severity::Critical)]));
        assert!(!has_critical(&[alert(Severity::Warning), alert(Severity::Info)]));
    }
}
