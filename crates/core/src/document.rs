//! Indexer Document: the opaque field->value map every producer emits
//! (§3 "Indexer Document").

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Options controlling how a batch of documents is routed/stamped by the
/// Indexer Facade (§4.9).
#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    pub metric_name: String,
    pub job_name: String,
    pub index_suffix: Option<String>,
}

/// Stamps the auto fields (`timestamp`, `uuid`, `jobName`, `metricName`)
/// onto a raw document body, returning the final document ready for a sink.
/// `timestamp` is only filled in when the producer hasn't already set one —
/// metrics/alert documents carry their own sample timestamp and must not
/// have it clobbered with the indexing wall-clock time (§4.7).
pub fn stamp_document(
    mut body: Map<String, Value>,
    uuid: &Uuid,
    opts: &IndexOptions,
    timestamp: DateTime<Utc>,
) -> Map<String, Value> {
    body.entry("timestamp")
        .or_insert_with(|| Value::String(timestamp.to_rfc3339()));
    body.insert("uuid".to_string(), Value::String(uuid.to_string()));
    body.insert(
        "jobName".to_string(),
        Value::String(opts.job_name.clone()),
    );
    if !opts.metric_name.is_empty() {
        body.insert(
            "metricName".to_string(),
            Value::String(opts.metric_name.clone()),
        );
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_adds_required_fields() {
        let body = Map::new();
        let uuid = Uuid::nil();
        let opts = IndexOptions {
            metric_name: "podLatency".to_string(),
            job_name: "create-pods".to_string(),
            index_suffix: None,
        };
        let stamped = stamp_document(body, &uuid, &opts, Utc::now());
        assert_eq!(stamped.get("jobName").unwrap(), "create-pods");
        assert_eq!(stamped.get("metricName").unwrap(), "podLatency");
        assert_eq!(stamped.get("uuid").unwrap(), &uuid.to_string());
        assert!(stamped.contains_key("timestamp"));
    }

    #[test]
    fn stamp_does_not_clobber_an_existing_timestamp() {
        let mut body = Map::new();
        body.insert("timestamp".to_string(), Value::from(1_700_000_000));
        let opts = IndexOptions {
            metric_name: "foo".to_string(),
            job_name: "kube-burner-indexing".to_string(),
            index_suffix: None,
        };
        let stamped = stamp_document(body, &Uuid::nil(), &opts, Utc::now());
        assert_eq!(stamped.get("timestamp").unwrap(), &Value::from(1_700_000_000));
    }
}
