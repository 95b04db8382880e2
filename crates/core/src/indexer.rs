//! Indexer Facade (§4.9): a uniform sink for documents produced by
//! measurement, scraping, and alerting.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

use crate::document::{stamp_document, IndexOptions};
use crate::error::IndexerError;

/// Capability set every indexer variant implements (design note: "Pluggable
/// indexer"). New variants slot in without touching producers.
#[async_trait]
pub trait Indexer: Send + Sync {
    async fn index(&self, documents: Vec<Map<String, Value>>, opts: IndexOptions) -> Result<(), IndexerError>;
    async fn flush(&self) -> Result<(), IndexerError>;
    async fn close(&self) -> Result<(), IndexerError>;
}

/// Writes each document batch as a JSON array file into a directory, one
/// file per `{metricName}-{jobName}.json`.
pub struct LocalIndexer {
    dir: PathBuf,
    uuid: Uuid,
}

impl LocalIndexer {
    pub fn new(dir: impl Into<PathBuf>, uuid: Uuid) -> Self {
        Self {
            dir: dir.into(),
            uuid,
        }
    }

    fn file_path(&self, opts: &IndexOptions) -> PathBuf {
        let suffix = opts
            .index_suffix
            .as_deref()
            .map(|s| format!("-{s}"))
            .unwrap_or_default();
        self.dir.join(format!(
            "{}-{}{}.json",
            opts.metric_name, opts.job_name, suffix
        ))
    }

    /// Packages the indexer directory as a single gzip-compressed tarball.
    pub async fn archive(&self, dest: impl Into<PathBuf>) -> Result<(), IndexerError> {
        let dir = self.dir.clone();
        let dest = dest.into();
        tokio::task::spawn_blocking(move || archive_dir(&dir, &dest))
            .await
            .map_err(|err| IndexerError {
                indexer: "local".to_string(),
                message: format!("archive task join error: {err}"),
            })?
            .map_err(|err| IndexerError {
                indexer: "local".to_string(),
                message: err.to_string(),
            })
    }
}

fn archive_dir(dir: &Path, dest: &Path) -> anyhow::Result<()> {
    let file = std::fs::File::create(dest)?;
    let enc = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut tar = tar::Builder::new(enc);
    tar.append_dir_all(".", dir)?;
    tar.finish()?;
    Ok(())
}

/// Restores a tarball produced by [`LocalIndexer::archive`] into a directory.
pub fn import_archive(archive_path: &Path, dest_dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(dest_dir)?;
    let file = std::fs::File::open(archive_path)?;
    let dec = flate2::read::GzDecoder::new(file);
    let mut tar = tar::Archive::new(dec);
    tar.unpack(dest_dir)?;
    Ok(())
}

#[async_trait]
impl Indexer for LocalIndexer {
    async fn index(&self, documents: Vec<Map<String, Value>>, opts: IndexOptions) -> Result<(), IndexerError> {
        if documents.is_empty() {
            return Ok(());
        }
        let now = chrono::Utc::now();
        let stamped: Vec<Value> = documents
            .into_iter()
            .map(|doc| Value::Object(stamp_document(doc, &self.uuid, &opts, now)))
            .collect();

        let path = self.file_path(&opts);
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || write_batch(&dir, &path, stamped))
            .await
            .map_err(|err| IndexerError {
                indexer: "local".to_string(),
                message: format!("write task join error: {err}"),
            })?
            .map_err(|err| IndexerError {
                indexer: "local".to_string(),
                message: err.to_string(),
            })
    }

    async fn flush(&self) -> Result<(), IndexerError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), IndexerError> {
        Ok(())
    }
}

fn write_batch(dir: &Path, path: &Path, mut new_docs: Vec<Value>) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;

    let mut existing: Vec<Value> = if path.exists() {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).unwrap_or_default()
    } else {
        Vec::new()
    };
    existing.append(&mut new_docs);

    let json = serde_json::to_string_pretty(&existing)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(tmp, path)?;
    Ok(())
}

/// Submits documents in bulk batches to a remote search-index endpoint,
/// sized by count and bytes, with exponential back-off retry.
pub struct RemoteIndexer {
    http: reqwest::Client,
    endpoint: String,
    index: String,
    token: Option<String>,
    batch_count: usize,
    batch_bytes: usize,
    uuid: Uuid,
}

impl RemoteIndexer {
    pub fn new(
        http: reqwest::Client,
        endpoint: String,
        index: String,
        token: Option<String>,
        batch_count: usize,
        batch_bytes: usize,
        uuid: Uuid,
    ) -> Self {
        Self {
            http,
            endpoint,
            index,
            token,
            batch_count: batch_count.max(1),
            batch_bytes: batch_bytes.max(1),
            uuid,
        }
    }

    fn batches(&self, documents: Vec<Value>) -> Vec<Vec<Value>> {
        let mut batches = Vec::new();
        let mut current = Vec::new();
        let mut current_bytes = 0usize;
        for doc in documents {
            let doc_bytes = serde_json::to_vec(&doc).map(|v| v.len()).unwrap_or(0);
            if !current.is_empty()
                && (current.len() >= self.batch_count
                    || current_bytes + doc_bytes > self.batch_bytes)
            {
                batches.push(std::mem::take(&mut current));
                current_bytes = 0;
            }
            current_bytes += doc_bytes;
            current.push(doc);
        }
        if !current.is_empty() {
            batches.push(current);
        }
        batches
    }

    async fn submit_batch(&self, batch: &[Value]) -> Result<(), IndexerError> {
        const MAX_ATTEMPTS: u32 = 5;
        const BASE_DELAY: Duration = Duration::from_millis(250);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let url = format!("{}/{}/_bulk", self.endpoint.trim_end_matches('/'), self.index);
            let mut req = self.http.post(&url).json(&batch);
            if let Some(token) = &self.token {
                req = req.bearer_auth(token);
            }

            match req.send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => {
                    let status = resp.status();
                    if attempt >= MAX_ATTEMPTS {
                        return Err(IndexerError {
                            indexer: "remote".to_string(),
                            message: format!("http {status} after {attempt} attempts"),
                        });
                    }
                }
                Err(err) => {
                    if attempt >= MAX_ATTEMPTS {
                        return Err(IndexerError {
                            indexer: "remote".to_string(),
                            message: format!("{err}"),
                        });
                    }
                }
            }

            let delay = BASE_DELAY * 2u32.pow(attempt - 1);
            let delay = delay.min(Duration::from_secs(10));
            warn!(attempt, ?delay, "retrying remote indexer batch");
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl Indexer for RemoteIndexer {
    async fn index(&self, documents: Vec<Map<String, Value>>, opts: IndexOptions) -> Result<(), IndexerError> {
        if documents.is_empty() {
            return Ok(());
        }
        let now = chrono::Utc::now();
        let stamped: Vec<Value> = documents
            .into_iter()
            .map(|doc| Value::Object(stamp_document(doc, &self.uuid, &opts, now)))
            .collect();

        for batch in self.batches(stamped) {
            self.submit_batch(&batch).await?;
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), IndexerError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), IndexerError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_indexer_writes_json_array() {
        let dir = tempfile::tempdir().unwrap();
        let indexer = LocalIndexer::new(dir.path(), Uuid::nil());
        let mut doc = Map::new();
        doc.insert("value".to_string(), Value::from(1));
        indexer
            .index(
                vec![doc],
                IndexOptions {
                    metric_name: "podLatency".to_string(),
                    job_name: "create-pods".to_string(),
                    index_suffix: None,
                },
            )
            .await
            .unwrap();

        let path = dir.path().join("podLatency-create-pods.json");
        let raw = std::fs::read_to_string(path).unwrap();
        let docs: Vec<Value> = serde_json::from_str(&raw).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["jobName"], "create-pods");
    }

    #[tokio::test]
    async fn local_indexer_appends_across_batches() {
        let dir = tempfile::tempdir().unwrap();
        let indexer = LocalIndexer::new(dir.path(), Uuid::nil());
        let opts = IndexOptions {
            metric_name: "podLatency".to_string(),
            job_name: "create-pods".to_string(),
            index_suffix: None,
        };
        for _ in 0..3 {
            indexer.index(vec![Map::new()], opts.clone()).await.unwrap();
        }
        let path = dir.path().join("podLatency-create-pods.json");
        let raw = std::fs::read_to_string(path).unwrap();
        let docs: Vec<Value> = serde_json::from_str(&raw).unwrap();
        assert_eq!(docs.len(), 3);
    }

    #[tokio::test]
    async fn archive_then_import_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let indexer = LocalIndexer::new(dir.path(), Uuid::nil());
        let mut doc = Map::new();
        doc.insert("value".to_string(), Value::from(42));
        indexer
            .index(
                vec![doc],
                IndexOptions {
                    metric_name: "foo".to_string(),
                    job_name: "bar".to_string(),
                    index_suffix: None,
                },
            )
            .await
            .unwrap();

        let archive_path = dir.path().join("../archive.tar.gz");
        indexer.archive(&archive_path).await.unwrap();

        let restore_dir = tempfile::tempdir().unwrap();
        import_archive(&archive_path, restore_dir.path()).unwrap();
        let raw = std::fs::read_to_string(restore_dir.path().join("foo-bar.json")).unwrap();
        let docs: Vec<Value> = serde_json::from_str(&raw).unwrap();
        assert_eq!(docs[0]["value"], 42);
    }

    #[test]
    fn batches_respect_count_and_bytes() {
        let indexer = RemoteIndexer::new(
            reqwest::Client::new(),
            "http://localhost".to_string(),
            "idx".to_string(),
            None,
            2,
            usize::MAX,
            Uuid::nil(),
        );
        let docs: Vec<Value> = (0..5).map(Value::from).collect();
        let batches = indexer.batches(docs);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[2].len(), 1);
    }
}
