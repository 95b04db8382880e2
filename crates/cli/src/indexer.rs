//! Builds the configured [`Indexer`] sink. Indexer construction is a CLI
//! responsibility precisely because it needs an HTTP client and a run UUID,
//! both assembled here rather than inside the engine (§1).

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use kube_burner_core::document::IndexOptions;
use kube_burner_core::error::IndexerError;
use kube_burner_core::indexer::{Indexer, LocalIndexer, RemoteIndexer};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::cli::SinkArgs;
use crate::config::SinkChoice;

/// Wraps another [`Indexer`], merging a fixed metadata map into every
/// document before it's indexed. Built by the CLI from `global.userMetadata`
/// plus an optional `--user-metadata` file; the engine never sees this
/// concern (§6 "user metadata").
pub struct UserMetadataIndexer {
    inner: Arc<dyn Indexer>,
    metadata: BTreeMap<String, Value>,
}

impl UserMetadataIndexer {
    pub fn wrap(inner: Arc<dyn Indexer>, metadata: BTreeMap<String, Value>) -> Arc<dyn Indexer> {
        if metadata.is_empty() {
            return inner;
        }
        Arc::new(Self { inner, metadata })
    }
}

#[async_trait]
impl Indexer for UserMetadataIndexer {
    async fn index(&self, documents: Vec<Map<String, Value>>, opts: IndexOptions) -> Result<(), IndexerError> {
        let stamped = documents
            .into_iter()
            .map(|mut doc| {
                for (k, v) in &self.metadata {
                    doc.entry(k.clone()).or_insert_with(|| v.clone());
                }
                doc
            })
            .collect();
        self.inner.index(stamped, opts).await
    }

    async fn flush(&self) -> Result<(), IndexerError> {
        self.inner.flush().await
    }

    async fn close(&self) -> Result<(), IndexerError> {
        self.inner.close().await
    }
}

pub fn from_sink_args(args: &SinkArgs, uuid: Uuid) -> Result<Arc<dyn Indexer>> {
    if let Some(dir) = &args.local_index_dir {
        return Ok(Arc::new(LocalIndexer::new(dir.clone(), uuid)));
    }
    if let Some(endpoint) = &args.remote_index_endpoint {
        let index = args
            .remote_index_name
            .clone()
            .unwrap_or_else(|| "kube-burner".to_string());
        return Ok(Arc::new(RemoteIndexer::new(
            reqwest::Client::new(),
            endpoint.clone(),
            index,
            args.remote_index_token.clone(),
            500,
            5 * 1024 * 1024,
            uuid,
        )));
    }
    bail!("no sink configured: pass --local-index-dir or --remote-index-endpoint")
}

pub fn from_sink_choice(choice: SinkChoice, uuid: Uuid) -> Arc<dyn Indexer> {
    match choice {
        SinkChoice::Local { dir, .. } => Arc::new(LocalIndexer::new(dir, uuid)),
        SinkChoice::Remote {
            endpoint,
            index,
            token,
        } => Arc::new(RemoteIndexer::new(
            reqwest::Client::new(),
            endpoint,
            index,
            token,
            500,
            5 * 1024 * 1024,
            uuid,
        )),
    }
}
