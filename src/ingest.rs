//! Ingestion pipeline.
//!
//! Turns raw PDF bytes (uploaded, or fetched from a URL) into a stored
//! document. Identity is the SHA-256 of the bytes, and deduplication is
//! global: if any topic already holds the same bytes, that document is
//! returned and nothing is written.
//!
//! ```text
//! bytes ──► SHA-256 ──► resolver.find ──┬─► found:   existing manifest (duplicate)
//!                                       └─► missing: write binary ─► write manifest
//! ```

use std::path::Path;
use std::sync::Arc;

use chrono::{Datelike, Utc};
use serde_json::Map;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{info, warn};
use url::Url;

use crate::error::{Error, Result};
use crate::fetch::SourceFetcher;
use crate::models::{Document, IngestOutcome, SourceHint};
use crate::resolver::DocumentResolver;
use crate::store::{validate_topic_name, ArtifactStore};

const UNTITLED: &str = "Untitled";

/// Hex-encoded SHA-256 of `bytes`; the permanent identity of a document.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Title for a freshly ingested document: the file name or last URL path
/// segment with any `.pdf` suffix removed, or `"Untitled"`.
pub fn derive_title(hint: &SourceHint) -> String {
    let base = match hint {
        SourceHint::Upload { filename } => Path::new(filename)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        SourceHint::Url { url } => Url::parse(url)
            .ok()
            .and_then(|u| {
                u.path_segments()
                    .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
                    .map(str::to_string)
            })
            .unwrap_or_default(),
    };

    let trimmed = base.trim();
    let split = trimmed
        .len()
        .checked_sub(4)
        .and_then(|i| trimmed.get(i..).map(|ext| (i, ext)));
    let stem = match split {
        Some((i, ext)) if ext.eq_ignore_ascii_case(".pdf") => &trimmed[..i],
        _ => trimmed,
    };

    let stem = stem.trim();
    if stem.is_empty() {
        UNTITLED.to_string()
    } else {
        stem.to_string()
    }
}

/// Ingests bytes into the store with global deduplication.
///
/// Ingests are serialized within a process so two concurrent calls with the
/// same bytes cannot both miss the lookup and write two copies.
pub struct IngestPipeline {
    store: ArtifactStore,
    resolver: DocumentResolver,
    fetcher: Arc<dyn SourceFetcher>,
    lock: Mutex<()>,
}

impl IngestPipeline {
    pub fn new(
        store: ArtifactStore,
        resolver: DocumentResolver,
        fetcher: Arc<dyn SourceFetcher>,
    ) -> Self {
        Self {
            store,
            resolver,
            fetcher,
            lock: Mutex::new(()),
        }
    }

    /// Store `bytes` under `topic` unless the same bytes already exist anywhere.
    ///
    /// On a duplicate the outcome carries the existing document and the topic
    /// that actually holds it, which may differ from `topic`.
    pub async fn ingest(
        &self,
        topic: &str,
        bytes: &[u8],
        hint: SourceHint,
    ) -> Result<IngestOutcome> {
        validate_topic_name(topic)?;
        if bytes.is_empty() {
            return Err(Error::InvalidInput("no file content".to_string()));
        }
        if !self.store.topic_exists(topic).await? {
            return Err(Error::TopicNotFound(topic.to_string()));
        }

        let hash = content_hash(bytes);
        let _guard = self.lock.lock().await;

        if let Some(location) = self.resolver.find(&hash).await? {
            let document = self.store.read_manifest(&location.topic, &hash).await?;
            info!(hash = %hash, topic = %location.topic, requested = %topic, "Duplicate upload");
            return Ok(IngestOutcome {
                topic: location.topic,
                document,
                is_duplicate: true,
            });
        }

        let now = Utc::now();
        let source_url = match &hint {
            SourceHint::Url { url } => Some(url.clone()),
            SourceHint::Upload { .. } => None,
        };
        let document = Document {
            hash: hash.clone(),
            title: derive_title(&hint),
            authors: Vec::new(),
            year: Some(now.year()),
            tags: Vec::new(),
            source_url,
            upload_date: now,
            extra: Map::new(),
        };

        self.store.write_binary(topic, &hash, bytes).await?;
        if let Err(e) = self.store.write_manifest(topic, &hash, &document).await {
            if let Err(cleanup) = self.store.remove_binary(topic, &hash).await {
                warn!(topic = %topic, hash = %hash, "Failed to remove binary after manifest write failed: {}", cleanup);
            }
            return Err(e);
        }

        info!(hash = %hash, topic = %topic, title = %document.title, bytes = bytes.len(), "Ingested document");
        Ok(IngestOutcome {
            topic: topic.to_string(),
            document,
            is_duplicate: false,
        })
    }

    /// Fetch a PDF from `url` and ingest it. The topic is checked before any
    /// network traffic.
    pub async fn ingest_url(&self, topic: &str, url: &str) -> Result<IngestOutcome> {
        let url = url.trim();
        if url.is_empty() {
            return Err(Error::InvalidInput("URL is required".to_string()));
        }
        let parsed =
            Url::parse(url).map_err(|e| Error::InvalidInput(format!("invalid URL {:?}: {}", url, e)))?;

        validate_topic_name(topic)?;
        if !self.store.topic_exists(topic).await? {
            return Err(Error::TopicNotFound(topic.to_string()));
        }

        let bytes = self.fetcher.fetch(&parsed).await?;
        self.ingest(
            topic,
            &bytes,
            SourceHint::Url {
                url: url.to_string(),
            },
        )
        .await
    }
}
