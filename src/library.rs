//! The outward interface: topic, document, binary, summary, and chat
//! operations addressed by hash.
//!
//! [`Library`] wires the store, resolver, ingest pipeline, and generation
//! session together from a [`Config`]. Callers never need to know which
//! topic holds a document; every per-document operation resolves the hash
//! first.

use std::sync::Arc;

use tracing::info;

use crate::backend::{create_backend, GenerativeBackend};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::extract::{PdfTextExtractor, TextExtractor};
use crate::fetch::{HttpFetcher, SourceFetcher};
use crate::generation::{GenerationSession, GenerationStream};
use crate::ingest::IngestPipeline;
use crate::models::{
    ChatRequest, Document, DocumentPatch, DocumentView, IngestOutcome, PdfPayload, SourceHint,
    TopicSummary, PDF_MEDIA_TYPE,
};
use crate::prompts::{JsonPromptStore, PromptSource};
use crate::resolver::DocumentResolver;
use crate::store::{ArtifactStore, DeletionReport};

/// External capabilities the library depends on.
pub struct Collaborators {
    pub extractor: Arc<dyn TextExtractor>,
    pub backend: Arc<dyn GenerativeBackend>,
    pub fetcher: Arc<dyn SourceFetcher>,
    pub prompts: Arc<dyn PromptSource>,
}

pub struct Library {
    store: ArtifactStore,
    resolver: DocumentResolver,
    ingest: IngestPipeline,
    generation: GenerationSession,
    prompt_store: JsonPromptStore,
}

impl Library {
    /// Build a library with the real extractor, HTTP fetcher, configured
    /// backend, and the JSON prompt file.
    pub fn open(config: &Config) -> anyhow::Result<Self> {
        let prompt_store =
            JsonPromptStore::new(config.prompts_path(), config.prompts.summarize_id.clone());
        let collaborators = Collaborators {
            extractor: Arc::new(PdfTextExtractor),
            backend: create_backend(&config.generation)?,
            fetcher: Arc::new(HttpFetcher::new(&config.fetch)?),
            prompts: Arc::new(prompt_store),
        };
        Ok(Self::with_collaborators(config, collaborators))
    }

    pub fn with_collaborators(config: &Config, collaborators: Collaborators) -> Self {
        let store = ArtifactStore::new(&config.storage.data_dir);
        let resolver = DocumentResolver::new(store.clone());
        let ingest = IngestPipeline::new(store.clone(), resolver.clone(), collaborators.fetcher);
        let generation = GenerationSession::new(
            store.clone(),
            resolver.clone(),
            collaborators.extractor,
            collaborators.prompts,
            collaborators.backend,
        )
        .with_summarize_id(config.prompts.summarize_id.clone())
        .with_channel_capacity(config.generation.channel_capacity);
        let prompt_store =
            JsonPromptStore::new(config.prompts_path(), config.prompts.summarize_id.clone());

        Self {
            store,
            resolver,
            ingest,
            generation,
            prompt_store,
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn prompts(&self) -> &JsonPromptStore {
        &self.prompt_store
    }

    /// Create the data directory and seed the default prompt templates.
    /// Returns whether templates were written.
    pub async fn init(&self) -> Result<bool> {
        self.store.ensure_root().await?;
        self.prompt_store.seed_defaults().await
    }

    // ============ Topics ============

    pub async fn list_topics(&self) -> Result<Vec<TopicSummary>> {
        self.store.list_topics().await
    }

    /// Idempotent; returns `false` when the topic already existed.
    pub async fn create_topic(&self, name: &str) -> Result<bool> {
        self.store.create_topic(name).await
    }

    pub async fn create_topic_strict(&self, name: &str) -> Result<()> {
        self.store.create_topic_strict(name).await
    }

    pub async fn delete_topic(&self, name: &str) -> Result<()> {
        self.store.delete_topic(name).await
    }

    pub async fn rename_topic(&self, old: &str, new: &str) -> Result<()> {
        self.store.rename_topic(old, new).await
    }

    // ============ Documents ============

    pub async fn list_documents(&self, topic: &str) -> Result<Vec<DocumentView>> {
        let documents = self.store.list_documents(topic).await?;
        let mut views = Vec::with_capacity(documents.len());
        for document in documents {
            let has_summary = self.store.has_derived_text(topic, &document.hash).await?;
            views.push(DocumentView {
                topic: topic.to_string(),
                document,
                has_summary,
            });
        }
        Ok(views)
    }

    pub async fn get_document(&self, hash: &str) -> Result<DocumentView> {
        let location = self.resolver.locate(hash).await?;
        let document = self.store.read_manifest(&location.topic, hash).await?;
        let has_summary = self.store.has_derived_text(&location.topic, hash).await?;
        Ok(DocumentView {
            topic: location.topic,
            document,
            has_summary,
        })
    }

    pub async fn upload(&self, topic: &str, filename: &str, bytes: &[u8]) -> Result<IngestOutcome> {
        self.ingest
            .ingest(
                topic,
                bytes,
                SourceHint::Upload {
                    filename: filename.to_string(),
                },
            )
            .await
    }

    pub async fn add_from_url(&self, topic: &str, url: &str) -> Result<IngestOutcome> {
        self.ingest.ingest_url(topic, url).await
    }

    /// Read, merge, and write back a document's metadata. The hash never changes.
    pub async fn update_document(&self, hash: &str, patch: &DocumentPatch) -> Result<Document> {
        if patch.is_empty() {
            return Err(Error::InvalidInput("nothing to update".to_string()));
        }
        if matches!(patch.title, Some(ref t) if t.trim().is_empty()) {
            return Err(Error::InvalidInput("title must not be empty".to_string()));
        }

        let location = self.resolver.locate(hash).await?;
        let mut document = self.store.read_manifest(&location.topic, hash).await?;
        patch.apply(&mut document);
        self.store
            .write_manifest(&location.topic, hash, &document)
            .await?;
        info!(hash = %hash, topic = %location.topic, "Updated document metadata");
        Ok(document)
    }

    pub async fn delete_document(&self, hash: &str) -> Result<DeletionReport> {
        let location = self.resolver.locate(hash).await?;
        self.store.delete_document(&location.topic, hash).await
    }

    /// Move a document to an existing topic. Returns the topic it came from.
    pub async fn move_document(&self, hash: &str, to_topic: &str) -> Result<String> {
        let location = self.resolver.locate(hash).await?;
        self.store
            .move_document(hash, &location.topic, to_topic)
            .await?;
        Ok(location.topic)
    }

    pub async fn read_pdf(&self, hash: &str) -> Result<PdfPayload> {
        let location = self.resolver.locate(hash).await?;
        let bytes = self.store.read_binary(&location.topic, hash).await?;
        Ok(PdfPayload {
            bytes,
            media_type: PDF_MEDIA_TYPE,
        })
    }

    // ============ Summaries & chat ============

    pub async fn get_summary(&self, hash: &str) -> Result<String> {
        let location = self.resolver.locate(hash).await?;
        self.store.read_derived_text(&location.topic, hash).await
    }

    /// Stream a new summary; `template_id` defaults to the configured one.
    pub async fn summarize(
        &self,
        hash: &str,
        template_id: Option<&str>,
    ) -> Result<GenerationStream> {
        self.generation.summarize(hash, template_id).await
    }

    pub async fn delete_summary(&self, hash: &str) -> Result<()> {
        self.generation.delete_summary(hash).await
    }

    pub async fn chat(&self, hash: &str, request: ChatRequest) -> Result<GenerationStream> {
        self.generation.chat(hash, request).await
    }
}
