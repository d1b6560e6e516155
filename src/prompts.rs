//! Prompt templates.
//!
//! Templates are plain strings keyed by id, stored together in one JSON
//! object (`userprompt.json` in the data directory by default). A template
//! receives the document text through the literal `{context}` placeholder.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use crate::error::{Error, Result};
use crate::store::write_atomic;

/// Placeholder replaced by the extracted document text.
pub const CONTEXT_PLACEHOLDER: &str = "{context}";

/// Summarization template written by [`JsonPromptStore::seed_defaults`].
pub const DEFAULT_SUMMARIZE_TEMPLATE: &str = "\
You are summarizing a document for a personal research library.

Write a concise Markdown summary with these sections:
## Overview
Two or three sentences on what the document is about.
## Key Points
A bulleted list of the main findings, arguments, or contributions.
## Takeaways
Why the document matters and who should read it.

Document text:
{context}
";

/// Looks up prompt templates by id.
#[async_trait]
pub trait PromptSource: Send + Sync {
    /// `Ok(None)` when no template has that id.
    async fn template(&self, id: &str) -> Result<Option<String>>;
}

/// Substitute `text` for the first `{context}` in `template`.
///
/// A template without the placeholder would send the model no document at
/// all, so it is rejected.
pub fn fill_template(template: &str, text: &str) -> Result<String> {
    if !template.contains(CONTEXT_PLACEHOLDER) {
        return Err(Error::InvalidInput(format!(
            "prompt template has no {} placeholder",
            CONTEXT_PLACEHOLDER
        )));
    }
    Ok(template.replacen(CONTEXT_PLACEHOLDER, text, 1))
}

/// Templates persisted as a single JSON object. Last write wins.
#[derive(Debug, Clone)]
pub struct JsonPromptStore {
    path: PathBuf,
    summarize_id: String,
}

impl JsonPromptStore {
    pub fn new(path: impl Into<PathBuf>, summarize_id: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            summarize_id: summarize_id.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn summarize_id(&self) -> &str {
        &self.summarize_id
    }

    async fn load(&self) -> Result<BTreeMap<String, String>> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, templates: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(templates)?;
        write_atomic(&self.path, &json).await
    }

    /// All template ids, sorted.
    pub async fn ids(&self) -> Result<Vec<String>> {
        Ok(self.load().await?.into_keys().collect())
    }

    pub async fn set(&self, id: &str, template: &str) -> Result<()> {
        if id.trim().is_empty() {
            return Err(Error::InvalidInput("template id must not be empty".to_string()));
        }
        if !template.contains(CONTEXT_PLACEHOLDER) {
            return Err(Error::InvalidInput(format!(
                "template {:?} has no {} placeholder",
                id, CONTEXT_PLACEHOLDER
            )));
        }
        let mut templates = self.load().await?;
        templates.insert(id.to_string(), template.to_string());
        self.save(&templates).await?;
        info!(id = %id, "Saved prompt template");
        Ok(())
    }

    /// Delete a template. The summarization template cannot be removed.
    pub async fn remove(&self, id: &str) -> Result<()> {
        if id == self.summarize_id {
            return Err(Error::InvalidInput(format!(
                "template {:?} is required for summarization and cannot be removed",
                id
            )));
        }
        let mut templates = self.load().await?;
        if templates.remove(id).is_none() {
            return Err(Error::TemplateNotFound(id.to_string()));
        }
        self.save(&templates).await?;
        info!(id = %id, "Removed prompt template");
        Ok(())
    }

    /// Write the default summarization template if the file does not exist.
    /// Returns whether anything was written.
    pub async fn seed_defaults(&self) -> Result<bool> {
        if tokio::fs::try_exists(&self.path).await? {
            return Ok(false);
        }
        let mut templates = BTreeMap::new();
        templates.insert(
            self.summarize_id.clone(),
            DEFAULT_SUMMARIZE_TEMPLATE.to_string(),
        );
        self.save(&templates).await?;
        info!(path = %self.path.display(), "Seeded default prompt templates");
        Ok(true)
    }
}

#[async_trait]
impl PromptSource for JsonPromptStore {
    async fn template(&self, id: &str) -> Result<Option<String>> {
        Ok(self.load().await?.remove(id))
    }
}
