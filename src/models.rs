//! Core data models shared by the store, ingest pipeline, and CLI.
//!
//! [`Document`] is the manifest persisted next to each PDF. Its `hash` is the
//! permanent identity of the document; every other field is freely editable
//! metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Media type declared for every stored binary.
pub const PDF_MEDIA_TYPE: &str = "application/pdf";

/// Manifest (metadata record) for one stored PDF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Hex-encoded SHA-256 of the original PDF bytes.
    pub hash: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default, deserialize_with = "lenient_year")]
    pub year: Option<i32>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(rename = "uploadDate", default = "unix_epoch")]
    pub upload_date: DateTime<Utc>,
    /// Keys written by other tools, preserved across edits.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn unix_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

/// Accepts `2020`, `"2020"`, `""`, or `null`. Older manifests edited through a
/// form sometimes carry the year as a string.
fn lenient_year<'de, D>(deserializer: D) -> Result<Option<i32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
        Some(Value::String(s)) => s.trim().parse::<i32>().ok(),
        _ => None,
    })
}

/// A topic partition and the number of manifests it currently holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicSummary {
    pub name: String,
    pub document_count: usize,
}

/// A document together with where it lives and whether it has a summary.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentView {
    pub topic: String,
    pub document: Document,
    pub has_summary: bool,
}

/// Raw PDF bytes plus their declared media type.
#[derive(Debug, Clone)]
pub struct PdfPayload {
    pub bytes: Vec<u8>,
    pub media_type: &'static str,
}

/// Where ingested bytes came from; drives title derivation and `source_url`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceHint {
    Upload { filename: String },
    Url { url: String },
}

/// Result of an ingest call.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    /// Topic that owns the document (may differ from the requested one on duplicates).
    pub topic: String,
    pub document: Document,
    pub is_duplicate: bool,
}

/// Partial metadata update. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct DocumentPatch {
    pub title: Option<String>,
    pub authors: Option<Vec<String>>,
    /// `Some(None)` clears the year.
    pub year: Option<Option<i32>>,
    pub tags: Option<Vec<String>>,
    /// `Some(None)` clears the source URL.
    pub source_url: Option<Option<String>>,
}

impl DocumentPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.authors.is_none()
            && self.year.is_none()
            && self.tags.is_none()
            && self.source_url.is_none()
    }

    /// Merge this patch into `doc`. The hash is never touched.
    pub fn apply(&self, doc: &mut Document) {
        if let Some(ref title) = self.title {
            doc.title = title.trim().to_string();
        }
        if let Some(ref authors) = self.authors {
            doc.authors = authors.clone();
        }
        if let Some(year) = self.year {
            doc.year = year;
        }
        if let Some(ref tags) = self.tags {
            doc.tags = tags.clone();
        }
        if let Some(ref source_url) = self.source_url {
            doc.source_url = source_url.clone();
        }
    }
}

/// Speaker of a prior chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One prior turn of a conversation, held by the caller only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub text: String,
}

/// A single chat request against one document.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub message: String,
    pub history: Vec<ChatTurn>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            history: Vec::new(),
        }
    }
}
