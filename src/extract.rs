//! PDF text extraction.
//!
//! Extraction is a pure function of the stored bytes. The trait exists so
//! tests and alternative parsers can stand in for `pdf-extract`.

use std::sync::Arc;

use crate::error::{Error, Result};

/// Turns PDF bytes into plain UTF-8 text.
///
/// Implementations are synchronous and may be CPU-heavy; callers run them
/// through [`extract_blocking`].
pub trait TextExtractor: Send + Sync {
    fn extract(&self, bytes: &[u8]) -> Result<String>;
}

/// Extractor backed by the `pdf-extract` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfTextExtractor;

impl TextExtractor for PdfTextExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<String> {
        let text = pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| Error::UnreadablePdf(e.to_string()))?;
        if text.trim().is_empty() {
            return Err(Error::UnreadablePdf("no extractable text".to_string()));
        }
        Ok(text)
    }
}

/// Run an extractor on the blocking pool.
///
/// A panic inside the parser is reported as `UnreadablePdf`; malformed PDFs
/// are known to trip assertions in some parsers.
pub async fn extract_blocking(extractor: Arc<dyn TextExtractor>, bytes: Vec<u8>) -> Result<String> {
    match tokio::task::spawn_blocking(move || extractor.extract(&bytes)).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(Error::UnreadablePdf(
            "PDF parser panicked on this file".to_string(),
        )),
        Err(e) => Err(Error::UnreadablePdf(e.to_string())),
    }
}
