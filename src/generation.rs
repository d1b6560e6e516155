//! Streaming summary and chat generation.
//!
//! Each call to [`GenerationSession::summarize`] or [`GenerationSession::chat`]
//! runs one session through these states:
//!
//! ```text
//! Idle → LocatingDocument → ExtractingText → BuildingPrompt → Streaming → Finalizing → Completed
//!                                                                  │            │
//!                                                                  └────────────┴──► Failed | Abandoned
//! ```
//!
//! Everything up to opening the backend stream happens before the call
//! returns, so those failures come back as a plain `Err` and nothing is
//! streamed. After that a relay task owns the backend stream. It appends each
//! chunk to an accumulator and forwards it over a bounded channel to the
//! [`GenerationStream`] held by the caller.
//!
//! A summary is written only after the backend stream ends normally, and
//! before the caller's stream ends. A caller that sees its stream end
//! without an `Err` item can rely on the summary being on disk. A backend
//! error or a caller that goes away leaves any previous summary untouched.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{ChunkStream, GenerativeBackend};
use crate::error::{Error, Result};
use crate::extract::{extract_blocking, TextExtractor};
use crate::models::{ChatRequest, ChatRole};
use crate::prompts::{fill_template, PromptSource};
use crate::resolver::{DocumentResolver, Location};
use crate::store::ArtifactStore;

const CHAT_INSTRUCTIONS: &str = "\
You are a research assistant answering questions about a single document. \
Answer from the document text below. If the document does not contain the \
answer, say so plainly instead of guessing.";

/// Where a session is, or how it ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    LocatingDocument,
    ExtractingText,
    BuildingPrompt,
    Streaming,
    Finalizing,
    Completed,
    Failed,
    /// The caller dropped its stream before the session finished.
    Abandoned,
}

/// How a streamed session ended and how much text it produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOutcome {
    pub state: SessionState,
    pub bytes: usize,
}

/// Tracks and logs state transitions for one session.
struct Progress {
    hash: String,
    kind: &'static str,
    state: SessionState,
}

impl Progress {
    fn new(hash: &str, kind: &'static str) -> Self {
        Self {
            hash: hash.to_string(),
            kind,
            state: SessionState::Idle,
        }
    }

    fn advance(&mut self, next: SessionState) {
        debug!(hash = %self.hash, kind = self.kind, from = ?self.state, to = ?next, "Session state change");
        self.state = next;
    }

    fn fail(&mut self, err: &Error) {
        warn!(hash = %self.hash, kind = self.kind, during = ?self.state, "Generation failed: {}", err);
        self.advance(SessionState::Failed);
    }
}

/// Summary destination for a session that persists its output. The topic is
/// resolved again at write time since the document may move while streaming.
struct SummaryTarget {
    store: ArtifactStore,
    resolver: DocumentResolver,
    hash: String,
}

/// Incremental output of one session.
///
/// Yields chunks in order. An `Err` item is terminal. Dropping the stream
/// abandons the session: the backend request is cancelled and nothing is
/// persisted.
pub struct GenerationStream {
    rx: mpsc::Receiver<Result<String>>,
    task: JoinHandle<SessionOutcome>,
}

impl GenerationStream {
    /// Stop receiving and wait for the relay task to finish.
    ///
    /// If the stream was not drained first, the session ends as
    /// [`SessionState::Abandoned`].
    pub async fn outcome(self) -> SessionOutcome {
        drop(self.rx);
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Generation relay task ended abnormally: {}", e);
                SessionOutcome {
                    state: SessionState::Failed,
                    bytes: 0,
                }
            }
        }
    }

    /// Drain the stream into one string. The first `Err` item is returned.
    pub async fn collect_text(mut self) -> Result<String> {
        let mut text = String::new();
        while let Some(chunk) = self.next().await {
            text.push_str(&chunk?);
        }
        Ok(text)
    }
}

impl Stream for GenerationStream {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

enum Step {
    Next(Option<Result<String>>),
    CallerGone,
}

/// Drives summary and chat requests against the generative backend.
pub struct GenerationSession {
    store: ArtifactStore,
    resolver: DocumentResolver,
    extractor: Arc<dyn TextExtractor>,
    prompts: Arc<dyn PromptSource>,
    backend: Arc<dyn GenerativeBackend>,
    summarize_id: String,
    channel_capacity: usize,
}

impl GenerationSession {
    pub fn new(
        store: ArtifactStore,
        resolver: DocumentResolver,
        extractor: Arc<dyn TextExtractor>,
        prompts: Arc<dyn PromptSource>,
        backend: Arc<dyn GenerativeBackend>,
    ) -> Self {
        Self {
            store,
            resolver,
            extractor,
            prompts,
            backend,
            summarize_id: "summarize".to_string(),
            channel_capacity: 32,
        }
    }

    /// Template id used when `summarize` is called without one.
    pub fn with_summarize_id(mut self, id: impl Into<String>) -> Self {
        self.summarize_id = id.into();
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Generate and persist a summary, streaming it as it arrives.
    ///
    /// A successful run replaces any previous summary for the document.
    pub async fn summarize(
        &self,
        hash: &str,
        template_id: Option<&str>,
    ) -> Result<GenerationStream> {
        let template_id = template_id.unwrap_or(&self.summarize_id).to_string();
        let mut progress = Progress::new(hash, "summary");
        match self.open_summary(&mut progress, hash, &template_id).await {
            Ok(chunks) => {
                let target = SummaryTarget {
                    store: self.store.clone(),
                    resolver: self.resolver.clone(),
                    hash: hash.to_string(),
                };
                Ok(self.relay(chunks, progress, Some(target)))
            }
            Err(e) => {
                progress.fail(&e);
                Err(e)
            }
        }
    }

    async fn open_summary(
        &self,
        progress: &mut Progress,
        hash: &str,
        template_id: &str,
    ) -> Result<ChunkStream> {
        let (_location, text) = self.load_text(progress, hash).await?;

        progress.advance(SessionState::BuildingPrompt);
        let template = self
            .prompts
            .template(template_id)
            .await?
            .ok_or_else(|| Error::TemplateNotFound(template_id.to_string()))?;
        let prompt = fill_template(&template, &text)?;

        progress.advance(SessionState::Streaming);
        self.backend.generate(&prompt).await
    }

    /// Answer one chat message about a document. Nothing is persisted.
    pub async fn chat(&self, hash: &str, request: ChatRequest) -> Result<GenerationStream> {
        let mut progress = Progress::new(hash, "chat");
        match self.open_chat(&mut progress, hash, &request).await {
            Ok(chunks) => Ok(self.relay(chunks, progress, None)),
            Err(e) => {
                progress.fail(&e);
                Err(e)
            }
        }
    }

    async fn open_chat(
        &self,
        progress: &mut Progress,
        hash: &str,
        request: &ChatRequest,
    ) -> Result<ChunkStream> {
        if request.message.trim().is_empty() {
            return Err(Error::InvalidInput("chat message is empty".to_string()));
        }
        let (_location, text) = self.load_text(progress, hash).await?;

        progress.advance(SessionState::BuildingPrompt);
        let prompt = build_chat_prompt(&text, request);

        progress.advance(SessionState::Streaming);
        self.backend.generate(&prompt).await
    }

    /// Remove a document's summary.
    pub async fn delete_summary(&self, hash: &str) -> Result<()> {
        let location = self.resolver.locate(hash).await?;
        self.store.delete_derived_text(&location.topic, hash).await?;
        info!(hash = %hash, topic = %location.topic, "Deleted summary");
        Ok(())
    }

    async fn load_text(&self, progress: &mut Progress, hash: &str) -> Result<(Location, String)> {
        progress.advance(SessionState::LocatingDocument);
        let location = self.resolver.locate(hash).await?;

        progress.advance(SessionState::ExtractingText);
        let bytes = self.store.read_binary(&location.topic, hash).await?;
        let text = extract_blocking(self.extractor.clone(), bytes).await?;
        Ok((location, text))
    }

    fn relay(
        &self,
        chunks: ChunkStream,
        progress: Progress,
        target: Option<SummaryTarget>,
    ) -> GenerationStream {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let task = tokio::spawn(run_relay(chunks, tx, progress, target));
        GenerationStream { rx, task }
    }
}

async fn run_relay(
    mut chunks: ChunkStream,
    tx: mpsc::Sender<Result<String>>,
    mut progress: Progress,
    target: Option<SummaryTarget>,
) -> SessionOutcome {
    let mut accumulated = String::new();
    let end = |progress: &mut Progress, state: SessionState, bytes: usize| {
        if state == SessionState::Abandoned {
            debug!(hash = %progress.hash, kind = progress.kind, bytes, "Caller went away; abandoning");
        }
        progress.advance(state);
        SessionOutcome { state, bytes }
    };

    loop {
        let step = tokio::select! {
            _ = tx.closed() => Step::CallerGone,
            item = chunks.next() => Step::Next(item),
        };

        match step {
            Step::CallerGone => return end(&mut progress, SessionState::Abandoned, accumulated.len()),
            Step::Next(None) => break,
            Step::Next(Some(Ok(chunk))) => {
                if chunk.is_empty() {
                    continue;
                }
                accumulated.push_str(&chunk);
                if tx.send(Ok(chunk)).await.is_err() {
                    return end(&mut progress, SessionState::Abandoned, accumulated.len());
                }
            }
            Step::Next(Some(Err(e))) => {
                progress.fail(&e);
                let _ = tx.send(Err(e)).await;
                return SessionOutcome {
                    state: SessionState::Failed,
                    bytes: accumulated.len(),
                };
            }
        }
    }
    drop(chunks);

    progress.advance(SessionState::Finalizing);
    if let Some(target) = target {
        if tx.is_closed() {
            return end(&mut progress, SessionState::Abandoned, accumulated.len());
        }
        if accumulated.trim().is_empty() {
            let e = Error::Generation("backend returned no text".to_string());
            progress.fail(&e);
            let _ = tx.send(Err(e)).await;
            return SessionOutcome {
                state: SessionState::Failed,
                bytes: 0,
            };
        }
        let saved = match target.resolver.locate(&target.hash).await {
            Ok(location) => target
                .store
                .write_derived_text(&location.topic, &target.hash, &accumulated)
                .await
                .map(|()| location.topic),
            Err(e) => Err(e),
        };
        match saved {
            Ok(topic) => {
                info!(hash = %target.hash, topic = %topic, bytes = accumulated.len(), "Saved summary");
            }
            Err(e) => {
                progress.fail(&e);
                let _ = tx.send(Err(e)).await;
                return SessionOutcome {
                    state: SessionState::Failed,
                    bytes: accumulated.len(),
                };
            }
        }
    }

    end(&mut progress, SessionState::Completed, accumulated.len())
}

/// Chat prompt: fixed instructions, the document between delimiters, prior
/// turns, then the new message.
pub fn build_chat_prompt(document_text: &str, request: &ChatRequest) -> String {
    let mut prompt = String::with_capacity(document_text.len() + 512);
    prompt.push_str(CHAT_INSTRUCTIONS);
    prompt.push_str("\n\n--- DOCUMENT START ---\n");
    prompt.push_str(document_text.trim());
    prompt.push_str("\n--- DOCUMENT END ---\n\n");

    if !request.history.is_empty() {
        prompt.push_str("Conversation so far:\n");
        for turn in &request.history {
            let speaker = match turn.role {
                ChatRole::User => "User",
                ChatRole::Assistant => "Assistant",
            };
            prompt.push_str(speaker);
            prompt.push_str(": ");
            prompt.push_str(turn.text.trim());
            prompt.push('\n');
        }
        prompt.push('\n');
    }

    prompt.push_str("User: ");
    prompt.push_str(request.message.trim());
    prompt.push_str("\nAssistant:");
    prompt
}
