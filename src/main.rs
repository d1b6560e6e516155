//! # pdfman CLI
//!
//! Command-line front end for the pdfman document library.
//!
//! ## Usage
//!
//! ```bash
//! pdfman --config ./config/pdfman.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pdfman init` | Create the data directory and seed prompt templates |
//! | `pdfman topics ...` | List, create, delete, rename topics |
//! | `pdfman docs ...` | List, show, add, edit, delete, move, export documents |
//! | `pdfman summary ...` | Show, generate (streaming), delete summaries |
//! | `pdfman chat <hash>` | Ask questions about a document |
//! | `pdfman prompts ...` | Manage prompt templates |
//!
//! Logs go to stderr so generated text on stdout can be piped.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{ArgAction, Parser, Subcommand};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

use pdfman::config::{self, Config};
use pdfman::generation::{GenerationStream, SessionState};
use pdfman::models::{ChatRequest, ChatRole, ChatTurn, DocumentPatch};
use pdfman::Library;

/// pdfman: a local-first PDF library with streamed AI summaries and chat.
///
/// All commands accept `--config` pointing to a TOML file. When the file
/// does not exist a built-in default is used (data in `./data`, generation
/// disabled).
#[derive(Parser)]
#[command(name = "pdfman", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/pdfman.toml")]
    config: PathBuf,

    /// Override `storage.data_dir` from the config file.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug). `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the data directory and seed default prompt templates.
    ///
    /// Idempotent: existing templates are never overwritten.
    Init,

    /// Manage topics.
    Topics {
        #[command(subcommand)]
        action: TopicAction,
    },

    /// Manage documents.
    Docs {
        #[command(subcommand)]
        action: DocAction,
    },

    /// Show, generate, or delete a document summary.
    Summary {
        #[command(subcommand)]
        action: SummaryAction,
    },

    /// Ask questions about a document.
    ///
    /// With a message, answers once. Without one, starts an interactive
    /// session; the conversation is kept in memory only and forgotten on exit.
    Chat {
        /// Document hash.
        hash: String,
        /// Question to ask.
        message: Option<String>,
    },

    /// Manage prompt templates.
    Prompts {
        #[command(subcommand)]
        action: PromptAction,
    },
}

#[derive(Subcommand)]
enum TopicAction {
    /// List topics with document counts.
    List,
    /// Create a topic.
    Create {
        name: String,
        /// Fail if the topic already exists.
        #[arg(long)]
        strict: bool,
    },
    /// Delete an empty topic.
    Delete { name: String },
    /// Rename a topic; its documents move with it.
    Rename { old: String, new: String },
}

#[derive(Subcommand)]
enum DocAction {
    /// List documents in a topic (newest year first).
    List {
        topic: String,
        /// Print JSON instead of one line per document.
        #[arg(long)]
        json: bool,
    },
    /// Show a document's manifest and location.
    Show { hash: String },
    /// Add a local PDF to a topic.
    Add { topic: String, file: PathBuf },
    /// Download a PDF into a topic.
    AddUrl { topic: String, url: String },
    /// Edit document metadata.
    Edit {
        hash: String,
        #[arg(long)]
        title: Option<String>,
        /// Author (repeatable); replaces the author list.
        #[arg(long = "author")]
        authors: Vec<String>,
        /// Remove all authors.
        #[arg(long, conflicts_with = "authors")]
        clear_authors: bool,
        #[arg(long)]
        year: Option<i32>,
        /// Remove the year.
        #[arg(long, conflicts_with = "year")]
        no_year: bool,
        /// Tag (repeatable); replaces the tag list.
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Remove all tags.
        #[arg(long, conflicts_with = "tags")]
        clear_tags: bool,
        #[arg(long)]
        source_url: Option<String>,
        /// Remove the source URL.
        #[arg(long, conflicts_with = "source_url")]
        no_source_url: bool,
    },
    /// Delete a document and its summary.
    Delete { hash: String },
    /// Move a document to another existing topic.
    Move { hash: String, topic: String },
    /// Write the original PDF to a file.
    Export { hash: String, out: PathBuf },
}

#[derive(Subcommand)]
enum SummaryAction {
    /// Print the saved summary.
    Show { hash: String },
    /// Generate a summary, streaming it to stdout, and save it.
    Generate {
        hash: String,
        /// Prompt template id (defaults to `prompts.summarize_id`).
        #[arg(long)]
        template: Option<String>,
    },
    /// Delete the saved summary.
    Delete { hash: String },
}

#[derive(Subcommand)]
enum PromptAction {
    /// List template ids.
    List,
    /// Print a template.
    Show { id: String },
    /// Create or replace a template. Use `{context}` where the document text goes.
    Set {
        id: String,
        /// Template text.
        #[arg(required_unless_present = "file", conflicts_with = "file")]
        template: Option<String>,
        /// Read the template from a file.
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Remove a template.
    Remove { id: String },
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "pdfman=warn",
        1 => "pdfman=info",
        _ => "pdfman=debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load(path: &Path, data_dir: Option<PathBuf>) -> anyhow::Result<Config> {
    let mut cfg = if path.exists() {
        config::load_config(path)?
    } else {
        Config::minimal()
    };
    if let Some(dir) = data_dir {
        cfg.storage.data_dir = dir;
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cfg = load(&cli.config, cli.data_dir)?;
    let library = Library::open(&cfg)?;

    match cli.command {
        Commands::Init => {
            let seeded = library.init().await?;
            println!(
                "Data directory ready at {}",
                library.store().data_dir().display()
            );
            if seeded {
                println!("Wrote default prompt templates to {}", library.prompts().path().display());
            }
        }
        Commands::Topics { action } => run_topics(&library, action).await?,
        Commands::Docs { action } => run_docs(&library, action).await?,
        Commands::Summary { action } => run_summary(&library, action).await?,
        Commands::Chat { hash, message } => match message {
            Some(message) => {
                let stream = library.chat(&hash, ChatRequest::new(message)).await?;
                stream_to_stdout(stream).await?;
            }
            None => run_chat_loop(&library, &hash).await?,
        },
        Commands::Prompts { action } => run_prompts(&library, action).await?,
    }

    Ok(())
}

async fn run_topics(library: &Library, action: TopicAction) -> anyhow::Result<()> {
    match action {
        TopicAction::List => {
            let topics = library.list_topics().await?;
            if topics.is_empty() {
                println!("No topics.");
            }
            for topic in topics {
                println!("{}  ({} documents)", topic.name, topic.document_count);
            }
        }
        TopicAction::Create { name, strict } => {
            if strict {
                library.create_topic_strict(&name).await?;
                println!("Created topic {}", name);
            } else if library.create_topic(&name).await? {
                println!("Created topic {}", name);
            } else {
                println!("Topic {} already exists", name);
            }
        }
        TopicAction::Delete { name } => {
            library.delete_topic(&name).await?;
            println!("Deleted topic {}", name);
        }
        TopicAction::Rename { old, new } => {
            library.rename_topic(&old, &new).await?;
            println!("Renamed topic {} to {}", old, new);
        }
    }
    Ok(())
}

async fn run_docs(library: &Library, action: DocAction) -> anyhow::Result<()> {
    match action {
        DocAction::List { topic, json } => {
            let docs = library.list_documents(&topic).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&docs)?);
                return Ok(());
            }
            if docs.is_empty() {
                println!("No documents in {}.", topic);
            }
            for view in docs {
                let d = &view.document;
                let year = d.year.map(|y| y.to_string()).unwrap_or_else(|| "----".into());
                let marker = if view.has_summary { "  [summary]" } else { "" };
                println!("{}  {}  {}{}", d.hash, year, d.title, marker);
            }
        }
        DocAction::Show { hash } => {
            let view = library.get_document(&hash).await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        DocAction::Add { topic, file } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let filename = file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let outcome = library.upload(&topic, &filename, &bytes).await?;
            print_ingest(&outcome);
        }
        DocAction::AddUrl { topic, url } => {
            let outcome = library.add_from_url(&topic, &url).await?;
            print_ingest(&outcome);
        }
        DocAction::Edit {
            hash,
            title,
            authors,
            clear_authors,
            year,
            no_year,
            tags,
            clear_tags,
            source_url,
            no_source_url,
        } => {
            let patch = DocumentPatch {
                title,
                authors: list_patch(authors, clear_authors),
                year: if no_year { Some(None) } else { year.map(Some) },
                tags: list_patch(tags, clear_tags),
                source_url: if no_source_url {
                    Some(None)
                } else {
                    source_url.map(Some)
                },
            };
            let doc = library.update_document(&hash, &patch).await?;
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        DocAction::Delete { hash } => {
            let report = library.delete_document(&hash).await?;
            println!("Deleted {} from {}", hash, report.topic);
            for kind in &report.missing {
                eprintln!("warning: {} was already missing", kind);
            }
        }
        DocAction::Move { hash, topic } => {
            let from = library.move_document(&hash, &topic).await?;
            println!("Moved {} from {} to {}", hash, from, topic);
        }
        DocAction::Export { hash, out } => {
            let pdf = library.read_pdf(&hash).await?;
            tokio::fs::write(&out, &pdf.bytes)
                .await
                .with_context(|| format!("Failed to write {}", out.display()))?;
            println!(
                "Wrote {} bytes ({}) to {}",
                pdf.bytes.len(),
                pdf.media_type,
                out.display()
            );
        }
    }
    Ok(())
}

fn list_patch(values: Vec<String>, clear: bool) -> Option<Vec<String>> {
    if clear {
        Some(Vec::new())
    } else if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

fn print_ingest(outcome: &pdfman::models::IngestOutcome) {
    let d = &outcome.document;
    if outcome.is_duplicate {
        println!(
            "Already stored in topic {} as {} ({})",
            outcome.topic, d.hash, d.title
        );
    } else {
        println!("Added {} to {}: {}", d.hash, outcome.topic, d.title);
    }
}

async fn run_summary(library: &Library, action: SummaryAction) -> anyhow::Result<()> {
    match action {
        SummaryAction::Show { hash } => {
            let text = library.get_summary(&hash).await?;
            println!("{}", text.trim_end());
        }
        SummaryAction::Generate { hash, template } => {
            let stream = library.summarize(&hash, template.as_deref()).await?;
            stream_to_stdout(stream).await?;
            eprintln!("Summary saved.");
        }
        SummaryAction::Delete { hash } => {
            library.delete_summary(&hash).await?;
            println!("Deleted summary for {}", hash);
        }
    }
    Ok(())
}

/// Print chunks as they arrive. Returns the full text once the session has
/// completed.
async fn stream_to_stdout(mut stream: GenerationStream) -> anyhow::Result<String> {
    let mut stdout = tokio::io::stdout();
    let mut text = String::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        stdout.write_all(chunk.as_bytes()).await?;
        stdout.flush().await?;
        text.push_str(&chunk);
    }
    if !text.ends_with('\n') {
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    let outcome = stream.outcome().await;
    if outcome.state != SessionState::Completed {
        bail!("generation ended as {:?}", outcome.state);
    }
    Ok(text)
}

async fn run_chat_loop(library: &Library, hash: &str) -> anyhow::Result<()> {
    let view = library.get_document(hash).await?;
    eprintln!(
        "Chatting about \"{}\". Empty line or /exit to quit.",
        view.document.title
    );

    let mut history: Vec<ChatTurn> = Vec::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let message = line.trim();
        if message.is_empty() || message == "/exit" || message == "/quit" {
            break;
        }

        let request = ChatRequest {
            message: message.to_string(),
            history: history.clone(),
        };
        let reply = match library.chat(hash, request).await {
            Ok(stream) => stream_to_stdout(stream).await,
            Err(e) => Err(e.into()),
        };
        match reply {
            Ok(reply) => {
                history.push(ChatTurn {
                    role: ChatRole::User,
                    text: message.to_string(),
                });
                history.push(ChatTurn {
                    role: ChatRole::Assistant,
                    text: reply,
                });
            }
            Err(e) => eprintln!("Error: {:#}", e),
        }
    }
    Ok(())
}

async fn run_prompts(library: &Library, action: PromptAction) -> anyhow::Result<()> {
    let prompts = library.prompts();
    match action {
        PromptAction::List => {
            for id in prompts.ids().await? {
                let marker = if id == prompts.summarize_id() {
                    "  (summaries)"
                } else {
                    ""
                };
                println!("{}{}", id, marker);
            }
        }
        PromptAction::Show { id } => {
            use pdfman::prompts::PromptSource;
            match prompts.template(&id).await? {
                Some(text) => println!("{}", text),
                None => bail!("prompt template not found: {}", id),
            }
        }
        PromptAction::Set { id, template, file } => {
            let text = match (template, file) {
                (Some(text), _) => text,
                (None, Some(path)) => tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                (None, None) => bail!("provide a template or --file"),
            };
            prompts.set(&id, &text).await?;
            println!("Saved template {}", id);
        }
        PromptAction::Remove { id } => {
            prompts.remove(&id).await?;
            println!("Removed template {}", id);
        }
    }
    Ok(())
}
