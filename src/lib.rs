//! # pdfman
//!
//! A local-first PDF library. Documents are filed under named topics, stored
//! content-addressed by the SHA-256 of their bytes, and can be summarized or
//! questioned through a streaming generative backend.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌─────────────────────────┐
//! │ upload / URL │──▶│IngestPipeline│──▶│      ArtifactStore      │
//! └──────────────┘   └──────────────┘   │ <topic>/<hash>.json/.pdf│
//!                                       │ <topic>/<hash>.md       │
//!                                       └───────────┬─────────────┘
//!                                                   │ DocumentResolver
//!                                                   ▼
//!                    ┌──────────────┐   ┌─────────────────────────┐
//!                    │   Backend    │◀──│   GenerationSession     │──▶ caller stream
//!                    │ (Gemini SSE) │──▶│ extract → prompt → relay│
//!                    └──────────────┘   └─────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! pdfman init
//! pdfman topics create physics
//! pdfman docs add physics ./paper.pdf
//! pdfman summary generate <hash>
//! pdfman chat <hash> "What is the main result?"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy |
//! | [`models`] | Manifests and request/response types |
//! | [`store`] | Topic partitions and per-document artifacts on disk |
//! | [`resolver`] | Hash to topic lookup |
//! | [`ingest`] | Hashing, dedup, manifest creation |
//! | [`generation`] | Streaming summary and chat sessions |
//! | [`backend`] | Generative backends (Gemini, disabled) |
//! | [`extract`] | PDF text extraction |
//! | [`fetch`] | URL download for ingest |
//! | [`prompts`] | Prompt template storage |
//! | [`library`] | Facade used by the CLI |

pub mod backend;
pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod generation;
pub mod ingest;
pub mod library;
pub mod models;
pub mod prompts;
pub mod resolver;
pub mod store;

pub use error::{Error, ErrorKind, Result};
pub use library::{Collaborators, Library};
