//! # bizbot
//!
//! Backend for a PDF briefing assistant: upload a document, get a summary,
//! ask follow-up questions, listen to the answers, download the summary.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF upload
//!  │
//!  ├─ 1. Stage   validate %PDF magic, write to a self-deleting temp file
//!  ├─ 2. Read    parse with lopdf (spawn_blocking)
//!  ├─ 3. Text    page text in document order, joined with '\n'
//!  ├─ 4. Images  unique embedded images → PNG, CMYK converted to RGB
//!  ├─ 5. LLM     summary via edgequake-llm, fixed fallback on failure
//!  └─ 6. Session summary + text + chat history for follow-up questions
//!
//! question ──▶ LLM (grounded in the summary) ──▶ answer
//! text     ──▶ Google TTS ──▶ MP3
//! text     ──▶ printpdf   ──▶ summary.pdf
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bizbot::{router, BriefingService, ServiceConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / ...
//!     let config = ServiceConfig::builder().work_dir("/tmp/bizbot").build()?;
//!     let service = Arc::new(BriefingService::from_config(config)?);
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8000").await?;
//!     axum::serve(listener, router(service)).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `bizbot` server binary (clap + dotenvy + tracing-subscriber) |
//!
//! Disable `cli` to embed the service without the binary's dependencies:
//! ```toml
//! bizbot = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod prompts;
pub mod server;
pub mod service;
pub mod session;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ImageFailurePolicy, ServiceConfig, ServiceConfigBuilder};
pub use error::{BizBotError, ImageError};
pub use output::{AnalysisOutput, AnswerOutput, ChatTurn, MessageOutput};
pub use pipeline::images::{extract_images, ImageExtraction};
pub use pipeline::llm::{LanguageModel, ProviderModel};
pub use pipeline::speech::{GoogleTts, SpeechSynthesizer};
pub use pipeline::text::extract_text;
pub use server::router;
pub use service::BriefingService;
pub use session::{SessionState, SessionStore};
