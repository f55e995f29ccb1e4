//! bizbot server binary.
//!
//! Loads `.env`, parses flags (every flag also has an environment variable),
//! builds a [`ServiceConfig`] and serves the briefing API until Ctrl+C or
//! SIGTERM.

use anyhow::{Context, Result};
use bizbot::{router, BriefingService, ImageFailurePolicy, ServiceConfig};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const AFTER_HELP: &str = r#"EXAMPLES:
  # Serve on the default port with OpenAI (reads OPENAI_API_KEY)
  bizbot

  # Pick model and provider explicitly
  bizbot --provider anthropic --model claude-haiku-4-20250514

  # Keep artefacts somewhere persistent
  bizbot --work-dir /var/lib/bizbot --port 9000

  # Abort analysis when any embedded image cannot be decoded
  bizbot --image-policy abort

ROUTES:
  GET  /                        health message
  POST /analyze-pdf/            multipart field "file" → summary, counts, images
  POST /ask-question/           {"question"} → {"answer"}
  POST /narrate-answer/         {"summary"} → audio/mpeg
  POST /narrate-summary/        {"summary"} → audio/mpeg
  POST /download-summary/       {"summary"} → summary.pdf
  POST /clear-chat/             {"message"}
  GET  /last-answer-audio.mp3   last narrated answer
  GET  /extracted_images/...    PNGs listed by /analyze-pdf/

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  RUST_LOG                Log filter, e.g. bizbot=debug,tower_http=info

A .env file in the current directory is loaded before flags are parsed.
"#;

/// Serve the PDF briefing API.
#[derive(Parser, Debug)]
#[command(
    name = "bizbot",
    version,
    about = "PDF briefing backend: summaries, follow-up questions, narration and PDF export",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Address to bind.
    #[arg(long, env = "BIZBOT_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(short, long, env = "BIZBOT_PORT", default_value_t = 8000)]
    port: u16,

    /// Directory for staged uploads, narrated audio and rendered PDFs.
    #[arg(long, env = "BIZBOT_WORK_DIR", default_value = ".")]
    work_dir: PathBuf,

    /// Root directory for extracted images. Default: <work-dir>/extracted_images.
    #[arg(long, env = "BIZBOT_IMAGES_DIR")]
    images_dir: Option<PathBuf>,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1-mini, claude-haiku-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "BIZBOT_TEMPERATURE", default_value_t = 0.7)]
    temperature: f32,

    /// Max LLM output tokens per reply.
    #[arg(long, env = "BIZBOT_MAX_TOKENS", default_value_t = 1024)]
    max_tokens: usize,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "BIZBOT_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "BIZBOT_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Speech language code.
    #[arg(long, env = "BIZBOT_SPEECH_LANG", default_value = "en")]
    speech_lang: String,

    /// Speech endpoint URL.
    #[arg(long, env = "BIZBOT_SPEECH_ENDPOINT")]
    speech_endpoint: Option<String>,

    /// Per-chunk speech request timeout in seconds.
    #[arg(long, env = "BIZBOT_SPEECH_TIMEOUT", default_value_t = 30)]
    speech_timeout: u64,

    /// What to do when one embedded image cannot be extracted.
    #[arg(long, env = "BIZBOT_IMAGE_POLICY", value_enum, default_value = "skip")]
    image_policy: ImagePolicyArg,

    /// Maximum upload size in MiB.
    #[arg(long, env = "BIZBOT_MAX_UPLOAD_MB", default_value_t = 50,
          value_parser = clap::value_parser!(u64).range(1..=1024))]
    max_upload_mb: u64,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "BIZBOT_VERBOSE")]
    verbose: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum ImagePolicyArg {
    Skip,
    Abort,
}

impl From<ImagePolicyArg> for ImageFailurePolicy {
    fn from(v: ImagePolicyArg) -> Self {
        match v {
            ImagePolicyArg::Skip => ImageFailurePolicy::SkipAndWarn,
            ImagePolicyArg::Abort => ImageFailurePolicy::Abort,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let default_filter = if cli.verbose {
        "bizbot=debug,tower_http=debug"
    } else {
        "bizbot=info,tower_http=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // ── Configuration ────────────────────────────────────────────────────
    let config = build_config(&cli)?;
    info!(
        "Starting bizbot v{} (work dir {}, images {})",
        env!("CARGO_PKG_VERSION"),
        config.work_dir.display(),
        config.images_dir.display()
    );

    tokio::fs::create_dir_all(&config.work_dir)
        .await
        .with_context(|| format!("Cannot create work dir {}", config.work_dir.display()))?;

    let service = BriefingService::from_config(config)
        .context("Failed to initialise the briefing service")?;
    let app = router(Arc::new(service));

    // ── Serve ────────────────────────────────────────────────────────────
    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", cli.host, cli.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Cannot bind {addr}"))?;
    info!("bizbot listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

fn build_config(cli: &Cli) -> Result<ServiceConfig> {
    let mut builder = ServiceConfig::builder()
        .work_dir(&cli.work_dir)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .api_timeout_secs(cli.api_timeout)
        .speech_language(&cli.speech_lang)
        .speech_timeout_secs(cli.speech_timeout)
        .image_failure_policy(cli.image_policy.clone().into())
        .max_upload_bytes(upload_limit_bytes(cli.max_upload_mb)?);

    if let Some(ref dir) = cli.images_dir {
        builder = builder.images_dir(dir);
    }
    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = cli.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref url) = cli.speech_endpoint {
        builder = builder.speech_endpoint(url);
    }
    if let Some(ref path) = cli.system_prompt {
        let prompt = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read system prompt file: {}", path.display()))?;
        builder = builder.system_prompt(prompt);
    }

    builder.build().context("Invalid configuration")
}

/// `--max-upload-mb` in bytes, refusing values that do not fit in `usize`.
fn upload_limit_bytes(mb: u64) -> Result<usize> {
    mb.checked_mul(1024 * 1024)
        .and_then(|bytes| usize::try_from(bytes).ok())
        .with_context(|| format!("--max-upload-mb {mb} is too large"))
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_limit_converts_mebibytes() {
        assert_eq!(upload_limit_bytes(50).unwrap(), 50 * 1024 * 1024);
    }

    #[test]
    fn upload_limit_rejects_overflow() {
        let err = upload_limit_bytes(u64::MAX).unwrap_err();
        assert!(err.to_string().contains("too large"), "got: {err}");
    }

    #[test]
    fn cli_parses_defaults() {
        let cli = Cli::try_parse_from(["bizbot"]).unwrap();
        assert_eq!(cli.port, 8000);
        let config = build_config(&cli).unwrap();
        assert_eq!(config.max_upload_bytes, 50 * 1024 * 1024);
    }
}
