//! The briefing service: one object behind every HTTP route.
//!
//! [`BriefingService`] owns the configuration, the language model, the
//! speech synthesiser and the [`SessionStore`]. It knows nothing about HTTP,
//! so the same calls back the axum router, the integration tests and any
//! embedding application.
//!
//! ## Why spawn_blocking?
//!
//! Parsing the PDF, decoding images and encoding PNGs are CPU-bound and use
//! blocking file I/O. The whole extraction (stage upload, open, text, images)
//! runs as one `spawn_blocking` task so Tokio worker threads never stall, and
//! the document and the staged temp file are dropped on that thread when the
//! task ends, on success and on error.

use crate::config::ServiceConfig;
use crate::error::BizBotError;
use crate::output::{AnalysisOutput, AnswerOutput, ChatTurn, MessageOutput};
use crate::pipeline::images::{extract_images_from, ImageExtraction};
use crate::pipeline::input::stage_upload;
use crate::pipeline::llm::{self, LanguageModel, ProviderModel};
use crate::pipeline::postprocess::clean_summary;
use crate::pipeline::reader::{LopdfDocument, PdfSource};
use crate::pipeline::render::save_text_pdf;
use crate::pipeline::speech::{self, GoogleTts, SpeechSynthesizer};
use crate::pipeline::text::{collect_text, word_count};
use crate::prompts::DEFAULT_SYSTEM_PROMPT;
use crate::session::SessionStore;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// URL prefix under which extracted images are served.
pub const IMAGES_ROUTE: &str = "extracted_images";

/// Title of the rendered summary PDF.
const SUMMARY_PDF_TITLE: &str = "Summary";

/// What one extraction task hands back to the async side.
struct Extracted {
    page_count: usize,
    text: String,
    images: ImageExtraction,
}

pub struct BriefingService {
    config: ServiceConfig,
    model: Arc<dyn LanguageModel>,
    speech: Arc<dyn SpeechSynthesizer>,
    session: SessionStore,
}

impl std::fmt::Debug for BriefingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BriefingService")
            .field("config", &self.config)
            .field("session", &self.session)
            .finish()
    }
}

impl BriefingService {
    /// Build a service from explicit collaborators.
    pub fn new(
        config: ServiceConfig,
        model: Arc<dyn LanguageModel>,
        speech: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        Self {
            config,
            model,
            speech,
            session: SessionStore::new(),
        }
    }

    /// Build a service with the configured LLM provider and Google TTS.
    pub fn from_config(config: ServiceConfig) -> Result<Self, BizBotError> {
        let model = Arc::new(ProviderModel::from_config(&config)?);
        let speech = Arc::new(GoogleTts::new(&config)?);
        Ok(Self::new(config, model, speech))
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    fn system_prompt(&self) -> &str {
        self.config
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT)
    }

    // ── Analyze ──────────────────────────────────────────────────────────

    /// Extract text and images from an uploaded PDF, summarise it and make
    /// it the session's current document.
    pub async fn analyze(&self, upload: Vec<u8>) -> Result<AnalysisOutput, BizBotError> {
        let start = Instant::now();
        let run_id = Uuid::new_v4().simple().to_string();
        let run_dir = self.config.images_dir.join(&run_id);
        info!("Analyzing {} byte upload (run {})", upload.len(), run_id);

        let work_dir = self.config.work_dir.clone();
        let policy = self.config.image_failure_policy;
        let task_dir = run_dir.clone();
        let extracted = tokio::task::spawn_blocking(move || -> Result<Extracted, BizBotError> {
            let staged = stage_upload(&upload, &work_dir)?;
            let doc = LopdfDocument::open(staged.path())?;
            let text = collect_text(&doc)?;
            let images = extract_images_from(&doc, &task_dir, policy)?;
            Ok(Extracted {
                page_count: doc.page_count(),
                text,
                images,
            })
        })
        .await
        .map_err(|e| BizBotError::Internal(format!("Extraction task panicked: {}", e)))
        .and_then(|res| res);

        let extracted = match extracted {
            Ok(x) => x,
            Err(e) => {
                remove_run_dir(&run_dir).await;
                return Err(e);
            }
        };
        let extract_ms = start.elapsed().as_millis();
        info!(
            "Extracted {} pages, {} chars, {} images in {}ms",
            extracted.page_count,
            extracted.text.len(),
            extracted.images.paths.len(),
            extract_ms
        );
        if extracted.text.trim().is_empty() {
            warn!("Document has no text layer; summary will be based on empty text");
        }

        let raw = llm::summarize(self.model.as_ref(), self.system_prompt(), &extracted.text).await;
        let summary = clean_summary(&raw);

        let images = extracted
            .images
            .paths
            .iter()
            .filter_map(|p| p.file_name())
            .map(|name| format!("{}/{}/{}", IMAGES_ROUTE, run_id, name.to_string_lossy()))
            .collect();
        let output = AnalysisOutput {
            summary: summary.clone(),
            page_count: extracted.page_count,
            word_count: word_count(&extracted.text),
            images,
            image_failures: extracted.images.failures,
        };

        if let Some(previous) = self
            .session
            .replace_document(summary, extracted.text, run_dir)
        {
            remove_run_dir(&previous).await;
        }

        info!("Analysis complete in {}ms", start.elapsed().as_millis());
        Ok(output)
    }

    // ── Q&A ──────────────────────────────────────────────────────────────

    /// Answer a question grounded in the current summary and record the turn.
    pub async fn ask(&self, question: &str) -> Result<AnswerOutput, BizBotError> {
        if question.trim().is_empty() {
            return Err(BizBotError::EmptyInput { what: "question" });
        }
        let summary = self.session.summary();
        let answer = llm::answer(self.model.as_ref(), self.system_prompt(), question, &summary).await;
        self.session.push_turn(ChatTurn {
            question: question.to_string(),
            answer: answer.clone(),
        });
        debug!("Chat history now {} turns", self.session.chat_history().len());
        Ok(AnswerOutput { answer })
    }

    pub fn clear_chat(&self) -> MessageOutput {
        self.session.clear_chat();
        info!("Chat history cleared");
        MessageOutput::new("Chat history cleared")
    }

    // ── Speech and PDF output ────────────────────────────────────────────

    /// Narrate an answer; kept as the "last answer" audio.
    pub async fn narrate_answer(&self, text: &str) -> Result<Vec<u8>, BizBotError> {
        speech::narrate(self.speech.as_ref(), text, &self.config.answer_audio_path()).await
    }

    /// Narrate a summary.
    pub async fn narrate_summary(&self, text: &str) -> Result<Vec<u8>, BizBotError> {
        speech::narrate(self.speech.as_ref(), text, &self.config.summary_audio_path()).await
    }

    /// Render text into a downloadable PDF.
    pub async fn render_pdf(&self, text: &str) -> Result<Vec<u8>, BizBotError> {
        save_text_pdf(SUMMARY_PDF_TITLE, text, &self.config.summary_pdf_path()).await
    }

    /// The most recently narrated answer.
    pub async fn last_answer_audio(&self) -> Result<Vec<u8>, BizBotError> {
        read_artifact(&self.config.answer_audio_path(), "Audio").await
    }

    /// An image written by an analyze call, addressed by run id and file name.
    pub async fn extracted_image(&self, run: &str, name: &str) -> Result<Vec<u8>, BizBotError> {
        if !is_safe_component(run) || !is_safe_component(name) {
            return Err(BizBotError::NotFound("Image".into()));
        }
        read_artifact(&self.config.images_dir.join(run).join(name), "Image").await
    }
}

/// A single path segment made of ASCII letters, digits, `_`, `-` and `.`,
/// not starting with `.`.
fn is_safe_component(s: &str) -> bool {
    !s.is_empty()
        && !s.starts_with('.')
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

async fn read_artifact(path: &Path, what: &str) -> Result<Vec<u8>, BizBotError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(BizBotError::NotFound(what.to_string()))
        }
        Err(e) => Err(BizBotError::Internal(format!(
            "Failed to read '{}': {}",
            path.display(),
            e
        ))),
    }
}

async fn remove_run_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => debug!("Removed image run {}", dir.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove image run {}: {}", dir.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImageFailurePolicy;
    use crate::pipeline::reader::fixtures::{build_pdf, raw_image, FixturePage};
    use crate::prompts::FALLBACK_REPLY;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct EchoModel {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LanguageModel for EchoModel {
        async fn complete(&self, _system: &str, prompt: &str) -> Result<String, BizBotError> {
            self.prompts.lock().push(prompt.to_string());
            Ok("**Key point:** revenue grew.".to_string())
        }
    }

    struct BrokenModel;

    #[async_trait]
    impl LanguageModel for BrokenModel {
        async fn complete(&self, _system: &str, _prompt: &str) -> Result<String, BizBotError> {
            Err(BizBotError::LlmApiError {
                message: "401 Unauthorized".into(),
            })
        }
    }

    struct FakeSpeech;

    #[async_trait]
    impl SpeechSynthesizer for FakeSpeech {
        async fn synthesize(&self, text: &str) -> Result<Vec<u8>, BizBotError> {
            Ok(format!("ID3{text}").into_bytes())
        }
    }

    fn service_in(dir: &Path, model: Arc<dyn LanguageModel>) -> BriefingService {
        let config = ServiceConfig::builder()
            .work_dir(dir)
            .image_failure_policy(ImageFailurePolicy::SkipAndWarn)
            .build()
            .unwrap();
        BriefingService::new(config, model, Arc::new(FakeSpeech))
    }

    fn echo() -> Arc<EchoModel> {
        Arc::new(EchoModel {
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn three_page_pdf() -> Vec<u8> {
        let pool = [
            ("ImA", raw_image(1, 1, "DeviceRGB", vec![255, 0, 0])),
            ("ImB", raw_image(1, 1, "DeviceGray", vec![128])),
        ];
        build_pdf(
            &[
                FixturePage { text: Some("Quarterly report"), images: vec!["ImA"] },
                FixturePage { text: Some("Revenue grew"), images: vec!["ImA", "ImB"] },
                FixturePage { text: None, images: vec![] },
            ],
            &pool,
        )
    }

    #[tokio::test]
    async fn analyze_fills_session_and_output() {
        let dir = tempfile::tempdir().unwrap();
        let model = echo();
        let service = service_in(dir.path(), model.clone());

        let out = service.analyze(three_page_pdf()).await.unwrap();
        assert_eq!(out.summary, "Key point: revenue grew.");
        assert_eq!(out.page_count, 3);
        assert_eq!(out.word_count, 4);
        assert_eq!(out.images.len(), 2);
        assert!(out.images[0].starts_with("extracted_images/"));
        assert!(out.images[0].contains("/page1_img1_"));
        assert!(out.images[1].contains("/page2_img2_"));

        let prompt = model.prompts.lock()[0].clone();
        assert!(prompt.contains("Quarterly report"));

        let state = service.session().snapshot();
        assert_eq!(state.summary, out.summary);
        assert!(state.document_text.contains("Revenue grew"));
        let run = state.image_run.unwrap();
        assert_eq!(std::fs::read_dir(&run).unwrap().count(), 2);

        // Staged upload is gone.
        let pdfs = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().extension().is_some_and(|x| x == "pdf"))
            .count();
        assert_eq!(pdfs, 0);
    }

    #[tokio::test]
    async fn second_analyze_replaces_previous_run() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_in(dir.path(), echo());

        service.analyze(three_page_pdf()).await.unwrap();
        let first = service.session().snapshot().image_run.unwrap();
        service.ask("What grew?").await.unwrap();

        service.analyze(three_page_pdf()).await.unwrap();
        let second = service.session().snapshot().image_run.unwrap();

        assert_ne!(first, second);
        assert!(!first.exists());
        assert!(second.is_dir());
        assert!(service.session().chat_history().is_empty());
    }

    #[tokio::test]
    async fn served_image_matches_written_file() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_in(dir.path(), echo());
        let out = service.analyze(three_page_pdf()).await.unwrap();

        let parts: Vec<&str> = out.images[0].split('/').collect();
        let bytes = service.extracted_image(parts[1], parts[2]).await.unwrap();
        assert!(bytes.starts_with(b"\x89PNG"));
    }

    #[tokio::test]
    async fn image_lookup_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_in(dir.path(), echo());
        for (run, name) in [("..", "secret"), ("run", "../x.png"), ("run", ".hidden"), ("", "a.png")] {
            let err = service.extracted_image(run, name).await.unwrap_err();
            assert!(matches!(err, BizBotError::NotFound(_)));
        }
    }

    #[tokio::test]
    async fn non_pdf_upload_is_rejected_and_session_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_in(dir.path(), echo());
        let err = service.analyze(b"GIF89a....".to_vec()).await.unwrap_err();
        assert!(matches!(err, BizBotError::NotAPdf { .. }));
        assert!(service.session().snapshot().image_run.is_none());
    }

    #[tokio::test]
    async fn corrupt_pdf_cleans_up_run_dir() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_in(dir.path(), echo());
        let err = service.analyze(b"%PDF-1.4 garbage".to_vec()).await.unwrap_err();
        assert!(matches!(err, BizBotError::DocumentOpen { .. }));
        let images_dir = service.config().images_dir.clone();
        let runs = std::fs::read_dir(&images_dir).map(|d| d.count()).unwrap_or(0);
        assert_eq!(runs, 0);
    }

    #[tokio::test]
    async fn oversized_image_is_reported_and_analysis_completes() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_in(dir.path(), echo());
        let huge = i64::from(u32::MAX);
        let pool = [
            ("ImA", raw_image(1, 1, "DeviceRGB", vec![255, 0, 0])),
            ("ImHuge", raw_image(huge, huge, "DeviceCMYK", vec![0; 8])),
        ];
        let pdf = build_pdf(
            &[FixturePage { text: Some("Quarterly report"), images: vec!["ImA", "ImHuge"] }],
            &pool,
        );

        let out = service.analyze(pdf).await.unwrap();
        assert_eq!(out.images.len(), 1);
        assert_eq!(out.image_failures.len(), 1);
        let run = service.session().snapshot().image_run.unwrap();
        assert_eq!(std::fs::read_dir(&run).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn ask_records_turns_and_uses_summary() {
        let dir = tempfile::tempdir().unwrap();
        let model = echo();
        let service = service_in(dir.path(), model.clone());
        service.analyze(three_page_pdf()).await.unwrap();

        let out = service.ask("What grew?").await.unwrap();
        assert_eq!(out.answer, "**Key point:** revenue grew.");
        let history = service.session().chat_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].question, "What grew?");

        let prompt = model.prompts.lock().last().cloned().unwrap();
        assert!(prompt.contains("Key point: revenue grew."));
        assert!(prompt.contains("What grew?"));

        assert_eq!(service.clear_chat().message, "Chat history cleared");
        assert!(service.session().chat_history().is_empty());
    }

    #[tokio::test]
    async fn blank_question_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_in(dir.path(), echo());
        let err = service.ask("   ").await.unwrap_err();
        assert!(matches!(err, BizBotError::EmptyInput { what: "question" }));
        assert!(service.session().chat_history().is_empty());
    }

    #[tokio::test]
    async fn model_failure_yields_fallback_text() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_in(dir.path(), Arc::new(BrokenModel));
        let out = service.analyze(three_page_pdf()).await.unwrap();
        assert_eq!(out.summary, FALLBACK_REPLY);
        assert_eq!(service.ask("Why?").await.unwrap().answer, FALLBACK_REPLY);
    }

    #[tokio::test]
    async fn narrate_answer_is_served_back() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_in(dir.path(), echo());

        assert!(matches!(
            service.last_answer_audio().await.unwrap_err(),
            BizBotError::NotFound(_)
        ));
        let audio = service.narrate_answer("Revenue grew.").await.unwrap();
        assert_eq!(service.last_answer_audio().await.unwrap(), audio);

        service.narrate_summary("Summary.").await.unwrap();
        assert!(service.config().summary_audio_path().exists());
    }

    #[tokio::test]
    async fn blank_narration_and_render_write_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_in(dir.path(), echo());
        assert!(matches!(
            service.narrate_answer(" ").await.unwrap_err(),
            BizBotError::EmptyInput { .. }
        ));
        assert!(matches!(
            service.render_pdf("\n").await.unwrap_err(),
            BizBotError::EmptyInput { .. }
        ));
        assert!(!service.config().answer_audio_path().exists());
        assert!(!service.config().summary_pdf_path().exists());
    }

    #[tokio::test]
    async fn render_pdf_writes_summary_file() {
        let dir = tempfile::tempdir().unwrap();
        let service = service_in(dir.path(), echo());
        let bytes = service.render_pdf("Revenue grew.").await.unwrap();
        assert!(bytes.starts_with(b"%PDF"));
        assert_eq!(std::fs::read(service.config().summary_pdf_path()).unwrap(), bytes);
    }

    #[test]
    fn safe_components() {
        assert!(is_safe_component("page1_img1_abcdef01.png"));
        assert!(is_safe_component("3f2a9c1b0d"));
        assert!(!is_safe_component("a/b"));
        assert!(!is_safe_component(".."));
        assert!(!is_safe_component("a\\b"));
    }
}
