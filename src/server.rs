//! HTTP surface: an axum router over a shared [`BriefingService`].
//!
//! Routes keep the paths and payload shapes the web client expects:
//!
//! | Method | Path                            | Body / response                      |
//! |--------|---------------------------------|--------------------------------------|
//! | GET    | `/`                             | `{"message": ...}`                   |
//! | POST   | `/analyze-pdf/`                 | multipart `file` → analysis JSON     |
//! | POST   | `/ask-question/`                | `{"question"}` → `{"answer"}`        |
//! | POST   | `/narrate-answer/`              | `{"summary"}` → `audio/mpeg`         |
//! | POST   | `/narrate-summary/`             | `{"summary"}` → `audio/mpeg`         |
//! | POST   | `/download-summary/`            | `{"summary"}` → `summary.pdf`        |
//! | POST   | `/clear-chat/`                  | `{"message": ...}`                   |
//! | GET    | `/last-answer-audio.mp3`        | last narrated answer                 |
//! | GET    | `/extracted_images/:run/:name`  | one extracted PNG                    |
//!
//! Every failure is a JSON `{"error": "<message>"}` body: 400 for bad input,
//! 404 for missing artefacts, 500 otherwise.

use crate::error::BizBotError;
use crate::output::{AnalysisOutput, AnswerOutput, MessageOutput};
use crate::service::{BriefingService, IMAGES_ROUTE};
use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

/// Name of the multipart field carrying the PDF.
const UPLOAD_FIELD: &str = "file";

/// Body of `/ask-question/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionRequest {
    pub question: String,
}

/// Body of the narrate and download routes. The field is called `summary`
/// for every route, answers included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextRequest {
    pub summary: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for BizBotError {
    fn into_response(self) -> Response {
        let status = match &self {
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            BizBotError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected: {}", self);
        }
        let body = Json(ErrorResponse {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}

/// Build the application router.
pub fn router(service: Arc<BriefingService>) -> Router {
    let max_upload = service.config().max_upload_bytes;

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/analyze-pdf/", post(analyze_pdf))
        .route("/ask-question/", post(ask_question))
        .route("/narrate-answer/", post(narrate_answer))
        .route("/narrate-summary/", post(narrate_summary))
        .route("/download-summary/", post(download_summary))
        .route("/clear-chat/", post(clear_chat))
        .route("/last-answer-audio.mp3", get(last_answer_audio))
        .route(&format!("/{IMAGES_ROUTE}/:run/:name"), get(extracted_image))
        .layer(DefaultBodyLimit::max(max_upload))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(service)
}

// ── Handlers ─────────────────────────────────────────────────────────────

async fn root() -> Json<MessageOutput> {
    Json(MessageOutput::new("BizBot backend is running"))
}

async fn analyze_pdf(
    State(service): State<Arc<BriefingService>>,
    mut multipart: Multipart,
) -> Result<Json<AnalysisOutput>, BizBotError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| BizBotError::InvalidUpload(e.body_text()))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            debug!("Ignoring multipart field {:?}", field.name());
            continue;
        }
        debug!("Receiving upload {:?}", field.file_name());
        let data = field
            .bytes()
            .await
            .map_err(|e| BizBotError::InvalidUpload(e.body_text()))?;
        return service.analyze(data.to_vec()).await.map(Json);
    }
    Err(BizBotError::InvalidUpload(format!(
        "no '{UPLOAD_FIELD}' field in multipart body"
    )))
}

async fn ask_question(
    State(service): State<Arc<BriefingService>>,
    body: Result<Json<QuestionRequest>, JsonRejection>,
) -> Result<Json<AnswerOutput>, BizBotError> {
    let Json(req) = body.map_err(rejection)?;
    service.ask(&req.question).await.map(Json)
}

async fn narrate_answer(
    State(service): State<Arc<BriefingService>>,
    body: Result<Json<TextRequest>, JsonRejection>,
) -> Result<Response, BizBotError> {
    let Json(req) = body.map_err(rejection)?;
    let audio = service.narrate_answer(&req.summary).await?;
    Ok(audio_response(audio))
}

async fn narrate_summary(
    State(service): State<Arc<BriefingService>>,
    body: Result<Json<TextRequest>, JsonRejection>,
) -> Result<Response, BizBotError> {
    let Json(req) = body.map_err(rejection)?;
    let audio = service.narrate_summary(&req.summary).await?;
    Ok(audio_response(audio))
}

async fn download_summary(
    State(service): State<Arc<BriefingService>>,
    body: Result<Json<TextRequest>, JsonRejection>,
) -> Result<Response, BizBotError> {
    let Json(req) = body.map_err(rejection)?;
    let pdf = service.render_pdf(&req.summary).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"summary.pdf\""),
        ],
        pdf,
    )
        .into_response())
}

async fn clear_chat(State(service): State<Arc<BriefingService>>) -> Json<MessageOutput> {
    Json(service.clear_chat())
}

async fn last_answer_audio(
    State(service): State<Arc<BriefingService>>,
) -> Result<Response, BizBotError> {
    Ok(audio_response(service.last_answer_audio().await?))
}

async fn extracted_image(
    State(service): State<Arc<BriefingService>>,
    Path((run, name)): Path<(String, String)>,
) -> Result<Response, BizBotError> {
    let png = service.extracted_image(&run, &name).await?;
    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn audio_response(audio: Vec<u8>) -> Response {
    ([(header::CONTENT_TYPE, "audio/mpeg")], audio).into_response()
}

fn rejection(e: JsonRejection) -> BizBotError {
    BizBotError::InvalidRequest(e.body_text())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn into_parts(err: BizBotError) -> (StatusCode, serde_json::Value) {
        let resp = err.into_response();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn client_errors_are_400() {
        let (status, body) = into_parts(BizBotError::EmptyInput { what: "question" }).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "No question provided: input is empty");

        let (status, _) = into_parts(BizBotError::NotAPdf { magic: b"GIF8".to_vec() }).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_artefacts_are_404() {
        let (status, body) = into_parts(BizBotError::NotFound("Audio".into())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Audio not found");
    }

    #[tokio::test]
    async fn everything_else_is_500() {
        let (status, body) = into_parts(BizBotError::SpeechFailed("HTTP 503".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("HTTP 503"));
    }
}
