use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Multipart, State};
use axum::http::{HeaderValue, header};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tempfile::NamedTempFile;

use super::state::{SharedDetector, VideoIo};
use super::{ApiError, AppState};
use crate::annotate::Annotator;
use crate::integration::{TrackerPipeline, VideoAnalysis};
use crate::tracker::TrackerConfig;
use crate::video::{VideoError, check_extension};

pub const UNSUPPORTED_FORMAT: &str = "Unsupported video format. Use MP4, AVI or MOV.";
pub const OPEN_FAILED: &str = "Unable to open the video";
pub const VIDEO_UNAVAILABLE: &str = "Video processing is not available: no detector or video backend loaded";
pub const NO_TEXT: &str = "No text provided.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub reply: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateRequest {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslateResponse {
    pub translated_text: String,
}

struct Upload {
    file_name: String,
    data: Bytes,
}

pub async fn root() -> Json<Value> {
    Json(json!({
        "message": "Object detection and tracking API",
        "endpoints": {
            "/detect-video": "POST - Analyze a video",
            "/detect-video-stream": "POST - Process and return the annotated video",
            "/health": "GET - Check server status",
            "/chat": "POST - Ask the FAQ assistant",
            "/api/translate": "POST - Translate text",
        }
    }))
}

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "status": "ok", "models_loaded": state.models_loaded() }))
}

pub async fn detect_video(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<VideoAnalysis>, ApiError> {
    let backend = VideoBackend::from_state(&state)?;
    let upload = read_upload(multipart).await?;
    tracing::info!(file = %upload.file_name, bytes = upload.data.len(), "analyzing upload");
    let analysis =
        tokio::task::spawn_blocking(move || analyze_upload(&backend, &upload)).await??;
    Ok(Json(analysis))
}

pub async fn detect_video_stream(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let backend = VideoBackend::from_state(&state)?;
    let upload = read_upload(multipart).await?;
    tracing::info!(file = %upload.file_name, bytes = upload.data.len(), "annotating upload");
    let disposition = format!("attachment; filename=annotated_{}", upload.file_name);
    let video =
        tokio::task::spawn_blocking(move || annotate_upload(&backend, &upload)).await??;

    let disposition = HeaderValue::from_str(&disposition)
        .unwrap_or_else(|_| HeaderValue::from_static("attachment; filename=annotated.mp4"));
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("video/mp4")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        video,
    )
        .into_response())
}

pub async fn chat(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let faq = state
        .faq
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("FAQ is not loaded".to_string()))?;
    let reply = faq
        .reply(&request.message)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(ChatResponse { reply }))
}

pub async fn translate(
    State(state): State<AppState>,
    Json(request): Json<TranslateRequest>,
) -> Result<Json<TranslateResponse>, ApiError> {
    if request.text.is_empty() {
        return Err(ApiError::BadRequest(NO_TEXT.to_string()));
    }
    let to = request
        .to
        .as_deref()
        .filter(|to| !to.is_empty())
        .ok_or_else(|| ApiError::BadRequest("No target language provided.".to_string()))?;
    let translator = state
        .translator
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("Translator is not configured".to_string()))?;
    let translated_text = translator
        .translate(&request.text, request.from.as_deref(), to)
        .await?;
    Ok(Json(TranslateResponse { translated_text }))
}

/// Detector, video backend and tracker settings one video request needs.
struct VideoBackend {
    detector: SharedDetector,
    video: Arc<dyn VideoIo>,
    tracker: TrackerConfig,
    annotator: Arc<Annotator>,
}

impl VideoBackend {
    fn from_state(state: &AppState) -> Result<Self, ApiError> {
        match (&state.detector, &state.video) {
            (Some(detector), Some(video)) => Ok(Self {
                detector: detector.clone(),
                video: video.clone(),
                tracker: state.tracker.clone(),
                annotator: state.annotator.clone(),
            }),
            _ => Err(ApiError::Unavailable(VIDEO_UNAVAILABLE.to_string())),
        }
    }

    fn pipeline(&self) -> Result<TrackerPipeline<SharedDetector>, ApiError> {
        TrackerPipeline::new(self.detector.clone(), self.tracker.clone()).map_err(processing)
    }
}

/// Take the `file` field, rejecting unsupported extensions before reading the body.
async fn read_upload(mut multipart: Multipart) -> Result<Upload, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        check_extension(&file_name).map_err(|_| ApiError::BadRequest(UNSUPPORTED_FORMAT.into()))?;
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        return Ok(Upload { file_name, data });
    }
    Err(ApiError::BadRequest("missing multipart field `file`".to_string()))
}

fn processing(e: impl std::fmt::Display) -> ApiError {
    ApiError::Internal(format!("Error during processing: {e}"))
}

/// Files FFmpeg cannot read are the client's fault; anything else is ours.
fn open_failed(upload: &Upload, e: VideoError) -> ApiError {
    if e.is_bad_input() {
        tracing::warn!(file = %upload.file_name, error = %e, "cannot open upload");
        ApiError::BadRequest(OPEN_FAILED.to_string())
    } else {
        processing(e)
    }
}

/// Copy the upload to a temp file keeping its extension; removed on drop.
fn spool(upload: &Upload) -> Result<NamedTempFile, ApiError> {
    let suffix = Path::new(&upload.file_name)
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();
    let mut file = tempfile::Builder::new()
        .prefix("vidtrack-")
        .suffix(&suffix)
        .tempfile()
        .map_err(processing)?;
    file.write_all(&upload.data).map_err(processing)?;
    file.flush().map_err(processing)?;
    Ok(file)
}

fn analyze_upload(backend: &VideoBackend, upload: &Upload) -> Result<VideoAnalysis, ApiError> {
    let input = spool(upload)?;
    let mut source = backend
        .video
        .open(input.path())
        .map_err(|e| open_failed(upload, e))?;
    backend.pipeline()?.analyze(source.as_mut()).map_err(processing)
}

fn annotate_upload(backend: &VideoBackend, upload: &Upload) -> Result<Vec<u8>, ApiError> {
    let input = spool(upload)?;
    let mut source = backend
        .video
        .open(input.path())
        .map_err(|e| open_failed(upload, e))?;
    let output = tempfile::Builder::new()
        .prefix("vidtrack-annotated-")
        .suffix(".mp4")
        .tempfile()
        .map_err(processing)?;

    let info = source.info();
    let mut sink = backend
        .video
        .create(output.path(), &info)
        .map_err(processing)?;
    backend
        .pipeline()?
        .annotate(source.as_mut(), sink.as_mut(), &backend.annotator)
        .map_err(processing)?;
    drop(sink);

    std::fs::read(output.path()).map_err(processing)
}
