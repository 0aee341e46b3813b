// HTTP API tests against an in-memory video backend and a scripted detector.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use axum::response::IntoResponse;
use image::RgbImage;
use serde_json::{Value, json};
use tower::ServiceExt;

use vidtrack::faq::{FALLBACK_REPLY, FaqEntry, FaqMatcher, HashingEmbedder};
use vidtrack::integration::{DetectionSource, boxed};
use vidtrack::server::{
    AppState, NO_TEXT, OPEN_FAILED, UNSUPPORTED_FORMAT, VIDEO_UNAVAILABLE, VideoIo, create_router,
};
use vidtrack::translate::Translator;
use vidtrack::video::{FrameSink, FrameSource, MemorySource, VideoError, VideoInfo};
use vidtrack::{Detection, TrackerConfig};

const FAKE_VIDEO: &[u8] = b"FAKE-VIDEO";
const DISK_FAILURE: &[u8] = b"DISK-FAILURE";
const FRAMES: usize = 12;

/// Uploads starting with [`FAKE_VIDEO`] decode to blank frames, [`DISK_FAILURE`]
/// fails on the host side, and anything else is not a video.
struct FakeIo;

impl VideoIo for FakeIo {
    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>, VideoError> {
        let content = std::fs::read(path)?;
        if content.starts_with(FAKE_VIDEO) {
            Ok(Box::new(MemorySource::blank(64, 96, FRAMES, 25.0)))
        } else if content.starts_with(DISK_FAILURE) {
            Err(VideoError::Io(std::io::Error::other("input/output error")))
        } else {
            Err(VideoError::Unreadable {
                path: path.to_path_buf(),
                reason: "Invalid data found when processing input".to_string(),
            })
        }
    }

    fn create(&self, path: &Path, _info: &VideoInfo) -> Result<Box<dyn FrameSink>, VideoError> {
        Ok(Box::new(CountingSink {
            path: path.to_path_buf(),
            frames: 0,
        }))
    }
}

/// Writes the number of frames it received to its output path.
struct CountingSink {
    path: PathBuf,
    frames: usize,
}

impl FrameSink for CountingSink {
    fn write_frame(&mut self, _frame: &RgbImage) -> Result<(), VideoError> {
        self.frames += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), VideoError> {
        std::fs::write(&self.path, format!("frames={}", self.frames))?;
        Ok(())
    }
}

struct StillPerson;

impl DetectionSource for StillPerson {
    type Error = std::convert::Infallible;

    fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<Detection>, Self::Error> {
        Ok(vec![Detection::new(10.0, 20.0, 50.0, 80.0, 0.9, 0, "person")])
    }
}

/// Panics on its first call, then detects like [`StillPerson`].
struct PanicsOnce(AtomicBool);

impl DetectionSource for PanicsOnce {
    type Error = std::convert::Infallible;

    fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, Self::Error> {
        if !self.0.swap(true, Ordering::SeqCst) {
            panic!("model crashed");
        }
        StillPerson.detect(frame)
    }
}

struct Broken;

impl DetectionSource for Broken {
    type Error = std::io::Error;

    fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<Detection>, Self::Error> {
        Err(std::io::Error::other("inference crashed"))
    }
}

fn faq() -> FaqMatcher {
    let entries = vec![
        FaqEntry {
            question: "What are your opening hours?".to_string(),
            answer: "We are open from 9am to 6pm.".to_string(),
        },
        FaqEntry {
            question: "How can I reset my password?".to_string(),
            answer: "Use the forgot password link.".to_string(),
        },
    ];
    FaqMatcher::new(entries, Arc::new(HashingEmbedder::default())).unwrap()
}

fn video_state(detector: impl DetectionSource + Send + 'static) -> AppState {
    AppState::new(TrackerConfig::default())
        .with_detector(boxed(detector))
        .with_video(FakeIo)
}

fn app() -> Router {
    create_router(video_state(StillPerson).with_faq(faq()))
}

fn upload(uri: &str, file_name: &str, content: &[u8]) -> Request<Body> {
    let boundary = "vidtrack-test-boundary";
    let mut body = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_and_root() {
    let response = app()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({ "status": "ok", "models_loaded": true })
    );

    let response = app()
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let body = json_body(response).await;
    assert!(body["endpoints"].get("/detect-video").is_some());
    assert!(body["endpoints"].get("/detect-video-stream").is_some());
}

#[tokio::test]
async fn test_rejects_unsupported_extension() {
    let response = app()
        .oneshot(upload("/detect-video", "notes.txt", FAKE_VIDEO))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["detail"], UNSUPPORTED_FORMAT);

    let response = app()
        .oneshot(upload("/detect-video-stream", "clip.mkv", FAKE_VIDEO))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unreadable_video_is_bad_request() {
    let response = app()
        .oneshot(upload("/detect-video", "clip.mp4", b"garbage"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["detail"], OPEN_FAILED);
}

#[tokio::test]
async fn test_detect_video_reports_sampled_frames() {
    let response = app()
        .oneshot(upload("/detect-video", "Clip.MOV", FAKE_VIDEO))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "success");
    assert_eq!(body["total_frames"], FRAMES);
    assert_eq!(body["sampled_frames"], 6);

    let frames = body["frames"].as_array().unwrap();
    let numbers: Vec<u64> = frames
        .iter()
        .map(|f| f["frame_number"].as_u64().unwrap())
        .collect();
    assert_eq!(numbers, vec![0, 1, 2, 3, 4, 10]);

    assert_eq!(frames[0]["detections"][0]["bbox"], json!([10, 20, 50, 80]));
    assert_eq!(frames[0]["detections"][0]["class_name"], "person");
    assert!(frames[1]["tracks"].as_array().unwrap().is_empty());
    assert_eq!(frames[2]["tracks"][0]["id"], 1);
    assert_eq!(frames[2]["tracks"][0]["class"], "person");
}

#[tokio::test]
async fn test_every_request_starts_a_fresh_tracker() {
    let app = app();
    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(upload("/detect-video", "clip.mp4", FAKE_VIDEO))
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["frames"][2]["tracks"][0]["id"], 1);
    }
}

#[tokio::test]
async fn test_detection_failure_is_server_error() {
    let response = create_router(video_state(Broken))
        .oneshot(upload("/detect-video", "clip.avi", FAKE_VIDEO))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let detail = json_body(response).await["detail"].as_str().unwrap().to_string();
    assert!(detail.contains("inference crashed"), "{detail}");
}

#[tokio::test]
async fn test_stream_returns_annotated_video() {
    let response = app()
        .oneshot(upload("/detect-video-stream", "clip.mp4", FAKE_VIDEO))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=annotated_clip.mp4"
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], format!("frames={FRAMES}").as_bytes());
}

#[tokio::test]
async fn test_chat_replies_from_faq() {
    let chat = |message: &str| {
        Request::post("/chat")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({ "message": message }).to_string()))
            .unwrap()
    };

    let response = app().oneshot(chat("what are the opening hours")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["reply"], "We are open from 9am to 6pm.");

    let response = app().oneshot(chat("zqxj vbnm")).await.unwrap();
    assert_eq!(json_body(response).await["reply"], FALLBACK_REPLY);
}

#[tokio::test]
async fn test_chat_without_faq_is_unavailable() {
    let response = create_router(video_state(StillPerson))
        .oneshot(
            Request::post("/chat")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"message":"hello"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_host_side_open_failure_is_server_error() {
    let response = app()
        .oneshot(upload("/detect-video", "clip.mp4", DISK_FAILURE))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_ne!(json_body(response).await["detail"], OPEN_FAILED);

    let response = app()
        .oneshot(upload("/detect-video-stream", "clip.mp4", DISK_FAILURE))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_detector_panic_fails_only_that_request() {
    let app = create_router(video_state(PanicsOnce(AtomicBool::new(false))));

    let response = app
        .clone()
        .oneshot(upload("/detect-video", "clip.mp4", FAKE_VIDEO))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let response = app
        .oneshot(upload("/detect-video", "clip.mp4", FAKE_VIDEO))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["frames"][2]["tracks"][0]["id"], 1);
}

#[tokio::test]
async fn test_chat_works_without_video_backend() {
    let app = create_router(AppState::new(TrackerConfig::default()).with_faq(faq()));

    let response = app
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(
        json_body(response).await,
        json!({ "status": "ok", "models_loaded": false })
    );

    let response = app
        .clone()
        .oneshot(upload("/detect-video", "clip.mp4", FAKE_VIDEO))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json_body(response).await["detail"], VIDEO_UNAVAILABLE);

    // A detector alone is not enough to decode uploads.
    let detector_only = create_router(
        AppState::new(TrackerConfig::default()).with_detector(boxed(StillPerson)),
    );
    let response = detector_only
        .oneshot(upload("/detect-video-stream", "clip.mp4", FAKE_VIDEO))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let response = app
        .oneshot(
            Request::post("/chat")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"message":"how do I reset my password"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["reply"], "Use the forgot password link.");
}

fn translate_request(body: Value) -> Request<Body> {
    Request::post("/api/translate")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Local stand-in for Azure Translator that upper-cases the text it receives,
/// or rejects every request with 403 when `reject` is set.
async fn fake_translator(reject: bool) -> Translator {
    use axum::routing::post;

    let service = Router::new().route(
        "/translate",
        post(move |axum::Json(body): axum::Json<Value>| async move {
            if reject {
                return (StatusCode::FORBIDDEN, "quota exceeded".to_string()).into_response();
            }
            let text = body[0]["Text"].as_str().unwrap_or_default().to_uppercase();
            axum::Json(json!([{ "translations": [{ "text": text, "to": "xx" }] }])).into_response()
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, service).await.unwrap() });

    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    Translator::with_client(client, format!("http://{addr}"), "key", None)
}

#[tokio::test]
async fn test_translate_proxies_to_service() {
    let app = create_router(
        AppState::new(TrackerConfig::default()).with_translator(fake_translator(false).await),
    );
    let response = app
        .oneshot(translate_request(json!({ "text": "hello", "from": "auto", "to": "xx" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "translatedText": "HELLO" }));
}

#[tokio::test]
async fn test_translate_errors() {
    let app = create_router(
        AppState::new(TrackerConfig::default()).with_translator(fake_translator(true).await),
    );

    let response = app
        .clone()
        .oneshot(translate_request(json!({ "text": "", "to": "de" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["detail"], NO_TEXT);

    let response = app
        .oneshot(translate_request(json!({ "text": "hello", "to": "de" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let detail = json_body(response).await["detail"].as_str().unwrap().to_string();
    assert!(detail.contains("quota exceeded"), "{detail}");

    let unconfigured = create_router(AppState::new(TrackerConfig::default()));
    let response = unconfigured
        .oneshot(translate_request(json!({ "text": "hello", "to": "de" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}
