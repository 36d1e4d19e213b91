//! HTTP integration tests for the Moodscope REST API
//!
//! Every test builds its own in-memory SQLite store and drives the full axum
//! router with `oneshot`. The remote model is a wiremock server behind the real
//! chat-completions client; the face classifier is a stub implementing the
//! adapter trait.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use moodscope_core::config::DatabaseConfig;
use moodscope_core::{
    AnalysisStore, FaceEmotionClassifier, FaceError, ModelValue, OpenRouterClient,
    TextModelSettings, TextSentimentAnalyzer, UnavailableClassifier,
};
use moodscope_server::http::build_router;
use moodscope_server::router::AppState;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BOUNDARY: &str = "moodscope-test-boundary";

// ===========================================================================
// Fixtures
// ===========================================================================

/// Face classifier that always reports one face with the given dominant emotion.
struct StubFaceClassifier {
    dominant: &'static str,
}

#[async_trait]
impl FaceEmotionClassifier for StubFaceClassifier {
    async fn analyze(&self, image_path: &Path) -> Result<Vec<ModelValue>, FaceError> {
        assert!(image_path.exists(), "upload should be saved before analysis");
        Ok(vec![ModelValue::Map(vec![
            (
                "emotion".to_string(),
                ModelValue::Map(vec![
                    (self.dominant.to_string(), ModelValue::F32(97.5)),
                    ("neutral".to_string(), ModelValue::F32(2.5)),
                ]),
            ),
            (
                "dominant_emotion".to_string(),
                ModelValue::Str(self.dominant.to_string()),
            ),
        ])])
    }

    fn name(&self) -> &str {
        "stub"
    }
}

async fn memory_store() -> AnalysisStore {
    let config = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
    };
    let pool = moodscope_core::db::create_pool(&config)
        .await
        .expect("in-memory pool");
    moodscope_core::db::init_schema(&pool).await.expect("schema");
    AnalysisStore::new(pool)
}

fn text_client(mock_server: &MockServer) -> Arc<dyn TextSentimentAnalyzer> {
    Arc::new(
        OpenRouterClient::new(TextModelSettings {
            api_key: "test-api-key".to_string(),
            model: "openai/gpt-5".to_string(),
            base_url: mock_server.uri(),
        })
        .expect("client"),
    )
}

async fn mount_reply(mock_server: &MockServer, content: &str) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": content}}]
        })))
        .mount(mock_server)
        .await;
}

async fn make_app(
    mock_server: &MockServer,
    face: Arc<dyn FaceEmotionClassifier>,
    upload_dir: PathBuf,
) -> (Router, AnalysisStore) {
    let store = memory_store().await;
    let state = AppState::new(store.clone(), text_client(mock_server), face, upload_dir);
    (build_router(Arc::new(state)), store)
}

fn multipart_body(text: Option<&str>, image: Option<(&str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    if let Some(text) = text {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"text\"\r\n\r\n{text}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some((filename, bytes)) = image {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn multipart_request(text: Option<&str>, image: Option<(&str, &[u8])>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/analyze")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(text, image)))
        .unwrap()
}

fn urlencoded_request(body: &'static str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/analyze")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

// ===========================================================================
// TEST 1: no text and no image is rejected without persisting anything
// ===========================================================================
#[tokio::test]
async fn test_analyze_without_input_is_400() {
    let mock_server = MockServer::start().await;
    let tmp = tempfile::tempdir().unwrap();
    let (app, store) = make_app(
        &mock_server,
        Arc::new(StubFaceClassifier { dominant: "happy" }),
        tmp.path().to_path_buf(),
    )
    .await;

    let (status, body) = send(&app, multipart_request(None, None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "No text or image provided"}));

    let empty_post = Request::builder()
        .method("POST")
        .uri("/analyze")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, empty_post).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(store.count().await.unwrap(), 0);
    assert!(mock_server.received_requests().await.unwrap().is_empty());
}

// ===========================================================================
// TEST 2: text flow echoes the model's JSON and stores a matching row
// ===========================================================================
#[tokio::test]
async fn test_analyze_text_end_to_end() {
    let mock_server = MockServer::start().await;
    mount_reply(
        &mock_server,
        r#"{"sentiment":{"label":"positive"},"emotion":{"joy":0.9}}"#,
    )
    .await;
    let tmp = tempfile::tempdir().unwrap();
    let (app, store) = make_app(
        &mock_server,
        Arc::new(StubFaceClassifier { dominant: "happy" }),
        tmp.path().to_path_buf(),
    )
    .await;

    let (status, body) = send(&app, multipart_request(Some("I love this!"), None)).await;
    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert_eq!(
        body,
        json!({
            "success": true,
            "result": {"sentiment": {"label": "positive"}, "emotion": {"joy": 0.9}}
        })
    );

    let history = store.history().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].text, "I love this!");
    assert_eq!(history[0].sentiment, json!({"label": "positive"}));
    assert_eq!(history[0].emotion, json!({"joy": 0.9}));
}

// ===========================================================================
// TEST 3: urlencoded forms are accepted for text
// ===========================================================================
#[tokio::test]
async fn test_analyze_urlencoded_text() {
    let mock_server = MockServer::start().await;
    mount_reply(&mock_server, r#"{"sentiment":"negative"}"#).await;
    let tmp = tempfile::tempdir().unwrap();
    let (app, store) = make_app(
        &mock_server,
        Arc::new(StubFaceClassifier { dominant: "happy" }),
        tmp.path().to_path_buf(),
    )
    .await;

    let (status, body) = send(&app, urlencoded_request("text=this+is+awful")).await;
    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert_eq!(body["result"]["sentiment"], "negative");

    let history = store.history().await.unwrap();
    assert_eq!(history[0].text, "this is awful");
    assert_eq!(history[0].emotion, json!({}));
}

// ===========================================================================
// TEST 4: remote model failure is a 500 and leaves no row
// ===========================================================================
#[tokio::test]
async fn test_remote_model_error_is_500() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"code": 429, "message": "Rate limit exceeded"}
        })))
        .expect(1)
        .mount(&mock_server)
        .await;
    let tmp = tempfile::tempdir().unwrap();
    let (app, store) = make_app(
        &mock_server,
        Arc::new(StubFaceClassifier { dominant: "happy" }),
        tmp.path().to_path_buf(),
    )
    .await;

    let (status, body) = send(&app, multipart_request(Some("hello"), None)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("Rate limit exceeded"));
    assert_eq!(store.count().await.unwrap(), 0);
}

// ===========================================================================
// TEST 5: image upload is saved, classified and stored as "Face Image (...)"
// ===========================================================================
#[tokio::test]
async fn test_analyze_image_end_to_end() {
    let mock_server = MockServer::start().await;
    let tmp = tempfile::tempdir().unwrap();
    let upload_dir = tmp.path().join("uploads");
    let (app, store) = make_app(
        &mock_server,
        Arc::new(StubFaceClassifier { dominant: "happy" }),
        upload_dir.clone(),
    )
    .await;

    let req = multipart_request(Some("ignored text"), Some(("../My Face.PNG", b"fake image")));
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK, "body: {body}");
    assert_eq!(body["success"], true);
    assert_eq!(body["result"]["sentiment"], json!({"label": "positive"}));
    assert_eq!(body["result"]["emotion"]["happy"], json!(97.5));

    assert!(upload_dir.join("My_Face.PNG").exists());

    let history = store.history().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].text, "Face Image (happy)");
    assert_eq!(history[0].sentiment, json!({"label": "positive"}));

    // The text field never reaches the remote model when an image is present
    assert!(mock_server.received_requests().await.unwrap().is_empty());
}

// ===========================================================================
// TEST 6: disallowed extension is a validation error even with text present
// ===========================================================================
#[tokio::test]
async fn test_disallowed_extension_is_400() {
    let mock_server = MockServer::start().await;
    let tmp = tempfile::tempdir().unwrap();
    let (app, store) = make_app(
        &mock_server,
        Arc::new(StubFaceClassifier { dominant: "happy" }),
        tmp.path().to_path_buf(),
    )
    .await;

    let req = multipart_request(Some("hello"), Some(("script.exe", b"MZ")));
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Unsupported image type: script.exe");
    assert_eq!(store.count().await.unwrap(), 0);
    assert!(!tmp.path().join("script.exe").exists());
}

// ===========================================================================
// TEST 7: classifier failure is a 500 with the face-detection prefix
// ===========================================================================
#[tokio::test]
async fn test_classifier_failure_is_500() {
    let mock_server = MockServer::start().await;
    let tmp = tempfile::tempdir().unwrap();
    let (app, store) = make_app(
        &mock_server,
        Arc::new(UnavailableClassifier::new("model file not found")),
        tmp.path().to_path_buf(),
    )
    .await;

    let req = multipart_request(None, Some(("face.jpg", b"jpeg bytes")));
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let message = body["error"].as_str().unwrap();
    assert!(
        message.starts_with("Face emotion detection failed: "),
        "message: {message}"
    );
    assert!(message.contains("model file not found"));
    assert_eq!(store.count().await.unwrap(), 0);
}

// ===========================================================================
// TEST 8: history is newest first with second-resolution dates, clear empties it
// ===========================================================================
#[tokio::test]
async fn test_history_and_clear() {
    let mock_server = MockServer::start().await;
    mount_reply(&mock_server, r#"{"sentiment":"neutral","emotion":{}}"#).await;
    let tmp = tempfile::tempdir().unwrap();
    let (app, _store) = make_app(
        &mock_server,
        Arc::new(StubFaceClassifier { dominant: "sad" }),
        tmp.path().to_path_buf(),
    )
    .await;

    for text in ["one", "two", "three"] {
        let (status, _) = send(&app, multipart_request(Some(text), None)).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = send(&app, get("/history")).await;
    assert_eq!(status, StatusCode::OK);
    let entries = body.as_array().expect("history is an array");
    let texts: Vec<&str> = entries.iter().map(|e| e["text"].as_str().unwrap()).collect();
    assert_eq!(texts, vec!["three", "two", "one"]);
    for entry in entries {
        let date = entry["date"].as_str().unwrap();
        assert_eq!(date.len(), 19, "date: {date}");
        assert!(chrono::NaiveDateTime::parse_from_str(date, "%Y-%m-%d %H:%M:%S").is_ok());
    }

    let clear = Request::builder()
        .method("POST")
        .uri("/clear_history")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, clear).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true}));

    let (_, body) = send(&app, get("/history")).await;
    assert_eq!(body, json!([]));
}

// ===========================================================================
// TEST 9: landing page, health and version
// ===========================================================================
#[tokio::test]
async fn test_index_health_and_version() {
    let mock_server = MockServer::start().await;
    let tmp = tempfile::tempdir().unwrap();
    let (app, _store) = make_app(
        &mock_server,
        Arc::new(StubFaceClassifier { dominant: "happy" }),
        tmp.path().to_path_buf(),
    )
    .await;

    let resp = app.clone().oneshot(get("/")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let html = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(String::from_utf8_lossy(&html).contains("<form"));

    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["analyses"], 0);
    assert!(body["sqlite"].is_string());

    let (status, body) = send(&app, get("/version")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "moodscope");
}

// ===========================================================================
// TEST 10: bodies over the configured limit are refused
// ===========================================================================
#[tokio::test]
async fn test_body_limit_enforced() {
    let mock_server = MockServer::start().await;
    let tmp = tempfile::tempdir().unwrap();
    let store = memory_store().await;
    let state = AppState::new(
        store.clone(),
        text_client(&mock_server),
        Arc::new(StubFaceClassifier { dominant: "happy" }),
        tmp.path().to_path_buf(),
    )
    .with_body_limit(1024);
    let app = build_router(Arc::new(state));

    let big = vec![b'x'; 4096];
    let (status, _) = send(&app, multipart_request(None, Some(("face.png", &big)))).await;
    assert!(status.is_client_error(), "status: {status}");
    assert_eq!(store.count().await.unwrap(), 0);
}
