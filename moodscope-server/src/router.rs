//! Analysis dispatch
//!
//! Classifies a submitted form as image, text or nothing, runs the matching
//! adapter and persists the outcome. Every step returns `AnalyzeError`, which
//! the HTTP layer maps onto a status code.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use moodscope_core::{
    allowed_file, analyze_face, save_upload, secure_filename, AnalysisStore,
    FaceEmotionClassifier, ModelReply, NewAnalysis, TextSentimentAnalyzer,
};
use serde_json::{json, Value};
use thiserror::Error;

/// Default request body cap (16 MiB).
pub const DEFAULT_BODY_LIMIT: usize = 16 * 1024 * 1024;

/// Everything a request handler needs, constructed once at startup.
#[derive(Clone)]
pub struct AppState {
    pub store: AnalysisStore,
    pub text_analyzer: Arc<dyn TextSentimentAnalyzer>,
    pub face_classifier: Arc<dyn FaceEmotionClassifier>,
    pub upload_dir: PathBuf,
    pub body_limit: usize,
}

impl AppState {
    pub fn new(
        store: AnalysisStore,
        text_analyzer: Arc<dyn TextSentimentAnalyzer>,
        face_classifier: Arc<dyn FaceEmotionClassifier>,
        upload_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            text_analyzer,
            face_classifier,
            upload_dir,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }

    pub fn with_body_limit(mut self, body_limit: usize) -> Self {
        self.body_limit = body_limit;
        self
    }
}

/// An uploaded file as received from the client.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub filename: String,
    pub bytes: Bytes,
}

/// Raw `/analyze` form fields.
#[derive(Debug, Clone, Default)]
pub struct AnalyzeForm {
    pub text: Option<String>,
    pub image: Option<UploadedImage>,
}

/// The branch a request takes.
#[derive(Debug, Clone)]
pub enum AnalyzeInput {
    Image(UploadedImage),
    Text(String),
}

#[derive(Error, Debug)]
pub enum AnalyzeError {
    /// Unusable input; nothing was persisted.
    #[error("{0}")]
    Validation(String),

    /// The classifier or the remote model failed.
    #[error("{0}")]
    Inference(String),

    /// The upload or the record could not be written.
    #[error("{0}")]
    Persistence(String),
}

/// Decide which branch a form takes.
///
/// An image with a disallowed extension is rejected outright rather than
/// falling back to the text field.
pub fn classify_input(form: AnalyzeForm) -> Result<AnalyzeInput, AnalyzeError> {
    if let Some(image) = form.image.filter(|i| !i.filename.is_empty()) {
        if !allowed_file(&image.filename) {
            return Err(AnalyzeError::Validation(format!(
                "Unsupported image type: {}",
                image.filename
            )));
        }
        return Ok(AnalyzeInput::Image(image));
    }

    match form.text.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => Ok(AnalyzeInput::Text(text.to_string())),
        _ => Err(AnalyzeError::Validation("No text or image provided".to_string())),
    }
}

/// Run one analysis end to end and return the `result` object.
pub async fn analyze(state: &AppState, form: AnalyzeForm) -> Result<Value, AnalyzeError> {
    let input = classify_input(form)?;

    let (record, result) = match input {
        AnalyzeInput::Image(image) => analyze_image(state, image).await?,
        AnalyzeInput::Text(text) => analyze_text(state, text).await?,
    };

    state
        .store
        .append(&record)
        .await
        .map_err(|e| AnalyzeError::Persistence(e.to_string()))?;

    Ok(result)
}

async fn analyze_image(
    state: &AppState,
    image: UploadedImage,
) -> Result<(NewAnalysis, Value), AnalyzeError> {
    let filename = stored_filename(&image.filename).ok_or_else(|| {
        AnalyzeError::Validation(format!("Unsupported image type: {}", image.filename))
    })?;

    let path = save_upload(&state.upload_dir, &filename, &image.bytes)
        .await
        .map_err(|e| AnalyzeError::Persistence(format!("Failed to save upload: {e}")))?;

    let analysis = analyze_face(state.face_classifier.as_ref(), &path)
        .await
        .map_err(|e| {
            tracing::error!(file = %filename, error = %e, "Face emotion detection failed");
            AnalyzeError::Inference(format!("Face emotion detection failed: {e}"))
        })?;

    let record = NewAnalysis {
        text: analysis.record_text(),
        sentiment: analysis.sentiment_value(),
        emotion: analysis.emotion.clone(),
    };
    Ok((record, analysis.to_result()))
}

/// Name an upload is saved under.
///
/// Uses the sanitized client name when it still carries an allowed
/// extension. Names whose stem or extension does not survive sanitizing
/// (non-ASCII stems, for one) become `upload.<ext>` with the original
/// extension. `None` when the original extension is not allowed.
fn stored_filename(original: &str) -> Option<String> {
    if !allowed_file(original) {
        return None;
    }

    let sanitized = secure_filename(original);
    if allowed_file(&sanitized) {
        return Some(sanitized);
    }

    let (_, ext) = original.rsplit_once('.')?;
    Some(format!("upload.{}", ext.to_ascii_lowercase()))
}

async fn analyze_text(
    state: &AppState,
    text: String,
) -> Result<(NewAnalysis, Value), AnalyzeError> {
    let reply = state.text_analyzer.analyze(&text).await.map_err(|e| {
        tracing::error!(backend = state.text_analyzer.name(), error = %e, "Text sentiment request failed");
        AnalyzeError::Inference(e.to_string())
    })?;

    let map = match reply {
        ModelReply::Structured(map) => map,
        ModelReply::Unstructured { reason, .. } => {
            return Err(AnalyzeError::Inference(format!(
                "Model reply is not valid JSON: {reason}"
            )))
        }
    };

    let record = NewAnalysis {
        text,
        sentiment: map.get("sentiment").cloned().unwrap_or_else(|| json!({})),
        emotion: map.get("emotion").cloned().unwrap_or_else(|| json!({})),
    };
    Ok((record, Value::Object(map)))
}
