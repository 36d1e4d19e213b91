//! Face emotion adapter
//!
//! Wraps a `FaceEmotionClassifier` backend: picks the first detected face,
//! normalizes its tensor-typed scores and maps the dominant emotion to a
//! coarse sentiment label.

use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::normalize::{normalize, ModelValue};

/// Upload extensions accepted for face analysis (compared lowercase).
pub const ALLOWED_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "tiff"];

/// True when the substring after the last `.` is an allowed image extension.
pub fn allowed_file(filename: &str) -> bool {
    match filename.rsplit_once('.') {
        Some((_, ext)) => {
            let ext = ext.to_ascii_lowercase();
            ALLOWED_EXTENSIONS.contains(&ext.as_str())
        }
        None => false,
    }
}

// ============================================================================
// Classifier trait
// ============================================================================

/// A local face-emotion model.
///
/// `analyze` returns one map per detected face, each holding at least an
/// `emotion` map (label -> score) and a `dominant_emotion` string.
#[async_trait]
pub trait FaceEmotionClassifier: Send + Sync {
    async fn analyze(&self, image_path: &Path) -> Result<Vec<ModelValue>, FaceError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

#[derive(Error, Debug)]
pub enum FaceError {
    #[error("model not found at {path}")]
    ModelNotFound { path: String },

    #[error("face emotion model unavailable: {0}")]
    Unavailable(String),

    #[error("could not read image: {0}")]
    Image(#[from] image::ImageError),

    #[error("could not open image: {0}")]
    Io(#[from] std::io::Error),

    #[error("Face could not be detected in the image")]
    NoFaceDetected,

    #[error("ONNX inference error: {0}")]
    Inference(String),

    #[error("malformed classifier output: {0}")]
    MalformedOutput(String),
}

/// Stand-in used when the ONNX model failed to load at startup; every
/// request reports the load error.
pub struct UnavailableClassifier {
    reason: String,
}

impl UnavailableClassifier {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl FaceEmotionClassifier for UnavailableClassifier {
    async fn analyze(&self, _image_path: &Path) -> Result<Vec<ModelValue>, FaceError> {
        Err(FaceError::Unavailable(self.reason.clone()))
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}

// ============================================================================
// Sentiment mapping
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

impl SentimentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Positive => "positive",
            SentimentLabel::Neutral => "neutral",
            SentimentLabel::Negative => "negative",
        }
    }
}

/// `happy`/`surprise` are positive, `neutral` is neutral, anything else negative.
/// Labels are matched exactly.
pub fn sentiment_for_emotion(dominant_emotion: &str) -> SentimentLabel {
    match dominant_emotion {
        "happy" | "surprise" => SentimentLabel::Positive,
        "neutral" => SentimentLabel::Neutral,
        _ => SentimentLabel::Negative,
    }
}

// ============================================================================
// Adapter
// ============================================================================

/// Result of analyzing one face image.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceAnalysis {
    pub dominant_emotion: String,
    /// Normalized per-emotion scores.
    pub emotion: Value,
    pub sentiment: SentimentLabel,
}

impl FaceAnalysis {
    pub fn sentiment_value(&self) -> Value {
        json!({ "label": self.sentiment.as_str() })
    }

    /// The `{emotion, sentiment}` object returned to API callers.
    pub fn to_result(&self) -> Value {
        json!({
            "emotion": self.emotion,
            "sentiment": self.sentiment_value(),
        })
    }

    /// Synthetic record text stored in place of user input.
    pub fn record_text(&self) -> String {
        format!("Face Image ({})", self.dominant_emotion)
    }
}

/// Run the classifier on a saved image and map the first face's result.
pub async fn analyze_face(
    classifier: &dyn FaceEmotionClassifier,
    image_path: &Path,
) -> Result<FaceAnalysis, FaceError> {
    let faces = classifier.analyze(image_path).await?;
    let first = faces.into_iter().next().ok_or(FaceError::NoFaceDetected)?;
    let analysis = face_analysis_from_output(&first)?;

    tracing::info!(
        backend = classifier.name(),
        dominant_emotion = %analysis.dominant_emotion,
        sentiment = analysis.sentiment.as_str(),
        "Face emotion analysis complete"
    );

    Ok(analysis)
}

fn face_analysis_from_output(output: &ModelValue) -> Result<FaceAnalysis, FaceError> {
    let normalized = normalize(output);

    let emotion = match normalized.get("emotion") {
        Some(v) if v.is_object() => v.clone(),
        Some(_) => {
            return Err(FaceError::MalformedOutput(
                "'emotion' is not a mapping".to_string(),
            ))
        }
        None => return Err(FaceError::MalformedOutput("missing 'emotion'".to_string())),
    };

    let dominant_emotion = normalized
        .get("dominant_emotion")
        .and_then(Value::as_str)
        .ok_or_else(|| FaceError::MalformedOutput("missing 'dominant_emotion'".to_string()))?
        .to_string();

    Ok(FaceAnalysis {
        sentiment: sentiment_for_emotion(&dominant_emotion),
        dominant_emotion,
        emotion,
    })
}
