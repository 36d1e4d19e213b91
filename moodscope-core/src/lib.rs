pub mod config;
pub mod db;
pub mod error;
pub mod face;
pub mod models;
pub mod normalize;
pub mod onnx_face;
pub mod sentiment;
pub mod upload;

pub use config::MoodscopeConfig;
pub use db::{AnalysisStore, HISTORY_LIMIT};
pub use error::MoodscopeError;
pub use face::{
    allowed_file, analyze_face, sentiment_for_emotion, FaceAnalysis, FaceEmotionClassifier,
    FaceError, SentimentLabel, UnavailableClassifier, ALLOWED_EXTENSIONS,
};
pub use models::{AnalysisRow, HistoryEntry, NewAnalysis};
pub use normalize::{normalize, ModelValue};
pub use onnx_face::OnnxEmotionClassifier;
pub use sentiment::{
    ModelReply, OpenRouterClient, SentimentError, TextModelSettings, TextSentimentAnalyzer,
};
pub use upload::{save_upload, secure_filename};
