use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

use crate::error::MoodscopeError;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MoodscopeConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub uploads: UploadConfig,
    #[serde(default)]
    pub text_model: TextModelConfig,
    #[serde(default)]
    pub face_model: FaceModelConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://moodscope.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct UploadConfig {
    pub dir: String,
    pub max_bytes: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            dir: "uploads".to_string(),
            max_bytes: 16 * 1024 * 1024,
        }
    }
}

impl UploadConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.dir).into_owned())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TextModelConfig {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
}

impl Default for TextModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model: "openai/gpt-5".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

impl TextModelConfig {
    /// Read the API key from the configured environment variable.
    /// An unset or blank variable is an error.
    pub fn api_key(&self) -> Result<String, MoodscopeError> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(MoodscopeError::MissingApiKey(self.api_key_env.clone())),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FaceModelConfig {
    pub classifier_path: String,
    /// Empty disables face detection; the whole image is classified as one face.
    pub detector_path: String,
    pub input_size: u32,
    pub pixel_scale: f32,
    pub labels: Vec<String>,
    pub detection_threshold: f32,
}

impl Default for FaceModelConfig {
    fn default() -> Self {
        Self {
            classifier_path: "~/.local/share/moodscope/models/facial_expression.onnx".to_string(),
            detector_path: String::new(),
            input_size: 48,
            pixel_scale: 255.0,
            labels: ["angry", "disgust", "fear", "happy", "sad", "surprise", "neutral"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            detection_threshold: 0.7,
        }
    }
}

impl FaceModelConfig {
    pub fn resolved_classifier_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.classifier_path).into_owned())
    }

    pub fn resolved_detector_path(&self) -> Option<PathBuf> {
        if self.detector_path.trim().is_empty() {
            None
        } else {
            Some(PathBuf::from(shellexpand::tilde(&self.detector_path).into_owned()))
        }
    }
}

impl MoodscopeConfig {
    /// Load configuration from an optional TOML file, then apply
    /// `MOODSCOPE__SECTION__KEY` environment overrides.
    pub fn load(path: &str) -> Result<Self, MoodscopeError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("MOODSCOPE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(s.try_deserialize()?)
    }
}
