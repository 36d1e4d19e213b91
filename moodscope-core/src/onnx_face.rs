//! ONNX face-emotion backend
//!
//! Uses the `ort` crate for ONNX Runtime and `image` for decoding. A FER-style
//! classifier scores grayscale face crops; an optional UltraFace-style detector
//! finds the crops first. Without a detector the whole image is one face.

use async_trait::async_trait;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use ort::session::Session;
use ort::value::Tensor;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::config::FaceModelConfig;
use crate::face::{FaceEmotionClassifier, FaceError};
use crate::normalize::ModelValue;

/// UltraFace RFB-320 input resolution.
const DETECTOR_WIDTH: u32 = 320;
const DETECTOR_HEIGHT: u32 = 240;
const NMS_IOU_THRESHOLD: f32 = 0.3;

/// A detected face box in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub confidence: f32,
}

#[derive(Debug, Clone)]
struct ClassifierSettings {
    input_size: u32,
    pixel_scale: f32,
    labels: Vec<String>,
    detection_threshold: f32,
}

/// Local face-emotion classifier backed by ONNX Runtime.
pub struct OnnxEmotionClassifier {
    classifier: Arc<Mutex<Session>>,
    detector: Option<Arc<Mutex<Session>>>,
    settings: Arc<ClassifierSettings>,
}

impl std::fmt::Debug for OnnxEmotionClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxEmotionClassifier")
            .field("labels", &self.settings.labels)
            .field("detector", &self.detector.is_some())
            .finish_non_exhaustive()
    }
}

impl OnnxEmotionClassifier {
    /// Load the classifier (and detector, when configured).
    ///
    /// Returns `FaceError::ModelNotFound` if a configured model file is missing.
    pub fn from_config(config: &FaceModelConfig) -> Result<Self, FaceError> {
        if config.labels.is_empty() {
            return Err(FaceError::Unavailable(
                "face_model.labels must not be empty".to_string(),
            ));
        }

        let classifier = load_session(&config.resolved_classifier_path())?;
        let detector = match config.resolved_detector_path() {
            Some(path) => Some(Arc::new(Mutex::new(load_session(&path)?))),
            None => None,
        };

        Ok(Self {
            classifier: Arc::new(Mutex::new(classifier)),
            detector,
            settings: Arc::new(ClassifierSettings {
                input_size: config.input_size.max(1),
                pixel_scale: if config.pixel_scale > 0.0 { config.pixel_scale } else { 1.0 },
                labels: config.labels.clone(),
                detection_threshold: config.detection_threshold,
            }),
        })
    }
}

fn load_session(path: &Path) -> Result<Session, FaceError> {
    if !path.exists() {
        return Err(FaceError::ModelNotFound {
            path: path.display().to_string(),
        });
    }

    Session::builder()
        .and_then(|b| b.with_intra_threads(1))
        .and_then(|b| b.commit_from_file(path))
        .map_err(|e| FaceError::Inference(e.to_string()))
}

#[async_trait]
impl FaceEmotionClassifier for OnnxEmotionClassifier {
    async fn analyze(&self, image_path: &Path) -> Result<Vec<ModelValue>, FaceError> {
        // Decoding and inference are CPU-bound; run on the blocking pool.
        let classifier = Arc::clone(&self.classifier);
        let detector = self.detector.clone();
        let settings = Arc::clone(&self.settings);
        let image_path = image_path.to_path_buf();

        tokio::task::spawn_blocking(move || -> Result<Vec<ModelValue>, FaceError> {
            let image = load_image(&image_path)?;

            let regions = match detector {
                Some(detector) => {
                    let mut guard = detector.lock().map_err(|e| {
                        FaceError::Inference(format!("detector lock poisoned: {e}"))
                    })?;
                    detect_faces(&mut guard, &image, settings.detection_threshold)?
                }
                None => vec![FaceRegion {
                    x: 0,
                    y: 0,
                    w: image.width(),
                    h: image.height(),
                    confidence: 0.0,
                }],
            };

            if regions.is_empty() {
                return Err(FaceError::NoFaceDetected);
            }

            let mut guard = classifier
                .lock()
                .map_err(|e| FaceError::Inference(format!("classifier lock poisoned: {e}")))?;

            regions
                .iter()
                .map(|region| classify_region(&mut guard, &image, region, &settings))
                .collect()
        })
        .await
        .map_err(|e| FaceError::Inference(format!("spawn_blocking join error: {e}")))?
    }

    fn name(&self) -> &str {
        "onnx"
    }
}

/// Decode an image, picking the format from its leading bytes rather than
/// the file extension.
fn load_image(path: &Path) -> Result<DynamicImage, FaceError> {
    Ok(ImageReader::open(path)?.with_guessed_format()?.decode()?)
}

/// Run the detector and return face boxes sorted by confidence.
fn detect_faces(
    session: &mut Session,
    image: &DynamicImage,
    threshold: f32,
) -> Result<Vec<FaceRegion>, FaceError> {
    let resized = image
        .resize_exact(DETECTOR_WIDTH, DETECTOR_HEIGHT, FilterType::Triangle)
        .to_rgb8();

    // NCHW, normalized (p - 127) / 128
    let plane = (DETECTOR_WIDTH * DETECTOR_HEIGHT) as usize;
    let mut data = vec![0.0f32; 3 * plane];
    for (x, y, pixel) in resized.enumerate_pixels() {
        let idx = (y * DETECTOR_WIDTH + x) as usize;
        for c in 0..3 {
            data[c * plane + idx] = (pixel[c] as f32 - 127.0) / 128.0;
        }
    }

    let shape = vec![1i64, 3, DETECTOR_HEIGHT as i64, DETECTOR_WIDTH as i64];
    let input = Tensor::from_array((shape, data))
        .map_err(|e| FaceError::Inference(e.to_string()))?;

    let outputs = session
        .run(ort::inputs![input])
        .map_err(|e| FaceError::Inference(e.to_string()))?;

    // scores: [1, N, 2] (background, face); boxes: [1, N, 4] relative corners
    let (_, scores) = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(|e| FaceError::Inference(e.to_string()))?;
    let (_, boxes) = outputs[1]
        .try_extract_tensor::<f32>()
        .map_err(|e| FaceError::Inference(e.to_string()))?;

    if scores.len() % 2 != 0 || boxes.len() != scores.len() * 2 {
        return Err(FaceError::Inference(format!(
            "unexpected detector output sizes: scores={}, boxes={}",
            scores.len(),
            boxes.len()
        )));
    }

    let mut candidates = Vec::new();
    for i in 0..scores.len() / 2 {
        let confidence = scores[i * 2 + 1];
        if confidence < threshold {
            continue;
        }
        let b = &boxes[i * 4..i * 4 + 4];
        candidates.push((confidence, [b[0], b[1], b[2], b[3]]));
    }

    let kept = non_max_suppression(candidates, NMS_IOU_THRESHOLD);
    Ok(kept
        .into_iter()
        .filter_map(|(confidence, b)| to_pixel_region(b, confidence, image.width(), image.height()))
        .collect())
}

/// Greedy NMS over `(confidence, [x1, y1, x2, y2])` boxes; highest confidence first.
fn non_max_suppression(mut candidates: Vec<(f32, [f32; 4])>, iou_threshold: f32) -> Vec<(f32, [f32; 4])> {
    candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

    let mut kept: Vec<(f32, [f32; 4])> = Vec::new();
    for candidate in candidates {
        if kept.iter().all(|k| iou(&k.1, &candidate.1) <= iou_threshold) {
            kept.push(candidate);
        }
    }
    kept
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ix1 = a[0].max(b[0]);
    let iy1 = a[1].max(b[1]);
    let ix2 = a[2].min(b[2]);
    let iy2 = a[3].min(b[3]);
    let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

fn to_pixel_region(b: [f32; 4], confidence: f32, width: u32, height: u32) -> Option<FaceRegion> {
    let clamp = |v: f32| v.clamp(0.0, 1.0);
    let x1 = (clamp(b[0]) * width as f32) as u32;
    let y1 = (clamp(b[1]) * height as f32) as u32;
    let x2 = (clamp(b[2]) * width as f32) as u32;
    let y2 = (clamp(b[3]) * height as f32) as u32;
    if x2 <= x1 || y2 <= y1 {
        return None;
    }
    Some(FaceRegion {
        x: x1,
        y: y1,
        w: x2 - x1,
        h: y2 - y1,
        confidence,
    })
}

/// Classify one face crop into a `{emotion, dominant_emotion, region, face_confidence}` map.
fn classify_region(
    session: &mut Session,
    image: &DynamicImage,
    region: &FaceRegion,
    settings: &ClassifierSettings,
) -> Result<ModelValue, FaceError> {
    let size = settings.input_size;
    let face = image
        .crop_imm(region.x, region.y, region.w, region.h)
        .resize_exact(size, size, FilterType::Triangle)
        .to_luma8();

    let data: Vec<f32> = face
        .pixels()
        .map(|p| p[0] as f32 / settings.pixel_scale)
        .collect();

    let shape = vec![1i64, 1, size as i64, size as i64];
    let input = Tensor::from_array((shape, data))
        .map_err(|e| FaceError::Inference(e.to_string()))?;

    let outputs = session
        .run(ort::inputs![input])
        .map_err(|e| FaceError::Inference(e.to_string()))?;

    let (_, raw) = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(|e| FaceError::Inference(e.to_string()))?;

    if raw.len() != settings.labels.len() {
        return Err(FaceError::Inference(format!(
            "classifier returned {} scores for {} labels",
            raw.len(),
            settings.labels.len()
        )));
    }

    let probabilities = to_probabilities(raw);
    Ok(face_output(&settings.labels, &probabilities, region))
}

/// Models that end in a softmax layer already emit probabilities; others get one.
fn to_probabilities(raw: &[f32]) -> Vec<f32> {
    let sum: f32 = raw.iter().sum();
    let already_normalized = raw.iter().all(|v| (0.0..=1.0).contains(v)) && (sum - 1.0).abs() < 1e-3;
    if already_normalized {
        return raw.to_vec();
    }
    softmax(raw)
}

fn softmax(x: &[f32]) -> Vec<f32> {
    let max_val = x.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let exp_vals: Vec<f32> = x.iter().map(|v| (v - max_val).exp()).collect();
    let sum: f32 = exp_vals.iter().sum();
    exp_vals.iter().map(|v| v / sum).collect()
}

/// Build the per-face output map; scores are percentages.
fn face_output(labels: &[String], probabilities: &[f32], region: &FaceRegion) -> ModelValue {
    let dominant = probabilities
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(idx, _)| labels[idx].clone())
        .unwrap_or_default();

    let emotion = labels
        .iter()
        .zip(probabilities)
        .map(|(label, p)| (label.clone(), ModelValue::F32(p * 100.0)))
        .collect();

    ModelValue::Map(vec![
        ("emotion".to_string(), ModelValue::Map(emotion)),
        ("dominant_emotion".to_string(), ModelValue::Str(dominant)),
        (
            "region".to_string(),
            ModelValue::Map(vec![
                ("x".to_string(), ModelValue::I32(region.x as i32)),
                ("y".to_string(), ModelValue::I32(region.y as i32)),
                ("w".to_string(), ModelValue::I32(region.w as i32)),
                ("h".to_string(), ModelValue::I32(region.h as i32)),
            ]),
        ),
        ("face_confidence".to_string(), ModelValue::F32(region.confidence)),
    ])
}

// ============================================================================
// TESTS
// ============================================================================
