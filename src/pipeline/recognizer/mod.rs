mod common;
mod palm;

use anyhow::{Context, Result, anyhow};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use self::palm::{PalmDetector, PalmDetectorConfig, PalmRegion, crop_from_palm, top_regions};
use super::landmarks::{LandmarkResult, LandmarkSource};
use crate::{
    config::LandmarkConfig,
    model_download::{ModelKind, ensure_model_ready},
    types::{Frame, Handedness, Landmark},
};

/// Palm detection followed by per-hand landmark regression, both on ONNX
/// Runtime.
pub struct OrtLandmarkSource {
    models: Option<Models>,
    max_hands: usize,
    min_confidence: f32,
}

struct Models {
    handpose: Session,
    palm_detector: PalmDetector,
}

impl OrtLandmarkSource {
    /// Loads both models, downloading them first if they are missing.
    pub fn new(cfg: &LandmarkConfig) -> Result<Self> {
        ensure_model_ready(ModelKind::HandposeEstimator, &cfg.handpose_model, |_| {})?;
        ensure_model_ready(ModelKind::PalmDetector, &cfg.palm_model, |_| {})?;

        let handpose = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(cfg.intra_threads)?
            .commit_from_file(&cfg.handpose_model)
            .with_context(|| {
                format!(
                    "failed to load ORT session from {}",
                    cfg.handpose_model.display()
                )
            })?;

        let palm_detector = PalmDetector::new(
            &cfg.palm_model,
            PalmDetectorConfig {
                score_threshold: cfg.palm_score_threshold,
                nms_threshold: cfg.palm_nms_threshold,
                ..PalmDetectorConfig::default()
            },
            cfg.intra_threads,
        )?;

        log::info!(
            "handpose ORT backend ready using {} and palm detector {}",
            cfg.handpose_model.display(),
            cfg.palm_model.display()
        );

        Ok(Self {
            models: Some(Models {
                handpose,
                palm_detector,
            }),
            max_hands: cfg.max_hands,
            min_confidence: cfg.min_hand_confidence,
        })
    }
}

impl LandmarkSource for OrtLandmarkSource {
    fn detect(&mut self, frame: &Frame) -> Result<LandmarkResult> {
        let Some(models) = self.models.as_mut() else {
            return Err(anyhow!("landmark models already released"));
        };

        let regions = models.palm_detector.detect(frame)?;
        let mut result = LandmarkResult::default();
        for region in top_regions(&regions, self.max_hands) {
            match estimate_hand(&mut models.handpose, frame, region) {
                Ok(hand) if hand.confidence >= self.min_confidence => {
                    result.hands.push(hand.landmarks);
                    result.labels.push(hand.side);
                }
                Ok(hand) => {
                    log::debug!("dropping hand with confidence {:.2}", hand.confidence);
                }
                Err(err) => {
                    log::debug!("handpose inference failed: {err:?}");
                }
            }
        }
        Ok(result)
    }

    fn release(&mut self) {
        if self.models.take().is_some() {
            log::info!("handpose models released");
        }
    }
}

struct HandEstimate {
    landmarks: Vec<Landmark>,
    confidence: f32,
    side: Handedness,
}

fn estimate_hand(
    handpose: &mut Session,
    frame: &Frame,
    region: &PalmRegion,
) -> Result<HandEstimate> {
    let (center, side, angle) = crop_from_palm(region);
    let (input, transform) = common::prepare_rotated_crop(
        frame,
        center,
        side,
        angle,
        common::HANDPOSE_INPUT_SIZE,
    )?;
    let tensor = Tensor::from_array(input)?;
    let outputs = handpose
        .run(ort::inputs![tensor])
        .context("failed to run ORT session")?;

    if outputs.len() < 1 {
        return Err(anyhow!("model returned no outputs"));
    }

    let coords = outputs[0].try_extract_array::<f32>()?;
    let flattened: Vec<f32> = coords.iter().copied().collect();
    let raw = common::decode_landmarks(&flattened)?;

    let first_scalar = |idx: usize| -> f32 {
        if outputs.len() > idx {
            outputs[idx]
                .try_extract_array::<f32>()
                .ok()
                .and_then(|arr| arr.iter().next().copied())
                .unwrap_or(0.0)
        } else {
            0.0
        }
    };
    let presence = first_scalar(1);
    let handedness = first_scalar(2);

    Ok(HandEstimate {
        landmarks: transform.normalize(&raw),
        confidence: (presence * region.score).clamp(0.0, 1.0),
        side: handedness_from_score(handedness),
    })
}

fn handedness_from_score(score: f32) -> Handedness {
    if score >= 0.5 {
        Handedness::Right
    } else if score > 0.0 {
        Handedness::Left
    } else {
        Handedness::Unknown
    }
}
