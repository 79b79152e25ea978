mod anchors;

use std::{cmp::Ordering, f32::consts::PI, path::Path};

use anchors::{NUM_ANCHORS, anchors};
use anyhow::{Context, Result, anyhow};
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;

use super::common::{LetterboxInfo, PALM_INPUT_SIZE, prepare_frame_with_size};
use crate::types::Frame;

const PALM_LANDMARKS: usize = 7;
const MIN_CROP_SIDE: f32 = 80.0;
const CROP_EXPANSION: f32 = 2.4;

#[derive(Clone, Debug)]
pub struct PalmRegion {
    /// x1, y1, x2, y2 in frame pixels.
    pub bbox: [f32; 4],
    pub landmarks: Vec<(f32, f32)>,
    pub score: f32,
}

#[derive(Clone, Debug)]
pub struct PalmDetectorConfig {
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub top_k: usize,
}

impl Default for PalmDetectorConfig {
    fn default() -> Self {
        Self {
            score_threshold: 0.5,
            nms_threshold: 0.3,
            top_k: 32,
        }
    }
}

pub struct PalmDetector {
    session: Session,
    cfg: PalmDetectorConfig,
}

impl PalmDetector {
    pub fn new(model_path: &Path, cfg: PalmDetectorConfig, intra_threads: usize) -> Result<Self> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)
            .with_context(|| {
                format!("failed to load palm detector from {}", model_path.display())
            })?;

        Ok(Self { session, cfg })
    }

    pub fn detect(&mut self, frame: &Frame) -> Result<Vec<PalmRegion>> {
        let (input, letterbox) = prepare_frame_with_size(frame, PALM_INPUT_SIZE)?;
        let tensor = Tensor::from_array(input)?;

        let outputs = self
            .session
            .run(ort::inputs![tensor])
            .context("failed to run palm detector session")?;

        if outputs.len() < 2 {
            return Err(anyhow!(
                "palm detector returned {} outputs, expected at least 2",
                outputs.len()
            ));
        }

        let boxes = outputs[0].try_extract_array::<f32>()?;
        let scores = outputs[1].try_extract_array::<f32>()?;

        let raw = RawPalmOutput {
            boxes: boxes
                .as_slice()
                .ok_or_else(|| anyhow!("palm boxes not contiguous"))?,
            box_shape: boxes.shape(),
            scores: scores
                .as_slice()
                .ok_or_else(|| anyhow!("palm scores not contiguous"))?,
            score_shape: scores.shape(),
        };

        decode_palm_outputs(&raw, &letterbox, &self.cfg)
    }
}

struct RawPalmOutput<'a> {
    boxes: &'a [f32],
    box_shape: &'a [usize],
    scores: &'a [f32],
    score_shape: &'a [usize],
}

/// Last two dimensions of a `[batch, anchors, features]` output.
fn anchor_and_feature_dims(shape: &[usize], what: &str) -> Result<(usize, usize)> {
    match shape {
        [.., anchor_dim, feature_dim] if shape.len() >= 3 => Ok((*anchor_dim, *feature_dim)),
        _ => Err(anyhow!(
            "unexpected palm {what} shape {shape:?}, need [batch, anchors, features]"
        )),
    }
}

fn decode_palm_outputs(
    raw: &RawPalmOutput<'_>,
    letterbox: &LetterboxInfo,
    cfg: &PalmDetectorConfig,
) -> Result<Vec<PalmRegion>> {
    let (anchor_dim, feature_dim) = anchor_and_feature_dims(raw.box_shape, "box")?;
    let (score_anchor_dim, score_feature_dim) = anchor_and_feature_dims(raw.score_shape, "score")?;

    if feature_dim < 4 + PALM_LANDMARKS * 2 {
        return Err(anyhow!("palm box feature dimension too small: {feature_dim}"));
    }
    if anchor_dim != score_anchor_dim {
        return Err(anyhow!(
            "anchor dimension mismatch between boxes ({anchor_dim}) and scores ({score_anchor_dim})"
        ));
    }

    let anchor_table = anchors();
    let count = NUM_ANCHORS.min(anchor_dim);
    let pad_bias_x = letterbox.pad_x / letterbox.scale;
    let pad_bias_y = letterbox.pad_y / letterbox.scale;
    let scale = letterbox.orig_w.max(letterbox.orig_h) as f32;
    let input = PALM_INPUT_SIZE as f32;

    let mut candidates = Vec::new();
    for (idx, anchor) in anchor_table.iter().enumerate().take(count) {
        let Some(&raw_score) = raw.scores.get(idx * score_feature_dim) else {
            return Err(anyhow!("missing score for palm anchor {idx}"));
        };
        let score = sigmoid(raw_score);
        if score < cfg.score_threshold {
            continue;
        }

        let offset = idx * feature_dim;
        let features = raw
            .boxes
            .get(offset..offset + 4 + PALM_LANDMARKS * 2)
            .ok_or_else(|| anyhow!("missing box features for palm anchor {idx}"))?;

        let to_frame = |dx: f32, dy: f32| {
            (
                (dx / input + anchor[0]) * scale - pad_bias_x,
                (dy / input + anchor[1]) * scale - pad_bias_y,
            )
        };

        let (cx, cy) = (features[0] / input + anchor[0], features[1] / input + anchor[1]);
        let (hw, hh) = (features[2] / input / 2.0, features[3] / input / 2.0);
        let mut bbox = [
            (cx - hw) * scale - pad_bias_x,
            (cy - hh) * scale - pad_bias_y,
            (cx + hw) * scale - pad_bias_x,
            (cy + hh) * scale - pad_bias_y,
        ];
        if bbox[2] <= bbox[0] || bbox[3] <= bbox[1] {
            continue;
        }
        clamp_box(&mut bbox, letterbox.orig_w, letterbox.orig_h);

        let landmarks = features[4..]
            .chunks_exact(2)
            .map(|pair| to_frame(pair[0], pair[1]))
            .collect();

        candidates.push(PalmRegion {
            bbox,
            landmarks,
            score,
        });
    }

    let kept = nms(&candidates, cfg.nms_threshold, cfg.top_k);
    Ok(kept
        .into_iter()
        .filter_map(|idx| candidates.get(idx).cloned())
        .collect())
}

/// The `limit` highest scoring regions, best first.
pub fn top_regions(regions: &[PalmRegion], limit: usize) -> Vec<&PalmRegion> {
    let mut sorted: Vec<&PalmRegion> = regions.iter().collect();
    sorted.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    sorted.truncate(limit);
    sorted
}

pub fn crop_from_palm(region: &PalmRegion) -> ((f32, f32), f32, f32) {
    let center = if region.landmarks.is_empty() {
        (
            (region.bbox[0] + region.bbox[2]) * 0.5,
            (region.bbox[1] + region.bbox[3]) * 0.5,
        )
    } else {
        let (sum_x, sum_y) = region
            .landmarks
            .iter()
            .fold((0.0_f32, 0.0_f32), |acc, p| (acc.0 + p.0, acc.1 + p.1));
        let n = region.landmarks.len() as f32;
        (sum_x / n, sum_y / n)
    };

    let base_w = (region.bbox[2] - region.bbox[0]).abs();
    let base_h = (region.bbox[3] - region.bbox[1]).abs();
    let landmark_span = if region.landmarks.is_empty() {
        0.0
    } else {
        let (min_x, max_x, min_y, max_y) = region
            .landmarks
            .iter()
            .fold((f32::MAX, f32::MIN, f32::MAX, f32::MIN), |acc, (x, y)| {
                (acc.0.min(*x), acc.1.max(*x), acc.2.min(*y), acc.3.max(*y))
            });
        (max_x - min_x).max(max_y - min_y)
    };
    // Expand generously to avoid cropping fingers away.
    let side = base_w.max(base_h).max(landmark_span).max(MIN_CROP_SIDE) * CROP_EXPANSION;

    (center, side, estimate_orientation(region))
}

/// Principal axis of the palm keypoints, rotated so the hand points up.
pub fn estimate_orientation(region: &PalmRegion) -> f32 {
    if region.landmarks.len() < 2 {
        return 0.0;
    }

    let n = region.landmarks.len() as f32;
    let (sx, sy) = region
        .landmarks
        .iter()
        .fold((0.0_f32, 0.0_f32), |acc, (x, y)| (acc.0 + x, acc.1 + y));
    let mean = (sx / n, sy / n);

    let (mut cov_xx, mut cov_xy, mut cov_yy) = (0.0, 0.0, 0.0);
    for (x, y) in &region.landmarks {
        let dx = x - mean.0;
        let dy = y - mean.1;
        cov_xx += dx * dx;
        cov_xy += dx * dy;
        cov_yy += dy * dy;
    }
    cov_xx /= n;
    cov_xy /= n;
    cov_yy /= n;

    let trace = cov_xx + cov_yy;
    let det = cov_xx * cov_yy - cov_xy * cov_xy;
    let lambda1 = (trace * 0.5 + ((trace * 0.5).powi(2) - det).max(0.0).sqrt()).max(1e-6);
    let (vx, vy) = if cov_xy.abs() > 1e-6 {
        (lambda1 - cov_yy, cov_xy)
    } else if cov_xx >= cov_yy {
        (1.0, 0.0)
    } else {
        (0.0, 1.0)
    };

    vy.atan2(vx) - PI * 0.5
}

fn nms(candidates: &[PalmRegion], threshold: f32, top_k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|a, b| {
        candidates[*b]
            .score
            .partial_cmp(&candidates[*a].score)
            .unwrap_or(Ordering::Equal)
    });

    let mut keep: Vec<usize> = Vec::new();
    for idx in order {
        if keep.len() >= top_k {
            break;
        }
        let overlaps = keep
            .iter()
            .any(|&k| iou(&candidates[idx].bbox, &candidates[k].bbox) >= threshold);
        if !overlaps {
            keep.push(idx);
        }
    }
    keep
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let inter_w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let inter_h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = inter_w * inter_h;
    if inter <= 0.0 {
        return 0.0;
    }

    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn clamp_box(bbox: &mut [f32; 4], w: u32, h: u32) {
    let max_w = (w.saturating_sub(1)) as f32;
    let max_h = (h.saturating_sub(1)) as f32;
    bbox[0] = bbox[0].clamp(0.0, max_w);
    bbox[1] = bbox[1].clamp(0.0, max_h);
    bbox[2] = bbox[2].clamp(0.0, max_w);
    bbox[3] = bbox[3].clamp(0.0, max_h);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(bbox: [f32; 4], score: f32) -> PalmRegion {
        PalmRegion {
            bbox,
            landmarks: Vec::new(),
            score,
        }
    }

    #[test]
    fn overlapping_regions_are_suppressed() {
        let candidates = vec![
            region([0.0, 0.0, 10.0, 10.0], 0.6),
            region([1.0, 1.0, 11.0, 11.0], 0.9),
            region([50.0, 50.0, 60.0, 60.0], 0.7),
        ];
        assert_eq!(nms(&candidates, 0.3, 32), vec![1, 2]);
        assert_eq!(nms(&candidates, 0.3, 1), vec![1]);
    }

    #[test]
    fn iou_of_disjoint_and_identical_boxes() {
        let a = [0.0, 0.0, 10.0, 10.0];
        assert_eq!(iou(&a, &[20.0, 20.0, 30.0, 30.0]), 0.0);
        assert_eq!(iou(&a, &a), 1.0);
    }

    #[test]
    fn top_regions_are_best_first() {
        let regions = vec![
            region([0.0; 4], 0.2),
            region([0.0; 4], 0.8),
            region([0.0; 4], 0.5),
        ];
        let scores: Vec<f32> = top_regions(&regions, 2).iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![0.8, 0.5]);
    }

    #[test]
    fn small_palms_get_a_minimum_crop() {
        let (center, side, angle) = crop_from_palm(&region([10.0, 10.0, 20.0, 30.0], 0.9));
        assert_eq!(center, (15.0, 20.0));
        assert_eq!(side, MIN_CROP_SIDE * CROP_EXPANSION);
        assert_eq!(angle, 0.0);
    }

    #[test]
    fn decodes_single_confident_anchor() {
        let features = 4 + PALM_LANDMARKS * 2;
        let mut boxes = vec![0.0f32; 2 * features];
        boxes[2] = 19.2;
        boxes[3] = 19.2;
        let scores = vec![10.0f32, -10.0];
        let raw = RawPalmOutput {
            boxes: &boxes,
            box_shape: &[1, 2, features],
            scores: &scores,
            score_shape: &[1, 2, 1],
        };
        let letterbox = LetterboxInfo {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
            orig_w: 192,
            orig_h: 192,
        };

        let regions = decode_palm_outputs(&raw, &letterbox, &PalmDetectorConfig::default()).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].landmarks.len(), PALM_LANDMARKS);
        assert!(regions[0].score > 0.99);
    }

    #[test]
    fn malformed_shapes_are_errors() {
        let raw = RawPalmOutput {
            boxes: &[],
            box_shape: &[2, 18],
            scores: &[],
            score_shape: &[1, 2, 1],
        };
        let letterbox = LetterboxInfo {
            scale: 1.0,
            pad_x: 0.0,
            pad_y: 0.0,
            orig_w: 1,
            orig_h: 1,
        };
        assert!(decode_palm_outputs(&raw, &letterbox, &PalmDetectorConfig::default()).is_err());
    }
}
