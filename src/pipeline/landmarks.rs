use anyhow::Result;

use crate::types::{Frame, HandObservation, Handedness, Landmark};

/// Per-frame output of a landmark model. `labels` is index-aligned with
/// `hands` but may be shorter when the model could not tell the side.
#[derive(Clone, Debug, Default)]
pub struct LandmarkResult {
    pub hands: Vec<Vec<Landmark>>,
    pub labels: Vec<Handedness>,
}

impl LandmarkResult {
    pub fn observations(self) -> Vec<HandObservation> {
        let LandmarkResult { hands, labels } = self;
        hands
            .into_iter()
            .enumerate()
            .map(|(idx, landmarks)| HandObservation {
                landmarks,
                side: labels.get(idx).copied().unwrap_or(Handedness::Unknown),
            })
            .collect()
    }
}

pub trait LandmarkSource: Send + 'static {
    fn detect(&mut self, frame: &Frame) -> Result<LandmarkResult>;

    /// Frees the model. Called once, after the capture worker has stopped
    /// reading frames.
    fn release(&mut self);
}
