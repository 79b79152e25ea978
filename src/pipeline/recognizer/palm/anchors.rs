use std::sync::OnceLock;

use crate::pipeline::recognizer::common::PALM_INPUT_SIZE;

pub const NUM_ANCHORS: usize = 2016;

/// (stride, layers sharing that stride) of the palm detector's SSD heads.
const LAYER_GROUPS: [(u32, usize); 2] = [(8, 1), (16, 3)];
/// One anchor at aspect 1.0 plus the interpolated one, per layer.
const ANCHORS_PER_LAYER: usize = 2;
const ANCHOR_OFFSET: f32 = 0.5;

/// Normalized anchor centers, built once and shared for the process lifetime.
pub fn anchors() -> &'static [[f32; 2]] {
    static ANCHORS: OnceLock<Vec<[f32; 2]>> = OnceLock::new();
    ANCHORS.get_or_init(generate)
}

fn generate() -> Vec<[f32; 2]> {
    let mut anchors = Vec::with_capacity(NUM_ANCHORS);
    for (stride, layers) in LAYER_GROUPS {
        let cells = PALM_INPUT_SIZE.div_ceil(stride);
        let per_cell = layers * ANCHORS_PER_LAYER;
        for y in 0..cells {
            for x in 0..cells {
                let center = [
                    (x as f32 + ANCHOR_OFFSET) / cells as f32,
                    (y as f32 + ANCHOR_OFFSET) / cells as f32,
                ];
                anchors.extend(std::iter::repeat_n(center, per_cell));
            }
        }
    }
    anchors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_count_matches_model_output() {
        assert_eq!(anchors().len(), NUM_ANCHORS);
    }

    #[test]
    fn anchors_are_cell_centers() {
        let all = anchors();
        assert_eq!(all[0], [0.5 / 24.0, 0.5 / 24.0]);
        assert_eq!(all[1], all[0]);
        // First anchor of the 12x12 group.
        assert_eq!(all[24 * 24 * 2], [0.5 / 12.0, 0.5 / 12.0]);
        assert!(all.iter().all(|a| (0.0..1.0).contains(&a[0]) && (0.0..1.0).contains(&a[1])));
    }
}
